//! Shared test fixtures for integration tests.

use chrono::NaiveDateTime;
use pv_kpi::config::{PlantConfig, UnitConfig};
use pv_kpi::pipeline::types::Sample;
use serde_json::{Value, json};

/// Parses a `YYYY-MM-DD HH:MM:SS` timestamp.
pub fn ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
}

/// Two-unit plant (36 kW / 60 kW) with a full-nameplate operating base,
/// so interval energies compare directly against nominal power.
pub fn two_unit_config() -> PlantConfig {
    let mut cfg = PlantConfig::site_default();
    cfg.units = vec![
        UnitConfig {
            id: "PM01".to_string(),
            nominal_kw: 36.0,
        },
        UnitConfig {
            id: "PM02".to_string(),
            nominal_kw: 60.0,
        },
    ];
    cfg.availability.operating_factor = 1.0;
    cfg
}

/// Builds a raw sample from an arbitrary payload.
pub fn sample(id: i64, when: &str, payload: Value) -> Sample {
    Sample {
        id,
        ts: ts(when),
        payload,
    }
}

/// Builds a sample with agreeing irradiance sensors and both counters.
pub fn plant_sample(id: i64, when: &str, irr: f64, pm01_kwh: f64, pm02_kwh: f64) -> Sample {
    sample(
        id,
        when,
        json!({
            "IRRADIANCE_PLC1(W/m^2)": irr,
            "IRRADIANCE_PLC2(W/m^2)": irr,
            "PM01_ACTIVE_ENERGY_SUPPLIED_(kWh)": pm01_kwh,
            "PM02_ACTIVE_ENERGY_SUPPLIED_(kWh)": pm02_kwh,
        }),
    )
}
