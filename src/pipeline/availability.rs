//! Availability decomposition (HPER/HAMA/HUNA) and fleet aggregation.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;
use tracing::info;

use crate::config::PlantConfig;
use crate::error::{KpiError, Result};

use super::bucket;
use super::counters::{self, CounterDelta, TickInterval};
use super::irradiance;
use super::maintenance::{self, MaintenanceNote};
use super::types::{AvailabilityRow, Sample, TickAvailability, round2};

/// Numeric floor below which a value is treated as zero.
const EPSILON: f64 = 1e-9;

/// Batch availability engine.
///
/// Recomputes the full (bucket × unit) grid from a frozen sample window:
/// every run is a pure function of its input, so re-publication is
/// idempotent.
pub struct AvailabilityEngine<'a> {
    cfg: &'a PlantConfig,
}

impl<'a> AvailabilityEngine<'a> {
    /// Creates an engine borrowing the immutable plant configuration.
    pub fn new(cfg: &'a PlantConfig) -> Self {
        Self { cfg }
    }

    /// Computes one availability row per (bucket, configured unit).
    ///
    /// The bucket axis covers every sample timestamp; configured units
    /// with no samples in a bucket receive a zero-filled row. An empty
    /// sample window yields an empty result, not an error.
    pub fn run(&self, samples: &[Sample]) -> Vec<AvailabilityRow> {
        let cfg = self.cfg;
        let block_h = cfg.availability.block_hours;
        let step_minutes = block_h * 60.0;
        let threshold = cfg.availability.irradiance_threshold_wm2;
        let unit_ids = cfg.unit_ids();

        let mut sorted: Vec<&Sample> = samples.iter().collect();
        sorted.sort_by_key(|s| s.ts);
        if sorted.is_empty() {
            return Vec::new();
        }

        // Per-sample passes: representative row, reconciled irradiance,
        // maintenance flags. Reconciliation happens before bucketing.
        let mut representative: BTreeMap<NaiveDateTime, (i64, NaiveDateTime)> = BTreeMap::new();
        let mut irr_points: Vec<(NaiveDateTime, Option<f64>)> = Vec::with_capacity(sorted.len());
        let mut flagged: BTreeMap<NaiveDateTime, BTreeSet<String>> = BTreeMap::new();
        for s in &sorted {
            let b = bucket::floor_to_step(s.ts, step_minutes);
            representative.entry(b).or_insert((s.id, s.ts));
            irr_points.push((
                s.ts,
                irradiance::reconcile(
                    s.numeric(&cfg.tags.irradiance_primary),
                    s.numeric(&cfg.tags.irradiance_secondary),
                ),
            ));
            if let MaintenanceNote::Units(set) =
                maintenance::parse_annotation(s.field(&cfg.tags.maintenance), &unit_ids)
            {
                flagged.entry(b).or_default().extend(set);
            }
        }

        let irr_by_bucket = bucket::max_per_bucket(&irr_points, step_minutes);
        let axis = bucket::bucket_axis(sorted.iter().map(|s| s.ts), step_minutes);

        let mut deltas_by_unit: BTreeMap<&str, Vec<CounterDelta>> = BTreeMap::new();
        for unit in &cfg.units {
            let tag = cfg.energy_tag(&unit.id);
            let pts: Vec<(NaiveDateTime, Option<f64>)> =
                sorted.iter().map(|s| (s.ts, s.numeric(&tag))).collect();
            let by_bucket = bucket::last_per_bucket(&pts, step_minutes);
            let series: Vec<Option<f64>> =
                axis.iter().map(|b| by_bucket.get(b).copied()).collect();
            deltas_by_unit.insert(unit.id.as_str(), counters::interval_energies(&series));
        }

        let psys_kw = cfg.psys_operating_kw();
        let mut rows = Vec::with_capacity(axis.len() * cfg.units.len());
        let mut prev_irr = 0.0;
        for (i, &bucket_ts) in axis.iter().enumerate() {
            let irr_actual = irr_by_bucket.get(&bucket_ts).copied();
            let hper = if irr_actual.unwrap_or(0.0) < threshold {
                0.0
            } else {
                round2(block_h)
            };
            let (sample_id, ts) = representative
                .get(&bucket_ts)
                .copied()
                .unwrap_or((0, bucket_ts));
            let under_maintenance = flagged.get(&bucket_ts);

            let bucket_start = rows.len();
            let mut asys_sum = 0.0;
            for unit in &cfg.units {
                let delta = deltas_by_unit
                    .get(unit.id.as_str())
                    .and_then(|d| d.get(i))
                    .copied()
                    .unwrap_or(CounterDelta {
                        last_kwh: None,
                        prev_kwh: None,
                        energy_kwh: 0.0,
                    });
                let op_kw = unit.nominal_kw * cfg.availability.operating_factor;
                let expected_kwh = (op_kw * block_h).max(EPSILON);
                let operating_frac = (delta.energy_kwh / expected_kwh).clamp(0.0, 1.0);

                // Hard-zero energy charges the full block; the proportional
                // shortfall applies only when some energy was produced.
                let huna_raw = if delta.energy_kwh > 0.0 {
                    (1.0 - operating_frac) * block_h
                } else {
                    block_h
                };
                let hama_raw = if under_maintenance.is_some_and(|set| set.contains(&unit.id)) {
                    block_h
                } else {
                    0.0
                };
                let hama = round2(hama_raw.min(hper));
                let huna = round2(huna_raw.min(hper));

                // A no-production bucket reports fully available: nothing
                // expected, nothing missed.
                let ainv_frac = if hper > 0.0 {
                    (1.0 - huna / hper).clamp(0.0, 1.0)
                } else {
                    1.0
                };
                let ainv_pct = round2(ainv_frac * 100.0);
                let asys_share = if psys_kw > EPSILON {
                    op_kw * (ainv_pct / 100.0) / psys_kw
                } else {
                    0.0
                };
                asys_sum += asys_share;

                rows.push(AvailabilityRow {
                    sample_id,
                    ts,
                    bucket: bucket_ts,
                    unit: unit.id.clone(),
                    energy_last_kwh: delta.last_kwh.unwrap_or(0.0),
                    energy_prev_kwh: delta.prev_kwh.unwrap_or(0.0),
                    energy_net_kwh: delta.energy_kwh,
                    irradiance_wm2: irr_actual.unwrap_or(0.0),
                    irradiance_prev_wm2: prev_irr,
                    hper_h: hper,
                    hama_h: hama,
                    huna_h: huna,
                    operating_frac,
                    ainv_pct,
                    asys_share,
                    asys_pct: 0.0,
                    psys_kw,
                    nominal_kw: op_kw,
                });
            }

            let asys_pct = round2((asys_sum * 100.0).clamp(0.0, 100.0));
            for row in &mut rows[bucket_start..] {
                row.asys_pct = asys_pct;
            }
            prev_irr = irr_actual.unwrap_or(0.0);
        }

        info!(
            buckets = axis.len(),
            units = cfg.units.len(),
            rows = rows.len(),
            "availability batch computed"
        );
        rows
    }
}

/// Streaming availability over one short live window.
///
/// Coarser than the batch decomposition: with mean irradiance at or below
/// the threshold nothing is expected to produce, so no hours are charged;
/// otherwise a unit's shortfall against the mean of its peers' interval
/// energy scales the window length.
pub fn availability_tick(
    cfg: &PlantConfig,
    mean_irradiance_wm2: Option<f64>,
    intervals: &BTreeMap<String, TickInterval>,
) -> Result<TickAvailability> {
    if intervals.is_empty() {
        return Err(KpiError::InsufficientData(
            "no inverter series with enough samples in the window".into(),
        ));
    }

    let irr = mean_irradiance_wm2.unwrap_or(0.0);
    let threshold = cfg.availability.irradiance_threshold_wm2;
    let ratio_threshold = cfg.availability.peer_ratio_threshold;

    let mut ainv_pct = BTreeMap::new();
    let mut weighted_sum = 0.0;
    let mut psys_kw = 0.0;
    for (unit, interval) in intervals {
        let (hper_h, huna_h) = if irr <= threshold {
            (0.0, 0.0)
        } else {
            let hper_h = interval.span_hours;
            let huna_h = if interval.energy_kwh.abs() < EPSILON {
                hper_h
            } else {
                let peers: Vec<f64> = intervals
                    .iter()
                    .filter(|(peer, _)| peer.as_str() != unit.as_str())
                    .map(|(_, i)| i.energy_kwh)
                    .collect();
                let peer_mean = if peers.is_empty() {
                    0.0
                } else {
                    peers.iter().sum::<f64>() / peers.len() as f64
                };
                if peer_mean.abs() > EPSILON {
                    let ratio = interval.energy_kwh / peer_mean;
                    if ratio < ratio_threshold {
                        (1.0 - ratio) * hper_h
                    } else {
                        0.0
                    }
                } else {
                    0.0
                }
            };
            (hper_h, huna_h)
        };

        let ainv = if hper_h <= EPSILON {
            0.0
        } else {
            (1.0 - huna_h / hper_h).clamp(0.0, 1.0)
        };
        // Units missing from the nominal-power table weigh nothing.
        let weight = cfg.nominal_kw(unit).unwrap_or(0.0);
        psys_kw += weight;
        weighted_sum += weight * ainv;
        ainv_pct.insert(unit.clone(), round2(ainv * 100.0));
    }

    if psys_kw <= EPSILON {
        return Err(KpiError::InsufficientData(
            "no configured unit contributed a measurement".into(),
        ));
    }

    let ts = intervals
        .values()
        .max_by_key(|i| i.last_ts)
        .map(|i| i.last_raw_ts.clone())
        .ok_or_else(|| KpiError::InsufficientData("no contributing timestamp".into()))?;

    Ok(TickAvailability {
        ts,
        ainv_pct,
        asys_pct: round2(weighted_sum / psys_kw * 100.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn test_config(units: &[(&str, f64)]) -> PlantConfig {
        let mut cfg = PlantConfig::site_default();
        cfg.units = units
            .iter()
            .map(|&(id, nominal_kw)| crate::config::UnitConfig {
                id: id.to_string(),
                nominal_kw,
            })
            .collect();
        cfg.availability.operating_factor = 1.0;
        cfg
    }

    fn sample(id: i64, when: &str, payload: serde_json::Value) -> Sample {
        Sample {
            id,
            ts: ts(when),
            payload,
        }
    }

    fn row<'r>(rows: &'r [AvailabilityRow], bucket: &str, unit: &str) -> &'r AvailabilityRow {
        rows.iter()
            .find(|r| r.bucket == ts(bucket) && r.unit == unit)
            .unwrap()
    }

    #[test]
    fn empty_input_yields_no_rows() {
        let cfg = test_config(&[("PM01", 36.0)]);
        let rows = AvailabilityEngine::new(&cfg).run(&[]);
        assert!(rows.is_empty());
    }

    #[test]
    fn fleet_asys_is_power_weighted() {
        let cfg = test_config(&[("PM01", 36.0), ("PM02", 60.0)]);
        let samples = vec![
            sample(
                1,
                "2025-03-01 10:00:00",
                json!({
                    "IRRADIANCE_PLC1(W/m^2)": 500.0,
                    "IRRADIANCE_PLC2(W/m^2)": 500.0,
                    "PM01_ACTIVE_ENERGY_SUPPLIED_(kWh)": 1000.0,
                    "PM02_ACTIVE_ENERGY_SUPPLIED_(kWh)": 2000.0,
                }),
            ),
            sample(
                2,
                "2025-03-01 11:00:00",
                json!({
                    "IRRADIANCE_PLC1(W/m^2)": 510.0,
                    "IRRADIANCE_PLC2(W/m^2)": 510.0,
                    "PM01_ACTIVE_ENERGY_SUPPLIED_(kWh)": 1036.0,
                    "PM02_ACTIVE_ENERGY_SUPPLIED_(kWh)": 2030.0,
                }),
            ),
        ];
        let rows = AvailabilityEngine::new(&cfg).run(&samples);
        assert_eq!(rows.len(), 4);

        // second bucket: PM01 at full output, PM02 at half
        let r1 = row(&rows, "2025-03-01 11:00:00", "PM01");
        let r2 = row(&rows, "2025-03-01 11:00:00", "PM02");
        assert_eq!(r1.energy_net_kwh, 36.0);
        assert_eq!(r1.huna_h, 0.0);
        assert_eq!(r1.ainv_pct, 100.0);
        assert_eq!(r2.energy_net_kwh, 30.0);
        assert_eq!(r2.huna_h, 0.5);
        assert_eq!(r2.ainv_pct, 50.0);
        // (36*1.0 + 60*0.5) / 96 * 100
        assert_eq!(r1.asys_pct, 68.75);
        assert_eq!(r2.asys_pct, 68.75);
    }

    #[test]
    fn zero_production_above_threshold_charges_full_block() {
        let cfg = test_config(&[("PM01", 36.0)]);
        let samples = vec![
            sample(
                1,
                "2025-03-01 10:00:00",
                json!({
                    "IRRADIANCE_PLC1(W/m^2)": 400.0,
                    "IRRADIANCE_PLC2(W/m^2)": 400.0,
                    "PM01_ACTIVE_ENERGY_SUPPLIED_(kWh)": 500.0,
                }),
            ),
            sample(
                2,
                "2025-03-01 11:00:00",
                json!({
                    "IRRADIANCE_PLC1(W/m^2)": 400.0,
                    "IRRADIANCE_PLC2(W/m^2)": 400.0,
                    "PM01_ACTIVE_ENERGY_SUPPLIED_(kWh)": 500.0,
                }),
            ),
        ];
        let rows = AvailabilityEngine::new(&cfg).run(&samples);
        let r = row(&rows, "2025-03-01 11:00:00", "PM01");
        assert_eq!(r.energy_net_kwh, 0.0);
        assert_eq!(r.hper_h, 1.0);
        assert_eq!(r.huna_h, 1.0);
        assert_eq!(r.ainv_pct, 0.0);
    }

    #[test]
    fn below_threshold_bucket_reports_full_availability() {
        let cfg = test_config(&[("PM01", 36.0)]);
        let samples = vec![sample(
            1,
            "2025-03-01 03:10:00",
            json!({
                "IRRADIANCE_PLC1(W/m^2)": 0.0,
                "IRRADIANCE_PLC2(W/m^2)": 0.0,
                "PM01_ACTIVE_ENERGY_SUPPLIED_(kWh)": 500.0,
            }),
        )];
        let rows = AvailabilityEngine::new(&cfg).run(&samples);
        let r = row(&rows, "2025-03-01 03:00:00", "PM01");
        assert_eq!(r.hper_h, 0.0);
        assert_eq!(r.huna_h, 0.0);
        assert_eq!(r.hama_h, 0.0);
        assert_eq!(r.ainv_pct, 100.0);
        assert_eq!(r.asys_pct, 100.0);
    }

    #[test]
    fn maintenance_is_masked_by_hper() {
        let cfg = test_config(&[("PM01", 36.0), ("PM02", 60.0)]);
        let night = sample(
            1,
            "2025-03-01 03:00:00",
            json!({
                "IRRADIANCE_PLC1(W/m^2)": 0.0,
                "IRRADIANCE_PLC2(W/m^2)": 0.0,
                "MAINTENANCE": "PM01",
            }),
        );
        let day = sample(
            2,
            "2025-03-01 10:00:00",
            json!({
                "IRRADIANCE_PLC1(W/m^2)": 600.0,
                "IRRADIANCE_PLC2(W/m^2)": 600.0,
                "MAINTENANCE": "PM01",
            }),
        );
        let rows = AvailabilityEngine::new(&cfg).run(&[night, day]);

        // at night HPER = 0 masks the maintenance hours entirely
        let r_night = row(&rows, "2025-03-01 03:00:00", "PM01");
        assert_eq!(r_night.hper_h, 0.0);
        assert_eq!(r_night.hama_h, 0.0);

        // in daylight the flagged unit carries a full maintenance hour
        let r_day = row(&rows, "2025-03-01 10:00:00", "PM01");
        assert_eq!(r_day.hper_h, 1.0);
        assert_eq!(r_day.hama_h, 1.0);
        let r_day_other = row(&rows, "2025-03-01 10:00:00", "PM02");
        assert_eq!(r_day_other.hama_h, 0.0);
    }

    #[test]
    fn caps_hold_for_every_row() {
        let cfg = test_config(&[("PM01", 36.0), ("PM02", 60.0)]);
        let samples: Vec<Sample> = (0..6)
            .map(|i| {
                sample(
                    i,
                    &format!("2025-03-01 {:02}:30:00", 6 + i),
                    json!({
                        "IRRADIANCE_PLC1(W/m^2)": 30.0 * i as f64,
                        "IRRADIANCE_PLC2(W/m^2)": 40.0 * i as f64,
                        "PM01_ACTIVE_ENERGY_SUPPLIED_(kWh)": 100.0 + 3.0 * i as f64,
                        "MAINTENANCE": if i % 2 == 0 { "PM01" } else { "NONE" },
                    }),
                )
            })
            .collect();
        let rows = AvailabilityEngine::new(&cfg).run(&samples);
        for r in &rows {
            assert!(r.hama_h <= r.hper_h, "HAMA {} > HPER {}", r.hama_h, r.hper_h);
            assert!(r.huna_h <= r.hper_h, "HUNA {} > HPER {}", r.huna_h, r.hper_h);
            assert!(r.energy_net_kwh >= 0.0);
            if r.hper_h == 0.0 {
                assert_eq!(r.hama_h, 0.0);
                assert_eq!(r.huna_h, 0.0);
            }
        }
    }

    #[test]
    fn units_without_samples_get_zero_filled_rows() {
        let cfg = test_config(&[("PM01", 36.0), ("PM02", 60.0)]);
        let samples = vec![
            sample(
                1,
                "2025-03-01 10:00:00",
                json!({
                    "IRRADIANCE_PLC1(W/m^2)": 500.0,
                    "IRRADIANCE_PLC2(W/m^2)": 500.0,
                    "PM01_ACTIVE_ENERGY_SUPPLIED_(kWh)": 1000.0,
                }),
            ),
            sample(
                2,
                "2025-03-01 11:00:00",
                json!({
                    "IRRADIANCE_PLC1(W/m^2)": 500.0,
                    "IRRADIANCE_PLC2(W/m^2)": 500.0,
                    "PM01_ACTIVE_ENERGY_SUPPLIED_(kWh)": 1010.0,
                }),
            ),
        ];
        let rows = AvailabilityEngine::new(&cfg).run(&samples);
        let r = row(&rows, "2025-03-01 11:00:00", "PM02");
        assert_eq!(r.energy_net_kwh, 0.0);
        assert_eq!(r.energy_last_kwh, 0.0);
        assert_eq!(r.huna_h, 1.0);
        assert_eq!(r.ainv_pct, 0.0);
    }

    #[test]
    fn recomputation_is_idempotent() {
        let cfg = test_config(&[("PM01", 36.0), ("PM02", 60.0)]);
        let samples: Vec<Sample> = (0..8)
            .map(|i| {
                sample(
                    i,
                    &format!("2025-03-01 {:02}:15:00", 6 + i),
                    json!({
                        "IRRADIANCE_PLC1(W/m^2)": 80.0 + i as f64,
                        "IRRADIANCE_PLC2(W/m^2)": 82.0 + i as f64,
                        "PM01_ACTIVE_ENERGY_SUPPLIED_(kWh)": 100.0 + 5.0 * i as f64,
                        "PM02_ACTIVE_ENERGY_SUPPLIED_(kWh)": 300.0 + 8.0 * i as f64,
                    }),
                )
            })
            .collect();
        let engine = AvailabilityEngine::new(&cfg);
        assert_eq!(engine.run(&samples), engine.run(&samples));
    }

    #[test]
    fn previous_irradiance_tracks_the_axis() {
        let cfg = test_config(&[("PM01", 36.0)]);
        let samples = vec![
            sample(1, "2025-03-01 09:00:00", json!({"IRRADIANCE_PLC1(W/m^2)": 100.0, "IRRADIANCE_PLC2(W/m^2)": 100.0})),
            sample(2, "2025-03-01 10:00:00", json!({"IRRADIANCE_PLC1(W/m^2)": 250.0, "IRRADIANCE_PLC2(W/m^2)": 250.0})),
        ];
        let rows = AvailabilityEngine::new(&cfg).run(&samples);
        assert_eq!(row(&rows, "2025-03-01 09:00:00", "PM01").irradiance_prev_wm2, 0.0);
        let r = row(&rows, "2025-03-01 10:00:00", "PM01");
        assert_eq!(r.irradiance_wm2, 250.0);
        assert_eq!(r.irradiance_prev_wm2, 100.0);
    }

    fn interval(span_hours: f64, energy_kwh: f64, last: &str) -> TickInterval {
        TickInterval {
            span_hours,
            energy_kwh,
            last_ts: ts(last),
            last_raw_ts: last.to_string(),
        }
    }

    #[test]
    fn tick_below_threshold_reports_zero_availability() {
        let cfg = test_config(&[("PM01", 36.0), ("PM02", 60.0)]);
        let intervals = BTreeMap::from([
            ("PM01".to_string(), interval(1.0, 10.0, "2025-03-01 05:00:00")),
            ("PM02".to_string(), interval(1.0, 12.0, "2025-03-01 05:01:00")),
        ]);
        let tick = availability_tick(&cfg, Some(20.0), &intervals).unwrap();
        assert_eq!(tick.asys_pct, 0.0);
        assert!(tick.ainv_pct.values().all(|&v| v == 0.0));
        assert_eq!(tick.ts, "2025-03-01 05:01:00");
    }

    #[test]
    fn tick_peer_shortfall_charges_hours() {
        let cfg = test_config(&[("PM01", 40.0), ("PM02", 40.0), ("PM03", 40.0)]);
        let intervals = BTreeMap::from([
            ("PM01".to_string(), interval(1.0, 10.0, "2025-03-01 12:00:00")),
            ("PM02".to_string(), interval(1.0, 10.0, "2025-03-01 12:00:00")),
            ("PM03".to_string(), interval(1.0, 2.0, "2025-03-01 12:00:00")),
        ]);
        let tick = availability_tick(&cfg, Some(400.0), &intervals).unwrap();
        // PM03 peers average 10 kWh, ratio 0.2 < 0.9 charges 0.8 h
        assert_eq!(tick.ainv_pct.get("PM03"), Some(&20.0));
        // PM01 peers average (10 + 2) / 2 = 6, ratio > 0.9 charges nothing
        assert_eq!(tick.ainv_pct.get("PM01"), Some(&100.0));
    }

    #[test]
    fn tick_zero_energy_is_fully_unavailable() {
        let cfg = test_config(&[("PM01", 36.0), ("PM02", 60.0)]);
        let intervals = BTreeMap::from([
            ("PM01".to_string(), interval(1.0, 0.0, "2025-03-01 12:00:00")),
            ("PM02".to_string(), interval(1.0, 15.0, "2025-03-01 12:00:00")),
        ]);
        let tick = availability_tick(&cfg, Some(400.0), &intervals).unwrap();
        assert_eq!(tick.ainv_pct.get("PM01"), Some(&0.0));
        assert_eq!(tick.ainv_pct.get("PM02"), Some(&100.0));
        // (36*0 + 60*1) / 96 * 100
        assert_eq!(tick.asys_pct, 62.5);
    }

    #[test]
    fn tick_without_measurements_is_an_error() {
        let cfg = test_config(&[("PM01", 36.0)]);
        let err = availability_tick(&cfg, Some(400.0), &BTreeMap::new());
        assert!(matches!(err, Err(KpiError::InsufficientData(_))));
    }

    #[test]
    fn tick_with_only_unconfigured_units_is_an_error() {
        let cfg = test_config(&[("PM01", 36.0)]);
        let intervals = BTreeMap::from([(
            "PM99".to_string(),
            interval(1.0, 5.0, "2025-03-01 12:00:00"),
        )]);
        let err = availability_tick(&cfg, Some(400.0), &intervals);
        assert!(matches!(err, Err(KpiError::InsufficientData(_))));
    }
}
