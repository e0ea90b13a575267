//! Core pipeline types: raw samples, series points, and result rows.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use serde_json::Value;

/// One raw telemetry record: timestamp plus a flat tag→value payload.
///
/// Immutable once ingested; every derived quantity is recomputed from the
/// full sample window on each run.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Source row identifier.
    pub id: i64,
    /// Sample timestamp.
    pub ts: NaiveDateTime,
    /// Flat JSON object mapping tag names to numeric or string values.
    pub payload: Value,
}

impl Sample {
    /// Raw payload field for a tag, if present.
    pub fn field(&self, tag: &str) -> Option<&Value> {
        self.payload.get(tag)
    }

    /// Numeric payload field for a tag, coerced per [`coerce_numeric`].
    pub fn numeric(&self, tag: &str) -> Option<f64> {
        self.field(tag).and_then(coerce_numeric)
    }
}

/// Coerces a payload value to a float.
///
/// Accepts JSON numbers and decimal strings with either `.` or `,` as the
/// separator. Empty strings and the literals `"null"` / `"None"` coerce
/// to absent, matching what the upstream devices emit for dead channels.
pub fn coerce_numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || s == "null" || s == "None" {
                return None;
            }
            s.replace(',', ".").parse().ok()
        }
        _ => None,
    }
}

/// One timestamped numeric point from a streaming series.
///
/// Keeps the upstream timestamp string untouched so tick payloads can echo
/// it verbatim.
#[derive(Debug, Clone)]
pub struct SeriesPoint {
    /// Parsed timestamp.
    pub ts: NaiveDateTime,
    /// Timestamp exactly as received.
    pub raw_ts: String,
    /// Numeric value.
    pub value: f64,
}

/// One published availability record for a (bucket, unit) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct AvailabilityRow {
    /// Representative source row id for the bucket (first sample).
    pub sample_id: i64,
    /// Representative sample timestamp for the bucket (first sample).
    pub ts: NaiveDateTime,
    /// Bucket start (floored).
    pub bucket: NaiveDateTime,
    /// Inverter unit id.
    pub unit: String,
    /// Last cumulative counter reading in the bucket (kWh, 0 when absent).
    pub energy_last_kwh: f64,
    /// Predecessor cumulative reading (kWh, 0 when absent).
    pub energy_prev_kwh: f64,
    /// Interval energy produced in the bucket (kWh, >= 0).
    pub energy_net_kwh: f64,
    /// Bucket irradiance: maximum reconciled reading (W/m², 0 when absent).
    pub irradiance_wm2: f64,
    /// Previous bucket's irradiance (W/m², 0 for the first bucket).
    pub irradiance_prev_wm2: f64,
    /// Hours the plant was expected to produce.
    pub hper_h: f64,
    /// Hours under maintenance, capped by `hper_h`.
    pub hama_h: f64,
    /// Hours unavailable for unexplained reasons, capped by `hper_h`.
    pub huna_h: f64,
    /// Interval energy over the operating-base expectation, in [0, 1].
    pub operating_frac: f64,
    /// Per-unit availability for the bucket (percent).
    pub ainv_pct: f64,
    /// This unit's weighted contribution to fleet availability (fraction).
    pub asys_share: f64,
    /// Fleet availability for the bucket (percent, repeated per row).
    pub asys_pct: f64,
    /// Fleet operating base power (kW).
    pub psys_kw: f64,
    /// This unit's operating base power (kW).
    pub nominal_kw: f64,
}

/// One published performance-ratio record for a (bucket, unit) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceRow {
    /// Bucket start (floored).
    pub bucket: NaiveDateTime,
    /// Inverter unit id.
    pub unit: String,
    /// Interval energy (kWh; forced to 0 below the irradiance threshold).
    pub energy_net_kwh: f64,
    /// Bucket irradiance: maximum reconciled reading (W/m²).
    pub irradiance_wm2: f64,
    /// Incident irradiation energy density (kWh/m²; forced to 0 below threshold).
    pub gdgi_kwh_m2: f64,
    /// Expected module temperature for the bucket's month (°C).
    pub tmod_c: f64,
    /// Matched ambient temperature (°C, 0 when no reading within tolerance).
    pub tmeas_c: f64,
    /// Blended module temperature coefficient (1/°C).
    pub beta_per_c: f64,
    /// Thermal loss factor for the bucket (p.u.).
    pub lt_pu: f64,
    /// Unit share of the fleet STC rating (kWp).
    pub stc_kwp: f64,
    /// Per-unit performance ratio (percent).
    pub pri_pct: f64,
    /// Fleet performance ratio (percent, repeated per row).
    pub pr_pct: f64,
}

/// Availability output of one streaming tick.
#[derive(Debug, Clone)]
pub struct TickAvailability {
    /// Latest contributing upstream timestamp, echoed verbatim.
    pub ts: String,
    /// Per-unit availability (percent), keyed by unit id.
    pub ainv_pct: BTreeMap<String, f64>,
    /// Fleet availability (percent).
    pub asys_pct: f64,
}

impl fmt::Display for TickAvailability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "availability tick @ {}: av={:.2}% over {} unit(s)",
            self.ts,
            self.asys_pct,
            self.ainv_pct.len()
        )
    }
}

/// Performance-ratio output of one streaming tick.
#[derive(Debug, Clone)]
pub struct TickPerformance {
    /// Latest contributing upstream timestamp, echoed verbatim.
    pub ts: String,
    /// Per-unit performance ratio (percent), keyed by unit id.
    pub pri_pct: BTreeMap<String, f64>,
    /// Fleet performance ratio (percent).
    pub pr_pct: f64,
}

impl fmt::Display for TickPerformance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "performance tick @ {}: pr={:.2}% over {} unit(s)",
            self.ts,
            self.pr_pct,
            self.pri_pct.len()
        )
    }
}

/// Rounds to two decimals, the precision of every published percentage
/// and hour field.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
