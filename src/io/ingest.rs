//! Batch sample ingestion from CSV dumps of the raw telemetry table.

use std::path::Path;

use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::{KpiError, Result};
use crate::pipeline::types::Sample;

/// One raw row of the telemetry dump: `id,ts,inc_data`.
#[derive(Debug, Deserialize)]
struct RawRecord {
    id: i64,
    ts: String,
    inc_data: String,
}

/// One raw row of the ambient temperature dump: `ts,temp_c`.
#[derive(Debug, Deserialize)]
struct TempRecord {
    ts: String,
    temp_c: f64,
}

/// Parses a timestamp in the formats the upstream emits: naive
/// `YYYY-MM-DD HH:MM:SS[.fff]`, the `T`-separated variant, or ISO-8601
/// with an offset (the offset is dropped, keeping plant wall time).
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ts);
        }
    }
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.naive_local())
}

/// Reads the full sample table from a CSV file, sorted by timestamp.
///
/// Rows with unparsable timestamps are skipped with a warning; rows with
/// unparsable payloads degrade to an empty payload rather than failing
/// the run.
///
/// # Errors
///
/// Returns [`KpiError::Upstream`] if the file cannot be opened or a CSV
/// record is structurally invalid.
pub fn read_samples_csv(path: &Path) -> Result<Vec<Sample>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| KpiError::Upstream(format!("cannot open \"{}\": {e}", path.display())))?;

    let mut samples = Vec::new();
    for record in reader.deserialize::<RawRecord>() {
        let record =
            record.map_err(|e| KpiError::Upstream(format!("bad record in sample table: {e}")))?;
        let Some(ts) = parse_timestamp(&record.ts) else {
            warn!(id = record.id, ts = %record.ts, "skipping sample with unparsable timestamp");
            continue;
        };
        let payload = serde_json::from_str::<Value>(&record.inc_data).unwrap_or_else(|e| {
            warn!(id = record.id, "unparsable payload, treating as empty: {e}");
            Value::Object(serde_json::Map::new())
        });
        samples.push(Sample {
            id: record.id,
            ts,
            payload,
        });
    }

    samples.sort_by_key(|s| s.ts);
    Ok(samples)
}

/// Reads the ambient temperature series from a CSV file, sorted by timestamp.
///
/// # Errors
///
/// Returns [`KpiError::Upstream`] if the file cannot be opened or a CSV
/// record is structurally invalid.
pub fn read_temps_csv(path: &Path) -> Result<Vec<(NaiveDateTime, f64)>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| KpiError::Upstream(format!("cannot open \"{}\": {e}", path.display())))?;

    let mut temps = Vec::new();
    for record in reader.deserialize::<TempRecord>() {
        let record = record
            .map_err(|e| KpiError::Upstream(format!("bad record in temperature table: {e}")))?;
        let Some(ts) = parse_timestamp(&record.ts) else {
            warn!(ts = %record.ts, "skipping temperature with unparsable timestamp");
            continue;
        };
        temps.push((ts, record.temp_c));
    }

    temps.sort_by_key(|&(ts, _)| ts);
    Ok(temps)
}
