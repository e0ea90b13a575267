//! Streaming feed: the short live window served by the upstream API as a
//! tag → points mapping.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::PlantConfig;
use crate::error::{KpiError, Result};
use crate::pipeline::counters::{CounterLedger, TickInterval};
use crate::pipeline::types::{SeriesPoint, coerce_numeric};

use super::ingest::parse_timestamp;

/// One point of a live series, timestamp kept verbatim.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPoint {
    /// Upstream timestamp string.
    pub ts: String,
    /// Value as received (numeric or string).
    pub value: Value,
}

/// The live window: tag name to its ordered list of points.
pub type FeedBlob = BTreeMap<String, Vec<RawPoint>>;

/// Reads a feed snapshot from a JSON file.
///
/// # Errors
///
/// Returns [`KpiError::Upstream`] if the file cannot be read or parsed.
pub fn read_feed_file(path: &Path) -> Result<FeedBlob> {
    let content = fs::read_to_string(path)
        .map_err(|e| KpiError::Upstream(format!("cannot read \"{}\": {e}", path.display())))?;
    serde_json::from_str(&content)
        .map_err(|e| KpiError::Upstream(format!("cannot parse \"{}\": {e}", path.display())))
}

/// Fetches the live window from the upstream API.
///
/// # Errors
///
/// Returns [`KpiError::Upstream`] on connection failure, a non-success
/// status, or an unparsable body.
#[cfg(feature = "live")]
pub fn fetch_feed(url: &str) -> Result<FeedBlob> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .map_err(|e| KpiError::Upstream(format!("cannot build http client: {e}")))?;
    let response = client
        .get(url)
        .send()
        .map_err(|e| KpiError::Upstream(format!("GET {url}: {e}")))?;
    if !response.status().is_success() {
        return Err(KpiError::Upstream(format!(
            "GET {url}: HTTP {}",
            response.status()
        )));
    }
    response
        .json()
        .map_err(|e| KpiError::Upstream(format!("GET {url}: invalid body: {e}")))
}

/// Extracts the parsable numeric points of a series, sorted by timestamp.
///
/// Points with non-numeric values or unparsable timestamps are dropped
/// silently, as single bad points must not fail the tick.
pub fn numeric_points(series: &[RawPoint]) -> Vec<SeriesPoint> {
    let mut points: Vec<SeriesPoint> = series
        .iter()
        .filter_map(|p| {
            let value = coerce_numeric(&p.value)?;
            let ts = parse_timestamp(&p.ts)?;
            Some(SeriesPoint {
                ts,
                raw_ts: p.ts.clone(),
                value,
            })
        })
        .collect();
    points.sort_by_key(|p| p.ts);
    points
}

/// Mean of a series' numeric values, if any.
fn series_mean(series: &[RawPoint]) -> Option<f64> {
    let values: Vec<f64> = series.iter().filter_map(|p| coerce_numeric(&p.value)).collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Mean irradiance across every configured sensor: per-sensor means are
/// averaged so an over-sampled sensor does not dominate.
pub fn mean_irradiance(cfg: &PlantConfig, blob: &FeedBlob) -> Option<f64> {
    let per_sensor: Vec<f64> = cfg
        .irradiance_tags_all()
        .iter()
        .filter_map(|tag| blob.get(*tag).and_then(|s| series_mean(s)))
        .collect();
    if per_sensor.is_empty() {
        None
    } else {
        Some(per_sensor.iter().sum::<f64>() / per_sensor.len() as f64)
    }
}

/// Mean ambient temperature from the inside/outside sensors; with one
/// side absent the other stands alone.
pub fn mean_ambient(cfg: &PlantConfig, blob: &FeedBlob) -> Option<f64> {
    let inside = blob.get(&cfg.tags.temp_inside).and_then(|s| series_mean(s));
    let outside = blob
        .get(&cfg.tags.temp_outside)
        .and_then(|s| series_mean(s));
    match (inside, outside) {
        (Some(a), Some(b)) => Some((a + b) / 2.0),
        (Some(a), None) | (None, Some(a)) => Some(a),
        (None, None) => None,
    }
}

/// Advances the counter ledger over every inverter energy series in the
/// window, returning the per-unit tick intervals.
///
/// Units whose window cannot produce a measurement this tick degrade to
/// absence; the other units still get computed.
pub fn tick_intervals(
    cfg: &PlantConfig,
    blob: &FeedBlob,
    ledger: &mut CounterLedger,
) -> BTreeMap<String, TickInterval> {
    let mut intervals = BTreeMap::new();
    for (tag, series) in blob {
        let Some(unit) = cfg.unit_for_energy_tag(tag) else {
            continue;
        };
        let points = numeric_points(series);
        match ledger.advance(unit, &points) {
            Some(interval) => {
                intervals.insert(unit.to_string(), interval);
            }
            None => debug!(unit, "no measurable interval this tick"),
        }
    }
    intervals
}
