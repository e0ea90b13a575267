//! Fixed-interval time bucketing.
//!
//! Samples are assigned to half-open buckets `[start, start + Δ)` by
//! flooring their timestamp to the interval boundary. Representative
//! values per bucket differ by signal: energy counters keep the last
//! reading, irradiance keeps the maximum.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime};

/// Floors a timestamp to the start of its `step_minutes`-wide bucket.
pub fn floor_to_step(ts: NaiveDateTime, step_minutes: f64) -> NaiveDateTime {
    let step_secs = (step_minutes * 60.0).round() as i64;
    if step_secs <= 0 {
        return ts;
    }
    let secs = ts.and_utc().timestamp();
    let floored = secs - secs.rem_euclid(step_secs);
    DateTime::from_timestamp(floored, 0)
        .map(|dt| dt.naive_utc())
        .unwrap_or(ts)
}

/// Last present value per bucket.
///
/// Points must be in timestamp order; equal timestamps keep the later
/// point (store insertion order breaks the tie). Absent values are
/// skipped, so a bucket holding only absent readings does not appear.
pub fn last_per_bucket(
    points: &[(NaiveDateTime, Option<f64>)],
    step_minutes: f64,
) -> BTreeMap<NaiveDateTime, f64> {
    let mut out = BTreeMap::new();
    for &(ts, value) in points {
        if let Some(v) = value {
            out.insert(floor_to_step(ts, step_minutes), v);
        }
    }
    out
}

/// Maximum present value per bucket. Absent values are skipped.
pub fn max_per_bucket(
    points: &[(NaiveDateTime, Option<f64>)],
    step_minutes: f64,
) -> BTreeMap<NaiveDateTime, f64> {
    let mut out: BTreeMap<NaiveDateTime, f64> = BTreeMap::new();
    for &(ts, value) in points {
        if let Some(v) = value {
            out.entry(floor_to_step(ts, step_minutes))
                .and_modify(|m| *m = m.max(v))
                .or_insert(v);
        }
    }
    out
}

/// Sorted, deduplicated bucket axis covering every sample timestamp.
///
/// The batch engines cross this axis with the configured unit set to
/// build the dense grid; buckets with no samples at all do not exist.
pub fn bucket_axis(timestamps: impl IntoIterator<Item = NaiveDateTime>, step_minutes: f64) -> Vec<NaiveDateTime> {
    let set: std::collections::BTreeSet<NaiveDateTime> = timestamps
        .into_iter()
        .map(|ts| floor_to_step(ts, step_minutes))
        .collect();
    set.into_iter().collect()
}
