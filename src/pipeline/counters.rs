//! Interval energy extraction from monotonic cumulative counters.
//!
//! Counters may regress or reset when a device reboots; negative raw
//! differences are clamped to zero so production is never reported
//! negative, at the cost of not detecting real resets.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{KpiError, Result};
use super::types::SeriesPoint;

/// Interval energy for one bucket, with the counter readings that
/// produced it kept for the audit columns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterDelta {
    /// Last cumulative reading observed in the bucket, if any.
    pub last_kwh: Option<f64>,
    /// Predecessor reading: the last cumulative value known before this
    /// bucket, carried across empty buckets.
    pub prev_kwh: Option<f64>,
    /// Interval energy for the bucket (kWh, always >= 0).
    pub energy_kwh: f64,
}

/// Converts per-bucket counter readings into interval energies.
///
/// `series` holds the last reading per bucket over the dense bucket axis
/// (`None` where the bucket had no reading). The first bucket of a series
/// is 0 by definition. A bucket with no reading contributes 0 energy and
/// does not advance the predecessor, so a gap never poisons the delta of
/// the next real reading.
pub fn interval_energies(series: &[Option<f64>]) -> Vec<CounterDelta> {
    let mut last_known: Option<f64> = None;
    let mut out = Vec::with_capacity(series.len());
    for &reading in series {
        match reading {
            Some(current) => {
                let energy_kwh = match last_known {
                    Some(prev) => (current - prev).max(0.0),
                    None => 0.0,
                };
                out.push(CounterDelta {
                    last_kwh: Some(current),
                    prev_kwh: last_known,
                    energy_kwh,
                });
                last_known = Some(current);
            }
            None => out.push(CounterDelta {
                last_kwh: None,
                prev_kwh: last_known,
                energy_kwh: 0.0,
            }),
        }
    }
    out
}

/// Interval measurement produced by the ledger for one streaming tick.
#[derive(Debug, Clone)]
pub struct TickInterval {
    /// Elapsed hours between the predecessor and the latest reading.
    pub span_hours: f64,
    /// Interval energy (kWh, >= 0).
    pub energy_kwh: f64,
    /// Timestamp of the latest contributing reading.
    pub last_ts: NaiveDateTime,
    /// Upstream timestamp string of the latest reading, untouched.
    pub last_raw_ts: String,
}

/// Last seen cumulative reading for one unit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Timestamp of the reading.
    pub ts: NaiveDateTime,
    /// Cumulative counter value (kWh).
    pub value_kwh: f64,
}

/// Persistent last-known counter value per unit.
///
/// The one piece of cross-tick state in the system: read then overwritten
/// on every tick, exactly one producer per inverter stream. Never-seen
/// units fall back to the window's first sample.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CounterLedger {
    entries: BTreeMap<String, LedgerEntry>,
}

impl CounterLedger {
    /// Loads the ledger from a JSON state file; a missing file yields an
    /// empty ledger (the "never seen before" initialization policy).
    ///
    /// # Errors
    ///
    /// Returns [`KpiError::State`] when the file exists but cannot be
    /// read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .map_err(|e| KpiError::State(format!("cannot read \"{}\": {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| KpiError::State(format!("cannot parse \"{}\": {e}", path.display())))
    }

    /// Stores the ledger to a JSON state file.
    ///
    /// # Errors
    ///
    /// Returns [`KpiError::State`] when the file cannot be written.
    pub fn store(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .map_err(|e| KpiError::State(format!("cannot write \"{}\": {e}", path.display())))
    }

    /// Last recorded entry for a unit, if any.
    pub fn entry(&self, unit: &str) -> Option<LedgerEntry> {
        self.entries.get(unit).copied()
    }

    /// Consumes one tick's window for a unit: computes the interval
    /// against the carried predecessor and overwrites it with the
    /// window's latest reading.
    ///
    /// Falls back to the window's first sample when the unit has never
    /// been seen (or the carried entry is not older than the window);
    /// that fallback needs at least two points, otherwise the unit
    /// degrades to no measurement for this tick.
    pub fn advance(&mut self, unit: &str, points: &[SeriesPoint]) -> Option<TickInterval> {
        let last = points.last()?.clone();
        let prior = self.entry(unit);
        self.entries.insert(
            unit.to_string(),
            LedgerEntry {
                ts: last.ts,
                value_kwh: last.value,
            },
        );

        let (start_ts, start_kwh) = match prior {
            Some(entry) if entry.ts < last.ts => (entry.ts, entry.value_kwh),
            _ => {
                if points.len() < 2 {
                    debug!(unit, "single-sample window with no carried predecessor");
                    return None;
                }
                let first = &points[0];
                (first.ts, first.value)
            }
        };

        let span_hours = (last.ts - start_ts).num_seconds() as f64 / 3600.0;
        Some(TickInterval {
            span_hours,
            energy_kwh: (last.value - start_kwh).max(0.0),
            last_ts: last.ts,
            last_raw_ts: last.raw_ts,
        })
    }
}
