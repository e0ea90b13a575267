//! Performance ratio: thermally-adjusted expected energy vs. actual.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDateTime};
use tracing::info;

use crate::config::PlantConfig;
use crate::error::{KpiError, Result};

use super::bucket;
use super::counters::{self, TickInterval};
use super::irradiance;
use super::types::{PerformanceRow, Sample, TickPerformance, round2};

/// Numeric floor below which a value is treated as zero.
const EPSILON: f64 = 1e-9;

/// Batch performance-ratio engine.
///
/// Shares the bucket/delta plumbing with the availability engine but runs
/// on its own (finer) bucket axis and applies the thermal de-rating model.
pub struct PerformanceRatioEngine<'a> {
    cfg: &'a PlantConfig,
}

impl<'a> PerformanceRatioEngine<'a> {
    /// Creates an engine borrowing the immutable plant configuration.
    pub fn new(cfg: &'a PlantConfig) -> Self {
        Self { cfg }
    }

    /// Computes one performance row per (bucket, configured unit).
    ///
    /// `ambient` is the external temperature series, sorted by timestamp;
    /// each bucket matches the nearest reading within the configured
    /// tolerance and defaults to 0 °C outside it.
    pub fn run(
        &self,
        samples: &[Sample],
        ambient: &[(NaiveDateTime, f64)],
    ) -> Vec<PerformanceRow> {
        let cfg = self.cfg;
        let step_minutes = cfg.performance.step_minutes;
        let step_hours = step_minutes / 60.0;
        let threshold = cfg.performance.irradiance_threshold_wm2;
        let beta = cfg.blended_beta();

        let mut sorted: Vec<&Sample> = samples.iter().collect();
        sorted.sort_by_key(|s| s.ts);
        if sorted.is_empty() {
            return Vec::new();
        }

        let irr_points: Vec<(NaiveDateTime, Option<f64>)> = sorted
            .iter()
            .map(|s| {
                (
                    s.ts,
                    irradiance::reconcile(
                        s.numeric(&cfg.tags.irradiance_primary),
                        s.numeric(&cfg.tags.irradiance_secondary),
                    ),
                )
            })
            .collect();
        let irr_by_bucket = bucket::max_per_bucket(&irr_points, step_minutes);
        let axis = bucket::bucket_axis(sorted.iter().map(|s| s.ts), step_minutes);

        let mut deltas_by_unit: BTreeMap<&str, Vec<counters::CounterDelta>> = BTreeMap::new();
        for unit in &cfg.units {
            let tag = cfg.energy_tag(&unit.id);
            let pts: Vec<(NaiveDateTime, Option<f64>)> =
                sorted.iter().map(|s| (s.ts, s.numeric(&tag))).collect();
            let by_bucket = bucket::last_per_bucket(&pts, step_minutes);
            let series: Vec<Option<f64>> =
                axis.iter().map(|b| by_bucket.get(b).copied()).collect();
            deltas_by_unit.insert(unit.id.as_str(), counters::interval_energies(&series));
        }

        let mut rows = Vec::with_capacity(axis.len() * cfg.units.len());
        for (i, &bucket_ts) in axis.iter().enumerate() {
            let irr = irr_by_bucket.get(&bucket_ts).copied().unwrap_or(0.0);
            // Production at or below the noise floor is non-representative,
            // not a real negative KPI.
            let valid = irr > threshold;
            let tmeas = nearest_ambient(ambient, bucket_ts, cfg.performance.temp_tolerance_minutes)
                .unwrap_or(0.0);
            let tmod = cfg.tmod_for_month(bucket_ts.month());
            let lt = beta * (tmod - tmeas);
            let gdgi_raw = irr * step_hours / 1000.0;

            let bucket_start = rows.len();
            let mut energy_sum = 0.0;
            let mut expected_sum = 0.0;
            for unit in &cfg.units {
                let energy = deltas_by_unit
                    .get(unit.id.as_str())
                    .and_then(|d| d.get(i))
                    .map(|d| d.energy_kwh)
                    .unwrap_or(0.0);
                let stc_kwp = cfg.stc_share_kwp(&unit.id).unwrap_or(0.0);
                let expected_kwh = stc_kwp * gdgi_raw * (1.0 - lt);
                energy_sum += energy;
                expected_sum += expected_kwh;

                let pri_raw = if expected_kwh > EPSILON {
                    (energy / expected_kwh).clamp(0.0, 1.0) * 100.0
                } else {
                    0.0
                };
                rows.push(PerformanceRow {
                    bucket: bucket_ts,
                    unit: unit.id.clone(),
                    energy_net_kwh: if valid { energy } else { 0.0 },
                    irradiance_wm2: irr,
                    gdgi_kwh_m2: if valid { gdgi_raw } else { 0.0 },
                    tmod_c: tmod,
                    tmeas_c: tmeas,
                    beta_per_c: beta,
                    lt_pu: lt,
                    stc_kwp,
                    pri_pct: if valid { round2(pri_raw) } else { 0.0 },
                    pr_pct: 0.0,
                });
            }

            let pr_pct = if valid && expected_sum > EPSILON {
                round2((energy_sum / expected_sum).clamp(0.0, 1.0) * 100.0)
            } else {
                0.0
            };
            for row in &mut rows[bucket_start..] {
                row.pr_pct = pr_pct;
            }
        }

        info!(
            buckets = axis.len(),
            units = cfg.units.len(),
            rows = rows.len(),
            "performance batch computed"
        );
        rows
    }
}

/// Nearest ambient reading to `at` within the tolerance, if any.
///
/// `ambient` must be sorted by timestamp.
fn nearest_ambient(
    ambient: &[(NaiveDateTime, f64)],
    at: NaiveDateTime,
    tolerance_minutes: i64,
) -> Option<f64> {
    let idx = ambient.partition_point(|(t, _)| *t <= at);
    let mut best: Option<(i64, f64)> = None;
    for j in [idx.checked_sub(1), Some(idx)].into_iter().flatten() {
        if let Some(&(t, v)) = ambient.get(j) {
            let diff = (t - at).num_seconds().abs();
            if best.is_none_or(|(d, _)| diff < d) {
                best = Some((diff, v));
            }
        }
    }
    best.filter(|(d, _)| *d <= tolerance_minutes * 60)
        .map(|(_, v)| v)
}

/// Streaming performance ratio over one short live window.
///
/// With mean irradiance at or below the threshold the tick publishes an
/// explicit all-zero payload for the whole fleet; otherwise per-unit
/// expected energy uses each unit's nameplate rating over its own
/// interval span, pooled into the fleet ratio.
pub fn performance_tick(
    cfg: &PlantConfig,
    mean_irradiance_wm2: Option<f64>,
    tmeas_c: Option<f64>,
    intervals: &BTreeMap<String, TickInterval>,
) -> Result<TickPerformance> {
    if intervals.is_empty() {
        return Err(KpiError::InsufficientData(
            "no inverter series with enough samples in the window".into(),
        ));
    }

    let ts = intervals
        .values()
        .max_by_key(|i| i.last_ts)
        .map(|i| i.last_raw_ts.clone())
        .ok_or_else(|| KpiError::InsufficientData("no contributing timestamp".into()))?;

    let irr = mean_irradiance_wm2.unwrap_or(0.0);
    if irr <= cfg.performance.irradiance_threshold_wm2 {
        let pri_pct: BTreeMap<String, f64> =
            cfg.units.iter().map(|u| (u.id.clone(), 0.0)).collect();
        return Ok(TickPerformance {
            ts,
            pri_pct,
            pr_pct: 0.0,
        });
    }

    let tmeas = tmeas_c.unwrap_or(0.0);
    let latest = intervals
        .values()
        .max_by_key(|i| i.last_ts)
        .map(|i| i.last_ts)
        .ok_or_else(|| KpiError::InsufficientData("no contributing timestamp".into()))?;
    let tmod = cfg.tmod_for_month(latest.month());
    let lt = cfg.blended_beta() * (tmod - tmeas);

    let mut pri_pct = BTreeMap::new();
    let mut energy_sum = 0.0;
    let mut expected_sum = 0.0;
    for (unit, interval) in intervals {
        let Some(nominal_kw) = cfg.nominal_kw(unit) else {
            continue;
        };
        let gdgi = irr * interval.span_hours / 1000.0;
        let expected_kwh = nominal_kw * gdgi * (1.0 - lt);
        if expected_kwh <= EPSILON {
            continue;
        }
        energy_sum += interval.energy_kwh;
        expected_sum += expected_kwh;
        pri_pct.insert(
            unit.clone(),
            round2((interval.energy_kwh / expected_kwh).clamp(0.0, 1.0) * 100.0),
        );
    }

    if expected_sum <= EPSILON {
        return Err(KpiError::InsufficientData(
            "expected energy is zero for every configured unit".into(),
        ));
    }

    Ok(TickPerformance {
        ts,
        pri_pct,
        pr_pct: round2((energy_sum / expected_sum).clamp(0.0, 1.0) * 100.0),
    })
}
