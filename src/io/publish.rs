//! Result publication: replace-on-run CSV tables for the batch mode and
//! JSON payloads for the streaming ticks.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use serde_json::{Map, Value, json};

use crate::pipeline::types::{AvailabilityRow, PerformanceRow, TickAvailability, TickPerformance};

/// Column header for the availability table.
const AVAILABILITY_HEADER: &str = "sample_id,ts,bucket,unit,energy_last_kwh,energy_prev_kwh,\
                                   energy_net_kwh,irradiance_wm2,irradiance_prev_wm2,hper_h,\
                                   hama_h,huna_h,operating_frac,ainv_pct,asys_share,asys_pct,\
                                   psys_kw,nominal_kw";

/// Column header for the performance table.
const PERFORMANCE_HEADER: &str = "bucket,unit,energy_net_kwh,irradiance_wm2,gdgi_kwh_m2,tmod_c,\
                                  tmeas_c,beta_per_c,lt_pu,stc_kwp,pri_pct,pr_pct";

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Exports availability rows to a CSV file, replacing any previous run.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_availability_csv(rows: &[AvailabilityRow], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let buf = io::BufWriter::new(file);
    write_availability_csv(rows, buf)
}

/// Writes availability rows as CSV to any writer.
///
/// Produces deterministic output for identical inputs.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_availability_csv(rows: &[AvailabilityRow], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    wtr.write_record(AVAILABILITY_HEADER.split(',').map(str::trim))?;

    for r in rows {
        wtr.write_record(&[
            r.sample_id.to_string(),
            r.ts.format(TS_FORMAT).to_string(),
            r.bucket.format(TS_FORMAT).to_string(),
            r.unit.clone(),
            format!("{:.4}", r.energy_last_kwh),
            format!("{:.4}", r.energy_prev_kwh),
            format!("{:.4}", r.energy_net_kwh),
            format!("{:.2}", r.irradiance_wm2),
            format!("{:.2}", r.irradiance_prev_wm2),
            format!("{:.2}", r.hper_h),
            format!("{:.2}", r.hama_h),
            format!("{:.2}", r.huna_h),
            format!("{:.4}", r.operating_frac),
            format!("{:.2}", r.ainv_pct),
            format!("{:.6}", r.asys_share),
            format!("{:.2}", r.asys_pct),
            format!("{:.2}", r.psys_kw),
            format!("{:.2}", r.nominal_kw),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Exports performance rows to a CSV file, replacing any previous run.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_performance_csv(rows: &[PerformanceRow], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let buf = io::BufWriter::new(file);
    write_performance_csv(rows, buf)
}

/// Writes performance rows as CSV to any writer.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_performance_csv(rows: &[PerformanceRow], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    wtr.write_record(PERFORMANCE_HEADER.split(',').map(str::trim))?;

    for r in rows {
        wtr.write_record(&[
            r.bucket.format(TS_FORMAT).to_string(),
            r.unit.clone(),
            format!("{:.4}", r.energy_net_kwh),
            format!("{:.2}", r.irradiance_wm2),
            format!("{:.6}", r.gdgi_kwh_m2),
            format!("{:.2}", r.tmod_c),
            format!("{:.2}", r.tmeas_c),
            format!("{:.6}", r.beta_per_c),
            format!("{:.6}", r.lt_pu),
            format!("{:.4}", r.stc_kwp),
            format!("{:.2}", r.pri_pct),
            format!("{:.2}", r.pr_pct),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Builds the staging-area payload for one availability tick:
/// `{"ts": ..., "inc_data": {"Ainv{UNIT}": pct, ..., "av": pct}}`.
pub fn availability_payload(tick: &TickAvailability) -> Value {
    let mut inc_data = Map::new();
    for (unit, pct) in &tick.ainv_pct {
        inc_data.insert(format!("Ainv{unit}"), json!(pct));
    }
    inc_data.insert("av".to_string(), json!(tick.asys_pct));
    json!({ "ts": tick.ts, "inc_data": inc_data })
}

/// Builds the staging-area payload for one performance tick:
/// `{"ts": ..., "inc_data": {"Pr{UNIT}": pct, ..., "pr": pct}}`.
pub fn performance_payload(tick: &TickPerformance) -> Value {
    let mut inc_data = Map::new();
    for (unit, pct) in &tick.pri_pct {
        inc_data.insert(format!("Pr{unit}"), json!(pct));
    }
    inc_data.insert("pr".to_string(), json!(tick.pr_pct));
    json!({ "ts": tick.ts, "inc_data": inc_data })
}

/// Builds the explicit error object published when a tick has no
/// computable output.
pub fn error_payload(message: &str) -> Value {
    json!({ "error": message })
}

/// Posts a tick payload to the staging endpoint, expecting a 201.
///
/// # Errors
///
/// Returns [`crate::error::KpiError::Publish`] on connection failure or a
/// non-created status.
#[cfg(feature = "live")]
pub fn post_json(url: &str, payload: &Value) -> crate::error::Result<()> {
    use crate::error::KpiError;
    use tracing::info;

    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .map_err(|e| KpiError::Publish(format!("cannot build http client: {e}")))?;
    let response = client
        .post(url)
        .json(payload)
        .send()
        .map_err(|e| KpiError::Publish(format!("POST {url}: {e}")))?;
    let status = response.status();
    if status != reqwest::StatusCode::CREATED {
        let body = response.text().unwrap_or_default();
        return Err(KpiError::Publish(format!(
            "POST {url}: HTTP {status}: {body}"
        )));
    }
    info!(url, "tick payload posted");
    Ok(())
}
