//! Fleet-level photovoltaic KPI pipeline: system availability and performance ratio.

pub mod config;
pub mod error;
pub mod io;
/// Bucketing, sensor reconciliation, counter deltas, and the KPI engines.
pub mod pipeline;
