//! KPI computation pipeline: bucketing, reconciliation, counter deltas,
//! maintenance masking, and the availability / performance-ratio engines.

pub mod availability;
pub mod bucket;
pub mod counters;
pub mod irradiance;
pub mod maintenance;
pub mod performance;
pub mod types;
