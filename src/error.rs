//! Error types for the KPI pipeline boundaries.

use thiserror::Error;

/// Result type for pipeline boundary operations.
pub type Result<T> = std::result::Result<T, KpiError>;

/// Errors surfaced at the system boundary.
///
/// Pipeline-internal conditions (missing predecessors, sensor
/// disagreement, unknown unit tags) are handled by policy and never
/// reach this enum; a variant here means the run or tick produced no
/// publishable output.
#[derive(Error, Debug)]
pub enum KpiError {
    /// The sample source could not be read or returned malformed data.
    #[error("upstream unavailable: {0}")]
    Upstream(String),

    /// The result sink rejected or failed the publish call.
    #[error("publish failed: {0}")]
    Publish(String),

    /// The counter ledger state file could not be loaded or stored.
    #[error("ledger state error: {0}")]
    State(String),

    /// Fewer samples than the computation needs for any entity.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// I/O error on a file adapter.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parse or serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
