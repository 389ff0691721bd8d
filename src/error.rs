// src/error.rs
// Error taxonomy for the cache / monitor layer

use thiserror::Error;

/// Result type for qperf bookkeeping operations
pub type PerfResult<T> = Result<T, PerfError>;

/// Errors owned by this layer.
///
/// Failures of wrapped operations are never converted into this type;
/// the executor hands them back to the caller unchanged.
#[derive(Debug, Error)]
pub enum PerfError {
    // Configuration
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // Cache payloads
    #[error("Cache payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    // Collaborators
    #[error("Alert delivery failed: {0}")]
    Notify(String),

    #[error("Usage sampling failed: {0}")]
    Usage(String),

    /// Convenience variant for callers that have no error type of their own.
    #[error("Operation failed: {0}")]
    Operation(String),
}

impl PerfError {
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        PerfError::InvalidConfig {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
