//! Error types for configuration loading.
//!
//! The measurement path itself never fails; only parsing and validating a
//! [`Limits`](crate::Limits) configuration can.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while loading a watchdog configuration.
#[derive(Debug, Error)]
pub enum TimemarkError {
    /// The configuration document could not be parsed
    #[error("Configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Both limits are active but leave no quiet window between them
    #[error("Less limit {less:?} must be below more limit {more:?}")]
    InvertedWindow { less: Duration, more: Duration },

    /// A limit field in the configuration document is unusable
    #[error("Invalid {field}: {reason}")]
    InvalidLimit {
        field: &'static str,
        reason: &'static str,
    },
}

/// Result type for timemark configuration operations.
pub type TimemarkResult<T> = Result<T, TimemarkError>;
