//! Telemetry error types.

use thiserror::Error;

/// Errors raised while configuring telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The env-filter directive string failed to parse.
    #[error("invalid log filter {filter:?}: {reason}")]
    InvalidFilter {
        /// The rejected directive string.
        filter: String,
        /// Parser diagnostics.
        reason: String,
    },

    /// A global subscriber was already installed.
    #[error("logging already initialized")]
    AlreadyInitialized,

    /// Histogram bounds were rejected.
    #[error("invalid histogram configuration: {0}")]
    InvalidHistogram(String),
}

/// Result alias for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
