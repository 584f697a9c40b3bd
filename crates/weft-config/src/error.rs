//! Configuration error types. All fatal at boot.

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("cannot read config {path}: {source}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for the schema.
    #[error("cannot parse config {path}: {reason}")]
    Parse {
        /// Path that failed.
        path: String,
        /// Parser diagnostics.
        reason: String,
    },

    /// A ring capacity is not a power of two of at least 2.
    #[error("ring {class}: capacity {capacity} must be a power of two >= 2")]
    InvalidCapacity {
        /// Class name.
        class: String,
        /// Rejected capacity.
        capacity: usize,
    },

    /// Spill is configured on a class other than bulk.
    #[error("ring {class}: spill policy is restricted to bulk")]
    SpillNotBulk {
        /// Class name.
        class: String,
    },

    /// A drain quantum of zero would starve the class entirely.
    #[error("ring {class}: quantum must be at least 1")]
    ZeroQuantum {
        /// Class name.
        class: String,
    },

    /// Worker count of zero.
    #[error("worker count must be at least 1")]
    NoWorkers,

    /// Block timeout of zero makes BlockSender equivalent to DropNewest.
    #[error("ring {class}: block_timeout_ms must be at least 1")]
    ZeroBlockTimeout {
        /// Class name.
        class: String,
    },
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
