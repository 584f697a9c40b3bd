//! Structured logging setup over `tracing-subscriber`.

use tracing_subscriber::EnvFilter;

use crate::error::{TelemetryError, TelemetryResult};

/// Logging configuration for a fabric process.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base filter, e.g. `"info"` or `"weft_fabric=trace,info"`.
    pub filter: String,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Install the global tracing subscriber.
///
/// The `WEFT_LOG` environment variable overrides the configured filter.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidFilter`] for unparsable directives and
/// [`TelemetryError::AlreadyInitialized`] when a subscriber is already set.
pub fn setup_logging(config: &LogConfig) -> TelemetryResult<()> {
    let filter = std::env::var("WEFT_LOG").unwrap_or_else(|_| config.filter.clone());
    let env_filter =
        EnvFilter::try_new(&filter).map_err(|e| TelemetryError::InvalidFilter {
            filter,
            reason: e.to_string(),
        })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);
    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|_| TelemetryError::AlreadyInitialized)
}
