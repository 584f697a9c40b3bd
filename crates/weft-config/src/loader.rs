//! Config file loading.

use std::path::Path;

use tracing::info;

use crate::error::{ConfigError, ConfigResult};
use crate::types::WeftConfig;

/// Load and validate a TOML config file.
///
/// # Errors
///
/// [`ConfigError::Io`] or [`ConfigError::Parse`] for unreadable input,
/// plus any validation failure. All are fatal at boot.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<WeftConfig> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let config: WeftConfig = toml::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    config.validate()?;
    info!(path = %path.display(), workers = config.workers(), "configuration loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_minimal() {
        let file = write_config("");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.fabric.shutdown_grace_ms, 5_000);
    }

    #[test]
    fn test_load_overrides() {
        let file = write_config(
            r#"
            [fabric]
            workers = 2
            shutdown_grace_ms = 100

            [rings.bulk]
            policy = "spill"
            capacity = 1024

            [rings.critical]
            policy = "block"
            block_timeout_ms = 10
            "#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.workers(), 2);
        assert_eq!(config.rings.bulk.capacity, 1024);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let file = write_config("[fabric]\nworker_count = 2\n");
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_invalid_semantics_rejected() {
        let file = write_config("[rings.high]\ncapacity = 100\n");
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::InvalidCapacity { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_config("/nonexistent/weft.toml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
