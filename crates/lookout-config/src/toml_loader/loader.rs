//! Core TOML config loading: read from path or platform default.

use std::path::Path;

use lookout_common::ConfigError;
use tracing::info;

use super::paths::{create_default_config, default_config_path};
use crate::schema::LookoutConfig;

/// Load config from a specific TOML file path.
///
/// Missing fields take their serde defaults. The result is not validated;
/// callers run [`crate::validation::validate`] after any overrides.
pub fn load_from_path(path: &Path) -> Result<LookoutConfig, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        Err(e) => {
            return Err(ConfigError::ParseError(format!(
                "failed to read {}: {e}",
                path.display()
            )));
        }
    };

    let config: LookoutConfig = toml::from_str(&content)
        .map_err(|e| ConfigError::ParseError(format!("failed to parse TOML: {e}")))?;

    info!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Load config from the platform-specific default path.
///
/// On macOS: `~/Library/Application Support/lookout/config.toml`
/// On Linux: `~/.config/lookout/config.toml`
///
/// If the file does not exist, writes the commented template and returns
/// defaults.
pub fn load_default() -> Result<LookoutConfig, ConfigError> {
    let path = default_config_path()?;

    match load_from_path(&path) {
        Ok(config) => Ok(config),
        Err(ConfigError::FileNotFound(_)) => {
            info!(path = %path.display(), "No config found, creating default");
            create_default_config(&path)?;
            Ok(LookoutConfig::default())
        }
        Err(e) => Err(e),
    }
}
