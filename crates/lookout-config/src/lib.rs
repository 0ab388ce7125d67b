//! Lookout configuration.
//!
//! TOML-based configuration with validation. Every section uses serde
//! defaults so partial files work out of the box.
//!
//! ```rust,no_run
//! use lookout_config::{config_to_json, read_config, validation};
//!
//! let config = read_config(None).expect("failed to load config");
//! validation::validate(&config).expect("invalid config");
//! println!("{}", config_to_json(&config));
//! ```

pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{
    LoggingConfig, LookoutConfig, NoticesConfig, PresenceConfig, RealtimeSection,
    CONFIG_SCHEMA_VERSION,
};

use std::path::Path;

use lookout_common::ConfigError;

/// Read config from `path`, or from the platform default path, creating a
/// commented default file there when there is none. The result is not
/// validated, so callers can apply overrides first.
pub fn read_config(path: Option<&Path>) -> Result<LookoutConfig, ConfigError> {
    match path {
        Some(path) => toml_loader::load_from_path(path),
        None => toml_loader::load_default(),
    }
}

/// Serialize a config to pretty JSON with secrets redacted.
pub fn config_to_json(config: &LookoutConfig) -> String {
    serde_json::to_string_pretty(&config.redacted())
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize config: {e}\"}}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_to_json_contains_all_sections() {
        let json = config_to_json(&LookoutConfig::default());
        assert!(json.contains("\"realtime\""));
        assert!(json.contains("\"presence\""));
        assert!(json.contains("\"notices\""));
        assert!(json.contains("\"logging\""));
    }

    #[test]
    fn config_to_json_redacts_secrets() {
        let mut config = LookoutConfig::default();
        config.realtime.api_key = "sb_publishable_abc".into();
        config.realtime.access_token = Some("eyJhbGciOi".into());
        let json = config_to_json(&config);
        assert!(!json.contains("sb_publishable_abc"));
        assert!(!json.contains("eyJhbGciOi"));
        assert!(json.contains("[REDACTED]"));
    }

    #[test]
    fn config_schema_version_is_1() {
        assert_eq!(CONFIG_SCHEMA_VERSION, 1);
    }

    #[test]
    fn read_config_defers_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[notices]\ndisplay_secs = 0\n").unwrap();

        let config = read_config(Some(&path)).unwrap();
        assert_eq!(config.notices.display_secs, 0);
        let err = validation::validate(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn read_config_reports_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = read_config(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }
}
