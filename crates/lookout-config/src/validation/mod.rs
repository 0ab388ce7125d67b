//! Full configuration validation.
//!
//! Each section has its own validator; this orchestrator calls them all
//! and collects errors into a single `ConfigError`.

mod channels;
mod helpers;
mod realtime;


use lookout_common::ConfigError;

use crate::schema::LookoutConfig;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &LookoutConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    realtime::validate_realtime(&mut errors, config);
    channels::validate_presence(&mut errors, config);
    channels::validate_notices(&mut errors, config);

    if config.logging.level.trim().is_empty() {
        errors.push("logging.level must not be empty".into());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}
