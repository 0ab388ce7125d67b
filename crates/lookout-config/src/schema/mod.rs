//! Configuration schema for Lookout.
//!
//! All config structs use `#[serde(default)]` so partial TOML files work.

mod channels;
mod logging;
mod realtime;

pub use channels::*;
pub use logging::*;
pub use realtime::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LookoutConfig {
    pub realtime: RealtimeSection,
    pub presence: PresenceConfig,
    pub notices: NoticesConfig,
    pub logging: LoggingConfig,
}

impl LookoutConfig {
    /// A copy with credentials replaced, safe to print or log.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.realtime.api_key.is_empty() {
            copy.realtime.api_key = REDACTED.into();
        }
        if copy.realtime.access_token.is_some() {
            copy.realtime.access_token = Some(REDACTED.into());
        }
        copy
    }
}

const REDACTED: &str = "[REDACTED]";
