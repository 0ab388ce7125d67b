//! Presence and notice channel settings.

use serde::{Deserialize, Serialize};

/// The presence channel to watch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PresenceConfig {
    pub channel: String,
    /// Member id to announce on the channel. Watch only when unset.
    pub track_id: Option<i64>,
    pub track_name: Option<String>,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            channel: "online".into(),
            track_id: None,
            track_name: None,
        }
    }
}

/// The notice channel to watch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NoticesConfig {
    pub channel: String,
    pub event: String,
    /// Seconds a notice stays visible after the last message.
    pub display_secs: u64,
}

impl Default for NoticesConfig {
    fn default() -> Self {
        Self {
            channel: "notifications".into(),
            event: "NotificationSent".into(),
            display_secs: 5,
        }
    }
}
