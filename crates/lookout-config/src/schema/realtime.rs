//! Realtime server connection settings.

use serde::{Deserialize, Serialize};

/// Connection to the Phoenix Channels realtime server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RealtimeSection {
    /// Supabase project reference. Ignored when `url` is set.
    pub project_ref: String,
    /// Full WebSocket URL of a self-hosted server.
    pub url: Option<String>,
    pub api_key: String,
    /// JWT sent with channel joins, for private channels.
    pub access_token: Option<String>,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval: u64,
    /// Initial reconnect delay in seconds. Doubles on each failure.
    pub reconnect_delay: u64,
    pub max_reconnect_delay: u64,
    pub connect_timeout: u64,
}

impl Default for RealtimeSection {
    fn default() -> Self {
        Self {
            project_ref: String::new(),
            url: None,
            api_key: String::new(),
            access_token: None,
            heartbeat_interval: 25,
            reconnect_delay: 1,
            max_reconnect_delay: 30,
            connect_timeout: 15,
        }
    }
}

impl RealtimeSection {
    /// Whether a server endpoint is configured at all.
    pub fn has_endpoint(&self) -> bool {
        self.url.as_deref().is_some_and(|u| !u.is_empty()) || !self.project_ref.is_empty()
    }
}
