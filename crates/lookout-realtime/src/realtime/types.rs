//! Configuration, Phoenix envelope, and event/command enums for the
//! realtime client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use lookout_common::ChannelError;
use serde::{Deserialize, Serialize};

use crate::protocol::Member;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for connecting to a Phoenix Channels realtime server.
#[derive(Clone)]
pub struct RealtimeConfig {
    /// Supabase project reference; used to build the socket URL when `url`
    /// is not set.
    pub project_ref: String,
    /// Full WebSocket URL, overriding the Supabase URL.
    pub url: Option<String>,
    /// Publishable API key.
    pub api_key: String,
    /// Optional JWT sent with every channel join.
    pub access_token: Option<String>,
    pub heartbeat_interval_secs: u64,
    /// Reconnect base delay in seconds.
    pub reconnect_delay_secs: u64,
    pub max_reconnect_delay_secs: u64,
    pub connect_timeout_secs: u64,
    /// Member to track on every joined presence channel.
    pub track_as: Option<Member>,
}

impl std::fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("project_ref", &self.project_ref)
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("heartbeat_interval_secs", &self.heartbeat_interval_secs)
            .field("reconnect_delay_secs", &self.reconnect_delay_secs)
            .field("max_reconnect_delay_secs", &self.max_reconnect_delay_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("track_as", &self.track_as)
            .finish()
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            project_ref: String::new(),
            url: None,
            api_key: String::new(),
            access_token: None,
            heartbeat_interval_secs: 25,
            reconnect_delay_secs: 1,
            max_reconnect_delay_secs: 30,
            connect_timeout_secs: 15,
            track_as: None,
        }
    }
}

impl RealtimeConfig {
    /// The WebSocket URL to connect to.
    pub(crate) fn ws_url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "wss://{}.supabase.co/realtime/v1/websocket?apikey={}&vsn=1.0.0",
                self.project_ref, self.api_key
            ),
        }
    }

    /// The URL with its query string (and the key in it) stripped, for logs.
    pub(crate) fn display_url(&self) -> String {
        let url = self.ws_url();
        url.split('?').next().unwrap_or_default().to_string()
    }
}

// ---------------------------------------------------------------------------
// Phoenix envelope
// ---------------------------------------------------------------------------

static REF_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Monotonically increasing ref for outgoing Phoenix messages.
pub(crate) fn next_ref() -> String {
    REF_COUNTER.fetch_add(1, Ordering::Relaxed).to_string()
}

/// Phoenix topic for a channel name.
pub(crate) fn topic_for(channel: &str) -> String {
    format!("realtime:{channel}")
}

/// Channel name for a Phoenix topic.
pub(crate) fn channel_for(topic: &str) -> &str {
    topic.strip_prefix("realtime:").unwrap_or(topic)
}

/// A Phoenix protocol message (v1 JSON format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    pub payload: serde_json::Value,
    #[serde(rename = "ref")]
    pub msg_ref: Option<String>,
}

impl PhoenixMessage {
    /// An outgoing message with a fresh ref.
    pub(crate) fn outgoing(topic: String, event: &str, payload: serde_json::Value) -> Self {
        Self {
            topic,
            event: event.to_string(),
            payload,
            msg_ref: Some(next_ref()),
        }
    }
}

// ---------------------------------------------------------------------------
// Channel configuration
// ---------------------------------------------------------------------------

/// Join configuration for one channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Whether to receive our own broadcasts.
    pub self_send: bool,
    /// Whether the server acknowledges broadcasts.
    pub ack: bool,
    /// Key identifying this connection in presence state.
    pub presence_key: String,
    pub access_token: Option<String>,
}

impl ChannelConfig {
    /// The payload of a `phx_join`.
    pub(crate) fn to_join_payload(&self) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "config": {
                "broadcast": {
                    "self": self.self_send,
                    "ack": self.ack
                },
                "presence": {
                    "key": self.presence_key
                }
            }
        });
        if let Some(token) = &self.access_token {
            payload["access_token"] = serde_json::Value::String(token.clone());
        }
        payload
    }
}

// ---------------------------------------------------------------------------
// Events & commands
// ---------------------------------------------------------------------------

/// Presence map: key -> metas.
pub(crate) type PresenceMap = HashMap<String, Vec<serde_json::Value>>;

/// Events produced by the connection, before routing to subscribers.
#[derive(Debug, Clone)]
pub(crate) enum RealtimeEvent {
    Connected,
    Disconnected,
    /// The join of `channel` was acknowledged.
    ChannelJoined { channel: String },
    /// The server rejected, errored or closed `channel`.
    ChannelError {
        channel: String,
        error: ChannelError,
    },
    Broadcast {
        channel: String,
        event: String,
        payload: serde_json::Value,
    },
    PresenceState {
        channel: String,
        state: PresenceMap,
    },
    PresenceDiff {
        channel: String,
        joins: PresenceMap,
        leaves: PresenceMap,
    },
    /// Connection-level failure.
    Error(ChannelError),
}

/// Commands sent from client handles to the connection task.
#[derive(Debug)]
pub(crate) enum RealtimeCommand {
    JoinChannel {
        channel: String,
        config: ChannelConfig,
    },
    LeaveChannel {
        channel: String,
    },
    PresenceTrack {
        channel: String,
        payload: serde_json::Value,
    },
    Disconnect,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_secrets() {
        let config = RealtimeConfig {
            api_key: "sb_publishable_secret".into(),
            access_token: Some("eyJhbGciOi".into()),
            ..Default::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sb_publishable_secret"));
        assert!(!debug.contains("eyJhbGciOi"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn supabase_url_and_override() {
        let config = RealtimeConfig {
            project_ref: "abcd".into(),
            api_key: "key".into(),
            ..Default::default()
        };
        assert_eq!(
            config.ws_url(),
            "wss://abcd.supabase.co/realtime/v1/websocket?apikey=key&vsn=1.0.0"
        );
        assert_eq!(
            config.display_url(),
            "wss://abcd.supabase.co/realtime/v1/websocket"
        );

        let config = RealtimeConfig {
            url: Some("ws://localhost:4000/socket/websocket?vsn=1.0.0".into()),
            ..Default::default()
        };
        assert_eq!(
            config.ws_url(),
            "ws://localhost:4000/socket/websocket?vsn=1.0.0"
        );
    }

    #[test]
    fn topics_round_trip_channel_names() {
        assert_eq!(topic_for("admins"), "realtime:admins");
        assert_eq!(channel_for("realtime:admins"), "admins");
        assert_eq!(channel_for("phoenix"), "phoenix");
    }

    #[test]
    fn join_payload_carries_presence_key_and_token() {
        let config = ChannelConfig {
            self_send: false,
            ack: false,
            presence_key: "7".into(),
            access_token: None,
        };
        let payload = config.to_join_payload();
        assert_eq!(payload["config"]["presence"]["key"], "7");
        assert_eq!(payload["config"]["broadcast"]["self"], false);
        assert!(payload.get("access_token").is_none());

        let config = ChannelConfig {
            access_token: Some("jwt".into()),
            ..config
        };
        assert_eq!(config.to_join_payload()["access_token"], "jwt");
    }

    #[test]
    fn refs_increase() {
        let a: u64 = next_ref().parse().unwrap();
        let b: u64 = next_ref().parse().unwrap();
        assert!(b > a);
    }

    #[test]
    fn phoenix_message_uses_ref_key() {
        let msg = PhoenixMessage::outgoing(topic_for("admins"), "phx_leave", serde_json::json!({}));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["topic"], "realtime:admins");
        assert!(json["ref"].is_string());
    }
}
