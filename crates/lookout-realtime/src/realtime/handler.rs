//! Incoming Phoenix message handling and presence map parsing.

use std::collections::HashMap;
use std::sync::Arc;

use lookout_common::ChannelError;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use super::connection::PendingChannel;
use super::types::{channel_for, PhoenixMessage, PresenceMap, RealtimeEvent};

/// Parse a Phoenix presence map. The wire shape is
/// `{ "key": { "metas": [{ ... }] } }`.
pub(crate) fn parse_presence_map(value: &serde_json::Value) -> PresenceMap {
    let mut result = HashMap::new();
    if let Some(obj) = value.as_object() {
        for (key, val) in obj {
            if let Some(metas) = val.get("metas").and_then(|m| m.as_array()) {
                result.insert(key.clone(), metas.clone());
            }
        }
    }
    result
}

/// Translate one incoming message. `is_join_reply` tells whether the
/// message answers the pending `phx_join` of its topic.
pub(crate) fn translate(msg: &PhoenixMessage, is_join_reply: bool) -> Option<RealtimeEvent> {
    let channel = channel_for(&msg.topic).to_string();

    match msg.event.as_str() {
        "phx_reply" => {
            let status = msg.payload.get("status").and_then(|s| s.as_str())?;
            if status == "ok" {
                if is_join_reply {
                    return Some(RealtimeEvent::ChannelJoined { channel });
                }
                debug!(channel = %channel, "Reply: ok");
                return None;
            }
            let reason = msg
                .payload
                .get("response")
                .and_then(|r| r.get("reason"))
                .and_then(|r| r.as_str())
                .unwrap_or("unknown error");
            let message = if is_join_reply {
                format!("join rejected: {reason}")
            } else {
                format!("{status}: {reason}")
            };
            Some(RealtimeEvent::ChannelError {
                channel,
                error: ChannelError::application(message),
            })
        }
        "phx_error" => Some(RealtimeEvent::ChannelError {
            channel,
            error: ChannelError::application("channel errored"),
        }),
        "phx_close" => Some(RealtimeEvent::ChannelError {
            channel,
            error: ChannelError::application("channel closed by server"),
        }),
        "broadcast" => {
            let event = msg
                .payload
                .get("event")
                .and_then(|e| e.as_str())
                .unwrap_or("unknown")
                .to_string();
            let payload = msg
                .payload
                .get("payload")
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            Some(RealtimeEvent::Broadcast {
                channel,
                event,
                payload,
            })
        }
        "presence_state" => Some(RealtimeEvent::PresenceState {
            channel,
            state: parse_presence_map(&msg.payload),
        }),
        "presence_diff" => {
            let joins = msg
                .payload
                .get("joins")
                .map(parse_presence_map)
                .unwrap_or_default();
            let leaves = msg
                .payload
                .get("leaves")
                .map(parse_presence_map)
                .unwrap_or_default();
            Some(RealtimeEvent::PresenceDiff {
                channel,
                joins,
                leaves,
            })
        }
        _ => {
            debug!(channel = %channel, event = %msg.event, "Unhandled Phoenix event");
            None
        }
    }
}

/// Handle a single incoming Phoenix message.
pub(crate) async fn handle_phoenix_message(
    msg: &PhoenixMessage,
    joined_channels: &Arc<RwLock<HashMap<String, PendingChannel>>>,
    event_tx: &mpsc::Sender<RealtimeEvent>,
) {
    // Heartbeat replies.
    if msg.topic == "phoenix" {
        return;
    }

    let is_join_reply = {
        let channels = joined_channels.read().await;
        channels
            .get(channel_for(&msg.topic))
            .and_then(|pending| pending.join_ref.as_deref())
            .is_some_and(|join_ref| msg.msg_ref.as_deref() == Some(join_ref))
    };

    if let Some(event) = translate(msg, is_join_reply) {
        let _ = event_tx.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lookout_common::ErrorKind;
    use serde_json::json;

    fn incoming(event: &str, payload: serde_json::Value) -> PhoenixMessage {
        PhoenixMessage {
            topic: "realtime:admins".into(),
            event: event.into(),
            payload,
            msg_ref: Some("4".into()),
        }
    }

    #[test]
    fn join_reply_ok_is_channel_joined() {
        let msg = incoming("phx_reply", json!({ "status": "ok", "response": {} }));
        assert!(matches!(
            translate(&msg, true),
            Some(RealtimeEvent::ChannelJoined { channel }) if channel == "admins"
        ));
        // Acks for anything else are not joins.
        assert!(translate(&msg, false).is_none());
    }

    #[test]
    fn join_reply_error_is_application_error() {
        let msg = incoming(
            "phx_reply",
            json!({ "status": "error", "response": { "reason": "unauthorized" } }),
        );
        match translate(&msg, true) {
            Some(RealtimeEvent::ChannelError { channel, error }) => {
                assert_eq!(channel, "admins");
                assert_eq!(error.kind, ErrorKind::Application);
                assert_eq!(error.message, "join rejected: unauthorized");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn server_close_and_error_are_application_errors() {
        for event in ["phx_error", "phx_close"] {
            let msg = incoming(event, json!({}));
            assert!(matches!(
                translate(&msg, false),
                Some(RealtimeEvent::ChannelError { error, .. }) if error.kind == ErrorKind::Application
            ));
        }
    }

    #[test]
    fn broadcast_unwraps_inner_event() {
        let msg = incoming(
            "broadcast",
            json!({ "type": "broadcast", "event": "NotificationSent", "payload": { "message": "Hi" } }),
        );
        match translate(&msg, false) {
            Some(RealtimeEvent::Broadcast {
                channel,
                event,
                payload,
            }) => {
                assert_eq!(channel, "admins");
                assert_eq!(event, "NotificationSent");
                assert_eq!(payload["message"], "Hi");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn presence_diff_parses_joins_and_leaves() {
        let msg = incoming(
            "presence_diff",
            json!({
                "joins": { "3": { "metas": [{ "id": 3, "name": "C", "phx_ref": "r3" }] } },
                "leaves": { "2": { "metas": [{ "id": 2, "name": "B", "phx_ref": "r2" }] } }
            }),
        );
        match translate(&msg, false) {
            Some(RealtimeEvent::PresenceDiff { joins, leaves, .. }) => {
                assert_eq!(joins["3"][0]["name"], "C");
                assert_eq!(leaves["2"][0]["id"], 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn presence_map_skips_entries_without_metas() {
        let map = parse_presence_map(&json!({
            "1": { "metas": [{ "id": 1 }] },
            "2": { "other": true },
        }));
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("1"));
    }

    #[test]
    fn unknown_events_are_dropped() {
        assert!(translate(&incoming("postgres_changes", json!({})), false).is_none());
    }
}
