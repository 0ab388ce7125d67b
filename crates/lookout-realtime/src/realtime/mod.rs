//! Realtime broadcast client over the Phoenix Channels v1 protocol.
//!
//! A single WebSocket (via `tokio-tungstenite`) carries every channel.
//! The connection task handles heartbeats, join/leave, presence tracking
//! and reconnects with backoff; a router task splits its event stream into
//! the per-channel streams that `BroadcastClient` hands to subscribers.

mod client;
mod connection;
mod handler;
mod router;
mod types;

pub use client::RealtimeClient;
pub use types::{ChannelConfig, PhoenixMessage, RealtimeConfig};
