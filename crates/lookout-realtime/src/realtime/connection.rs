//! Background WebSocket connection loop with auto-reconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use lookout_common::ChannelError;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use super::handler::handle_phoenix_message;
use super::types::{
    topic_for, ChannelConfig, PhoenixMessage, RealtimeCommand, RealtimeConfig, RealtimeEvent,
};

/// A channel that is (re)joined on every connect.
#[derive(Debug, Clone)]
pub(crate) struct PendingChannel {
    pub(crate) config: ChannelConfig,
    /// Ref of the latest `phx_join`; its reply completes the handshake.
    pub(crate) join_ref: Option<String>,
    /// Presence meta to track again after a rejoin.
    pub(crate) presence_payload: Option<serde_json::Value>,
}

type Channels = Arc<RwLock<HashMap<String, PendingChannel>>>;

/// Serialize and write one frame. Returns its ref, or `None` if the write
/// failed.
async fn send_frame<S>(writer: &Mutex<S>, msg: PhoenixMessage) -> Option<String>
where
    S: Sink<WsMessage> + Unpin,
{
    let json = serde_json::to_string(&msg).ok()?;
    let mut writer = writer.lock().await;
    writer.send(WsMessage::Text(json.into())).await.ok()?;
    msg.msg_ref
}

fn join_frame(channel: &str, config: &ChannelConfig) -> PhoenixMessage {
    PhoenixMessage::outgoing(topic_for(channel), "phx_join", config.to_join_payload())
}

fn leave_frame(channel: &str) -> PhoenixMessage {
    PhoenixMessage::outgoing(topic_for(channel), "phx_leave", serde_json::json!({}))
}

fn untrack_frame(channel: &str) -> PhoenixMessage {
    PhoenixMessage::outgoing(
        topic_for(channel),
        "presence",
        serde_json::json!({ "type": "presence", "event": "untrack" }),
    )
}

fn track_frame(channel: &str, payload: serde_json::Value) -> PhoenixMessage {
    PhoenixMessage::outgoing(
        topic_for(channel),
        "presence",
        serde_json::json!({
            "type": "presence",
            "event": "track",
            "payload": payload
        }),
    )
}

// ---------------------------------------------------------------------------
// Connection loop
// ---------------------------------------------------------------------------

/// Keep a connection open until `Disconnect`, reconnecting with exponential
/// backoff and rejoining every channel after each reconnect.
pub(crate) async fn connection_loop(
    config: RealtimeConfig,
    connected: Arc<RwLock<bool>>,
    event_tx: mpsc::Sender<RealtimeEvent>,
    command_rx: mpsc::Receiver<RealtimeCommand>,
) {
    let command_rx = Arc::new(Mutex::new(command_rx));
    let channels: Channels = Arc::new(RwLock::new(HashMap::new()));
    let stopping = Arc::new(AtomicBool::new(false));
    let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
    let mut reconnect_delay = config.reconnect_delay_secs;

    loop {
        info!(url = %config.display_url(), "Connecting to realtime server");

        match tokio::time::timeout(
            connect_timeout,
            tokio_tungstenite::connect_async(config.ws_url()),
        )
        .await
        {
            Ok(Ok((ws_stream, _))) => {
                reconnect_delay = config.reconnect_delay_secs;
                *connected.write().await = true;
                let _ = event_tx.send(RealtimeEvent::Connected).await;

                let (ws_write, mut ws_read) = ws_stream.split();
                let ws_write = Arc::new(Mutex::new(ws_write));

                rejoin_channels(&ws_write, &channels).await;

                let heartbeat_handle = tokio::spawn(heartbeat_task(
                    Arc::clone(&ws_write),
                    config.heartbeat_interval_secs,
                ));
                let cmd_handle = tokio::spawn(command_forwarder(
                    Arc::clone(&command_rx),
                    Arc::clone(&ws_write),
                    Arc::clone(&channels),
                    Arc::clone(&stopping),
                ));

                while let Some(msg_result) = ws_read.next().await {
                    match msg_result {
                        Ok(WsMessage::Text(text)) => {
                            match serde_json::from_str::<PhoenixMessage>(&text) {
                                Ok(phoenix_msg) => {
                                    handle_phoenix_message(&phoenix_msg, &channels, &event_tx)
                                        .await;
                                }
                                Err(_) => debug!(text = %text, "Unrecognized message from server"),
                            }
                        }
                        Ok(WsMessage::Close(_)) => {
                            info!("Realtime server closed the connection");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "WebSocket error");
                            break;
                        }
                        _ => {}
                    }
                }

                heartbeat_handle.abort();
                cmd_handle.abort();
                *connected.write().await = false;
                let _ = event_tx.send(RealtimeEvent::Disconnected).await;
            }
            Ok(Err(e)) => {
                error!(error = %e, "Failed to connect to realtime server");
                let _ = event_tx
                    .send(RealtimeEvent::Error(ChannelError::transport(format!(
                        "connection failed: {e}"
                    ))))
                    .await;
            }
            Err(_elapsed) => {
                error!(timeout_secs = config.connect_timeout_secs, "Realtime connection timed out");
                let _ = event_tx
                    .send(RealtimeEvent::Error(ChannelError::transport(format!(
                        "connection timed out after {}s",
                        config.connect_timeout_secs
                    ))))
                    .await;
            }
        }

        if stopping.load(Ordering::SeqCst) {
            info!("Realtime connection stopped");
            return;
        }

        info!(delay = reconnect_delay, "Reconnecting in {} seconds", reconnect_delay);
        if backoff(Duration::from_secs(reconnect_delay), &command_rx, &channels).await {
            info!("Realtime connection stopped during backoff");
            return;
        }
        reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay_secs);
    }
}

/// Send `phx_join` (and the tracked presence, if any) for every known channel.
async fn rejoin_channels<S>(ws_write: &Mutex<S>, channels: &Channels)
where
    S: Sink<WsMessage> + Unpin,
{
    let mut channels = channels.write().await;
    for (channel, pending) in channels.iter_mut() {
        let frame = join_frame(channel, &pending.config);
        pending.join_ref = frame.msg_ref.clone();
        send_frame(ws_write, frame).await;
        if let Some(payload) = pending.presence_payload.clone() {
            send_frame(ws_write, track_frame(channel, payload)).await;
        }
        debug!(channel = %channel, "Rejoined channel");
    }
}

/// Wait out a reconnect delay while still taking commands. Joins, leaves
/// and tracks are recorded for the next connection's rejoin. Returns `true`
/// when the client asked to disconnect or is gone.
async fn backoff(
    delay: Duration,
    command_rx: &Mutex<mpsc::Receiver<RealtimeCommand>>,
    channels: &Channels,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    let mut rx = command_rx.lock().await;
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            cmd = rx.recv() => match cmd {
                Some(RealtimeCommand::Disconnect) | None => return true,
                Some(cmd) => record_offline(cmd, channels).await,
            },
        }
    }
}

/// Apply a command to the channel table without a socket.
async fn record_offline(cmd: RealtimeCommand, channels: &Channels) {
    let mut channels = channels.write().await;
    match cmd {
        RealtimeCommand::JoinChannel { channel, config } => {
            channels.insert(
                channel,
                PendingChannel {
                    config,
                    join_ref: None,
                    presence_payload: None,
                },
            );
        }
        RealtimeCommand::LeaveChannel { channel } => {
            channels.remove(&channel);
        }
        RealtimeCommand::PresenceTrack { channel, payload } => {
            if let Some(pending) = channels.get_mut(&channel) {
                pending.presence_payload = Some(payload);
            }
        }
        RealtimeCommand::Disconnect => {}
    }
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

async fn heartbeat_task<S>(ws_write: Arc<Mutex<S>>, interval_secs: u64)
where
    S: Sink<WsMessage> + Unpin,
{
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;
        let msg = PhoenixMessage::outgoing("phoenix".to_string(), "heartbeat", serde_json::json!({}));
        if send_frame(&ws_write, msg).await.is_none() {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Command forwarder
// ---------------------------------------------------------------------------

async fn command_forwarder<S>(
    command_rx: Arc<Mutex<mpsc::Receiver<RealtimeCommand>>>,
    ws_write: Arc<Mutex<S>>,
    channels: Channels,
    stopping: Arc<AtomicBool>,
) where
    S: Sink<WsMessage> + Unpin,
{
    let mut rx = command_rx.lock().await;
    while let Some(cmd) = rx.recv().await {
        match cmd {
            RealtimeCommand::JoinChannel { channel, config } => {
                // Registered before sending so a fast reply is matched.
                let frame = join_frame(&channel, &config);
                channels.write().await.insert(
                    channel,
                    PendingChannel {
                        config,
                        join_ref: frame.msg_ref.clone(),
                        presence_payload: None,
                    },
                );
                send_frame(&ws_write, frame).await;
            }
            RealtimeCommand::LeaveChannel { channel } => {
                let pending = channels.write().await.remove(&channel);
                if pending.is_some_and(|p| p.presence_payload.is_some()) {
                    send_frame(&ws_write, untrack_frame(&channel)).await;
                }
                send_frame(&ws_write, leave_frame(&channel)).await;
            }
            RealtimeCommand::PresenceTrack { channel, payload } => {
                send_frame(&ws_write, track_frame(&channel, payload.clone())).await;
                if let Some(pending) = channels.write().await.get_mut(&channel) {
                    pending.presence_payload = Some(payload);
                }
            }
            RealtimeCommand::Disconnect => {
                stopping.store(true, Ordering::SeqCst);
                let names: Vec<String> = channels.read().await.keys().cloned().collect();
                for channel in &names {
                    send_frame(&ws_write, leave_frame(channel)).await;
                }
                let mut writer = ws_write.lock().await;
                let _ = writer.send(WsMessage::Close(None)).await;
                return;
            }
        }
    }
}
