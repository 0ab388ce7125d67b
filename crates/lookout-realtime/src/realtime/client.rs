//! Public handle for the realtime connection.

use std::sync::Arc;

use async_trait::async_trait;
use lookout_common::ChannelError;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use crate::broadcast::{BroadcastClient, ChannelMessage, PresenceEvent, Route, RouteId};
use crate::protocol::Member;

use super::connection::connection_loop;
use super::router::{route_events, Routes};
use super::types::{ChannelConfig, RealtimeCommand, RealtimeConfig, RealtimeEvent};

const ROUTE_BUFFER: usize = 64;

/// Handle for a realtime connection. All methods send commands to the
/// background connection task and return without waiting for the server.
///
/// Any number of routes may share a channel. The channel is joined with
/// its first route and left with its last.
pub struct RealtimeClient {
    command_tx: mpsc::Sender<RealtimeCommand>,
    connected: Arc<RwLock<bool>>,
    routes: Arc<RwLock<Routes>>,
    presence_key: String,
    access_token: Option<String>,
    track_as: Option<Member>,
}

impl RealtimeClient {
    /// Start the background connection and event router.
    pub fn connect(config: RealtimeConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (command_tx, command_rx) = mpsc::channel(64);
        let client = Self::with_channels(&config, command_tx, event_rx);

        tokio::spawn(connection_loop(
            config,
            Arc::clone(&client.connected),
            event_tx,
            command_rx,
        ));
        client
    }

    /// A client fed by `event_rx` and writing to `command_tx`. Starts the
    /// event router only.
    fn with_channels(
        config: &RealtimeConfig,
        command_tx: mpsc::Sender<RealtimeCommand>,
        event_rx: mpsc::Receiver<RealtimeEvent>,
    ) -> Self {
        let routes = Arc::new(RwLock::new(Routes::default()));
        tokio::spawn(route_events(event_rx, Arc::clone(&routes)));

        let presence_key = match &config.track_as {
            Some(member) => member.id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };

        Self {
            command_tx,
            connected: Arc::new(RwLock::new(false)),
            routes,
            presence_key,
            access_token: config.access_token.clone(),
            track_as: config.track_as.clone(),
        }
    }

    pub async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }

    /// Leave every channel and close the socket. The connection does not
    /// reconnect afterwards.
    pub async fn disconnect(&self) {
        let _ = self.command_tx.send(RealtimeCommand::Disconnect).await;
        info!("Realtime disconnect requested");
    }

    async fn command(&self, cmd: RealtimeCommand) -> Result<(), ChannelError> {
        self.command_tx
            .send(cmd)
            .await
            .map_err(|_| ChannelError::transport("realtime connection task has stopped"))
    }

    fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            self_send: false,
            ack: false,
            presence_key: self.presence_key.clone(),
            access_token: self.access_token.clone(),
        }
    }

    async fn send_join(&self, channel: &str) -> Result<(), ChannelError> {
        self.command(RealtimeCommand::JoinChannel {
            channel: channel.to_string(),
            config: self.channel_config(),
        })
        .await
    }

    async fn send_leave(&self, channel: &str) {
        let _ = self
            .command(RealtimeCommand::LeaveChannel {
                channel: channel.to_string(),
            })
            .await;
        debug!(channel = %channel, "Left realtime channel");
    }

    /// Announce the tracked member on `channel`, if there is one.
    async fn send_track(&self, channel: &str) -> Result<(), ChannelError> {
        let Some(member) = &self.track_as else {
            return Ok(());
        };
        self.command(RealtimeCommand::PresenceTrack {
            channel: channel.to_string(),
            payload: member.to_meta(),
        })
        .await
    }
}

// The routes lock is held while join and leave commands are queued, so
// commands for one channel reach the connection in routing order.
#[async_trait]
impl BroadcastClient for RealtimeClient {
    async fn join(&self, channel: &str) -> Result<Route<PresenceEvent>, ChannelError> {
        let (tx, route) = Route::channel(ROUTE_BUFFER);
        let mut routes = self.routes.write().await;
        let first = routes.add_presence(channel, route.id, tx);

        let mut sent = Ok(());
        if first {
            sent = self.send_join(channel).await;
        }
        if sent.is_ok() && routes.presence_routes(channel) == 1 {
            sent = self.send_track(channel).await;
        }
        if let Err(err) = sent {
            routes.remove_presence(channel, route.id);
            return Err(err);
        }
        debug!(channel = %channel, route = %route.id, first, "Presence route added");
        Ok(route)
    }

    async fn leave(&self, channel: &str, route: RouteId) {
        let mut routes = self.routes.write().await;
        if routes.remove_presence(channel, route) == Some(true) {
            self.send_leave(channel).await;
        }
    }

    async fn listen(
        &self,
        channel: &str,
        event: &str,
    ) -> Result<Route<ChannelMessage>, ChannelError> {
        let (tx, route) = Route::channel(ROUTE_BUFFER);
        let mut routes = self.routes.write().await;
        if routes.add_listener(channel, event, route.id, tx) {
            if let Err(err) = self.send_join(channel).await {
                routes.remove_listener(channel, event, route.id);
                return Err(err);
            }
        }
        debug!(channel = %channel, event = %event, route = %route.id, "Listener route added");
        Ok(route)
    }

    async fn stop_listening(&self, channel: &str, event: &str, route: RouteId) {
        let mut routes = self.routes.write().await;
        if routes.remove_listener(channel, event, route) == Some(true) {
            self.send_leave(channel).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;
    use crate::notice::NoticeSubscriber;
    use crate::presence::PresenceSubscriber;
    use crate::subscription::SubscriptionState;

    struct Harness {
        client: Arc<RealtimeClient>,
        commands: mpsc::Receiver<RealtimeCommand>,
        events: mpsc::Sender<RealtimeEvent>,
    }

    impl Harness {
        fn new(config: RealtimeConfig) -> Self {
            let (command_tx, commands) = mpsc::channel(64);
            let (events, event_rx) = mpsc::channel(64);
            let client = Arc::new(RealtimeClient::with_channels(&config, command_tx, event_rx));
            Self {
                client,
                commands,
                events,
            }
        }

        /// Commands queued so far, as `(kind, channel)`.
        fn drain(&mut self) -> Vec<(&'static str, String)> {
            let mut out = Vec::new();
            while let Ok(cmd) = self.commands.try_recv() {
                out.push(match cmd {
                    RealtimeCommand::JoinChannel { channel, .. } => ("join", channel),
                    RealtimeCommand::LeaveChannel { channel } => ("leave", channel),
                    RealtimeCommand::PresenceTrack { channel, .. } => ("track", channel),
                    RealtimeCommand::Disconnect => ("disconnect", String::new()),
                });
            }
            out
        }

        async fn emit(&self, event: RealtimeEvent) {
            self.events.send(event).await.unwrap();
            settle().await;
        }
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    fn state_with(id: i64, name: &str) -> RealtimeEvent {
        let mut state = HashMap::new();
        state.insert(
            id.to_string(),
            vec![json!({ "id": id, "name": name, "phx_ref": format!("r{id}") })],
        );
        RealtimeEvent::PresenceState {
            channel: "admins".into(),
            state,
        }
    }

    #[tokio::test]
    async fn two_presence_subscriptions_share_one_join() {
        let mut h = Harness::new(RealtimeConfig::default());
        let subscriber = PresenceSubscriber::new(h.client.clone());
        let a = subscriber.subscribe("admins").await;
        let b = subscriber.subscribe("admins").await;
        assert_eq!(h.drain(), vec![("join", "admins".to_string())]);

        a.unsubscribe().await;
        assert!(h.drain().is_empty());
        assert_eq!(h.client.routes.read().await.presence_routes("admins"), 1);

        h.emit(state_with(1, "A")).await;
        assert_eq!(b.state(), SubscriptionState::Subscribed);
        assert_eq!(b.members(), vec![Member::new(1, "A")]);
        assert!(a.members().is_empty());

        b.unsubscribe().await;
        assert_eq!(h.drain(), vec![("leave", "admins".to_string())]);
        assert!(h.client.routes.read().await.is_empty());
    }

    #[tokio::test]
    async fn presence_after_a_joined_listener_gets_the_roster() {
        let mut h = Harness::new(RealtimeConfig::default());
        let notices = NoticeSubscriber::new(h.client.clone())
            .subscribe("admins", "NotificationSent")
            .await;
        h.emit(RealtimeEvent::ChannelJoined {
            channel: "admins".into(),
        })
        .await;
        h.emit(state_with(1, "A")).await;
        assert_eq!(notices.state(), SubscriptionState::Subscribed);

        let presence = PresenceSubscriber::new(h.client.clone())
            .subscribe("admins")
            .await;
        settle().await;
        assert_eq!(presence.state(), SubscriptionState::Subscribed);
        assert_eq!(presence.members(), vec![Member::new(1, "A")]);
        assert_eq!(h.drain(), vec![("join", "admins".to_string())]);

        // The channel stays joined while the presence route remains.
        notices.unsubscribe().await;
        assert!(h.drain().is_empty());
        presence.unsubscribe().await;
        assert_eq!(h.drain(), vec![("leave", "admins".to_string())]);
    }

    #[tokio::test]
    async fn listeners_of_one_event_each_get_broadcasts() {
        let h = Harness::new(RealtimeConfig::default());
        let subscriber = NoticeSubscriber::new(h.client.clone());
        let a = subscriber.subscribe("admins", "NotificationSent").await;
        let b = subscriber.subscribe("admins", "NotificationSent").await;

        h.emit(RealtimeEvent::Broadcast {
            channel: "admins".into(),
            event: "NotificationSent".into(),
            payload: json!({ "message": "Hi" }),
        })
        .await;
        assert_eq!(a.text(), "Hi");
        assert_eq!(b.text(), "Hi");

        a.unsubscribe().await;
        h.emit(RealtimeEvent::Broadcast {
            channel: "admins".into(),
            event: "NotificationSent".into(),
            payload: json!("Again"),
        })
        .await;
        assert_eq!(a.text(), "Hi");
        assert_eq!(b.text(), "Again");
    }

    #[tokio::test]
    async fn tracked_member_is_announced_once_per_channel() {
        let mut h = Harness::new(RealtimeConfig {
            track_as: Some(Member::new(7, "Ada")),
            ..Default::default()
        });
        let first = h.client.join("admins").await.unwrap();
        let _second = h.client.join("admins").await.unwrap();
        assert_eq!(
            h.drain(),
            vec![
                ("join", "admins".to_string()),
                ("track", "admins".to_string())
            ]
        );
        assert_eq!(h.client.presence_key, "7");

        h.client.leave("admins", first.id).await;
        h.client.leave("admins", first.id).await;
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn failed_join_rolls_the_route_back() {
        let h = Harness::new(RealtimeConfig::default());
        let Harness {
            client, commands, ..
        } = h;
        drop(commands);

        let err = client.join("admins").await.unwrap_err();
        assert!(err.is_transport());
        assert!(client.routes.read().await.is_empty());

        let err = client.listen("admins", "NotificationSent").await.unwrap_err();
        assert!(err.is_transport());
        assert!(client.routes.read().await.is_empty());
    }
}
