//! In-process broadcast client.
//!
//! Channels are fed by calling `roster`, `joining`, `leaving`, `publish`,
//! `acknowledge` and `fail` directly. Used by the test suites and by the
//! CLI's `--local` mode.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use lookout_common::ChannelError;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::broadcast::{BroadcastClient, ChannelMessage, PresenceEvent, Route, RouteId};
use crate::protocol::Member;

const ROUTE_BUFFER: usize = 64;

type Senders<T> = BTreeMap<RouteId, mpsc::Sender<T>>;

#[derive(Default)]
struct Routes {
    presence: HashMap<String, Senders<PresenceEvent>>,
    listeners: HashMap<(String, String), Senders<ChannelMessage>>,
}

/// Remove `route` from the senders under `key`, dropping the entry once
/// empty. Returns whether the route was registered.
fn remove_route<K, T>(map: &mut HashMap<K, Senders<T>>, key: &K, route: RouteId) -> bool
where
    K: std::hash::Hash + Eq,
{
    let Some(senders) = map.get_mut(key) else {
        return false;
    };
    let removed = senders.remove(&route).is_some();
    if senders.is_empty() {
        map.remove(key);
    }
    removed
}

/// Send `event` to every sender. Returns whether at least one took it.
async fn fan_out<T: Clone>(senders: Vec<mpsc::Sender<T>>, event: T) -> bool {
    let mut delivered = false;
    for tx in senders {
        delivered |= tx.send(event.clone()).await.is_ok();
    }
    delivered
}

/// Loopback `BroadcastClient`. Cloning shares the same channels.
#[derive(Clone, Default)]
pub struct LocalBroadcast {
    routes: Arc<RwLock<Routes>>,
}

impl LocalBroadcast {
    pub fn new() -> Self {
        Self::default()
    }

    async fn presence_senders(&self, channel: &str) -> Vec<mpsc::Sender<PresenceEvent>> {
        self.routes
            .read()
            .await
            .presence
            .get(channel)
            .map(|senders| senders.values().cloned().collect())
            .unwrap_or_default()
    }

    async fn listener_senders(&self, channel: &str) -> Vec<mpsc::Sender<ChannelMessage>> {
        self.routes
            .read()
            .await
            .listeners
            .iter()
            .filter(|((ch, _), _)| ch == channel)
            .flat_map(|(_, senders)| senders.values().cloned())
            .collect()
    }

    async fn send_presence(&self, channel: &str, event: PresenceEvent) -> bool {
        let senders = self.presence_senders(channel).await;
        if senders.is_empty() {
            debug!(channel = %channel, "No presence subscriber");
            return false;
        }
        fan_out(senders, event).await
    }

    /// Deliver the full roster. Returns whether anyone was joined.
    pub async fn roster(&self, channel: &str, members: Vec<Member>) -> bool {
        self.send_presence(channel, PresenceEvent::Here(members))
            .await
    }

    pub async fn joining(&self, channel: &str, member: Member) -> bool {
        self.send_presence(channel, PresenceEvent::Joining(member))
            .await
    }

    pub async fn leaving(&self, channel: &str, member: Member) -> bool {
        self.send_presence(channel, PresenceEvent::Leaving(member))
            .await
    }

    /// Fire `event` on `channel`. Returns whether a listener received it.
    pub async fn publish(&self, channel: &str, event: &str, text: &str) -> bool {
        let key = (channel.to_string(), event.to_string());
        let senders: Vec<_> = self
            .routes
            .read()
            .await
            .listeners
            .get(&key)
            .map(|senders| senders.values().cloned().collect())
            .unwrap_or_default();
        fan_out(senders, ChannelMessage::Message(text.to_string())).await
    }

    /// Complete the join handshake for everything registered on `channel`.
    pub async fn acknowledge(&self, channel: &str) {
        fan_out(self.presence_senders(channel).await, PresenceEvent::Joined).await;
        fan_out(self.listener_senders(channel).await, ChannelMessage::Joined).await;
    }

    /// Deliver an error to everything registered on `channel`.
    pub async fn fail(&self, channel: &str, err: ChannelError) {
        fan_out(
            self.presence_senders(channel).await,
            PresenceEvent::Error(err.clone()),
        )
        .await;
        fan_out(
            self.listener_senders(channel).await,
            ChannelMessage::Error(err),
        )
        .await;
    }

    /// Drop every route on `channel`, ending their streams.
    pub async fn close(&self, channel: &str) {
        let mut routes = self.routes.write().await;
        routes.presence.remove(channel);
        routes.listeners.retain(|(ch, _), _| ch != channel);
        debug!(channel = %channel, "Closed local channel");
    }

    /// Whether a presence subscriber is currently joined to `channel`.
    pub async fn is_joined(&self, channel: &str) -> bool {
        self.routes.read().await.presence.contains_key(channel)
    }

    /// Number of presence routes on `channel`.
    pub async fn presence_routes(&self, channel: &str) -> usize {
        self.routes
            .read()
            .await
            .presence
            .get(channel)
            .map_or(0, BTreeMap::len)
    }

    /// Whether someone listens for `event` on `channel`.
    pub async fn is_listening(&self, channel: &str, event: &str) -> bool {
        let key = (channel.to_string(), event.to_string());
        self.routes.read().await.listeners.contains_key(&key)
    }
}

#[async_trait]
impl BroadcastClient for LocalBroadcast {
    async fn join(&self, channel: &str) -> Result<Route<PresenceEvent>, ChannelError> {
        let (tx, route) = Route::channel(ROUTE_BUFFER);
        self.routes
            .write()
            .await
            .presence
            .entry(channel.to_string())
            .or_default()
            .insert(route.id, tx);
        debug!(channel = %channel, route = %route.id, "Joined local channel");
        Ok(route)
    }

    async fn leave(&self, channel: &str, route: RouteId) {
        let mut routes = self.routes.write().await;
        if remove_route(&mut routes.presence, &channel.to_string(), route) {
            debug!(channel = %channel, route = %route, "Left local channel");
        }
    }

    async fn listen(
        &self,
        channel: &str,
        event: &str,
    ) -> Result<Route<ChannelMessage>, ChannelError> {
        let (tx, route) = Route::channel(ROUTE_BUFFER);
        self.routes
            .write()
            .await
            .listeners
            .entry((channel.to_string(), event.to_string()))
            .or_default()
            .insert(route.id, tx);
        debug!(channel = %channel, event = %event, route = %route.id, "Listening on local channel");
        Ok(route)
    }

    async fn stop_listening(&self, channel: &str, event: &str, route: RouteId) {
        let key = (channel.to_string(), event.to_string());
        let mut routes = self.routes.write().await;
        if remove_route(&mut routes.listeners, &key, route) {
            debug!(channel = %channel, event = %event, route = %route, "Stopped listening");
        }
    }
}
