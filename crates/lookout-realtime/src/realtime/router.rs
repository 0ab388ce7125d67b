//! Routes connection events to per-channel subscriber streams.
//!
//! The connection produces one event stream for every channel. The router
//! keeps, per channel, the senders of every presence route and every event
//! listener route, whether the channel's join was acknowledged, and the
//! presence sync state needed to turn Phoenix presence diffs into member
//! joins and leaves.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use lookout_common::ChannelError;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::broadcast::{ChannelMessage, PresenceEvent, RouteId};
use crate::protocol::{member_from_metas, notice_text, Member};

use super::types::{PresenceMap, RealtimeEvent};

// ---------------------------------------------------------------------------
// Presence sync
// ---------------------------------------------------------------------------

struct Tracked {
    member: Member,
    refs: HashSet<String>,
}

fn meta_ref(meta: &serde_json::Value) -> String {
    meta.get("phx_ref")
        .and_then(|r| r.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| meta.to_string())
}

/// Presence state of one channel, keyed by presence key.
///
/// A key stays present while at least one of its metas (one per
/// connection) is present, so closing one of two tabs is not a leave.
#[derive(Default)]
pub(crate) struct PresenceSync {
    entries: HashMap<String, Tracked>,
    /// A full state has arrived on the current connection.
    synced: bool,
}

impl PresenceSync {
    /// Replace everything with a full state. Returns the roster.
    pub(crate) fn sync_state(&mut self, state: &PresenceMap) -> Vec<Member> {
        self.entries.clear();
        self.synced = true;
        for (key, metas) in state {
            match member_from_metas(metas) {
                Some(member) => {
                    let refs = metas.iter().map(meta_ref).collect();
                    self.entries.insert(key.clone(), Tracked { member, refs });
                }
                None => debug!(key = %key, "Presence entry without member id"),
            }
        }
        self.roster().unwrap_or_default()
    }

    /// Members currently present, or `None` before the first full state.
    pub(crate) fn roster(&self) -> Option<Vec<Member>> {
        self.synced
            .then(|| self.entries.values().map(|t| t.member.clone()).collect())
    }

    /// Apply a diff, joins first. Returns the member-level changes.
    pub(crate) fn sync_diff(&mut self, joins: &PresenceMap, leaves: &PresenceMap) -> Vec<PresenceEvent> {
        let mut events = Vec::new();

        for (key, metas) in joins {
            match self.entries.get_mut(key) {
                Some(tracked) => tracked.refs.extend(metas.iter().map(meta_ref)),
                None => match member_from_metas(metas) {
                    Some(member) => {
                        let refs = metas.iter().map(meta_ref).collect();
                        events.push(PresenceEvent::Joining(member.clone()));
                        self.entries.insert(key.clone(), Tracked { member, refs });
                    }
                    None => debug!(key = %key, "Presence join without member id"),
                },
            }
        }

        for (key, metas) in leaves {
            let Some(tracked) = self.entries.get_mut(key) else {
                continue;
            };
            for meta in metas {
                tracked.refs.remove(&meta_ref(meta));
            }
            if tracked.refs.is_empty() {
                if let Some(tracked) = self.entries.remove(key) {
                    events.push(PresenceEvent::Leaving(tracked.member));
                }
            }
        }

        events
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.synced = false;
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

type Senders<T> = BTreeMap<RouteId, mpsc::Sender<T>>;

/// Subscribers of one channel.
#[derive(Default)]
pub(crate) struct ChannelRoutes {
    presence: Senders<PresenceEvent>,
    listeners: HashMap<String, Senders<ChannelMessage>>,
    /// The join was acknowledged on the current connection.
    joined: bool,
    sync: PresenceSync,
}

impl ChannelRoutes {
    pub(crate) fn is_empty(&self) -> bool {
        self.presence.is_empty() && self.listeners.is_empty()
    }

    fn listener_senders(&self) -> impl Iterator<Item = &mpsc::Sender<ChannelMessage>> {
        self.listeners.values().flat_map(|senders| senders.values())
    }
}

#[derive(Default)]
pub(crate) struct Routes {
    channels: HashMap<String, ChannelRoutes>,
}

impl Routes {
    /// Register a presence route. Returns whether it is the first route on
    /// `channel`, i.e. whether the channel still has to be joined.
    ///
    /// A route added to a channel that is already joined is caught up with
    /// the join ack and the current roster.
    pub(crate) fn add_presence(
        &mut self,
        channel: &str,
        route: RouteId,
        tx: mpsc::Sender<PresenceEvent>,
    ) -> bool {
        let routes = self.channels.entry(channel.to_string()).or_default();
        let first = routes.is_empty();
        if routes.joined {
            // The route's buffer is empty, so these fit.
            let _ = tx.try_send(PresenceEvent::Joined);
            if let Some(roster) = routes.sync.roster() {
                let _ = tx.try_send(PresenceEvent::Here(roster));
            }
        }
        routes.presence.insert(route, tx);
        first
    }

    /// Register a listener route. Returns whether it is the first route on
    /// `channel`. A late listener on a joined channel gets the ack at once.
    pub(crate) fn add_listener(
        &mut self,
        channel: &str,
        event: &str,
        route: RouteId,
        tx: mpsc::Sender<ChannelMessage>,
    ) -> bool {
        let routes = self.channels.entry(channel.to_string()).or_default();
        let first = routes.is_empty();
        if routes.joined {
            let _ = tx.try_send(ChannelMessage::Joined);
        }
        routes
            .listeners
            .entry(event.to_string())
            .or_default()
            .insert(route, tx);
        first
    }

    /// Number of presence routes on `channel`.
    pub(crate) fn presence_routes(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map_or(0, |routes| routes.presence.len())
    }

    /// Remove a presence route. `None` when it was not registered,
    /// otherwise whether `channel` has no routes left and was dropped.
    pub(crate) fn remove_presence(&mut self, channel: &str, route: RouteId) -> Option<bool> {
        let routes = self.channels.get_mut(channel)?;
        routes.presence.remove(&route)?;
        Some(self.drop_if_empty(channel))
    }

    /// Remove a listener route, as [`Routes::remove_presence`].
    pub(crate) fn remove_listener(
        &mut self,
        channel: &str,
        event: &str,
        route: RouteId,
    ) -> Option<bool> {
        let routes = self.channels.get_mut(channel)?;
        let senders = routes.listeners.get_mut(event)?;
        senders.remove(&route)?;
        if senders.is_empty() {
            routes.listeners.remove(event);
        }
        Some(self.drop_if_empty(channel))
    }

    fn drop_if_empty(&mut self, channel: &str) -> bool {
        let empty = self
            .channels
            .get(channel)
            .is_some_and(ChannelRoutes::is_empty);
        if empty {
            self.channels.remove(channel);
        }
        empty
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// A message ready to be sent once the routes lock is released.
pub(crate) enum Delivery {
    Presence(mpsc::Sender<PresenceEvent>, PresenceEvent),
    Listener(mpsc::Sender<ChannelMessage>, ChannelMessage),
}

impl Delivery {
    async fn send(self) {
        // A closed receiver means the subscriber is gone; nothing to do.
        match self {
            Delivery::Presence(tx, event) => {
                let _ = tx.send(event).await;
            }
            Delivery::Listener(tx, message) => {
                let _ = tx.send(message).await;
            }
        }
    }
}

fn presence_to(routes: &ChannelRoutes, event: PresenceEvent, out: &mut Vec<Delivery>) {
    for tx in routes.presence.values() {
        out.push(Delivery::Presence(tx.clone(), event.clone()));
    }
}

fn listeners_to(routes: &ChannelRoutes, message: ChannelMessage, out: &mut Vec<Delivery>) {
    for tx in routes.listener_senders() {
        out.push(Delivery::Listener(tx.clone(), message.clone()));
    }
}

fn error_to(routes: &ChannelRoutes, error: &ChannelError, out: &mut Vec<Delivery>) {
    presence_to(routes, PresenceEvent::Error(error.clone()), out);
    listeners_to(routes, ChannelMessage::Error(error.clone()), out);
}

impl Routes {
    /// Work out who receives `event`, updating join and presence sync state.
    pub(crate) fn dispatch(&mut self, event: RealtimeEvent) -> Vec<Delivery> {
        let mut out = Vec::new();
        match event {
            RealtimeEvent::Connected => debug!("Realtime connected"),
            RealtimeEvent::Disconnected => {
                let error = ChannelError::transport("connection lost");
                for routes in self.channels.values_mut() {
                    routes.joined = false;
                    routes.sync.clear();
                    error_to(routes, &error, &mut out);
                }
            }
            RealtimeEvent::Error(error) => {
                for routes in self.channels.values() {
                    error_to(routes, &error, &mut out);
                }
            }
            RealtimeEvent::ChannelJoined { channel } => {
                if let Some(routes) = self.channels.get_mut(&channel) {
                    routes.joined = true;
                    presence_to(routes, PresenceEvent::Joined, &mut out);
                    listeners_to(routes, ChannelMessage::Joined, &mut out);
                }
            }
            RealtimeEvent::ChannelError { channel, error } => {
                if let Some(routes) = self.channels.get(&channel) {
                    error_to(routes, &error, &mut out);
                }
            }
            RealtimeEvent::Broadcast {
                channel,
                event,
                payload,
            } => {
                let senders = self
                    .channels
                    .get(&channel)
                    .and_then(|routes| routes.listeners.get(&event));
                match (senders, notice_text(&payload)) {
                    (Some(senders), Some(text)) => {
                        for tx in senders.values() {
                            out.push(Delivery::Listener(
                                tx.clone(),
                                ChannelMessage::Message(text.clone()),
                            ));
                        }
                    }
                    (Some(_), None) => {
                        debug!(channel = %channel, event = %event, "Broadcast payload has no text");
                    }
                    (None, _) => {}
                }
            }
            RealtimeEvent::PresenceState { channel, state } => {
                if let Some(routes) = self.channels.get_mut(&channel) {
                    let roster = routes.sync.sync_state(&state);
                    presence_to(routes, PresenceEvent::Here(roster), &mut out);
                }
            }
            RealtimeEvent::PresenceDiff {
                channel,
                joins,
                leaves,
            } => {
                if let Some(routes) = self.channels.get_mut(&channel) {
                    for event in routes.sync.sync_diff(&joins, &leaves) {
                        presence_to(routes, event, &mut out);
                    }
                }
            }
        }
        out
    }
}

/// Drain connection events and forward them to subscribers, in order.
pub(crate) async fn route_events(mut event_rx: mpsc::Receiver<RealtimeEvent>, routes: Arc<RwLock<Routes>>) {
    while let Some(event) = event_rx.recv().await {
        let deliveries = routes.write().await.dispatch(event);
        for delivery in deliveries {
            delivery.send().await;
        }
    }
    debug!("Realtime event stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use lookout_common::ErrorKind;
    use serde_json::json;

    fn map(entries: &[(&str, serde_json::Value)]) -> PresenceMap {
        entries
            .iter()
            .map(|(key, meta)| (key.to_string(), vec![meta.clone()]))
            .collect()
    }

    fn meta(id: i64, name: &str, phx_ref: &str) -> serde_json::Value {
        json!({ "id": id, "name": name, "phx_ref": phx_ref })
    }

    #[test]
    fn state_then_diff_produces_member_events() {
        let mut sync = PresenceSync::default();
        let mut roster = sync.sync_state(&map(&[("1", meta(1, "A", "a")), ("2", meta(2, "B", "b"))]));
        roster.sort_by_key(|m| m.id);
        assert_eq!(roster, vec![Member::new(1, "A"), Member::new(2, "B")]);

        let events = sync.sync_diff(&map(&[("3", meta(3, "C", "c"))]), &map(&[("2", meta(2, "B", "b"))]));
        assert_eq!(
            events,
            vec![
                PresenceEvent::Joining(Member::new(3, "C")),
                PresenceEvent::Leaving(Member::new(2, "B")),
            ]
        );
    }

    #[test]
    fn second_connection_of_a_member_is_not_a_join() {
        let mut sync = PresenceSync::default();
        sync.sync_state(&map(&[("1", meta(1, "A", "tab1"))]));

        let events = sync.sync_diff(&map(&[("1", meta(1, "A", "tab2"))]), &PresenceMap::new());
        assert!(events.is_empty());

        // Closing one tab keeps the member present.
        let events = sync.sync_diff(&PresenceMap::new(), &map(&[("1", meta(1, "A", "tab1"))]));
        assert!(events.is_empty());

        let events = sync.sync_diff(&PresenceMap::new(), &map(&[("1", meta(1, "A", "tab2"))]));
        assert_eq!(events, vec![PresenceEvent::Leaving(Member::new(1, "A"))]);
    }

    #[test]
    fn meta_update_in_one_diff_keeps_member() {
        let mut sync = PresenceSync::default();
        sync.sync_state(&map(&[("1", meta(1, "A", "old"))]));
        let events = sync.sync_diff(&map(&[("1", meta(1, "A", "new"))]), &map(&[("1", meta(1, "A", "old"))]));
        assert!(events.is_empty());
    }

    #[test]
    fn unknown_leave_and_bad_join_are_ignored() {
        let mut sync = PresenceSync::default();
        let events = sync.sync_diff(
            &map(&[("x", json!({ "name": "no id", "phx_ref": "x" }))]),
            &map(&[("9", meta(9, "ghost", "g"))]),
        );
        assert!(events.is_empty());
    }

    fn routes_with(channel: &str) -> (
        Routes,
        mpsc::Receiver<PresenceEvent>,
        mpsc::Receiver<ChannelMessage>,
    ) {
        let (ptx, prx) = mpsc::channel(8);
        let (ltx, lrx) = mpsc::channel(8);
        let mut routes = Routes::default();
        assert!(routes.add_presence(channel, RouteId::next(), ptx));
        assert!(!routes.add_listener(channel, "NotificationSent", RouteId::next(), ltx));
        (routes, prx, lrx)
    }

    async fn deliver(deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            delivery.send().await;
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_matching_listener_only() {
        let (mut routes, mut presence, mut notices) = routes_with("admins");
        deliver(routes.dispatch(RealtimeEvent::Broadcast {
            channel: "admins".into(),
            event: "NotificationSent".into(),
            payload: json!({ "message": "Hello" }),
        }))
        .await;
        deliver(routes.dispatch(RealtimeEvent::Broadcast {
            channel: "admins".into(),
            event: "Other".into(),
            payload: json!("ignored"),
        }))
        .await;

        assert_eq!(notices.try_recv().ok(), Some(ChannelMessage::Message("Hello".into())));
        assert!(notices.try_recv().is_err());
        assert!(presence.try_recv().is_err());
    }

    #[tokio::test]
    async fn join_ack_reaches_every_route_of_the_channel() {
        let (mut routes, mut presence, mut notices) = routes_with("admins");
        deliver(routes.dispatch(RealtimeEvent::ChannelJoined {
            channel: "admins".into(),
        }))
        .await;
        assert_eq!(presence.try_recv().ok(), Some(PresenceEvent::Joined));
        assert_eq!(notices.try_recv().ok(), Some(ChannelMessage::Joined));
    }

    #[tokio::test]
    async fn connection_errors_are_transport_channel_errors_are_application() {
        let (mut routes, mut presence, _notices) = routes_with("admins");

        deliver(routes.dispatch(RealtimeEvent::Disconnected)).await;
        match presence.try_recv() {
            Ok(PresenceEvent::Error(err)) => assert_eq!(err.kind, ErrorKind::Transport),
            other => panic!("unexpected {other:?}"),
        }

        deliver(routes.dispatch(RealtimeEvent::ChannelError {
            channel: "admins".into(),
            error: ChannelError::application("channel closed by server"),
        }))
        .await;
        match presence.try_recv() {
            Ok(PresenceEvent::Error(err)) => assert_eq!(err.kind, ErrorKind::Application),
            other => panic!("unexpected {other:?}"),
        }

        // Other channels' errors are not ours.
        deliver(routes.dispatch(RealtimeEvent::ChannelError {
            channel: "elsewhere".into(),
            error: ChannelError::application("nope"),
        }))
        .await;
        assert!(presence.try_recv().is_err());
    }

    #[tokio::test]
    async fn presence_state_becomes_roster() {
        let (mut routes, mut presence, _notices) = routes_with("admins");
        deliver(routes.dispatch(RealtimeEvent::PresenceState {
            channel: "admins".into(),
            state: map(&[("1", meta(1, "A", "a"))]),
        }))
        .await;
        assert_eq!(
            presence.try_recv().ok(),
            Some(PresenceEvent::Here(vec![Member::new(1, "A")]))
        );
    }

    #[tokio::test]
    async fn every_presence_route_gets_the_roster() {
        let mut routes = Routes::default();
        let (atx, mut a) = mpsc::channel(8);
        let (btx, mut b) = mpsc::channel(8);
        let a_id = RouteId::next();
        assert!(routes.add_presence("admins", a_id, atx));
        assert!(!routes.add_presence("admins", RouteId::next(), btx));

        deliver(routes.dispatch(RealtimeEvent::PresenceState {
            channel: "admins".into(),
            state: map(&[("1", meta(1, "A", "a"))]),
        }))
        .await;
        let roster = Some(PresenceEvent::Here(vec![Member::new(1, "A")]));
        assert_eq!(a.try_recv().ok(), roster);
        assert_eq!(b.try_recv().ok(), roster);

        // Removing one route keeps the channel and the other route.
        assert_eq!(routes.remove_presence("admins", a_id), Some(false));
        assert_eq!(routes.remove_presence("admins", a_id), None);
        assert_eq!(routes.presence_routes("admins"), 1);

        deliver(routes.dispatch(RealtimeEvent::PresenceDiff {
            channel: "admins".into(),
            joins: map(&[("2", meta(2, "B", "b"))]),
            leaves: PresenceMap::new(),
        }))
        .await;
        assert!(a.try_recv().is_err());
        assert_eq!(
            b.try_recv().ok(),
            Some(PresenceEvent::Joining(Member::new(2, "B")))
        );
    }

    #[tokio::test]
    async fn last_route_removal_drops_the_channel() {
        let mut routes = Routes::default();
        let (tx, _rx) = mpsc::channel(8);
        let id = RouteId::next();
        routes.add_listener("admins", "NotificationSent", id, tx);

        assert_eq!(routes.remove_listener("admins", "Other", id), None);
        assert_eq!(routes.remove_listener("admins", "NotificationSent", id), Some(true));
        assert!(routes.is_empty());
    }

    #[tokio::test]
    async fn late_presence_route_is_caught_up() {
        let mut routes = Routes::default();
        let (ltx, _listener) = mpsc::channel(8);
        routes.add_listener("admins", "NotificationSent", RouteId::next(), ltx);
        deliver(routes.dispatch(RealtimeEvent::ChannelJoined {
            channel: "admins".into(),
        }))
        .await;
        deliver(routes.dispatch(RealtimeEvent::PresenceState {
            channel: "admins".into(),
            state: map(&[("1", meta(1, "A", "a"))]),
        }))
        .await;

        let (ptx, mut presence) = mpsc::channel(8);
        assert!(!routes.add_presence("admins", RouteId::next(), ptx));
        assert_eq!(presence.try_recv().ok(), Some(PresenceEvent::Joined));
        assert_eq!(
            presence.try_recv().ok(),
            Some(PresenceEvent::Here(vec![Member::new(1, "A")]))
        );
    }

    #[tokio::test]
    async fn joined_channel_without_state_only_acks() {
        let mut routes = Routes::default();
        let (ltx, _listener) = mpsc::channel(8);
        routes.add_listener("admins", "NotificationSent", RouteId::next(), ltx);
        deliver(routes.dispatch(RealtimeEvent::ChannelJoined {
            channel: "admins".into(),
        }))
        .await;

        let (ptx, mut presence) = mpsc::channel(8);
        routes.add_presence("admins", RouteId::next(), ptx);
        assert_eq!(presence.try_recv().ok(), Some(PresenceEvent::Joined));
        assert!(presence.try_recv().is_err());

        let (ltx, mut late) = mpsc::channel(8);
        routes.add_listener("admins", "Other", RouteId::next(), ltx);
        assert_eq!(late.try_recv().ok(), Some(ChannelMessage::Joined));
    }

    #[tokio::test]
    async fn disconnect_forgets_the_join() {
        let (mut routes, _presence, _notices) = routes_with("admins");
        deliver(routes.dispatch(RealtimeEvent::ChannelJoined {
            channel: "admins".into(),
        }))
        .await;
        deliver(routes.dispatch(RealtimeEvent::Disconnected)).await;

        let (ptx, mut presence) = mpsc::channel(8);
        routes.add_presence("admins", RouteId::next(), ptx);
        assert!(presence.try_recv().is_err());
    }
}
