//! The broadcast client seam.
//!
//! Subscribers never talk to a transport directly; they are handed an
//! `Arc<dyn BroadcastClient>` and consume per-channel event streams from
//! it. `RealtimeClient` implements this over WebSocket, `LocalBroadcast`
//! in-process.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use lookout_common::ChannelError;
use tokio::sync::mpsc;

use crate::protocol::Member;

/// Events delivered on a joined presence channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    /// The join handshake completed.
    Joined,
    /// Full roster of members present at join time.
    Here(Vec<Member>),
    /// A member joined.
    Joining(Member),
    /// A member left.
    Leaving(Member),
    /// Transport or channel error. Not fatal to the channel.
    Error(ChannelError),
}

/// Events delivered to a listener of one named event on a plain channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    /// The join handshake completed.
    Joined,
    /// The event fired with this text.
    Message(String),
    /// Transport or channel error. Not fatal to the channel.
    Error(ChannelError),
}

static NEXT_ROUTE: AtomicU64 = AtomicU64::new(1);

/// Identifies one registration with a broadcast client. Several routes may
/// share a channel; each is torn down on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteId(u64);

impl RouteId {
    /// A process-unique id.
    pub fn next() -> Self {
        Self(NEXT_ROUTE.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "route-{}", self.0)
    }
}

/// A registered route: its id and the events delivered to it.
#[derive(Debug)]
pub struct Route<T> {
    pub id: RouteId,
    pub events: mpsc::Receiver<T>,
}

impl<T> Route<T> {
    /// A fresh route and the sender feeding it.
    pub fn channel(buffer: usize) -> (mpsc::Sender<T>, Self) {
        let (tx, events) = mpsc::channel(buffer);
        (
            tx,
            Self {
                id: RouteId::next(),
                events,
            },
        )
    }
}

/// Connect/join/listen/leave primitives of a pub/sub broadcast client.
///
/// Events for one route arrive on its receiver, in the order the transport
/// produced them. Every route on a channel receives every event meant for
/// it; removing one route leaves the others untouched.
#[async_trait]
pub trait BroadcastClient: Send + Sync {
    /// Join a presence channel.
    async fn join(&self, channel: &str) -> Result<Route<PresenceEvent>, ChannelError>;

    /// Remove one presence route. Unknown routes are a no-op.
    async fn leave(&self, channel: &str, route: RouteId);

    /// Listen for one event name on a plain channel.
    async fn listen(
        &self,
        channel: &str,
        event: &str,
    ) -> Result<Route<ChannelMessage>, ChannelError>;

    /// Remove one listener route. Unknown routes are a no-op.
    async fn stop_listening(&self, channel: &str, event: &str, route: RouteId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_ids_are_unique() {
        let (_tx, a) = Route::<ChannelMessage>::channel(1);
        let (_tx, b) = Route::<ChannelMessage>::channel(1);
        assert_ne!(a.id, b.id);
        assert!(a.id.to_string().starts_with("route-"));
    }
}
