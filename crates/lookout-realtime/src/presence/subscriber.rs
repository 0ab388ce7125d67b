//! Presence subscriber and its subscription handle.

use std::sync::Arc;

use lookout_common::ChannelError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::broadcast::{BroadcastClient, PresenceEvent};
use crate::protocol::Member;
use crate::subscription::{ChannelHandle, Shared, SubscriptionState, Teardown};

use super::set::PresenceSet;

/// Joins presence channels through an injected broadcast client.
#[derive(Clone)]
pub struct PresenceSubscriber {
    client: Arc<dyn BroadcastClient>,
}

impl PresenceSubscriber {
    pub fn new(client: Arc<dyn BroadcastClient>) -> Self {
        Self { client }
    }

    /// Join `channel` and start tracking who is present.
    ///
    /// A failed join does not return an error: it is logged and kept as the
    /// subscription's `last_error`. Other subscriptions on the same channel
    /// are not affected by this one's teardown.
    pub async fn subscribe(&self, channel: &str) -> PresenceSubscription {
        let shared = Arc::new(Shared::new(channel, PresenceSet::new()));
        let (teardown, pump) = match self.client.join(channel).await {
            Ok(route) => (
                Some(Teardown::Leave(route.id)),
                Some(tokio::spawn(pump(route.events, Arc::clone(&shared)))),
            ),
            Err(err) => {
                shared.record_error(err);
                (None, None)
            }
        };
        info!(channel = %channel, "Subscribing to presence");
        PresenceSubscription {
            handle: ChannelHandle::new(Arc::clone(&self.client), shared, teardown, pump),
        }
    }
}

/// Apply presence events, in order, until the stream ends or the
/// subscription is torn down.
async fn pump(mut rx: mpsc::Receiver<PresenceEvent>, shared: Arc<Shared<PresenceSet>>) {
    while let Some(event) = rx.recv().await {
        match event {
            PresenceEvent::Joined => shared.mark_subscribed(),
            PresenceEvent::Here(roster) => {
                shared.mark_subscribed();
                debug!(channel = %shared.channel(), members = roster.len(), "Roster received");
                shared.apply(|set| set.replace(roster));
            }
            PresenceEvent::Joining(member) => {
                debug!(channel = %shared.channel(), id = member.id, "Member joining");
                shared.apply(|set| set.insert(member));
            }
            PresenceEvent::Leaving(member) => {
                debug!(channel = %shared.channel(), id = member.id, "Member leaving");
                shared.apply(|set| set.remove(member.id));
            }
            PresenceEvent::Error(err) => shared.record_error(err),
        }
    }
    debug!(channel = %shared.channel(), "Presence stream ended");
}

/// Handle to a joined presence channel.
///
/// `unsubscribe` (or dropping the handle) is the only way to tear it down.
pub struct PresenceSubscription {
    handle: ChannelHandle<PresenceSet>,
}

impl PresenceSubscription {
    pub fn channel(&self) -> &str {
        self.handle.shared().channel()
    }

    /// Present members ordered by id.
    pub fn members(&self) -> Vec<Member> {
        self.handle.shared().view().members()
    }

    /// Snapshot of the presence set.
    pub fn snapshot(&self) -> PresenceSet {
        self.handle.shared().view().clone()
    }

    /// Receiver notified on every change of the presence set.
    pub fn watch(&self) -> watch::Receiver<PresenceSet> {
        self.handle.shared().watch()
    }

    pub fn state(&self) -> SubscriptionState {
        self.handle.shared().state()
    }

    /// The most recent error reported on the channel, if any.
    pub fn last_error(&self) -> Option<ChannelError> {
        self.handle.shared().last_error()
    }

    /// Leave the channel. Safe to call more than once and before the join
    /// handshake completes; no event is applied once this starts.
    pub async fn unsubscribe(&self) {
        self.handle.unsubscribe().await;
    }
}
