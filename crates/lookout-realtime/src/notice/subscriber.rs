//! Notice subscriber and its subscription handle.

use std::sync::Arc;
use std::time::Duration;

use lookout_common::{ChannelError, NotificationMessage, DEFAULT_NOTICE_TTL};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::broadcast::{BroadcastClient, ChannelMessage};
use crate::subscription::{ChannelHandle, Shared, SubscriptionState, Teardown};

type Current = Option<NotificationMessage>;

/// Listens for one event on plain channels through an injected broadcast
/// client.
#[derive(Clone)]
pub struct NoticeSubscriber {
    client: Arc<dyn BroadcastClient>,
    ttl: Duration,
}

impl NoticeSubscriber {
    /// A subscriber whose notices stay visible for the default TTL.
    pub fn new(client: Arc<dyn BroadcastClient>) -> Self {
        Self::with_ttl(client, DEFAULT_NOTICE_TTL)
    }

    pub fn with_ttl(client: Arc<dyn BroadcastClient>, ttl: Duration) -> Self {
        Self { client, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Listen for `event` on `channel`.
    ///
    /// A failed listen is logged and kept as the subscription's
    /// `last_error`; it is not returned.
    pub async fn subscribe(&self, channel: &str, event: &str) -> NoticeSubscription {
        let shared = Arc::new(Shared::<Current>::new(channel, None));
        let (teardown, pump) = match self.client.listen(channel, event).await {
            Ok(route) => (
                Some(Teardown::StopListening {
                    event: event.to_string(),
                    route: route.id,
                }),
                Some(tokio::spawn(pump(route.events, Arc::clone(&shared), self.ttl))),
            ),
            Err(err) => {
                shared.record_error(err);
                (None, None)
            }
        };
        info!(channel = %channel, event = %event, "Listening for notices");
        NoticeSubscription {
            event: event.to_string(),
            handle: ChannelHandle::new(
                Arc::clone(&self.client),
                shared,
                teardown,
                pump,
            ),
        }
    }
}

/// Resolves at `deadline`, or never when there is nothing to clear.
async fn expiry(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn clear(shared: &Shared<Current>) {
    if shared.apply(|current| current.take().is_some()) {
        debug!(channel = %shared.channel(), "Notice expired");
    }
}

/// Apply messages in order and clear the current one when its TTL runs
/// out. Each new message replaces the pending deadline.
async fn pump(mut rx: mpsc::Receiver<ChannelMessage>, shared: Arc<Shared<Current>>, ttl: Duration) {
    let mut deadline: Option<Instant> = None;
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(ChannelMessage::Message(text)) => {
                    let message = NotificationMessage::new(text, ttl);
                    deadline = Some(message.expires_at());
                    debug!(channel = %shared.channel(), "Notice received");
                    shared.apply(|current| {
                        *current = Some(message);
                        true
                    });
                }
                Some(ChannelMessage::Joined) => shared.mark_subscribed(),
                Some(ChannelMessage::Error(err)) => shared.record_error(err),
                None => break,
            },
            _ = expiry(deadline) => {
                deadline = None;
                clear(&shared);
            }
        }
    }

    // The stream ended; the last notice still gets its full display time.
    if let Some(deadline) = deadline {
        tokio::time::sleep_until(deadline).await;
        clear(&shared);
    }
    debug!(channel = %shared.channel(), "Notice stream ended");
}

/// Handle to a notice listener.
pub struct NoticeSubscription {
    event: String,
    handle: ChannelHandle<Current>,
}

impl NoticeSubscription {
    pub fn channel(&self) -> &str {
        self.handle.shared().channel()
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// The notice currently on display.
    pub fn current(&self) -> Option<NotificationMessage> {
        self.handle.shared().view().clone()
    }

    /// Text of the current notice, empty when none is showing.
    pub fn text(&self) -> String {
        self.handle
            .shared()
            .view()
            .as_ref()
            .map(|message| message.text.clone())
            .unwrap_or_default()
    }

    /// Receiver notified whenever a notice appears or is cleared.
    pub fn watch(&self) -> watch::Receiver<Current> {
        self.handle.shared().watch()
    }

    pub fn state(&self) -> SubscriptionState {
        self.handle.shared().state()
    }

    pub fn last_error(&self) -> Option<ChannelError> {
        self.handle.shared().last_error()
    }

    /// Stop listening. Cancels any pending clear; safe to call more than once.
    pub async fn unsubscribe(&self) {
        self.handle.unsubscribe().await;
    }
}
