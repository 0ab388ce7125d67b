//! Lifecycle shared by presence and notice subscriptions.
//!
//! A subscription moves `Subscribing -> Subscribed -> Unsubscribed`. Its view
//! is only mutated while the status lock is held and the state is not
//! `Unsubscribed`, so once `close` returns no further event can reach the
//! view.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lookout_common::{ChannelError, ErrorKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broadcast::{BroadcastClient, RouteId};

/// Lifecycle of a channel subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Torn down; no further events are applied.
    Unsubscribed,
    /// Join requested, handshake not yet acknowledged.
    Subscribing,
    /// Handshake acknowledged or first roster received.
    Subscribed,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionState::Unsubscribed => f.write_str("unsubscribed"),
            SubscriptionState::Subscribing => f.write_str("subscribing"),
            SubscriptionState::Subscribed => f.write_str("subscribed"),
        }
    }
}

/// Send a channel error to the log sink. Transport and application errors
/// are logged at different levels.
pub(crate) fn log_channel_error(channel: &str, err: &ChannelError) {
    match err.kind {
        ErrorKind::Transport => {
            error!(channel = %channel, kind = %err.kind, message = %err.message, "Channel transport error");
        }
        ErrorKind::Application => {
            warn!(channel = %channel, kind = %err.kind, message = %err.message, "Channel error");
        }
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Status {
    state: SubscriptionState,
    last_error: Option<ChannelError>,
}

/// State owned by one subscription and written only by its pump task.
pub(crate) struct Shared<V> {
    channel: String,
    status: Mutex<Status>,
    view: watch::Sender<V>,
}

impl<V> Shared<V> {
    pub(crate) fn new(channel: &str, initial: V) -> Self {
        let (view, _) = watch::channel(initial);
        Self {
            channel: channel.to_string(),
            status: Mutex::new(Status {
                state: SubscriptionState::Subscribing,
                last_error: None,
            }),
            view,
        }
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn channel(&self) -> &str {
        &self.channel
    }

    pub(crate) fn state(&self) -> SubscriptionState {
        self.status().state
    }

    pub(crate) fn last_error(&self) -> Option<ChannelError> {
        self.status().last_error.clone()
    }

    /// Mutate the view unless the subscription is closed. `f` returns whether
    /// it changed anything; watchers are only notified when it did.
    pub(crate) fn apply(&self, f: impl FnOnce(&mut V) -> bool) -> bool {
        let status = self.status();
        if status.state == SubscriptionState::Unsubscribed {
            return false;
        }
        self.view.send_if_modified(f)
    }

    pub(crate) fn mark_subscribed(&self) {
        let mut status = self.status();
        if status.state == SubscriptionState::Subscribing {
            status.state = SubscriptionState::Subscribed;
            debug!(channel = %self.channel, "Subscribed");
        }
    }

    pub(crate) fn record_error(&self, err: ChannelError) {
        let mut status = self.status();
        if status.state == SubscriptionState::Unsubscribed {
            return;
        }
        log_channel_error(&self.channel, &err);
        status.last_error = Some(err);
    }

    /// Move to `Unsubscribed`. Returns whether the subscription was active.
    pub(crate) fn close(&self) -> bool {
        let mut status = self.status();
        let was_active = status.state != SubscriptionState::Unsubscribed;
        status.state = SubscriptionState::Unsubscribed;
        was_active
    }

    pub(crate) fn watch(&self) -> watch::Receiver<V> {
        self.view.subscribe()
    }

    pub(crate) fn view(&self) -> watch::Ref<'_, V> {
        self.view.borrow()
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// How a subscription detaches its route from the broadcast client.
#[derive(Debug, Clone)]
pub(crate) enum Teardown {
    Leave(RouteId),
    StopListening { event: String, route: RouteId },
}

impl Teardown {
    async fn run(&self, client: &dyn BroadcastClient, channel: &str) {
        match self {
            Teardown::Leave(route) => client.leave(channel, *route).await,
            Teardown::StopListening { event, route } => {
                client.stop_listening(channel, event, *route).await
            }
        }
    }
}

/// Owns the pump task and the client registration of one subscription.
/// Both are absent when the join or listen failed.
pub(crate) struct ChannelHandle<V> {
    client: Arc<dyn BroadcastClient>,
    shared: Arc<Shared<V>>,
    teardown: Option<Teardown>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<V> ChannelHandle<V> {
    pub(crate) fn new(
        client: Arc<dyn BroadcastClient>,
        shared: Arc<Shared<V>>,
        teardown: Option<Teardown>,
        pump: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            client,
            shared,
            teardown,
            pump: Mutex::new(pump),
        }
    }

    pub(crate) fn shared(&self) -> &Shared<V> {
        &self.shared
    }

    /// Stop applying events and abort the pump. Returns whether this call
    /// did the detaching.
    fn detach(&self) -> bool {
        let was_active = self.shared.close();
        let pump = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pump) = pump {
            pump.abort();
        }
        was_active
    }

    pub(crate) async fn unsubscribe(&self) {
        if !self.detach() {
            return;
        }
        if let Some(teardown) = &self.teardown {
            teardown.run(self.client.as_ref(), self.shared.channel()).await;
        }
        info!(channel = %self.shared.channel(), "Unsubscribed");
    }
}

impl<V> Drop for ChannelHandle<V> {
    fn drop(&mut self) {
        if !self.detach() {
            return;
        }
        let Some(teardown) = self.teardown.clone() else {
            return;
        };
        let client = Arc::clone(&self.client);
        let channel = self.shared.channel().to_string();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    teardown.run(client.as_ref(), &channel).await;
                    debug!(channel = %channel, "Left channel after drop");
                });
            }
            Err(_) => {
                warn!(channel = %channel, "Subscription dropped outside a runtime, leave not sent");
            }
        }
    }
}
