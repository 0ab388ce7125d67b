//! Presence and notice channel subscribers.
//!
//! A subscriber joins a named broadcast channel through an injected
//! [`BroadcastClient`], keeps a small derived view (who is present, or the
//! last notice received) and leaves cleanly when its handle is
//! unsubscribed or dropped.

pub mod broadcast;
pub mod local;
pub mod notice;
pub mod presence;
pub mod protocol;
pub mod realtime;
mod subscription;

pub use broadcast::{BroadcastClient, ChannelMessage, PresenceEvent, Route, RouteId};
pub use local::LocalBroadcast;
pub use notice::{NoticeSubscriber, NoticeSubscription};
pub use presence::{PresenceSet, PresenceSubscriber, PresenceSubscription};
pub use protocol::Member;
pub use realtime::{RealtimeClient, RealtimeConfig};
pub use subscription::SubscriptionState;
