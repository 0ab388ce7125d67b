//! Presence channel subscriber: who is currently on a channel.

mod set;
mod subscriber;


pub use set::PresenceSet;
pub use subscriber::{PresenceSubscriber, PresenceSubscription};
