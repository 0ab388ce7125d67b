//! Notice channel subscriber: the last message received on one event,
//! cleared again after a display TTL.

mod subscriber;


pub use subscriber::{NoticeSubscriber, NoticeSubscription};
