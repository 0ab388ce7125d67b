use std::time::Duration;

use tokio::time::Instant;

/// How long a notice stays visible when nothing replaces it.
pub const DEFAULT_NOTICE_TTL: Duration = Duration::from_secs(5);

/// The single message currently shown by a notice subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    pub text: String,
    pub received_at: Instant,
    pub ttl: Duration,
}

impl NotificationMessage {
    /// Creates a message received now that expires after `ttl`.
    pub fn new(text: impl Into<String>, ttl: Duration) -> Self {
        Self {
            text: text.into(),
            received_at: Instant::now(),
            ttl,
        }
    }

    /// The instant at which this message should be cleared.
    pub fn expires_at(&self) -> Instant {
        self.received_at + self.ttl
    }

    /// Returns `true` if this message has exceeded its TTL.
    pub fn is_expired(&self) -> bool {
        self.received_at.elapsed() >= self.ttl
    }
}
