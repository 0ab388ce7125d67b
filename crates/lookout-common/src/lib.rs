pub mod errors;
pub mod notifications;

pub use errors::{ChannelError, ConfigError, ErrorKind, LookoutError};
pub use notifications::{NotificationMessage, DEFAULT_NOTICE_TTL};

pub type Result<T> = std::result::Result<T, LookoutError>;
