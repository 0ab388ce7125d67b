//! Realtime section validation.

use super::helpers::validate_range;
use crate::schema::LookoutConfig;

pub(super) fn validate_realtime(errors: &mut Vec<String>, config: &LookoutConfig) {
    let rt = &config.realtime;

    validate_range(errors, "realtime.heartbeat_interval", rt.heartbeat_interval, 1, 300);
    validate_range(errors, "realtime.reconnect_delay", rt.reconnect_delay, 1, 60);
    validate_range(errors, "realtime.max_reconnect_delay", rt.max_reconnect_delay, 1, 3600);
    validate_range(errors, "realtime.connect_timeout", rt.connect_timeout, 1, 120);

    if rt.max_reconnect_delay < rt.reconnect_delay {
        errors.push(format!(
            "realtime.max_reconnect_delay ({}) must be >= realtime.reconnect_delay ({})",
            rt.max_reconnect_delay, rt.reconnect_delay
        ));
    }

    if let Some(url) = rt.url.as_deref().filter(|u| !u.is_empty()) {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            errors.push(format!("realtime.url must start with ws:// or wss://, got {url:?}"));
        }
    }
}
