//! Turns the file config into realtime client settings.

use lookout_common::ConfigError;
use lookout_config::LookoutConfig;
use lookout_realtime::{Member, RealtimeConfig};

/// Build the realtime client config. Fails when no endpoint is set.
pub fn realtime_config(config: &LookoutConfig) -> Result<RealtimeConfig, ConfigError> {
    let rt = &config.realtime;
    if !rt.has_endpoint() {
        return Err(ConfigError::ValidationError(
            "set realtime.project_ref or realtime.url, or run with --local".into(),
        ));
    }

    Ok(RealtimeConfig {
        project_ref: rt.project_ref.clone(),
        url: rt.url.clone().filter(|url| !url.is_empty()),
        api_key: rt.api_key.clone(),
        access_token: rt.access_token.clone(),
        heartbeat_interval_secs: rt.heartbeat_interval,
        reconnect_delay_secs: rt.reconnect_delay,
        max_reconnect_delay_secs: rt.max_reconnect_delay,
        connect_timeout_secs: rt.connect_timeout,
        track_as: tracked_member(config),
    })
}

fn tracked_member(config: &LookoutConfig) -> Option<Member> {
    let id = config.presence.track_id?;
    let name = config.presence.track_name.clone().unwrap_or_default();
    Some(Member::new(id, name))
}
