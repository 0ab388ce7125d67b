//! Default TOML config template with inline documentation comments.

/// The default config file content.
pub(crate) fn default_config_toml() -> &'static str {
    r##"# Lookout Configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[realtime]
# Supabase project reference, or set `url` for a self-hosted server.
project_ref = ""
# url = "ws://localhost:4000/socket/websocket?vsn=1.0.0"
api_key = ""
# access_token = ""         # JWT for private channels
# heartbeat_interval = 25   # seconds, 1-300
# reconnect_delay = 1       # seconds, 1-60, doubles per failure
# max_reconnect_delay = 30  # seconds, >= reconnect_delay
# connect_timeout = 15      # seconds, 1-120

[presence]
channel = "online"
# track_id = 1              # announce yourself on the channel
# track_name = "Ada"

[notices]
channel = "notifications"
event = "NotificationSent"
# display_secs = 5          # 1-3600

[logging]
# level = "lookout=info"    # RUST_LOG takes precedence
"##
}
