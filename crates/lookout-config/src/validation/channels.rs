//! Presence and notice section validation.

use super::helpers::{validate_not_blank, validate_range};
use crate::schema::LookoutConfig;

pub(super) fn validate_presence(errors: &mut Vec<String>, config: &LookoutConfig) {
    let presence = &config.presence;
    validate_not_blank(errors, "presence.channel", &presence.channel);

    if presence.track_name.is_some() && presence.track_id.is_none() {
        errors.push("presence.track_name requires presence.track_id".into());
    }
}

pub(super) fn validate_notices(errors: &mut Vec<String>, config: &LookoutConfig) {
    let notices = &config.notices;
    validate_not_blank(errors, "notices.channel", &notices.channel);
    validate_not_blank(errors, "notices.event", &notices.event);
    validate_range(errors, "notices.display_secs", notices.display_secs, 1, 3600);
}
