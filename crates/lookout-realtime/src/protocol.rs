//! Application-level payloads carried inside broadcast messages.
//!
//! The transport envelope (Phoenix Channels) is handled by `realtime`;
//! this module only knows what a member and a notice look like.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Members
// ---------------------------------------------------------------------------

/// Someone present on a channel. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Member {
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

impl Member {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// The presence meta this member is tracked with.
    pub fn to_meta(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "name": self.name,
        })
    }
}

/// Parse a `Member` from a single presence meta.
///
/// Returns `None` when the meta has no integer `id`.
pub fn member_from_meta(meta: &serde_json::Value) -> Option<Member> {
    let id = meta.get("id")?.as_i64()?;
    let name = meta
        .get("name")
        .and_then(|n| n.as_str())
        .unwrap_or_default()
        .to_string();
    Some(Member { id, name })
}

/// Parse a `Member` from the meta list of one presence key.
///
/// A key carries one meta per connection (several tabs of the same user);
/// the first one that parses is the member.
pub fn member_from_metas(metas: &[serde_json::Value]) -> Option<Member> {
    metas.iter().find_map(member_from_meta)
}

// ---------------------------------------------------------------------------
// Notices
// ---------------------------------------------------------------------------

/// Extract the display text of a notice payload.
///
/// Accepts a bare JSON string, or an object with a `message` or `text`
/// field (in that order).
pub fn notice_text(payload: &serde_json::Value) -> Option<String> {
    if let Some(text) = payload.as_str() {
        return Some(text.to_string());
    }
    ["message", "text"]
        .iter()
        .find_map(|field| payload.get(field).and_then(|v| v.as_str()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn member_from_meta_reads_id_and_name() {
        let meta = json!({ "id": 7, "name": "Ada", "phx_ref": "F1" });
        assert_eq!(member_from_meta(&meta), Some(Member::new(7, "Ada")));
    }

    #[test]
    fn member_without_name_gets_empty_name() {
        let meta = json!({ "id": 3 });
        assert_eq!(member_from_meta(&meta), Some(Member::new(3, "")));
    }

    #[test]
    fn meta_without_integer_id_is_rejected() {
        assert_eq!(member_from_meta(&json!({ "name": "nobody" })), None);
        assert_eq!(member_from_meta(&json!({ "id": "12" })), None);
    }

    #[test]
    fn first_parseable_meta_wins() {
        let metas = vec![json!({ "bogus": true }), json!({ "id": 2, "name": "B" })];
        assert_eq!(member_from_metas(&metas), Some(Member::new(2, "B")));
        assert_eq!(member_from_metas(&[]), None);
    }

    #[test]
    fn to_meta_parses_back() {
        let member = Member::new(42, "Grace");
        assert_eq!(member_from_meta(&member.to_meta()), Some(member));
    }

    #[test]
    fn notice_text_accepts_string_and_objects() {
        assert_eq!(notice_text(&json!("Hello")), Some("Hello".into()));
        assert_eq!(
            notice_text(&json!({ "message": "Deployed" })),
            Some("Deployed".into())
        );
        assert_eq!(notice_text(&json!({ "text": "Saved" })), Some("Saved".into()));
    }

    #[test]
    fn notice_text_prefers_message_over_text() {
        let payload = json!({ "message": "first", "text": "second" });
        assert_eq!(notice_text(&payload), Some("first".into()));
    }

    #[test]
    fn notice_text_rejects_other_shapes() {
        assert_eq!(notice_text(&json!(5)), None);
        assert_eq!(notice_text(&json!({ "message": 5 })), None);
        assert_eq!(notice_text(&serde_json::Value::Null), None);
    }
}
