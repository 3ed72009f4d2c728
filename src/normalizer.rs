//! Event normalization.
//!
//! A single webhook delivery fans out into zero or more canonical [`Event`]s.
//! Each entry may carry a `messaging` list (direct-message envelopes) and/or
//! a `changes` list of `{field, value}` pairs. Every recognized field has a
//! dedicated sub-parser; unrecognized fields and items missing required
//! sub-fields are logged and skipped without aborting sibling items. Only a
//! top-level malformed envelope aborts the delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::constants::{
    CHANGE_FIELD_COMMENTS, CHANGE_FIELD_FOLLOWS, CHANGE_FIELD_LIKES, CHANGE_FIELD_MENTIONS,
    CHANGE_FIELD_MESSAGES, CHANGE_FIELD_STORY_INSIGHTS,
};
use crate::errors::NormalizerError;
use crate::event::{Event, TriggerKind};

/// Top-level webhook delivery shape.
///
/// Entries are kept as raw JSON so one malformed entry cannot fail
/// deserialization of its siblings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryEnvelope {
    pub object: String,
    #[serde(default)]
    pub entry: Vec<Value>,
}

/// Parse the raw delivery body into an envelope.
///
/// Callers must verify the delivery signature over these exact bytes first.
pub fn parse_envelope(raw_body: &[u8]) -> Result<DeliveryEnvelope, NormalizerError> {
    serde_json::from_slice(raw_body).map_err(|e| NormalizerError::MalformedEnvelope {
        details: e.to_string(),
    })
}

/// Normalize a delivery envelope into canonical events.
pub fn normalize_delivery(envelope: &DeliveryEnvelope, received_at: DateTime<Utc>) -> Vec<Event> {
    let mut events = Vec::new();

    for entry in &envelope.entry {
        let Some(account_id) = entry.get("id").and_then(Value::as_str) else {
            warn!("Skipping delivery entry without an id");
            continue;
        };

        if let Some(messaging) = entry.get("messaging").and_then(Value::as_array) {
            for item in messaging {
                match parse_messaging_item(account_id, item, received_at) {
                    Some(event) => events.push(event),
                    None => warn!(account = %account_id, "Skipping malformed messaging item"),
                }
            }
        }

        if let Some(changes) = entry.get("changes").and_then(Value::as_array) {
            for change in changes {
                let Some(field) = change.get("field").and_then(Value::as_str) else {
                    warn!(account = %account_id, "Skipping change without a field");
                    continue;
                };
                let Some(value) = change.get("value") else {
                    warn!(account = %account_id, field = %field, "Skipping change without a value");
                    continue;
                };

                let parsed = match field {
                    CHANGE_FIELD_COMMENTS => parse_comment_change(account_id, value, received_at),
                    CHANGE_FIELD_MENTIONS => parse_mention_change(account_id, value, received_at),
                    CHANGE_FIELD_MESSAGES => parse_message_change(account_id, value, received_at),
                    CHANGE_FIELD_STORY_INSIGHTS => {
                        parse_story_mention_change(account_id, value, received_at)
                    }
                    CHANGE_FIELD_FOLLOWS => parse_follow_change(account_id, value, received_at),
                    CHANGE_FIELD_LIKES => parse_like_change(account_id, value, received_at),
                    other => {
                        debug!(account = %account_id, field = %other, "Ignoring unrecognized change field");
                        continue;
                    }
                };

                match parsed {
                    Some(event) => events.push(event),
                    None => {
                        warn!(account = %account_id, field = %field, "Skipping malformed change item")
                    }
                }
            }
        }
    }

    events
}

/// Best-effort actor fields present on some payloads.
fn actor_extras(from: &Value) -> (Option<bool>, Option<u64>) {
    let verified = from.get("is_verified_user").and_then(Value::as_bool);
    let followers = from.get("follower_count").and_then(Value::as_u64);
    (verified, followers)
}

/// Direct-message envelope: sender, recipient, message text. Postback
/// payloads normalize to DM events with the payload as text; reactions
/// normalize to Like events. Echoes of our own outbound messages are
/// dropped.
fn parse_messaging_item(
    account_id: &str,
    item: &Value,
    received_at: DateTime<Utc>,
) -> Option<Event> {
    let sender = item.get("sender")?;
    let sender_id = sender.get("id").and_then(Value::as_str)?;
    let username = sender
        .get("username")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let (is_verified_user, follower_count) = actor_extras(sender);

    if let Some(message) = item.get("message") {
        if message
            .get("is_echo")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            debug!(account = %account_id, "Dropping echo of our own message");
            return None;
        }
        let message_id = message.get("mid").and_then(Value::as_str)?;
        let text = message.get("text").and_then(Value::as_str)?;
        return Some(Event {
            kind: TriggerKind::Dm,
            account_id: account_id.to_string(),
            external_user_id: sender_id.to_string(),
            username: username.to_string(),
            text: text.to_string(),
            media_id: None,
            comment_id: None,
            message_id: Some(message_id.to_string()),
            received_at,
            is_verified_user,
            follower_count,
        });
    }

    if let Some(postback) = item.get("postback") {
        let payload = postback.get("payload").and_then(Value::as_str)?;
        return Some(Event {
            kind: TriggerKind::Dm,
            account_id: account_id.to_string(),
            external_user_id: sender_id.to_string(),
            username: username.to_string(),
            text: payload.to_string(),
            media_id: None,
            comment_id: None,
            message_id: postback
                .get("mid")
                .and_then(Value::as_str)
                .map(str::to_string),
            received_at,
            is_verified_user,
            follower_count,
        });
    }

    if let Some(reaction) = item.get("reaction") {
        let message_id = reaction.get("mid").and_then(Value::as_str)?;
        return Some(Event {
            kind: TriggerKind::Like,
            account_id: account_id.to_string(),
            external_user_id: sender_id.to_string(),
            username: username.to_string(),
            text: String::new(),
            media_id: None,
            comment_id: None,
            message_id: Some(message_id.to_string()),
            received_at,
            is_verified_user,
            follower_count,
        });
    }

    None
}

fn parse_comment_change(
    account_id: &str,
    value: &Value,
    received_at: DateTime<Utc>,
) -> Option<Event> {
    let from = value.get("from")?;
    let user_id = from.get("id").and_then(Value::as_str)?;
    let username = from.get("username").and_then(Value::as_str)?;
    let comment_id = value.get("id").and_then(Value::as_str)?;
    let media_id = value
        .get("media")
        .and_then(|m| m.get("id"))
        .and_then(Value::as_str)?;
    let text = value.get("text").and_then(Value::as_str)?;
    let (is_verified_user, follower_count) = actor_extras(from);

    Some(Event {
        kind: TriggerKind::Comment,
        account_id: account_id.to_string(),
        external_user_id: user_id.to_string(),
        username: username.to_string(),
        text: text.to_string(),
        media_id: Some(media_id.to_string()),
        comment_id: Some(comment_id.to_string()),
        message_id: None,
        received_at,
        is_verified_user,
        follower_count,
    })
}

fn parse_mention_change(
    account_id: &str,
    value: &Value,
    received_at: DateTime<Utc>,
) -> Option<Event> {
    let from = value.get("from")?;
    let user_id = from.get("id").and_then(Value::as_str)?;
    let username = from.get("username").and_then(Value::as_str)?;
    let media_id = value.get("media_id").and_then(Value::as_str)?;
    let text = value
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let (is_verified_user, follower_count) = actor_extras(from);

    Some(Event {
        kind: TriggerKind::Mention,
        account_id: account_id.to_string(),
        external_user_id: user_id.to_string(),
        username: username.to_string(),
        text: text.to_string(),
        media_id: Some(media_id.to_string()),
        comment_id: value
            .get("comment_id")
            .and_then(Value::as_str)
            .map(str::to_string),
        message_id: None,
        received_at,
        is_verified_user,
        follower_count,
    })
}

fn parse_message_change(
    account_id: &str,
    value: &Value,
    received_at: DateTime<Utc>,
) -> Option<Event> {
    let from = value.get("from")?;
    let user_id = from.get("id").and_then(Value::as_str)?;
    let username = from
        .get("username")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let message = value.get("message")?;
    let message_id = message.get("mid").and_then(Value::as_str)?;
    let text = message.get("text").and_then(Value::as_str)?;
    let (is_verified_user, follower_count) = actor_extras(from);

    Some(Event {
        kind: TriggerKind::Dm,
        account_id: account_id.to_string(),
        external_user_id: user_id.to_string(),
        username: username.to_string(),
        text: text.to_string(),
        media_id: None,
        comment_id: None,
        message_id: Some(message_id.to_string()),
        received_at,
        is_verified_user,
        follower_count,
    })
}

fn parse_story_mention_change(
    account_id: &str,
    value: &Value,
    received_at: DateTime<Utc>,
) -> Option<Event> {
    let from = value.get("from")?;
    let user_id = from.get("id").and_then(Value::as_str)?;
    let username = from.get("username").and_then(Value::as_str)?;
    let media_id = value.get("media_id").and_then(Value::as_str)?;
    let (is_verified_user, follower_count) = actor_extras(from);

    Some(Event {
        kind: TriggerKind::Mention,
        account_id: account_id.to_string(),
        external_user_id: user_id.to_string(),
        username: username.to_string(),
        text: String::new(),
        media_id: Some(media_id.to_string()),
        comment_id: None,
        message_id: None,
        received_at,
        is_verified_user,
        follower_count,
    })
}

fn parse_follow_change(
    account_id: &str,
    value: &Value,
    received_at: DateTime<Utc>,
) -> Option<Event> {
    let from = value.get("from")?;
    let user_id = from.get("id").and_then(Value::as_str)?;
    let username = from.get("username").and_then(Value::as_str)?;
    let (is_verified_user, follower_count) = actor_extras(from);

    Some(Event {
        kind: TriggerKind::Follow,
        account_id: account_id.to_string(),
        external_user_id: user_id.to_string(),
        username: username.to_string(),
        text: String::new(),
        media_id: None,
        comment_id: None,
        message_id: None,
        received_at,
        is_verified_user,
        follower_count,
    })
}

fn parse_like_change(
    account_id: &str,
    value: &Value,
    received_at: DateTime<Utc>,
) -> Option<Event> {
    let from = value.get("from")?;
    let user_id = from.get("id").and_then(Value::as_str)?;
    let username = from.get("username").and_then(Value::as_str)?;
    let media_id = value.get("media_id").and_then(Value::as_str)?;
    let (is_verified_user, follower_count) = actor_extras(from);

    Some(Event {
        kind: TriggerKind::Like,
        account_id: account_id.to_string(),
        external_user_id: user_id.to_string(),
        username: username.to_string(),
        text: String::new(),
        media_id: Some(media_id.to_string()),
        comment_id: None,
        message_id: None,
        received_at,
        is_verified_user,
        follower_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(entries: Vec<Value>) -> DeliveryEnvelope {
        DeliveryEnvelope {
            object: "instagram".to_string(),
            entry: entries,
        }
    }

    #[test]
    fn test_parse_envelope_rejects_garbage() {
        assert!(parse_envelope(b"not json").is_err());
        assert!(parse_envelope(br#"{"object":"instagram","entry":[]}"#).is_ok());
    }

    #[test]
    fn test_comment_change_normalizes() {
        let entry = json!({
            "id": "acct-1",
            "time": 1700000000,
            "changes": [{
                "field": "comments",
                "value": {
                    "id": "c-1",
                    "text": "I need help",
                    "media": {"id": "m-1"},
                    "from": {"id": "u-1", "username": "alice"}
                }
            }]
        });

        let events = normalize_delivery(&envelope(vec![entry]), Utc::now());
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.kind, TriggerKind::Comment);
        assert_eq!(event.account_id, "acct-1");
        assert_eq!(event.external_user_id, "u-1");
        assert_eq!(event.username, "alice");
        assert_eq!(event.text, "I need help");
        assert_eq!(event.media_id.as_deref(), Some("m-1"));
        assert_eq!(event.comment_id.as_deref(), Some("c-1"));
        assert_eq!(event.is_verified_user, None);
        assert_eq!(event.follower_count, None);
    }

    #[test]
    fn test_messaging_item_normalizes_to_dm() {
        let entry = json!({
            "id": "acct-1",
            "messaging": [{
                "sender": {"id": "u-2"},
                "recipient": {"id": "acct-1"},
                "message": {"mid": "mid-1", "text": "hello there"}
            }]
        });

        let events = normalize_delivery(&envelope(vec![entry]), Utc::now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, TriggerKind::Dm);
        assert_eq!(events[0].message_id.as_deref(), Some("mid-1"));
        assert_eq!(events[0].text, "hello there");
    }

    #[test]
    fn test_echo_message_dropped() {
        let entry = json!({
            "id": "acct-1",
            "messaging": [{
                "sender": {"id": "acct-1"},
                "message": {"mid": "mid-1", "text": "our own reply", "is_echo": true}
            }]
        });

        let events = normalize_delivery(&envelope(vec![entry]), Utc::now());
        assert!(events.is_empty());
    }

    #[test]
    fn test_postback_normalizes_to_dm() {
        let entry = json!({
            "id": "acct-1",
            "messaging": [{
                "sender": {"id": "u-3"},
                "postback": {"mid": "mid-2", "payload": "GET_STARTED"}
            }]
        });

        let events = normalize_delivery(&envelope(vec![entry]), Utc::now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, TriggerKind::Dm);
        assert_eq!(events[0].text, "GET_STARTED");
    }

    #[test]
    fn test_reaction_normalizes_to_like() {
        let entry = json!({
            "id": "acct-1",
            "messaging": [{
                "sender": {"id": "u-4"},
                "reaction": {"mid": "mid-3", "action": "react", "reaction": "love"}
            }]
        });

        let events = normalize_delivery(&envelope(vec![entry]), Utc::now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, TriggerKind::Like);
    }

    #[test]
    fn test_malformed_item_does_not_abort_siblings() {
        let entry = json!({
            "id": "acct-1",
            "changes": [
                {"field": "comments", "value": {"id": "c-1"}},
                {
                    "field": "comments",
                    "value": {
                        "id": "c-2",
                        "text": "valid",
                        "media": {"id": "m-1"},
                        "from": {"id": "u-1", "username": "bob"}
                    }
                }
            ]
        });

        let events = normalize_delivery(&envelope(vec![entry]), Utc::now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].comment_id.as_deref(), Some("c-2"));
    }

    #[test]
    fn test_unrecognized_field_skipped() {
        let entry = json!({
            "id": "acct-1",
            "changes": [{"field": "live_videos", "value": {}}]
        });

        let events = normalize_delivery(&envelope(vec![entry]), Utc::now());
        assert!(events.is_empty());
    }

    #[test]
    fn test_fan_out_multiple_entries() {
        let follow = json!({
            "id": "acct-1",
            "changes": [{
                "field": "follows",
                "value": {"from": {"id": "u-5", "username": "carol"}}
            }]
        });
        let like = json!({
            "id": "acct-2",
            "changes": [{
                "field": "likes",
                "value": {
                    "from": {"id": "u-6", "username": "dave", "follower_count": 250},
                    "media_id": "m-9"
                }
            }]
        });

        let events = normalize_delivery(&envelope(vec![follow, like]), Utc::now());
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, TriggerKind::Follow);
        assert_eq!(events[1].kind, TriggerKind::Like);
        assert_eq!(events[1].follower_count, Some(250));
    }

    #[test]
    fn test_entry_without_id_skipped() {
        let entry = json!({"changes": [{"field": "comments", "value": {}}]});
        let events = normalize_delivery(&envelope(vec![entry]), Utc::now());
        assert!(events.is_empty());
    }
}
