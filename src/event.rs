//! Canonical event representation.
//!
//! Every platform payload shape converges to the [`Event`] type before it
//! reaches the rule matcher. Trigger and action kinds are closed enums so
//! dispatch is exhaustive at compile time, with no runtime default branch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of platform occurrence an event represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Comment,
    Dm,
    Mention,
    Follow,
    Like,
    Hashtag,
}

impl TriggerKind {
    /// Stable string form used in execution logs and storage rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Comment => "comment",
            TriggerKind::Dm => "dm",
            TriggerKind::Mention => "mention",
            TriggerKind::Follow => "follow",
            TriggerKind::Like => "like",
            TriggerKind::Hashtag => "hashtag",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "comment" => Some(TriggerKind::Comment),
            "dm" => Some(TriggerKind::Dm),
            "mention" => Some(TriggerKind::Mention),
            "follow" => Some(TriggerKind::Follow),
            "like" => Some(TriggerKind::Like),
            "hashtag" => Some(TriggerKind::Hashtag),
            _ => None,
        }
    }
}

/// The outbound operation a rule performs on match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SendDm,
    LikeComment,
    ReplyComment,
    FollowUser,
    SendStoryReply,
}

impl ActionKind {
    /// Stable string form used in execution logs and storage rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::SendDm => "send_dm",
            ActionKind::LikeComment => "like_comment",
            ActionKind::ReplyComment => "reply_comment",
            ActionKind::FollowUser => "follow_user",
            ActionKind::SendStoryReply => "send_story_reply",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "send_dm" => Some(ActionKind::SendDm),
            "like_comment" => Some(ActionKind::LikeComment),
            "reply_comment" => Some(ActionKind::ReplyComment),
            "follow_user" => Some(ActionKind::FollowUser),
            "send_story_reply" => Some(ActionKind::SendStoryReply),
            _ => None,
        }
    }
}

/// Canonical, normalized representation of a single platform occurrence.
///
/// Events are ephemeral: they exist only for the lifetime of one delivery's
/// processing and are never persisted. Fields sourced from the platform on a
/// best-effort basis (`is_verified_user`, `follower_count`) are `None` when
/// the payload did not carry them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: TriggerKind,

    /// The account this delivery was addressed to.
    pub account_id: String,

    /// Platform-scoped identifier of the acting user.
    pub external_user_id: String,

    pub username: String,

    /// Text content of the occurrence. Empty for follows and likes.
    pub text: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    pub received_at: DateTime<Utc>,

    /// Whether the acting user is platform-verified, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_verified_user: Option<bool>,

    /// The acting user's follower count, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follower_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_kind_round_trip() {
        for kind in [
            TriggerKind::Comment,
            TriggerKind::Dm,
            TriggerKind::Mention,
            TriggerKind::Follow,
            TriggerKind::Like,
            TriggerKind::Hashtag,
        ] {
            assert_eq!(TriggerKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(TriggerKind::parse("poke"), None);
    }

    #[test]
    fn test_action_kind_round_trip() {
        for kind in [
            ActionKind::SendDm,
            ActionKind::LikeComment,
            ActionKind::ReplyComment,
            ActionKind::FollowUser,
            ActionKind::SendStoryReply,
        ] {
            assert_eq!(ActionKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ActionKind::parse("block_user"), None);
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&ActionKind::SendStoryReply).unwrap();
        assert_eq!(json, "\"send_story_reply\"");
        let kind: TriggerKind = serde_json::from_str("\"mention\"").unwrap();
        assert_eq!(kind, TriggerKind::Mention);
    }
}
