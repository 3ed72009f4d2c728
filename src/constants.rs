//! Application-wide constants

/// Header carrying the HMAC-SHA-256 digest over the raw request body.
pub(crate) const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Expected prefix of the signature header value.
pub(crate) const SIGNATURE_PREFIX: &str = "sha256=";

/// Webhook verification handshake mode that triggers a challenge echo.
pub(crate) const VERIFICATION_MODE_SUBSCRIBE: &str = "subscribe";

/// Delivery object value this service subscribes to.
pub(crate) const DELIVERY_OBJECT: &str = "instagram";

/// Body returned to the platform when a delivery is acknowledged.
pub(crate) const ACK_BODY: &str = "EVENT_RECEIVED";

/// Change fields recognized by the event normalizer
pub(crate) const CHANGE_FIELD_COMMENTS: &str = "comments";
pub(crate) const CHANGE_FIELD_MENTIONS: &str = "mentions";
pub(crate) const CHANGE_FIELD_MESSAGES: &str = "messages";
pub(crate) const CHANGE_FIELD_STORY_INSIGHTS: &str = "story_insights";
pub(crate) const CHANGE_FIELD_FOLLOWS: &str = "follows";
pub(crate) const CHANGE_FIELD_LIKES: &str = "likes";

/// Maximum stored length of trigger text in execution logs.
pub(crate) const LOG_TRIGGER_TEXT_MAX: usize = 500;

/// Window used for authoritative daily-cap counting.
pub(crate) const DAILY_CAP_WINDOW_HOURS: i64 = 24;

/// Default timeout for outbound platform API calls.
pub(crate) const PLATFORM_TIMEOUT_MS: u64 = 10_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_prefix_matches_header_scheme() {
        assert_eq!(SIGNATURE_PREFIX, "sha256=");
        assert!(SIGNATURE_HEADER.ends_with("signature-256"));
    }
}
