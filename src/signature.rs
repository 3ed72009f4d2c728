//! Webhook delivery authentication.
//!
//! Deliveries carry an HMAC-SHA-256 digest over the exact raw request body in
//! the `X-Hub-Signature-256` header, formatted as `sha256=<hex>`. Verification
//! happens before any deserialization of the body; a mismatch rejects the
//! delivery with no side effects.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::constants::{SIGNATURE_PREFIX, VERIFICATION_MODE_SUBSCRIBE};
use crate::errors::SignatureError;

type HmacSha256 = Hmac<Sha256>;

/// Verify a delivery signature against the raw body bytes.
///
/// The comparison is constant-time via [`Mac::verify_slice`].
///
/// # Arguments
///
/// * `raw_body` - The exact raw bytes of the request body
/// * `signature_header` - The `X-Hub-Signature-256` header value, if present
/// * `secret` - The shared application secret
pub fn verify_signature(
    raw_body: &[u8],
    signature_header: Option<&str>,
    secret: &str,
) -> Result<(), SignatureError> {
    let header = signature_header.ok_or(SignatureError::HeaderMissing)?;

    let digest_hex = header
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or(SignatureError::InvalidHeaderFormat)?;

    let digest_bytes =
        hex::decode(digest_hex).map_err(|e| SignatureError::InvalidHexDigest {
            details: e.to_string(),
        })?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::VerificationFailed)?;
    mac.update(raw_body);
    mac.verify_slice(&digest_bytes)
        .map_err(|_| SignatureError::VerificationFailed)
}

/// Outcome of the subscription verification handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeOutcome {
    /// Echo the challenge string back with a success status.
    Accepted(String),
    /// Return a forbidden response.
    Rejected,
}

/// Handle the platform's subscription verification handshake.
///
/// Accepts only `mode == "subscribe"` with a matching verify token; every
/// other combination is rejected.
pub fn verification_challenge(
    mode: &str,
    token: &str,
    challenge: &str,
    expected_token: &str,
) -> ChallengeOutcome {
    if mode == VERIFICATION_MODE_SUBSCRIBE && token == expected_token {
        ChallengeOutcome::Accepted(challenge.to_string())
    } else {
        ChallengeOutcome::Rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "shared-secret";

    fn sign(body: &[u8], secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_valid_signature_accepted() {
        let body = br#"{"object":"instagram","entry":[]}"#;
        let header = sign(body, SECRET);
        assert!(verify_signature(body, Some(&header), SECRET).is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = b"payload";
        let header = sign(body, "other-secret");
        assert!(matches!(
            verify_signature(body, Some(&header), SECRET),
            Err(SignatureError::VerificationFailed)
        ));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let header = sign(b"original", SECRET);
        assert!(matches!(
            verify_signature(b"tampered", Some(&header), SECRET),
            Err(SignatureError::VerificationFailed)
        ));
    }

    #[test]
    fn test_missing_header_rejected() {
        assert!(matches!(
            verify_signature(b"payload", None, SECRET),
            Err(SignatureError::HeaderMissing)
        ));
    }

    #[test]
    fn test_bad_prefix_rejected() {
        let header = sign(b"payload", SECRET).replace("sha256=", "sha1=");
        assert!(matches!(
            verify_signature(b"payload", Some(&header), SECRET),
            Err(SignatureError::InvalidHeaderFormat)
        ));
    }

    #[test]
    fn test_bad_hex_rejected() {
        assert!(matches!(
            verify_signature(b"payload", Some("sha256=zzzz"), SECRET),
            Err(SignatureError::InvalidHexDigest { .. })
        ));
    }

    #[test]
    fn test_challenge_accepted() {
        let outcome =
            verification_challenge("subscribe", "tok", "challenge-123", "tok");
        assert_eq!(
            outcome,
            ChallengeOutcome::Accepted("challenge-123".to_string())
        );
    }

    #[test]
    fn test_challenge_wrong_token_rejected() {
        let outcome = verification_challenge("subscribe", "wrong", "c", "tok");
        assert_eq!(outcome, ChallengeOutcome::Rejected);
    }

    #[test]
    fn test_challenge_wrong_mode_rejected() {
        let outcome = verification_challenge("unsubscribe", "tok", "c", "tok");
        assert_eq!(outcome, ChallengeOutcome::Rejected);
    }
}
