use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    constants::{ACK_BODY, DELIVERY_OBJECT, SIGNATURE_HEADER},
    http::WebContext,
    normalizer::parse_envelope,
    signature::{ChallengeOutcome, verification_challenge, verify_signature},
    tasks::DeliveryWork,
};

/// Subscription verification handshake query parameters.
#[derive(Deserialize)]
pub struct VerificationQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

/// GET /webhooks
///
/// The platform probes this endpoint when a subscription is created. A
/// matching verify token gets the challenge echoed back; anything else is
/// forbidden.
pub async fn handle_verification(
    State(context): State<WebContext>,
    Query(query): Query<VerificationQuery>,
) -> impl IntoResponse {
    let (Some(mode), Some(token), Some(challenge)) =
        (query.mode, query.verify_token, query.challenge)
    else {
        warn!("Verification request missing handshake parameters");
        return (StatusCode::FORBIDDEN, String::new());
    };

    match verification_challenge(
        &mode,
        &token,
        &challenge,
        &context.config.webhook_verify_token,
    ) {
        ChallengeOutcome::Accepted(challenge) => {
            info!("Webhook subscription verified");
            (StatusCode::OK, challenge)
        }
        ChallengeOutcome::Rejected => {
            warn!(mode = %mode, "Webhook verification rejected");
            (StatusCode::FORBIDDEN, String::new())
        }
    }
}

/// POST /webhooks
///
/// Verifies the delivery signature over the exact raw bytes, then enqueues
/// the envelope and acknowledges immediately. A failed signature produces
/// 401 with no side effects. Payload problems after a valid signature are
/// acknowledged anyway so the platform does not retry a permanently bad
/// delivery.
pub async fn handle_delivery(
    State(context): State<WebContext>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    if let Err(e) = verify_signature(&body, signature, &context.config.webhook_app_secret) {
        warn!(error = %e, "Rejected delivery with invalid signature");
        return (StatusCode::UNAUTHORIZED, String::new());
    }

    let envelope = match parse_envelope(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Acknowledging malformed delivery body");
            return (StatusCode::OK, ACK_BODY.to_string());
        }
    };

    if envelope.object != DELIVERY_OBJECT {
        debug!(object = %envelope.object, "Ignoring delivery for unsupported object");
        return (StatusCode::NOT_FOUND, String::new());
    }

    let work = DeliveryWork::new(envelope);
    let delivery_id = work.id.clone();
    if let Err(e) = context.delivery_queue().try_push(work).await {
        // Acknowledge anyway; queued-work loss is bounded and the intake
        // path must not block platform retries behind a full queue.
        warn!(error = %e, delivery = %delivery_id, "Delivery queue full, dropping delivery");
    } else {
        debug!(delivery = %delivery_id, "Delivery enqueued");
    }

    (StatusCode::OK, ACK_BODY.to_string())
}
