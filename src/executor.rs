//! Action execution.
//!
//! Every action configured on a matched rule is attempted independently:
//! no abort on first failure, no abort on first success. A per-action
//! `delay_seconds` defers that one dispatch onto a spawned timer task, so a
//! delayed action never stalls the rest of the pipeline. Each attempt,
//! success or failure, appends an execution log row and bumps the rule's
//! execution counter.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::constants::PLATFORM_TIMEOUT_MS;
use crate::errors::ExecutorError;
use crate::event::{ActionKind, Event};
use crate::storage::log::{AutomationLog, ExecutionLogStorage};
use crate::storage::rule::{Action, AutomationRule, RuleStorage};

/// Uniform result shape for platform API calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlatformResponse {
    pub fn ok(id: Option<String>) -> Self {
        Self {
            success: true,
            id,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            id: None,
            error: Some(error.into()),
        }
    }
}

/// Outbound platform API surface used by the executor.
///
/// Network failures are folded into the response shape rather than raised:
/// a failed call is a recorded outcome, never a pipeline error.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn send_direct_message(&self, user_id: &str, text: &str) -> PlatformResponse;
    async fn reply_to_comment(&self, comment_id: &str, text: &str) -> PlatformResponse;
    async fn like_comment(&self, comment_id: &str) -> PlatformResponse;
    async fn follow_user(&self, user_id: &str) -> PlatformResponse;
    async fn send_story_reply(&self, user_id: &str, text: &str) -> PlatformResponse;
}

/// Graph-style HTTP implementation of [`PlatformClient`].
pub struct HttpPlatformClient {
    http: Arc<reqwest::Client>,
    base_url: String,
    access_token: String,
}

impl HttpPlatformClient {
    pub fn new(http: Arc<reqwest::Client>, base_url: String, access_token: String) -> Self {
        Self {
            http,
            base_url,
            access_token,
        }
    }

    /// POST a JSON body and fold any failure into a [`PlatformResponse`].
    async fn post(&self, path: &str, body: serde_json::Value) -> PlatformResponse {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);

        let request = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send();

        let response = match timeout(Duration::from_millis(PLATFORM_TIMEOUT_MS), request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                return PlatformResponse::failed(
                    ExecutorError::PlatformRequestFailed {
                        details: e.to_string(),
                    }
                    .to_string(),
                );
            }
            Err(_) => {
                return PlatformResponse::failed(
                    ExecutorError::PlatformRequestTimeout {
                        timeout_ms: PLATFORM_TIMEOUT_MS,
                    }
                    .to_string(),
                );
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return PlatformResponse::failed(format!(
                "platform returned {}: {}",
                status, body
            ));
        }

        let id = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| {
                v.get("id")
                    .or_else(|| v.get("message_id"))
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string)
            });

        PlatformResponse::ok(id)
    }
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn send_direct_message(&self, user_id: &str, text: &str) -> PlatformResponse {
        self.post(
            "me/messages",
            json!({"recipient": {"id": user_id}, "message": {"text": text}}),
        )
        .await
    }

    async fn reply_to_comment(&self, comment_id: &str, text: &str) -> PlatformResponse {
        self.post(&format!("{comment_id}/replies"), json!({"message": text}))
            .await
    }

    async fn like_comment(&self, comment_id: &str) -> PlatformResponse {
        self.post(&format!("{comment_id}/likes"), json!({})).await
    }

    async fn follow_user(&self, user_id: &str) -> PlatformResponse {
        self.post(&format!("{user_id}/follows"), json!({})).await
    }

    async fn send_story_reply(&self, user_id: &str, text: &str) -> PlatformResponse {
        self.post(
            "me/messages",
            json!({"recipient": {"id": user_id}, "message": {"text": text}}),
        )
        .await
    }
}

/// Outcome of one attempted action.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub action: Action,
    pub response: PlatformResponse,
}

/// Dispatches a rule's actions and records every attempt.
#[derive(Clone)]
pub struct ActionExecutor {
    client: Arc<dyn PlatformClient>,
    logs: Arc<dyn ExecutionLogStorage>,
    rules: Arc<dyn RuleStorage>,
}

impl ActionExecutor {
    pub fn new(
        client: Arc<dyn PlatformClient>,
        logs: Arc<dyn ExecutionLogStorage>,
        rules: Arc<dyn RuleStorage>,
    ) -> Self {
        Self {
            client,
            logs,
            rules,
        }
    }

    /// Execute every action configured on the rule.
    ///
    /// Immediate actions are dispatched and recorded before returning.
    /// Delayed actions are handed to spawned timer tasks that dispatch and
    /// record on their own once the delay elapses; they do not appear in the
    /// returned outcomes.
    pub async fn execute_rule(&self, rule: &AutomationRule, event: &Event) -> Vec<ActionOutcome> {
        let mut outcomes = Vec::new();

        for action in &rule.actions {
            if action.delay_seconds > 0 {
                let executor = self.clone();
                let rule = rule.clone();
                let event = event.clone();
                let action = action.clone();
                let delay = Duration::from_secs(action.delay_seconds as u64);
                debug!(
                    rule = %rule.id,
                    action = %action.kind.as_str(),
                    delay_seconds = action.delay_seconds,
                    "Deferring action dispatch"
                );
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let response = executor.dispatch(&action, &event).await;
                    executor.record(&rule, &event, &action, &response).await;
                });
                continue;
            }

            let response = self.dispatch(action, event).await;
            self.record(rule, event, action, &response).await;
            outcomes.push(ActionOutcome {
                action: action.clone(),
                response,
            });
        }

        outcomes
    }

    /// Exhaustive dispatch: every action kind maps to exactly one platform
    /// call.
    async fn dispatch(&self, action: &Action, event: &Event) -> PlatformResponse {
        match action.kind {
            ActionKind::SendDm => match &action.response_message {
                Some(text) => {
                    self.client
                        .send_direct_message(&event.external_user_id, text)
                        .await
                }
                None => PlatformResponse::failed(
                    ExecutorError::MissingResponseMessage {
                        action_kind: action.kind.as_str().to_string(),
                    }
                    .to_string(),
                ),
            },
            ActionKind::ReplyComment => match (&event.comment_id, &action.response_message) {
                (Some(comment_id), Some(text)) => {
                    self.client.reply_to_comment(comment_id, text).await
                }
                (None, _) => PlatformResponse::failed(
                    ExecutorError::MissingActionTarget {
                        action_kind: action.kind.as_str().to_string(),
                    }
                    .to_string(),
                ),
                (_, None) => PlatformResponse::failed(
                    ExecutorError::MissingResponseMessage {
                        action_kind: action.kind.as_str().to_string(),
                    }
                    .to_string(),
                ),
            },
            ActionKind::LikeComment => match &event.comment_id {
                Some(comment_id) => self.client.like_comment(comment_id).await,
                None => PlatformResponse::failed(
                    ExecutorError::MissingActionTarget {
                        action_kind: action.kind.as_str().to_string(),
                    }
                    .to_string(),
                ),
            },
            ActionKind::FollowUser => self.client.follow_user(&event.external_user_id).await,
            ActionKind::SendStoryReply => match &action.response_message {
                Some(text) => {
                    self.client
                        .send_story_reply(&event.external_user_id, text)
                        .await
                }
                None => PlatformResponse::failed(
                    ExecutorError::MissingResponseMessage {
                        action_kind: action.kind.as_str().to_string(),
                    }
                    .to_string(),
                ),
            },
        }
    }

    /// Append the log row and bump the rule counter for one attempt.
    ///
    /// Persistence failures degrade to diagnostics; they never abort the
    /// pipeline.
    async fn record(
        &self,
        rule: &AutomationRule,
        event: &Event,
        action: &Action,
        response: &PlatformResponse,
    ) {
        let now = Utc::now();
        let entry = AutomationLog {
            id: ulid::Ulid::new().to_string(),
            rule_id: rule.id.clone(),
            account_id: rule.account_id.clone(),
            trigger_kind: event.kind,
            trigger_text: AutomationLog::bound_trigger_text(&event.text),
            external_user_id: event.external_user_id.clone(),
            action_kind: action.kind,
            response_message: action.response_message.clone(),
            success: response.success,
            error_message: response.error.clone(),
            executed_at: now,
        };

        if let Err(e) = self.logs.append_log(&entry).await {
            error!(error = ?e, rule = %rule.id, "Failed to append execution log, continuing");
        }

        if let Err(e) = self.rules.record_execution(&rule.id, now).await {
            error!(error = ?e, rule = %rule.id, "Failed to record rule execution, continuing");
        }

        if response.success {
            info!(
                rule = %rule.id,
                action = %action.kind.as_str(),
                user = %event.external_user_id,
                "Action dispatched"
            );
        } else {
            warn!(
                rule = %rule.id,
                action = %action.kind.as_str(),
                error = response.error.as_deref().unwrap_or("unknown"),
                "Action failed"
            );
        }
    }
}
