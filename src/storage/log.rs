//! Append-only execution log.
//!
//! One row per action attempt, success or failure. The trailing-24h counts
//! computed here are the authoritative input to the execution gate; the
//! in-process cooldown cache is only a fast-path hint.

use super::StorageResult;
use crate::constants::LOG_TRIGGER_TEXT_MAX;
use crate::errors::StorageError;
use crate::event::{ActionKind, TriggerKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::{debug, error, instrument};

/// A single recorded action attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationLog {
    pub id: String,
    pub rule_id: String,
    pub account_id: String,
    pub trigger_kind: TriggerKind,
    /// Event text that triggered the rule, truncated for storage.
    pub trigger_text: String,
    pub external_user_id: String,
    pub action_kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_message: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl AutomationLog {
    /// Truncate trigger text to the stored bound, respecting char boundaries.
    pub fn bound_trigger_text(text: &str) -> String {
        if text.chars().count() <= LOG_TRIGGER_TEXT_MAX {
            text.to_string()
        } else {
            text.chars().take(LOG_TRIGGER_TEXT_MAX).collect()
        }
    }
}

/// Append-only store of action attempts with windowed counting.
#[async_trait]
pub trait ExecutionLogStorage: Send + Sync {
    async fn append_log(&self, entry: &AutomationLog) -> StorageResult<()>;

    /// Count log rows for a rule since `since`, optionally narrowed to one
    /// external user.
    async fn count_logs(
        &self,
        rule_id: &str,
        external_user_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> StorageResult<u64>;

    /// Most recent log rows for an account, newest first.
    async fn recent_logs(&self, account_id: &str, limit: u32) -> StorageResult<Vec<AutomationLog>>;
}

#[async_trait]
impl<T: ExecutionLogStorage + ?Sized> ExecutionLogStorage for Arc<T> {
    async fn append_log(&self, entry: &AutomationLog) -> StorageResult<()> {
        self.as_ref().append_log(entry).await
    }

    async fn count_logs(
        &self,
        rule_id: &str,
        external_user_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> StorageResult<u64> {
        self.as_ref()
            .count_logs(rule_id, external_user_id, since)
            .await
    }

    async fn recent_logs(&self, account_id: &str, limit: u32) -> StorageResult<Vec<AutomationLog>> {
        self.as_ref().recent_logs(account_id, limit).await
    }
}

pub struct PostgresExecutionLogStorage {
    pool: PgPool,
}

impl PostgresExecutionLogStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionLogStorage for PostgresExecutionLogStorage {
    #[instrument(skip(self, entry), fields(db.operation = "append_log", rule.id = %entry.rule_id))]
    async fn append_log(&self, entry: &AutomationLog) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO automation_logs
                (id, rule_id, account_id, trigger_kind, trigger_text, external_user_id,
                 action_kind, response_message, success, error_message, executed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.rule_id)
        .bind(&entry.account_id)
        .bind(entry.trigger_kind.as_str())
        .bind(AutomationLog::bound_trigger_text(&entry.trigger_text))
        .bind(&entry.external_user_id)
        .bind(entry.action_kind.as_str())
        .bind(&entry.response_message)
        .bind(entry.success)
        .bind(&entry.error_message)
        .bind(entry.executed_at)
        .execute(&self.pool)
        .await?;

        debug!("Appended execution log entry");
        Ok(())
    }

    #[instrument(skip(self), fields(db.operation = "count_logs", rule.id = %rule_id))]
    async fn count_logs(
        &self,
        rule_id: &str,
        external_user_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let count: i64 = match external_user_id {
            Some(user_id) => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM automation_logs \
                     WHERE rule_id = $1 AND external_user_id = $2 AND executed_at >= $3",
                )
                .bind(rule_id)
                .bind(user_id)
                .bind(since)
                .fetch_one(&self.pool)
                .await
            }
            None => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM automation_logs \
                     WHERE rule_id = $1 AND executed_at >= $2",
                )
                .bind(rule_id)
                .bind(since)
                .fetch_one(&self.pool)
                .await
            }
        }
        .map_err(|e| {
            error!(error = ?e, rule = %rule_id, "Failed to count execution logs");
            StorageError::from(e)
        })?;

        Ok(count as u64)
    }

    #[instrument(skip(self), fields(db.operation = "recent_logs", log.account = %account_id))]
    async fn recent_logs(&self, account_id: &str, limit: u32) -> StorageResult<Vec<AutomationLog>> {
        let rows = sqlx::query(
            r#"
            SELECT id, rule_id, account_id, trigger_kind, trigger_text, external_user_id,
                   action_kind, response_message, success, error_message, executed_at
            FROM automation_logs
            WHERE account_id = $1
            ORDER BY executed_at DESC
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut logs = Vec::with_capacity(rows.len());
        for row in rows {
            let trigger_kind: String = row.get("trigger_kind");
            let action_kind: String = row.get("action_kind");
            let (Some(trigger_kind), Some(action_kind)) = (
                TriggerKind::parse(&trigger_kind),
                ActionKind::parse(&action_kind),
            ) else {
                error!(
                    trigger_kind = %trigger_kind,
                    action_kind = %action_kind,
                    "Skipping log row with unknown kind"
                );
                continue;
            };
            logs.push(AutomationLog {
                id: row.get("id"),
                rule_id: row.get("rule_id"),
                account_id: row.get("account_id"),
                trigger_kind,
                trigger_text: row.get("trigger_text"),
                external_user_id: row.get("external_user_id"),
                action_kind,
                response_message: row.get("response_message"),
                success: row.get("success"),
                error_message: row.get("error_message"),
                executed_at: row.get("executed_at"),
            });
        }

        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_trigger_text_short() {
        assert_eq!(AutomationLog::bound_trigger_text("hello"), "hello");
    }

    #[test]
    fn test_bound_trigger_text_truncates() {
        let long = "x".repeat(LOG_TRIGGER_TEXT_MAX + 100);
        let bounded = AutomationLog::bound_trigger_text(&long);
        assert_eq!(bounded.chars().count(), LOG_TRIGGER_TEXT_MAX);
    }

    #[test]
    fn test_bound_trigger_text_multibyte() {
        let long = "é".repeat(LOG_TRIGGER_TEXT_MAX + 1);
        let bounded = AutomationLog::bound_trigger_text(&long);
        assert_eq!(bounded.chars().count(), LOG_TRIGGER_TEXT_MAX);
    }
}
