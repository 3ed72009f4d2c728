//! Automation rule model and repository.
//!
//! Rules are owned and mutated only through the explicit create/update/
//! toggle/delete operations here; the event pipeline never touches a rule
//! except through [`RuleStorage::record_execution`].

use super::StorageResult;
use crate::errors::StorageError;
use crate::event::{ActionKind, TriggerKind};
use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row, postgres::PgRow};
use std::sync::Arc;
use tracing::{Instrument, debug, error, instrument};

/// A rule's declaration of which event kind and keywords it responds to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub kind: TriggerKind,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub exact_match: bool,
    #[serde(default)]
    pub case_sensitive: bool,
}

/// A rule's declaration of what outbound operation to perform on match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_message: Option<String>,
    #[serde(default)]
    pub delay_seconds: u32,
}

/// Half-open time-of-day window `[start, end)` in the configured timezone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Inclusive follower-count range for the acting user.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FollowerRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u64>,
}

/// Eligibility conditions evaluated per matched rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleConditions {
    #[serde(default)]
    pub exclude_keywords: Vec<String>,
    #[serde(default)]
    pub include_users: Vec<String>,
    #[serde(default)]
    pub exclude_users: Vec<String>,
    #[serde(default)]
    pub require_verified_user: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_of_day: Option<TimeWindow>,
    /// Weekdays the rule may fire, 0 = Sunday through 6 = Saturday.
    #[serde(default)]
    pub days_of_week: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_executions_per_day: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_follower_range: Option<FollowerRange>,
}

/// Content scope of a rule.
///
/// The scope is an enum rather than a flag-plus-field pair, so the invariant
/// "`target_media_id` set implies `apply_to_all_content` is false" holds by
/// construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "media_id")]
pub enum RuleScope {
    AllContent,
    Media(String),
}

impl RuleScope {
    /// Build a scope from the storage-level flag/field pair, rejecting
    /// contradictory rows.
    pub fn from_columns(
        apply_to_all_content: bool,
        target_media_id: Option<String>,
    ) -> StorageResult<Self> {
        match (apply_to_all_content, target_media_id) {
            (true, None) => Ok(RuleScope::AllContent),
            (false, Some(media_id)) => Ok(RuleScope::Media(media_id)),
            (true, Some(media_id)) => Err(StorageError::InvalidRuleScope {
                details: format!(
                    "apply_to_all_content is set but target_media_id is {}",
                    media_id
                ),
            }),
            (false, None) => Err(StorageError::InvalidRuleScope {
                details: "neither apply_to_all_content nor target_media_id is set".to_string(),
            }),
        }
    }

    /// Decompose into the storage-level flag/field pair.
    pub fn to_columns(&self) -> (bool, Option<&str>) {
        match self {
            RuleScope::AllContent => (true, None),
            RuleScope::Media(media_id) => (false, Some(media_id)),
        }
    }
}

/// A user-defined automation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: String,
    pub account_id: String,
    pub name: String,
    pub is_active: bool,
    #[serde(flatten)]
    pub scope: RuleScope,
    pub triggers: Vec<Trigger>,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub conditions: RuleConditions,
    /// Minimum minutes between accepted executions for the same user.
    #[serde(default)]
    pub cooldown_minutes: u32,
    /// Trailing-24h execution cap per (rule, user).
    #[serde(default)]
    pub max_executions_per_user: u32,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub execution_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Legacy single trigger/action column values carried by rules persisted
/// under the old schema.
#[derive(Debug, Clone, Default)]
pub struct LegacyRuleColumns {
    pub trigger_type: Option<String>,
    pub trigger_keywords: Option<Vec<String>>,
    pub action_type: Option<String>,
    pub response_message: Option<String>,
}

/// Normalize the two overlapping rule schemas into canonical trigger/action
/// arrays.
///
/// Rules written by the current service carry JSON arrays; older rows carry
/// a single `trigger_type`/`action_type` column pair. The canonical arrays
/// win when both are present. This shim is the only place in the codebase
/// aware of the legacy shape.
pub fn canonicalize_rule_shape(
    triggers: Option<serde_json::Value>,
    actions: Option<serde_json::Value>,
    legacy: LegacyRuleColumns,
) -> StorageResult<(Vec<Trigger>, Vec<Action>)> {
    let triggers: Vec<Trigger> = match triggers {
        Some(value) => serde_json::from_value(value).map_err(|e| {
            StorageError::LegacyConversionFailed {
                details: format!("triggers column is not a valid trigger array: {}", e),
            }
        })?,
        None => {
            let trigger_type =
                legacy
                    .trigger_type
                    .ok_or_else(|| StorageError::LegacyConversionFailed {
                        details: "rule has neither triggers array nor trigger_type".to_string(),
                    })?;
            let kind = TriggerKind::parse(&trigger_type).ok_or_else(|| {
                StorageError::LegacyConversionFailed {
                    details: format!("unknown legacy trigger_type: {}", trigger_type),
                }
            })?;
            vec![Trigger {
                kind,
                keywords: legacy.trigger_keywords.unwrap_or_default(),
                exact_match: false,
                case_sensitive: false,
            }]
        }
    };

    let actions: Vec<Action> = match actions {
        Some(value) => serde_json::from_value(value).map_err(|e| {
            StorageError::LegacyConversionFailed {
                details: format!("actions column is not a valid action array: {}", e),
            }
        })?,
        None => {
            let action_type =
                legacy
                    .action_type
                    .ok_or_else(|| StorageError::LegacyConversionFailed {
                        details: "rule has neither actions array nor action_type".to_string(),
                    })?;
            let kind = ActionKind::parse(&action_type).ok_or_else(|| {
                StorageError::LegacyConversionFailed {
                    details: format!("unknown legacy action_type: {}", action_type),
                }
            })?;
            vec![Action {
                kind,
                response_message: legacy.response_message,
                delay_seconds: 0,
            }]
        }
    };

    Ok((triggers, actions))
}

/// Repository of automation rules.
#[async_trait]
pub trait RuleStorage: Send + Sync {
    /// List all active rules for an account, in storage order.
    async fn list_active_rules(&self, account_id: &str) -> StorageResult<Vec<AutomationRule>>;

    async fn get_rule(&self, rule_id: &str) -> StorageResult<Option<AutomationRule>>;

    async fn create_rule(&self, rule: &AutomationRule) -> StorageResult<()>;

    async fn update_rule(&self, rule: &AutomationRule) -> StorageResult<()>;

    async fn set_rule_active(&self, rule_id: &str, active: bool) -> StorageResult<()>;

    async fn delete_rule(&self, rule_id: &str) -> StorageResult<()>;

    /// Bump a rule's execution counter and last-executed timestamp. The only
    /// rule mutation the event pipeline performs.
    async fn record_execution(&self, rule_id: &str, at: DateTime<Utc>) -> StorageResult<()>;
}

#[async_trait]
impl<T: RuleStorage + ?Sized> RuleStorage for Arc<T> {
    async fn list_active_rules(&self, account_id: &str) -> StorageResult<Vec<AutomationRule>> {
        self.as_ref().list_active_rules(account_id).await
    }

    async fn get_rule(&self, rule_id: &str) -> StorageResult<Option<AutomationRule>> {
        self.as_ref().get_rule(rule_id).await
    }

    async fn create_rule(&self, rule: &AutomationRule) -> StorageResult<()> {
        self.as_ref().create_rule(rule).await
    }

    async fn update_rule(&self, rule: &AutomationRule) -> StorageResult<()> {
        self.as_ref().update_rule(rule).await
    }

    async fn set_rule_active(&self, rule_id: &str, active: bool) -> StorageResult<()> {
        self.as_ref().set_rule_active(rule_id, active).await
    }

    async fn delete_rule(&self, rule_id: &str) -> StorageResult<()> {
        self.as_ref().delete_rule(rule_id).await
    }

    async fn record_execution(&self, rule_id: &str, at: DateTime<Utc>) -> StorageResult<()> {
        self.as_ref().record_execution(rule_id, at).await
    }
}

pub struct PostgresRuleStorage {
    pool: PgPool,
}

impl PostgresRuleStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn rule_from_row(row: &PgRow) -> StorageResult<AutomationRule> {
        let scope = RuleScope::from_columns(
            row.get("apply_to_all_content"),
            row.get("target_media_id"),
        )?;

        let legacy = LegacyRuleColumns {
            trigger_type: row.get("trigger_type"),
            trigger_keywords: row.get("trigger_keywords"),
            action_type: row.get("action_type"),
            response_message: row.get("response_message"),
        };

        let (triggers, actions) =
            canonicalize_rule_shape(row.get("triggers"), row.get("actions"), legacy)?;

        let conditions: RuleConditions = row
            .get::<Option<serde_json::Value>, _>("conditions")
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| StorageError::LegacyConversionFailed {
                details: format!("conditions column is not valid: {}", e),
            })?
            .unwrap_or_default();

        Ok(AutomationRule {
            id: row.get("id"),
            account_id: row.get("account_id"),
            name: row.get("name"),
            is_active: row.get("is_active"),
            scope,
            triggers,
            actions,
            conditions,
            cooldown_minutes: row.get::<i32, _>("cooldown_minutes") as u32,
            max_executions_per_user: row.get::<i32, _>("max_executions_per_user") as u32,
            priority: row.get("priority"),
            execution_count: row.get("execution_count"),
            last_executed_at: row.get("last_executed_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

const RULE_COLUMNS: &str = "id, account_id, name, is_active, apply_to_all_content, \
     target_media_id, triggers, actions, trigger_type, trigger_keywords, action_type, \
     response_message, conditions, cooldown_minutes, max_executions_per_user, priority, \
     execution_count, last_executed_at, created_at, updated_at";

#[async_trait]
impl RuleStorage for PostgresRuleStorage {
    #[instrument(skip(self), fields(db.operation = "list_active_rules", rule.account = %account_id))]
    async fn list_active_rules(&self, account_id: &str) -> StorageResult<Vec<AutomationRule>> {
        debug!("Listing active rules");

        let span = tracing::debug_span!(
            "database_query",
            query = "SELECT automation_rules",
            table = "automation_rules",
            account = %account_id
        );

        let rows = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM automation_rules \
             WHERE account_id = $1 AND is_active = TRUE \
             ORDER BY priority DESC, created_at ASC"
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .instrument(span)
        .await
        .map_err(|e| {
            error!(error = ?e, account = %account_id, "Failed to list active rules");
            StorageError::from(e)
        })?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in &rows {
            match Self::rule_from_row(row) {
                Ok(rule) => rules.push(rule),
                Err(e) => {
                    // A single undecodable rule must not hide the others.
                    error!(error = ?e, "Skipping rule that failed canonicalization");
                }
            }
        }

        Ok(rules)
    }

    #[instrument(skip(self), fields(db.operation = "get_rule", rule.id = %rule_id))]
    async fn get_rule(&self, rule_id: &str) -> StorageResult<Option<AutomationRule>> {
        let row = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM automation_rules WHERE id = $1"
        ))
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(error = ?e, rule = %rule_id, "Failed to get rule");
            StorageError::from(e)
        })?;

        row.as_ref().map(Self::rule_from_row).transpose()
    }

    #[instrument(skip(self, rule), fields(db.operation = "create_rule", rule.id = %rule.id))]
    async fn create_rule(&self, rule: &AutomationRule) -> StorageResult<()> {
        let (apply_to_all_content, target_media_id) = rule.scope.to_columns();
        let triggers = serde_json::to_value(&rule.triggers).unwrap_or_default();
        let actions = serde_json::to_value(&rule.actions).unwrap_or_default();
        let conditions = serde_json::to_value(&rule.conditions).unwrap_or_default();

        sqlx::query(
            r#"
            INSERT INTO automation_rules
                (id, account_id, name, is_active, apply_to_all_content, target_media_id,
                 triggers, actions, conditions, cooldown_minutes, max_executions_per_user,
                 priority, execution_count, last_executed_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(&rule.id)
        .bind(&rule.account_id)
        .bind(&rule.name)
        .bind(rule.is_active)
        .bind(apply_to_all_content)
        .bind(target_media_id)
        .bind(&triggers)
        .bind(&actions)
        .bind(&conditions)
        .bind(rule.cooldown_minutes as i32)
        .bind(rule.max_executions_per_user as i32)
        .bind(rule.priority)
        .bind(rule.execution_count)
        .bind(rule.last_executed_at)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await?;

        debug!("Created rule");
        Ok(())
    }

    #[instrument(skip(self, rule), fields(db.operation = "update_rule", rule.id = %rule.id))]
    async fn update_rule(&self, rule: &AutomationRule) -> StorageResult<()> {
        let (apply_to_all_content, target_media_id) = rule.scope.to_columns();
        let triggers = serde_json::to_value(&rule.triggers).unwrap_or_default();
        let actions = serde_json::to_value(&rule.actions).unwrap_or_default();
        let conditions = serde_json::to_value(&rule.conditions).unwrap_or_default();

        let result = sqlx::query(
            r#"
            UPDATE automation_rules SET
                name = $2, is_active = $3, apply_to_all_content = $4, target_media_id = $5,
                triggers = $6, actions = $7, conditions = $8, cooldown_minutes = $9,
                max_executions_per_user = $10, priority = $11,
                trigger_type = NULL, trigger_keywords = NULL,
                action_type = NULL, response_message = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(&rule.id)
        .bind(&rule.name)
        .bind(rule.is_active)
        .bind(apply_to_all_content)
        .bind(target_media_id)
        .bind(&triggers)
        .bind(&actions)
        .bind(&conditions)
        .bind(rule.cooldown_minutes as i32)
        .bind(rule.max_executions_per_user as i32)
        .bind(rule.priority)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::RuleNotFound {
                rule_id: rule.id.clone(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self), fields(db.operation = "set_rule_active", rule.id = %rule_id))]
    async fn set_rule_active(&self, rule_id: &str, active: bool) -> StorageResult<()> {
        let result =
            sqlx::query("UPDATE automation_rules SET is_active = $2, updated_at = NOW() WHERE id = $1")
                .bind(rule_id)
                .bind(active)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::RuleNotFound {
                rule_id: rule_id.to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self), fields(db.operation = "delete_rule", rule.id = %rule_id))]
    async fn delete_rule(&self, rule_id: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM automation_rules WHERE id = $1")
            .bind(rule_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(db.operation = "record_execution", rule.id = %rule_id))]
    async fn record_execution(&self, rule_id: &str, at: DateTime<Utc>) -> StorageResult<()> {
        sqlx::query(
            "UPDATE automation_rules SET execution_count = execution_count + 1, \
             last_executed_at = $2 WHERE id = $1",
        )
        .bind(rule_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
