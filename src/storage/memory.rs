//! In-memory storage implementations.
//!
//! Used by tests and single-instance development deployments. Both stores
//! are thread-safe behind tokio RwLocks.

use super::StorageResult;
use super::log::{AutomationLog, ExecutionLogStorage};
use super::rule::{AutomationRule, RuleStorage};
use crate::errors::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory rule repository.
#[derive(Default)]
pub struct MemoryRuleStorage {
    rules: RwLock<HashMap<String, AutomationRule>>,
}

impl MemoryRuleStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleStorage for MemoryRuleStorage {
    async fn list_active_rules(&self, account_id: &str) -> StorageResult<Vec<AutomationRule>> {
        let rules = self.rules.read().await;
        let mut active: Vec<AutomationRule> = rules
            .values()
            .filter(|r| r.account_id == account_id && r.is_active)
            .cloned()
            .collect();
        active.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(active)
    }

    async fn get_rule(&self, rule_id: &str) -> StorageResult<Option<AutomationRule>> {
        Ok(self.rules.read().await.get(rule_id).cloned())
    }

    async fn create_rule(&self, rule: &AutomationRule) -> StorageResult<()> {
        self.rules
            .write()
            .await
            .insert(rule.id.clone(), rule.clone());
        Ok(())
    }

    async fn update_rule(&self, rule: &AutomationRule) -> StorageResult<()> {
        let mut rules = self.rules.write().await;
        if !rules.contains_key(&rule.id) {
            return Err(StorageError::RuleNotFound {
                rule_id: rule.id.clone(),
            });
        }
        rules.insert(rule.id.clone(), rule.clone());
        Ok(())
    }

    async fn set_rule_active(&self, rule_id: &str, active: bool) -> StorageResult<()> {
        let mut rules = self.rules.write().await;
        let rule = rules
            .get_mut(rule_id)
            .ok_or_else(|| StorageError::RuleNotFound {
                rule_id: rule_id.to_string(),
            })?;
        rule.is_active = active;
        rule.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_rule(&self, rule_id: &str) -> StorageResult<()> {
        self.rules.write().await.remove(rule_id);
        Ok(())
    }

    async fn record_execution(&self, rule_id: &str, at: DateTime<Utc>) -> StorageResult<()> {
        let mut rules = self.rules.write().await;
        if let Some(rule) = rules.get_mut(rule_id) {
            rule.execution_count += 1;
            rule.last_executed_at = Some(at);
        }
        Ok(())
    }
}

/// In-memory append-only execution log.
#[derive(Default)]
pub struct MemoryExecutionLogStorage {
    logs: RwLock<Vec<AutomationLog>>,
}

impl MemoryExecutionLogStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all entries, in append order. Test hook.
    pub async fn entries(&self) -> Vec<AutomationLog> {
        self.logs.read().await.clone()
    }
}

#[async_trait]
impl ExecutionLogStorage for MemoryExecutionLogStorage {
    async fn append_log(&self, entry: &AutomationLog) -> StorageResult<()> {
        let mut entry = entry.clone();
        entry.trigger_text = AutomationLog::bound_trigger_text(&entry.trigger_text);
        self.logs.write().await.push(entry);
        Ok(())
    }

    async fn count_logs(
        &self,
        rule_id: &str,
        external_user_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let logs = self.logs.read().await;
        let count = logs
            .iter()
            .filter(|log| log.rule_id == rule_id && log.executed_at >= since)
            .filter(|log| {
                external_user_id.is_none_or(|user_id| log.external_user_id == user_id)
            })
            .count();
        Ok(count as u64)
    }

    async fn recent_logs(&self, account_id: &str, limit: u32) -> StorageResult<Vec<AutomationLog>> {
        let logs = self.logs.read().await;
        let mut recent: Vec<AutomationLog> = logs
            .iter()
            .filter(|log| log.account_id == account_id)
            .cloned()
            .collect();
        recent.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        recent.truncate(limit as usize);
        Ok(recent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ActionKind, TriggerKind};
    use crate::test_helpers::create_test_rule;
    use chrono::Duration;

    fn test_log(rule_id: &str, user_id: &str, executed_at: DateTime<Utc>) -> AutomationLog {
        AutomationLog {
            id: ulid::Ulid::new().to_string(),
            rule_id: rule_id.to_string(),
            account_id: "acct-1".to_string(),
            trigger_kind: TriggerKind::Comment,
            trigger_text: "text".to_string(),
            external_user_id: user_id.to_string(),
            action_kind: ActionKind::SendDm,
            response_message: None,
            success: true,
            error_message: None,
            executed_at,
        }
    }

    #[tokio::test]
    async fn test_list_active_rules_ordering() {
        let storage = MemoryRuleStorage::new();
        let now = Utc::now();

        let mut low = create_test_rule("acct-1");
        low.id = "low".to_string();
        low.priority = 1;
        low.created_at = now;

        let mut high = create_test_rule("acct-1");
        high.id = "high".to_string();
        high.priority = 10;
        high.created_at = now;

        let mut older = create_test_rule("acct-1");
        older.id = "older".to_string();
        older.priority = 10;
        older.created_at = now - Duration::hours(1);

        let mut inactive = create_test_rule("acct-1");
        inactive.id = "inactive".to_string();
        inactive.is_active = false;

        for rule in [&low, &high, &older, &inactive] {
            storage.create_rule(rule).await.unwrap();
        }

        let active = storage.list_active_rules("acct-1").await.unwrap();
        let ids: Vec<&str> = active.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["older", "high", "low"]);
    }

    #[tokio::test]
    async fn test_record_execution() {
        let storage = MemoryRuleStorage::new();
        let rule = create_test_rule("acct-1");
        storage.create_rule(&rule).await.unwrap();

        let at = Utc::now();
        storage.record_execution(&rule.id, at).await.unwrap();

        let stored = storage.get_rule(&rule.id).await.unwrap().unwrap();
        assert_eq!(stored.execution_count, 1);
        assert_eq!(stored.last_executed_at, Some(at));
    }

    #[tokio::test]
    async fn test_toggle_and_delete_lifecycle() {
        let storage = MemoryRuleStorage::new();
        let rule = create_test_rule("acct-1");
        storage.create_rule(&rule).await.unwrap();

        storage.set_rule_active(&rule.id, false).await.unwrap();
        assert!(storage.list_active_rules("acct-1").await.unwrap().is_empty());
        let stored = storage.get_rule(&rule.id).await.unwrap().unwrap();
        assert!(!stored.is_active);

        storage.set_rule_active(&rule.id, true).await.unwrap();
        assert_eq!(storage.list_active_rules("acct-1").await.unwrap().len(), 1);

        storage.delete_rule(&rule.id).await.unwrap();
        assert!(storage.get_rule(&rule.id).await.unwrap().is_none());

        assert!(matches!(
            storage.set_rule_active(&rule.id, true).await,
            Err(StorageError::RuleNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_rule_replaces_existing() {
        let storage = MemoryRuleStorage::new();
        let mut rule = create_test_rule("acct-1");
        storage.create_rule(&rule).await.unwrap();

        rule.name = "renamed".to_string();
        rule.priority = 7;
        storage.update_rule(&rule).await.unwrap();

        let stored = storage.get_rule(&rule.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "renamed");
        assert_eq!(stored.priority, 7);

        let mut unknown = create_test_rule("acct-1");
        unknown.id = "missing".to_string();
        assert!(matches!(
            storage.update_rule(&unknown).await,
            Err(StorageError::RuleNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_count_logs_windowed() {
        let storage = MemoryExecutionLogStorage::new();
        let now = Utc::now();

        storage
            .append_log(&test_log("rule-1", "user-a", now - Duration::hours(30)))
            .await
            .unwrap();
        storage
            .append_log(&test_log("rule-1", "user-a", now - Duration::hours(1)))
            .await
            .unwrap();
        storage
            .append_log(&test_log("rule-1", "user-b", now))
            .await
            .unwrap();

        let since = now - Duration::hours(24);
        assert_eq!(
            storage.count_logs("rule-1", None, since).await.unwrap(),
            2
        );
        assert_eq!(
            storage
                .count_logs("rule-1", Some("user-a"), since)
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            storage.count_logs("rule-2", None, since).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_recent_logs_newest_first_with_limit() {
        let storage = MemoryExecutionLogStorage::new();
        let now = Utc::now();

        storage
            .append_log(&test_log("rule-1", "user-a", now - Duration::hours(3)))
            .await
            .unwrap();
        storage
            .append_log(&test_log("rule-1", "user-b", now - Duration::hours(1)))
            .await
            .unwrap();
        storage
            .append_log(&test_log("rule-2", "user-c", now))
            .await
            .unwrap();

        let recent = storage.recent_logs("acct-1", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].external_user_id, "user-c");
        assert_eq!(recent[1].external_user_id, "user-b");

        assert!(storage.recent_logs("acct-other", 10).await.unwrap().is_empty());
    }
}
