//! Execution gating: cooldown and daily-cap enforcement.
//!
//! The gate runs after condition evaluation and before action dispatch. The
//! cooldown fast path is an injectable [`CooldownStore`]; it is advisory and
//! may under-block across restarts or multiple instances. The trailing-24h
//! counts from the append-only execution log are authoritative.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use deadpool_redis::{Pool as RedisPool, redis::AsyncCommands};
use metrohash::MetroHash64;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::constants::DAILY_CAP_WINDOW_HOURS;
use crate::errors::GateError;
use crate::event::Event;
use crate::storage::log::ExecutionLogStorage;
use crate::storage::rule::AutomationRule;

/// Why the gate refused an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Within the per-(rule, user) cooldown window.
    Cooldown,
    /// The user hit the rule's trailing-24h per-user cap.
    UserDailyCap,
    /// The rule hit its trailing-24h total cap.
    RuleDailyCap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Deny(DenyReason),
}

/// Fast-path store of the last accepted execution per (rule, user).
///
/// Entries expire after the rule's cooldown; a missing entry never denies on
/// its own. Implementations must be safe under concurrent access.
#[async_trait]
pub trait CooldownStore: Send + Sync {
    async fn last_accepted(&self, rule_id: &str, user_id: &str)
    -> Result<Option<DateTime<Utc>>>;

    async fn mark_accepted(
        &self,
        rule_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
        ttl: std::time::Duration,
    ) -> Result<()>;
}

fn cooldown_key(rule_id: &str, user_id: &str) -> String {
    let mut hasher = MetroHash64::new();
    rule_id.hash(&mut hasher);
    user_id.hash(&mut hasher);
    format!("cooldown:{:016x}", hasher.finish())
}

/// In-process cooldown store backed by a TTL cache with per-entry expiry.
pub struct MemoryCooldownStore {
    cache: moka::future::Cache<String, (DateTime<Utc>, std::time::Duration)>,
}

struct CooldownExpiry;

impl moka::Expiry<String, (DateTime<Utc>, std::time::Duration)> for CooldownExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &(DateTime<Utc>, std::time::Duration),
        _created_at: std::time::Instant,
    ) -> Option<std::time::Duration> {
        Some(value.1)
    }
}

impl MemoryCooldownStore {
    /// `max_entries` bounds memory; eviction only weakens the fast path,
    /// never correctness.
    pub fn new(max_entries: u64) -> Self {
        let cache = moka::future::Cache::builder()
            .max_capacity(max_entries)
            .expire_after(CooldownExpiry)
            .build();
        Self { cache }
    }
}

impl Default for MemoryCooldownStore {
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[async_trait]
impl CooldownStore for MemoryCooldownStore {
    async fn last_accepted(
        &self,
        rule_id: &str,
        user_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let entry = self.cache.get(&cooldown_key(rule_id, user_id)).await;
        Ok(entry.map(|(at, _)| at))
    }

    async fn mark_accepted(
        &self,
        rule_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
        ttl: std::time::Duration,
    ) -> Result<()> {
        self.cache
            .insert(cooldown_key(rule_id, user_id), (at, ttl))
            .await;
        Ok(())
    }
}

/// Redis-backed cooldown store for multi-instance deployments.
///
/// Keys are metrohash-hashed (rule, user) pairs holding the accepted epoch
/// second, expired by Redis at the cooldown boundary.
pub struct RedisCooldownStore {
    pool: RedisPool,
}

impl RedisCooldownStore {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CooldownStore for RedisCooldownStore {
    async fn last_accepted(
        &self,
        rule_id: &str,
        user_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| anyhow!("Failed to get Redis connection: {}", e))?;

        let epoch: Option<i64> = conn
            .get(cooldown_key(rule_id, user_id))
            .await
            .map_err(|e| anyhow!("Failed to read cooldown key: {}", e))?;

        Ok(epoch.and_then(|secs| DateTime::from_timestamp(secs, 0)))
    }

    async fn mark_accepted(
        &self,
        rule_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
        ttl: std::time::Duration,
    ) -> Result<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| anyhow!("Failed to get Redis connection: {}", e))?;

        let ttl_secs = ttl.as_secs().max(1);
        let _: () = conn
            .set_ex(cooldown_key(rule_id, user_id), at.timestamp(), ttl_secs)
            .await
            .map_err(|e| anyhow!("Failed to write cooldown key: {}", e))?;

        Ok(())
    }
}

/// The gate itself: cooldown plus authoritative daily caps.
pub struct ExecutionGate {
    cooldowns: Arc<dyn CooldownStore>,
    logs: Arc<dyn ExecutionLogStorage>,
}

impl ExecutionGate {
    pub fn new(cooldowns: Arc<dyn CooldownStore>, logs: Arc<dyn ExecutionLogStorage>) -> Self {
        Self { cooldowns, logs }
    }

    /// Decide whether a matched, eligible rule may execute for this event.
    ///
    /// Checks in order, each independently sufficient to deny: cooldown,
    /// per-user daily cap, per-rule daily cap. On allow, the cooldown store
    /// is updated optimistically before dispatch to shrink the duplicate-
    /// delivery race window.
    pub async fn try_acquire(
        &self,
        rule: &AutomationRule,
        event: &Event,
        now: DateTime<Utc>,
    ) -> Result<GateDecision, GateError> {
        let user_id = &event.external_user_id;

        if rule.cooldown_minutes > 0 {
            // Cache failures degrade the fast path, not the decision.
            match self.cooldowns.last_accepted(&rule.id, user_id).await {
                Ok(Some(last)) => {
                    let elapsed = now - last;
                    if elapsed < Duration::minutes(rule.cooldown_minutes as i64) {
                        debug!(rule = %rule.id, user = %user_id, "Denied by cooldown");
                        return Ok(GateDecision::Deny(DenyReason::Cooldown));
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = ?e, rule = %rule.id, "Cooldown store read failed, continuing");
                }
            }
        }

        let since = now - Duration::hours(DAILY_CAP_WINDOW_HOURS);

        if rule.max_executions_per_user > 0 {
            let count = self
                .logs
                .count_logs(&rule.id, Some(user_id), since)
                .await
                .map_err(|e| GateError::CountLookupFailed {
                    details: e.to_string(),
                })?;
            if count >= rule.max_executions_per_user as u64 {
                debug!(rule = %rule.id, user = %user_id, count, "Denied by per-user daily cap");
                return Ok(GateDecision::Deny(DenyReason::UserDailyCap));
            }
        }

        if let Some(cap) = rule.conditions.max_executions_per_day {
            let count = self
                .logs
                .count_logs(&rule.id, None, since)
                .await
                .map_err(|e| GateError::CountLookupFailed {
                    details: e.to_string(),
                })?;
            if count >= cap as u64 {
                debug!(rule = %rule.id, count, "Denied by per-rule daily cap");
                return Ok(GateDecision::Deny(DenyReason::RuleDailyCap));
            }
        }

        if rule.cooldown_minutes > 0 {
            let ttl = std::time::Duration::from_secs(rule.cooldown_minutes as u64 * 60);
            if let Err(e) = self
                .cooldowns
                .mark_accepted(&rule.id, user_id, now, ttl)
                .await
            {
                warn!(error = ?e, rule = %rule.id, "Cooldown store write failed, continuing");
            }
        }

        Ok(GateDecision::Allow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ActionKind, TriggerKind};
    use crate::storage::log::AutomationLog;
    use crate::storage::memory::MemoryExecutionLogStorage;
    use crate::test_helpers::{create_test_event, create_test_rule};

    fn gate_with(
        logs: Arc<MemoryExecutionLogStorage>,
    ) -> ExecutionGate {
        ExecutionGate::new(Arc::new(MemoryCooldownStore::default()), logs)
    }

    fn log_entry(rule_id: &str, user_id: &str, at: DateTime<Utc>) -> AutomationLog {
        AutomationLog {
            id: ulid::Ulid::new().to_string(),
            rule_id: rule_id.to_string(),
            account_id: "acct-1".to_string(),
            trigger_kind: TriggerKind::Comment,
            trigger_text: String::new(),
            external_user_id: user_id.to_string(),
            action_kind: ActionKind::SendDm,
            response_message: None,
            success: true,
            error_message: None,
            executed_at: at,
        }
    }

    #[tokio::test]
    async fn test_allows_when_unconstrained() {
        let gate = gate_with(Arc::new(MemoryExecutionLogStorage::new()));
        let mut rule = create_test_rule("acct-1");
        rule.cooldown_minutes = 0;
        rule.max_executions_per_user = 0;
        let event = create_test_event("acct-1", TriggerKind::Comment);

        let decision = gate.try_acquire(&rule, &event, Utc::now()).await.unwrap();
        assert_eq!(decision, GateDecision::Allow);
    }

    #[tokio::test]
    async fn test_cooldown_denies_second_event() {
        let gate = gate_with(Arc::new(MemoryExecutionLogStorage::new()));
        let mut rule = create_test_rule("acct-1");
        rule.cooldown_minutes = 5;
        rule.max_executions_per_user = 0;
        let event = create_test_event("acct-1", TriggerKind::Comment);

        let start = Utc::now();
        let first = gate.try_acquire(&rule, &event, start).await.unwrap();
        assert_eq!(first, GateDecision::Allow);

        // Two minutes later, same (rule, user): still cooling down.
        let second = gate
            .try_acquire(&rule, &event, start + Duration::minutes(2))
            .await
            .unwrap();
        assert_eq!(second, GateDecision::Deny(DenyReason::Cooldown));

        // Past the window the gate opens again.
        let third = gate
            .try_acquire(&rule, &event, start + Duration::minutes(6))
            .await
            .unwrap();
        assert_eq!(third, GateDecision::Allow);
    }

    #[tokio::test]
    async fn test_cooldown_scoped_per_user() {
        let gate = gate_with(Arc::new(MemoryExecutionLogStorage::new()));
        let mut rule = create_test_rule("acct-1");
        rule.cooldown_minutes = 5;
        rule.max_executions_per_user = 0;

        let mut event_a = create_test_event("acct-1", TriggerKind::Comment);
        event_a.external_user_id = "user-a".to_string();
        let mut event_b = create_test_event("acct-1", TriggerKind::Comment);
        event_b.external_user_id = "user-b".to_string();

        let now = Utc::now();
        assert_eq!(
            gate.try_acquire(&rule, &event_a, now).await.unwrap(),
            GateDecision::Allow
        );
        assert_eq!(
            gate.try_acquire(&rule, &event_b, now).await.unwrap(),
            GateDecision::Allow
        );
    }

    #[tokio::test]
    async fn test_per_user_daily_cap() {
        let logs = Arc::new(MemoryExecutionLogStorage::new());
        let mut rule = create_test_rule("acct-1");
        rule.cooldown_minutes = 0;
        rule.max_executions_per_user = 1;
        let event = create_test_event("acct-1", TriggerKind::Comment);

        let now = Utc::now();
        logs.append_log(&log_entry(
            &rule.id,
            &event.external_user_id,
            now - Duration::hours(1),
        ))
        .await
        .unwrap();

        let gate = gate_with(logs);
        let decision = gate.try_acquire(&rule, &event, now).await.unwrap();
        assert_eq!(decision, GateDecision::Deny(DenyReason::UserDailyCap));
    }

    #[tokio::test]
    async fn test_per_user_cap_window_expires() {
        let logs = Arc::new(MemoryExecutionLogStorage::new());
        let mut rule = create_test_rule("acct-1");
        rule.cooldown_minutes = 0;
        rule.max_executions_per_user = 1;
        let event = create_test_event("acct-1", TriggerKind::Comment);

        let now = Utc::now();
        logs.append_log(&log_entry(
            &rule.id,
            &event.external_user_id,
            now - Duration::hours(25),
        ))
        .await
        .unwrap();

        let gate = gate_with(logs);
        let decision = gate.try_acquire(&rule, &event, now).await.unwrap();
        assert_eq!(decision, GateDecision::Allow);
    }

    #[tokio::test]
    async fn test_per_rule_daily_cap() {
        let logs = Arc::new(MemoryExecutionLogStorage::new());
        let mut rule = create_test_rule("acct-1");
        rule.cooldown_minutes = 0;
        rule.max_executions_per_user = 0;
        rule.conditions.max_executions_per_day = Some(2);
        let event = create_test_event("acct-1", TriggerKind::Comment);

        let now = Utc::now();
        for user in ["user-x", "user-y"] {
            logs.append_log(&log_entry(&rule.id, user, now - Duration::hours(2)))
                .await
                .unwrap();
        }

        let gate = gate_with(logs);
        let decision = gate.try_acquire(&rule, &event, now).await.unwrap();
        assert_eq!(decision, GateDecision::Deny(DenyReason::RuleDailyCap));
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryCooldownStore::default();
        let at = Utc::now();
        store
            .mark_accepted("r-1", "u-1", at, std::time::Duration::from_secs(300))
            .await
            .unwrap();

        let got = store.last_accepted("r-1", "u-1").await.unwrap();
        assert_eq!(got, Some(at));
        assert_eq!(store.last_accepted("r-1", "u-2").await.unwrap(), None);
    }

    #[test]
    fn test_cooldown_key_stable_and_distinct() {
        assert_eq!(cooldown_key("r-1", "u-1"), cooldown_key("r-1", "u-1"));
        assert_ne!(cooldown_key("r-1", "u-1"), cooldown_key("r-1", "u-2"));
        assert_ne!(cooldown_key("r-1", "u-1"), cooldown_key("r-2", "u-1"));
        assert!(cooldown_key("r", "u").starts_with("cooldown:"));
    }
}
