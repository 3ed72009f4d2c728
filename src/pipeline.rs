//! End-to-end delivery processing.
//!
//! A verified delivery envelope fans out into normalized events; each event
//! is matched against the account's active rules, filtered through the
//! rule's conditions, gated on cooldowns and daily caps, and finally
//! executed. Failures at any stage are isolated to the event or rule they
//! belong to.

use chrono::Utc;
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::conditions::is_eligible;
use crate::executor::ActionExecutor;
use crate::gate::{ExecutionGate, GateDecision};
use crate::matcher::match_rules;
use crate::normalizer::{DeliveryEnvelope, normalize_delivery};
use crate::storage::rule::RuleStorage;

/// Per-delivery processing summary, mostly useful in tests and logs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub events: usize,
    pub matched: usize,
    pub executed: usize,
    pub gated: usize,
}

pub struct EventPipeline {
    rules: Arc<dyn RuleStorage>,
    gate: ExecutionGate,
    executor: ActionExecutor,
    timezone: Tz,
}

impl EventPipeline {
    pub fn new(
        rules: Arc<dyn RuleStorage>,
        gate: ExecutionGate,
        executor: ActionExecutor,
        timezone: Tz,
    ) -> Self {
        Self {
            rules,
            gate,
            executor,
            timezone,
        }
    }

    /// Process one verified delivery envelope.
    #[instrument(skip_all, fields(entries = envelope.entry.len()))]
    pub async fn process_delivery(&self, envelope: &DeliveryEnvelope) -> DeliveryReport {
        let received_at = Utc::now();
        let events = normalize_delivery(envelope, received_at);
        let mut report = DeliveryReport {
            events: events.len(),
            ..DeliveryReport::default()
        };

        for event in &events {
            let candidates = match self.rules.list_active_rules(&event.account_id).await {
                Ok(rules) => rules,
                Err(e) => {
                    warn!(
                        error = ?e,
                        account = %event.account_id,
                        "Failed to list rules, skipping event"
                    );
                    continue;
                }
            };

            let matches = match_rules(event, &candidates);
            if matches.is_empty() {
                debug!(
                    account = %event.account_id,
                    kind = %event.kind.as_str(),
                    "No matching rules"
                );
                continue;
            }
            report.matched += matches.len();

            for matched in matches {
                let rule = matched.rule;

                if !is_eligible(rule, event, &self.timezone) {
                    debug!(rule = %rule.id, "Rule conditions not met");
                    continue;
                }

                match self.gate.try_acquire(rule, event, Utc::now()).await {
                    Ok(GateDecision::Allow) => {}
                    Ok(GateDecision::Deny(reason)) => {
                        debug!(rule = %rule.id, reason = ?reason, "Execution gated");
                        report.gated += 1;
                        continue;
                    }
                    Err(e) => {
                        warn!(error = ?e, rule = %rule.id, "Gate check failed, skipping rule");
                        continue;
                    }
                }

                let outcomes = self.executor.execute_rule(rule, event).await;
                report.executed += 1;
                info!(
                    rule = %rule.id,
                    account = %event.account_id,
                    actions = outcomes.len(),
                    "Rule executed"
                );
            }
        }

        report
    }
}
