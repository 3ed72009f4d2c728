//! Rule matching.
//!
//! Filters an account's active rules down to those applicable to one event
//! and orders them deterministically: descending priority, ties broken by
//! ascending creation time. Every satisfying rule is returned; the condition
//! evaluator decides eligibility per rule afterwards.

use tracing::trace;

use crate::event::{Event, TriggerKind};
use crate::storage::rule::{AutomationRule, RuleScope, Trigger};

/// A rule that matched an event, with the index of the trigger that fired.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch<'a> {
    pub rule: &'a AutomationRule,
    pub trigger_index: usize,
}

/// Match an event against candidate rules.
///
/// A rule matches when all of the following hold:
/// 1. at least one trigger responds to the event's kind,
/// 2. the rule's scope covers the event's media (all-content, or exact
///    media-id equality),
/// 3. that trigger's keyword predicate holds against the event text.
pub fn match_rules<'a>(event: &Event, rules: &'a [AutomationRule]) -> Vec<RuleMatch<'a>> {
    let mut matches: Vec<RuleMatch<'a>> = rules
        .iter()
        .filter(|rule| scope_matches(&rule.scope, event))
        .filter_map(|rule| {
            rule.triggers
                .iter()
                .position(|trigger| trigger_matches(trigger, event))
                .map(|trigger_index| RuleMatch {
                    rule,
                    trigger_index,
                })
        })
        .collect();

    matches.sort_by(|a, b| {
        b.rule
            .priority
            .cmp(&a.rule.priority)
            .then(a.rule.created_at.cmp(&b.rule.created_at))
    });

    trace!(
        event_kind = %event.kind.as_str(),
        candidates = rules.len(),
        matched = matches.len(),
        "Matched rules for event"
    );

    matches
}

/// Exact media equality only; no partial or fuzzy matching.
fn scope_matches(scope: &RuleScope, event: &Event) -> bool {
    match scope {
        RuleScope::AllContent => true,
        RuleScope::Media(media_id) => event.media_id.as_deref() == Some(media_id.as_str()),
    }
}

fn trigger_matches(trigger: &Trigger, event: &Event) -> bool {
    match trigger.kind {
        // Hashtag triggers respond to text-bearing events whose text carries
        // the keyword as a hashtag.
        TriggerKind::Hashtag => {
            matches!(event.kind, TriggerKind::Comment | TriggerKind::Mention)
                && hashtag_matches(trigger, &event.text)
        }
        kind => kind == event.kind && keyword_matches(trigger, &event.text),
    }
}

/// Keyword predicate: an empty keyword set always matches; otherwise any
/// keyword matches by whole-string equality (`exact_match`) or substring
/// containment, normalized per `case_sensitive`.
fn keyword_matches(trigger: &Trigger, text: &str) -> bool {
    if trigger.keywords.is_empty() {
        return true;
    }

    let haystack = normalize_case(text, trigger.case_sensitive);
    trigger.keywords.iter().any(|keyword| {
        let needle = normalize_case(keyword, trigger.case_sensitive);
        if trigger.exact_match {
            haystack == needle
        } else {
            haystack.contains(&needle)
        }
    })
}

fn hashtag_matches(trigger: &Trigger, text: &str) -> bool {
    if trigger.keywords.is_empty() {
        return true;
    }

    let haystack = normalize_case(text, trigger.case_sensitive);
    trigger.keywords.iter().any(|keyword| {
        let tag = format!("#{}", normalize_case(keyword, trigger.case_sensitive));
        haystack.contains(&tag)
    })
}

fn normalize_case(value: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        value.to_string()
    } else {
        value.to_lowercase()
    }
}
