//! Rule eligibility conditions.
//!
//! Applied per matched rule, short-circuiting on the first failing predicate.
//! A failing predicate only excludes that rule; sibling candidates keep
//! processing. Clock-based predicates evaluate against an explicit timezone,
//! never host-local time.

use chrono::{Datelike, Timelike};
use chrono_tz::Tz;
use tracing::trace;

use crate::event::Event;
use crate::storage::rule::{AutomationRule, TimeWindow};

/// Evaluate all eligibility conditions for a matched rule.
pub fn is_eligible(rule: &AutomationRule, event: &Event, tz: &Tz) -> bool {
    let conditions = &rule.conditions;
    let text_lower = event.text.to_lowercase();

    // Exclusion keywords are always case-insensitive.
    if conditions
        .exclude_keywords
        .iter()
        .any(|keyword| text_lower.contains(&keyword.to_lowercase()))
    {
        trace!(rule = %rule.id, "Rule excluded by keyword");
        return false;
    }

    if !conditions.include_users.is_empty()
        && !conditions
            .include_users
            .iter()
            .any(|user| user == &event.external_user_id)
    {
        trace!(rule = %rule.id, "User not in include list");
        return false;
    }

    if conditions
        .exclude_users
        .iter()
        .any(|user| user == &event.external_user_id)
    {
        trace!(rule = %rule.id, "User in exclude list");
        return false;
    }

    // Unknown verification status counts as unverified.
    if conditions.require_verified_user && event.is_verified_user != Some(true) {
        trace!(rule = %rule.id, "User not verified");
        return false;
    }

    let local = event.received_at.with_timezone(tz);

    if let Some(window) = &conditions.time_of_day {
        if !within_time_window(window, local.time().hour(), local.time().minute()) {
            trace!(rule = %rule.id, "Outside time-of-day window");
            return false;
        }
    }

    if !conditions.days_of_week.is_empty() {
        let weekday = local.weekday().num_days_from_sunday() as u8;
        if !conditions.days_of_week.contains(&weekday) {
            trace!(rule = %rule.id, weekday, "Weekday not allowed");
            return false;
        }
    }

    // Unknown follower count passes: missing platform data never hard-fails.
    if let (Some(range), Some(count)) = (&conditions.user_follower_range, event.follower_count) {
        if range.min.is_some_and(|min| count < min) {
            trace!(rule = %rule.id, count, "Follower count below minimum");
            return false;
        }
        if range.max.is_some_and(|max| count > max) {
            trace!(rule = %rule.id, count, "Follower count above maximum");
            return false;
        }
    }

    true
}

/// Half-open window check `[start, end)` at minute resolution. A window with
/// `start > end` wraps past midnight.
fn within_time_window(window: &TimeWindow, hour: u32, minute: u32) -> bool {
    let now = hour * 60 + minute;
    let start = window.start.hour() * 60 + window.start.minute();
    let end = window.end.hour() * 60 + window.end.minute();

    if start <= end {
        now >= start && now < end
    } else {
        now >= start || now < end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TriggerKind;
    use crate::storage::rule::FollowerRange;
    use crate::test_helpers::{create_test_event, create_test_rule};
    use chrono::{NaiveTime, TimeZone, Utc};
    use chrono_tz::UTC;

    fn window(start: &str, end: &str) -> TimeWindow {
        TimeWindow {
            start: NaiveTime::parse_from_str(start, "%H:%M").unwrap(),
            end: NaiveTime::parse_from_str(end, "%H:%M").unwrap(),
        }
    }

    #[test]
    fn test_no_conditions_is_eligible() {
        let rule = create_test_rule("acct-1");
        let event = create_test_event("acct-1", TriggerKind::Comment);
        assert!(is_eligible(&rule, &event, &UTC));
    }

    #[test]
    fn test_exclude_keywords_case_insensitive() {
        let mut rule = create_test_rule("acct-1");
        rule.conditions.exclude_keywords = vec!["SPAM".to_string()];
        let mut event = create_test_event("acct-1", TriggerKind::Comment);
        event.text = "this is spam content".to_string();
        assert!(!is_eligible(&rule, &event, &UTC));

        event.text = "legitimate question".to_string();
        assert!(is_eligible(&rule, &event, &UTC));
    }

    #[test]
    fn test_include_users() {
        let mut rule = create_test_rule("acct-1");
        rule.conditions.include_users = vec!["u-allowed".to_string()];
        let mut event = create_test_event("acct-1", TriggerKind::Comment);

        event.external_user_id = "u-other".to_string();
        assert!(!is_eligible(&rule, &event, &UTC));

        event.external_user_id = "u-allowed".to_string();
        assert!(is_eligible(&rule, &event, &UTC));
    }

    #[test]
    fn test_exclude_users() {
        let mut rule = create_test_rule("acct-1");
        rule.conditions.exclude_users = vec!["u-blocked".to_string()];
        let mut event = create_test_event("acct-1", TriggerKind::Comment);
        event.external_user_id = "u-blocked".to_string();
        assert!(!is_eligible(&rule, &event, &UTC));
    }

    #[test]
    fn test_require_verified_treats_unknown_as_false() {
        let mut rule = create_test_rule("acct-1");
        rule.conditions.require_verified_user = true;
        let mut event = create_test_event("acct-1", TriggerKind::Comment);

        event.is_verified_user = None;
        assert!(!is_eligible(&rule, &event, &UTC));

        event.is_verified_user = Some(false);
        assert!(!is_eligible(&rule, &event, &UTC));

        event.is_verified_user = Some(true);
        assert!(is_eligible(&rule, &event, &UTC));
    }

    #[test]
    fn test_time_of_day_half_open() {
        let mut rule = create_test_rule("acct-1");
        rule.conditions.time_of_day = Some(window("09:00", "17:00"));
        let mut event = create_test_event("acct-1", TriggerKind::Comment);

        event.received_at = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
        assert!(is_eligible(&rule, &event, &UTC));

        event.received_at = Utc.with_ymd_and_hms(2024, 6, 3, 17, 0, 0).unwrap();
        assert!(!is_eligible(&rule, &event, &UTC));

        event.received_at = Utc.with_ymd_and_hms(2024, 6, 3, 3, 0, 0).unwrap();
        assert!(!is_eligible(&rule, &event, &UTC));
    }

    #[test]
    fn test_time_of_day_respects_timezone() {
        let mut rule = create_test_rule("acct-1");
        rule.conditions.time_of_day = Some(window("09:00", "17:00"));
        let mut event = create_test_event("acct-1", TriggerKind::Comment);

        // 14:00 UTC is 09:00 in New York (EST, UTC-5).
        event.received_at = Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap();
        assert!(is_eligible(&rule, &event, &chrono_tz::America::New_York));

        // But 03:00 UTC is 22:00 the previous evening in New York.
        event.received_at = Utc.with_ymd_and_hms(2024, 1, 15, 3, 0, 0).unwrap();
        assert!(!is_eligible(&rule, &event, &chrono_tz::America::New_York));
    }

    #[test]
    fn test_overnight_window_wraps() {
        let mut rule = create_test_rule("acct-1");
        rule.conditions.time_of_day = Some(window("22:00", "02:00"));
        let mut event = create_test_event("acct-1", TriggerKind::Comment);

        event.received_at = Utc.with_ymd_and_hms(2024, 6, 3, 23, 30, 0).unwrap();
        assert!(is_eligible(&rule, &event, &UTC));

        event.received_at = Utc.with_ymd_and_hms(2024, 6, 3, 1, 30, 0).unwrap();
        assert!(is_eligible(&rule, &event, &UTC));

        event.received_at = Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap();
        assert!(!is_eligible(&rule, &event, &UTC));
    }

    #[test]
    fn test_days_of_week() {
        let mut rule = create_test_rule("acct-1");
        // Monday and Tuesday only (0 = Sunday).
        rule.conditions.days_of_week = vec![1, 2];
        let mut event = create_test_event("acct-1", TriggerKind::Comment);

        // 2024-06-03 is a Monday.
        event.received_at = Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap();
        assert!(is_eligible(&rule, &event, &UTC));

        // 2024-06-08 is a Saturday.
        event.received_at = Utc.with_ymd_and_hms(2024, 6, 8, 12, 0, 0).unwrap();
        assert!(!is_eligible(&rule, &event, &UTC));
    }

    #[test]
    fn test_follower_range_unknown_passes() {
        let mut rule = create_test_rule("acct-1");
        rule.conditions.user_follower_range = Some(FollowerRange {
            min: Some(100),
            max: Some(10_000),
        });
        let mut event = create_test_event("acct-1", TriggerKind::Comment);

        event.follower_count = None;
        assert!(is_eligible(&rule, &event, &UTC));

        event.follower_count = Some(50);
        assert!(!is_eligible(&rule, &event, &UTC));

        event.follower_count = Some(500);
        assert!(is_eligible(&rule, &event, &UTC));

        event.follower_count = Some(50_000);
        assert!(!is_eligible(&rule, &event, &UTC));
    }
}
