//! Tests for due-rule evaluation.

use chrono::{DateTime, TimeZone, Utc};
use knx_bus::DptValue;
use trigger_engine::{evaluate, EventWindow, LedgerState, RawOffset, RawRule, RuleSet};

fn at(day: u32, hour: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, hour, min, 0).unwrap()
}

fn raw(name: &str, offset: &str, base: &str, value: i64) -> RawRule {
    RawRule {
        name: name.to_string(),
        offset: RawOffset::Text(offset.to_string()),
        base: base.to_string(),
        address: "1/2/3".to_string(),
        dpt: "1byte_unsigned".to_string(),
        value: DptValue::Integer(value),
    }
}

/// The countdown used throughout: 3, 2, 1 days before the start, then "concluded".
fn countdown() -> RuleSet {
    RuleSet::load(vec![
        raw("3d-before", "72h", "begin", 3),
        raw("2d-before", "48h", "begin", 2),
        raw("1d-before", "24h", "begin", 1),
        raw("concluded", "0", "end", 0),
    ])
    .unwrap()
}

fn window(identity: &str) -> EventWindow {
    EventWindow::new(at(10, 0, 0), at(10, 0, 30), identity)
}

#[test]
fn first_boundary_crossed_fires_only_that_rule() {
    let rules = countdown();
    let eval = evaluate(at(7, 0, 0), &window("ev-1"), &rules, LedgerState::empty());

    assert_eq!(eval.due_names(), vec!["3d-before"]);
    assert_eq!(eval.due[0].trigger_at, at(7, 0, 0));
}

#[test]
fn nothing_due_before_first_boundary() {
    let rules = countdown();
    let ledger = LedgerState::for_identity("ev-1").mark_fired("3d-before", at(7, 0, 0));

    let eval = evaluate(at(6, 23, 0), &window("ev-1"), &rules, ledger);

    assert!(eval.due.is_empty(), "got {:?}", eval.due_names());
}

#[test]
fn long_downtime_replays_full_countdown_in_order() {
    let rules = countdown();
    let eval = evaluate(at(10, 1, 0), &window("ev-1"), &rules, LedgerState::empty());

    assert_eq!(
        eval.due_names(),
        vec!["3d-before", "2d-before", "1d-before", "concluded"]
    );
}

#[test]
fn evaluation_does_not_mark_anything_fired() {
    let rules = countdown();
    let eval = evaluate(at(10, 1, 0), &window("ev-1"), &rules, LedgerState::empty());

    assert_eq!(eval.ledger, LedgerState::for_identity("ev-1"));
}

#[test]
fn fired_rules_are_not_due_again() {
    let rules = countdown();
    let ledger = LedgerState::for_identity("ev-1")
        .mark_fired("3d-before", at(7, 0, 0))
        .mark_fired("2d-before", at(8, 0, 0));

    let eval = evaluate(at(10, 1, 0), &window("ev-1"), &rules, ledger);

    assert_eq!(eval.due_names(), vec!["1d-before", "concluded"]);
}

#[test]
fn new_occurrence_resets_ledger() {
    let rules = countdown();
    let ledger = LedgerState::for_identity("ev-1")
        .mark_fired("3d-before", at(7, 0, 0))
        .mark_fired("2d-before", at(8, 0, 0))
        .mark_fired("1d-before", at(9, 0, 0))
        .mark_fired("concluded", at(10, 0, 30));

    let eval = evaluate(at(10, 1, 0), &window("ev-2"), &rules, ledger);

    assert_eq!(eval.due.len(), 4, "all rules eligible for a new occurrence");
    assert_eq!(eval.ledger.event_identity.as_deref(), Some("ev-2"));
    assert!(eval.ledger.fired.is_empty());
}

#[test]
fn order_follows_trigger_time_not_config_order() {
    let rules = RuleSet::load(vec![
        raw("concluded", "0", "end", 0),
        raw("1d-before", "24h", "begin", 1),
        raw("3d-before", "72h", "begin", 3),
        raw("2d-before", "48h", "begin", 2),
    ])
    .unwrap();

    let eval = evaluate(at(10, 1, 0), &window("ev-1"), &rules, LedgerState::empty());

    assert_eq!(
        eval.due_names(),
        vec!["3d-before", "2d-before", "1d-before", "concluded"]
    );
}

#[test]
fn simultaneous_triggers_keep_config_order() {
    let rules = RuleSet::load(vec![
        raw("b", "1h", "begin", 2),
        raw("a", "1h", "begin", 1),
    ])
    .unwrap();

    let eval = evaluate(at(10, 0, 0), &window("ev-1"), &rules, LedgerState::empty());

    assert_eq!(eval.due_names(), vec!["b", "a"]);
}

#[test]
fn negative_offset_fires_after_anchor() {
    let rules = RuleSet::load(vec![raw("after-end", "-2h", "end", 1)]).unwrap();

    let before = evaluate(at(10, 2, 29), &window("ev-1"), &rules, LedgerState::empty());
    let after = evaluate(at(10, 2, 30), &window("ev-1"), &rules, LedgerState::empty());

    assert!(before.due.is_empty());
    assert_eq!(after.due_names(), vec!["after-end"]);
}

#[test]
fn positive_offset_on_end_fires_before_end() {
    // The offset sign alone decides the direction, whatever the base.
    let rules = RuleSet::load(vec![raw("before-end", "15m", "end", 1)]).unwrap();

    let eval = evaluate(at(10, 0, 15), &window("ev-1"), &rules, LedgerState::empty());

    assert_eq!(eval.due_names(), vec!["before-end"]);
}

#[test]
fn trigger_exactly_at_now_is_due() {
    let rules = countdown();
    let eval = evaluate(at(9, 0, 0), &window("ev-1"), &rules, LedgerState::empty());

    assert_eq!(eval.due_names(), vec!["3d-before", "2d-before", "1d-before"]);
}

#[test]
fn evaluation_is_idempotent() {
    let rules = countdown();
    let ledger = LedgerState::for_identity("ev-1").mark_fired("3d-before", at(7, 0, 0));

    let first = evaluate(at(9, 12, 0), &window("ev-1"), &rules, ledger.clone());
    let second = evaluate(at(9, 12, 0), &window("ev-1"), &rules, ledger);

    assert_eq!(first, second);
}
