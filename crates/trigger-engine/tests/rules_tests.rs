//! Tests for rule validation and offset parsing.

use chrono::{Duration, TimeZone, Utc};
use knx_bus::DptValue;
use trigger_engine::{
    evaluate, parse_offset, Anchor, ConfigError, EventWindow, LedgerState, RawOffset, RawRule,
    RuleSet, MAX_OFFSET_DAYS,
};

fn raw(name: &str) -> RawRule {
    RawRule {
        name: name.to_string(),
        offset: RawOffset::Hours(24),
        base: "begin".to_string(),
        address: "1/2/3".to_string(),
        dpt: "1byte_unsigned".to_string(),
        value: DptValue::Integer(1),
    }
}

#[test]
fn valid_rules_load_in_order() {
    let rules = RuleSet::load(vec![raw("b"), raw("a")]).unwrap();
    let names: Vec<&str> = rules.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["b", "a"]);
    assert_eq!(rules.get("a").unwrap().offset, Duration::hours(24));
    assert_eq!(rules.get("a").unwrap().base, Anchor::Start);
}

#[test]
fn duplicate_names_rejected() {
    let err = RuleSet::load(vec![raw("a"), raw("a")]).unwrap_err();
    assert_eq!(err, ConfigError::DuplicateRule("a".to_string()));
}

#[test]
fn base_accepts_begin_start_end_in_any_case() {
    let cases = [
        ("begin", Anchor::Start),
        ("START", Anchor::Start),
        ("End", Anchor::End),
    ];
    for (base, expected) in cases {
        let rule = RawRule { base: base.to_string(), ..raw("a") };
        assert_eq!(RuleSet::load(vec![rule]).unwrap().get("a").unwrap().base, expected);
    }
}

#[test]
fn unknown_base_rejected() {
    let rule = RawRule { base: "middle".to_string(), ..raw("a") };
    assert_eq!(
        RuleSet::load(vec![rule]).unwrap_err(),
        ConfigError::InvalidBase {
            rule: "a".to_string(),
            base: "middle".to_string()
        }
    );
}

#[test]
fn malformed_address_names_the_rule() {
    let rule = RawRule { address: "1/9/3".to_string(), ..raw("bad-address") };
    match RuleSet::load(vec![raw("ok"), rule]).unwrap_err() {
        ConfigError::InvalidRule { rule, .. } => assert_eq!(rule, "bad-address"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn unknown_dpt_rejected() {
    let rule = RawRule { dpt: "colour".to_string(), ..raw("a") };
    assert!(matches!(
        RuleSet::load(vec![rule]),
        Err(ConfigError::InvalidRule { .. })
    ));
}

#[test]
fn value_out_of_range_for_dpt_rejected() {
    let rule = RawRule { value: DptValue::Integer(300), ..raw("a") };
    assert!(matches!(
        RuleSet::load(vec![rule]),
        Err(ConfigError::InvalidRule { .. })
    ));
}

#[test]
fn string_value_coerced_for_numeric_dpt() {
    let rule = RawRule { value: DptValue::Text("3".to_string()), ..raw("a") };
    assert!(RuleSet::load(vec![rule]).is_ok());
}

#[test]
fn empty_name_rejected() {
    assert!(matches!(
        RuleSet::load(vec![raw("  ")]),
        Err(ConfigError::InvalidRule { .. })
    ));
}

#[test]
fn bad_text_offset_rejected() {
    let rule = RawRule { offset: RawOffset::Text("soon".to_string()), ..raw("a") };
    assert!(matches!(
        RuleSet::load(vec![rule]),
        Err(ConfigError::InvalidRule { .. })
    ));
}

#[test]
fn offset_beyond_a_century_rejected() {
    let offsets = [
        RawOffset::Hours(100_000_000_000),
        RawOffset::Hours(-100_000_000_000),
        RawOffset::Text(format!("{}d", MAX_OFFSET_DAYS + 1)),
    ];
    for offset in offsets {
        let rule = RawRule { offset, ..raw("far") };
        match RuleSet::load(vec![rule]).unwrap_err() {
            ConfigError::InvalidRule { rule, reason } => {
                assert_eq!(rule, "far");
                assert!(reason.contains("exceeds"), "{}", reason);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}

#[test]
fn largest_offset_evaluates_without_overflow() {
    let rule = RawRule {
        offset: RawOffset::Text(format!("-{}d", MAX_OFFSET_DAYS)),
        ..raw("late")
    };
    let rules = RuleSet::load(vec![rule]).unwrap();
    let start = Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap();
    let window = EventWindow::new(start, start + Duration::hours(1), "uid/1");

    let evaluation = evaluate(start, &window, &rules, LedgerState::default());
    assert!(evaluation.due.is_empty());
    assert_eq!(
        rules.get("late").unwrap().trigger_at(&window),
        start + Duration::days(MAX_OFFSET_DAYS)
    );
}

#[test]
fn empty_rule_set_is_allowed() {
    assert!(RuleSet::load(Vec::new()).unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// parse_offset
// ---------------------------------------------------------------------------

#[test]
fn bare_number_is_hours() {
    assert_eq!(parse_offset("72"), Some(Duration::hours(72)));
    assert_eq!(parse_offset("0"), Some(Duration::zero()));
    assert_eq!(parse_offset("-6"), Some(Duration::hours(-6)));
}

#[test]
fn unit_suffixes_combine() {
    assert_eq!(parse_offset("1d12h"), Some(Duration::hours(36)));
    assert_eq!(parse_offset("90s"), Some(Duration::seconds(90)));
    assert_eq!(parse_offset("-30m"), Some(Duration::minutes(-30)));
    assert_eq!(parse_offset("+2D"), Some(Duration::days(2)));
    assert_eq!(parse_offset(" 1h30m "), Some(Duration::minutes(90)));
}

#[test]
fn malformed_offsets_rejected() {
    for bad in ["", "-", "h", "12x", "1h30", "1.5h", "--1h", "99999999999999999999h"] {
        assert_eq!(parse_offset(bad), None, "{:?} should not parse", bad);
    }
}
