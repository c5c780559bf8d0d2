//! Tests for ledger state transitions and the file store.

use std::fs;

use chrono::{TimeZone, Utc};
use trigger_engine::{FileLedgerStore, LedgerError, LedgerState, LedgerStore, MemoryLedgerStore};

fn fired_at() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 7, 0, 5, 0).unwrap()
}

// ---------------------------------------------------------------------------
// State transitions
// ---------------------------------------------------------------------------

#[test]
fn reconcile_keeps_matching_identity() {
    let state = LedgerState::for_identity("ev-1").mark_fired("3d-before", fired_at());
    let reconciled = state.clone().reconcile("ev-1");
    assert_eq!(reconciled, state);
}

#[test]
fn reconcile_resets_on_identity_change() {
    let state = LedgerState::for_identity("ev-1").mark_fired("3d-before", fired_at());
    let reconciled = state.reconcile("ev-2");
    assert_eq!(reconciled, LedgerState::for_identity("ev-2"));
}

#[test]
fn reconcile_stamps_sentinel_ledger() {
    let reconciled = LedgerState::empty().reconcile("ev-1");
    assert_eq!(reconciled.event_identity.as_deref(), Some("ev-1"));
    assert!(reconciled.fired.is_empty());
}

#[test]
fn mark_fired_records_rule_and_time() {
    let state = LedgerState::for_identity("ev-1").mark_fired("3d-before", fired_at());
    assert!(state.has_fired("3d-before"));
    assert!(!state.has_fired("2d-before"));
    assert_eq!(state.fired["3d-before"], fired_at());
    assert_eq!(state.fired_rules().collect::<Vec<_>>(), vec!["3d-before"]);
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

#[test]
fn missing_file_loads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileLedgerStore::new(dir.path().join("state.json"));
    assert_eq!(store.load().unwrap(), LedgerState::empty());
}

#[test]
fn empty_file_loads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    fs::write(&path, "").unwrap();
    assert_eq!(FileLedgerStore::new(path).load().unwrap(), LedgerState::empty());
}

#[test]
fn persisted_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let state = LedgerState::for_identity("uid-1/2026-03-10T00:00:00+00:00")
        .mark_fired("3d-before", fired_at())
        .mark_fired("2d-before", fired_at());

    FileLedgerStore::new(&path).persist(&state).unwrap();
    let reopened = FileLedgerStore::new(&path).load().unwrap();

    assert_eq!(reopened, state);
}

#[test]
fn persist_leaves_no_temp_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = FileLedgerStore::new(dir.path().join("state.json"));
    store.persist(&LedgerState::for_identity("ev-1")).unwrap();
    store.persist(&LedgerState::for_identity("ev-2")).unwrap();

    let names: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["state.json".to_string()]);
}

#[test]
fn written_file_is_versioned_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    FileLedgerStore::new(&path)
        .persist(&LedgerState::for_identity("ev-1").mark_fired("concluded", fired_at()))
        .unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["version"], 1);
    assert_eq!(json["event_identity"], "ev-1");
    assert_eq!(json["fired"]["concluded"], "2026-03-07T00:05:00Z");
}

#[test]
fn garbage_file_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    fs::write(&path, b"\x80\x04\x95 not json").unwrap();

    let err = FileLedgerStore::new(path).load().unwrap_err();
    assert!(matches!(err, LedgerError::Corrupt { .. }), "got {:?}", err);
}

#[test]
fn truncated_file_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    fs::write(&path, r#"{"version":1,"event_identity":"ev-1","fired":{"#).unwrap();

    assert!(matches!(
        FileLedgerStore::new(path).load(),
        Err(LedgerError::Corrupt { .. })
    ));
}

#[test]
fn unknown_version_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    fs::write(&path, r#"{"version":99,"event_identity":null,"fired":{}}"#).unwrap();

    assert!(matches!(
        FileLedgerStore::new(path).load(),
        Err(LedgerError::Corrupt { .. })
    ));
}

#[test]
fn unwritable_location_fails_write() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = FileLedgerStore::new(dir.path().join("missing-dir").join("state.json"));

    let err = store.persist(&LedgerState::for_identity("ev-1")).unwrap_err();
    assert!(matches!(err, LedgerError::WriteFailed { .. }), "got {:?}", err);
}

// ---------------------------------------------------------------------------
// Memory store
// ---------------------------------------------------------------------------

#[test]
fn memory_store_counts_writes() {
    let mut store = MemoryLedgerStore::new();
    let state = LedgerState::for_identity("ev-1").mark_fired("a", fired_at());

    store.persist(&state).unwrap();

    assert_eq!(store.writes(), 1);
    assert_eq!(store.load().unwrap(), state);
}
