//! Integration tests for the `knxcal` binary.
//!
//! Each test writes a configuration and a calendar into a temp directory. Events are
//! placed relative to the current time so that trigger due-ness does not depend on
//! when the suite runs.

// `Command::cargo_bin` was deprecated in assert_cmd 2.1.2 in favor of
// `cargo::cargo_bin_cmd!`. Allow it until we migrate.
#![allow(deprecated)]

use std::fs;
use std::net::UdpSocket;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use chrono::{Duration, Utc};
use predicates::prelude::*;
use tempfile::TempDir;

const TRIGGERS: &str = r#"
[[trigger]]
name = "3d-before"
offset = 72
base = "begin"
address = "1/2/3"
dpt = "1byte_unsigned"
value = 3

[[trigger]]
name = "after-end"
offset = "-2h"
base = "end"
address = "1/2/3"
dpt = "1byte_unsigned"
value = 0
"#;

/// Calendar with one "Waste collection" event starting `hours_from_now` hours from now.
fn calendar(hours_from_now: i64) -> String {
    let start = Utc::now() + Duration::hours(hours_from_now);
    let end = start + Duration::hours(1);
    format!(
        "BEGIN:VCALENDAR\r\n\
         VERSION:2.0\r\n\
         PRODID:-//test//EN\r\n\
         BEGIN:VEVENT\r\n\
         UID:bin-1\r\n\
         SUMMARY:Waste collection\r\n\
         DTSTART:{}\r\n\
         DTEND:{}\r\n\
         END:VEVENT\r\n\
         END:VCALENDAR\r\n",
        start.format("%Y%m%dT%H%M%SZ"),
        end.format("%Y%m%dT%H%M%SZ")
    )
}

struct Setup {
    dir: TempDir,
}

impl Setup {
    fn new(connection: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let config = format!(
            "[knxcal]\n\
             ical_url = \"calendar.ics\"\n\
             event_name = \"Waste collection\"\n\
             state_file = \"state.json\"\n\
             \n{}\n{}",
            connection, TRIGGERS
        );
        fs::write(dir.path().join("knxcal.toml"), config).unwrap();
        fs::write(dir.path().join("calendar.ics"), calendar(24)).unwrap();
        Self { dir }
    }

    fn config(&self) -> PathBuf {
        self.dir.path().join("knxcal.toml")
    }

    fn state_file(&self) -> PathBuf {
        self.dir.path().join("state.json")
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("knxcal").unwrap();
        cmd.env_remove("RUST_LOG").arg("--config").arg(self.config());
        cmd
    }

    fn state(&self) -> serde_json::Value {
        read_json(&self.state_file())
    }
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// check / state
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn check_lists_triggers() {
    let setup = Setup::new("");
    setup
        .cmd()
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("Waste collection"))
        .stdout(predicate::str::contains("3d-before"))
        .stdout(predicate::str::contains("72h before begin"))
        .stdout(predicate::str::contains("2h after end"))
        .stdout(predicate::str::contains("routing via 224.0.23.12:3671"));
}

#[test]
fn check_resolve_shows_due_status() {
    let setup = Setup::new("");
    setup
        .cmd()
        .args(["check", "--resolve"])
        .assert()
        .success()
        .stdout(predicate::str::contains("occurrence: bin-1/"))
        .stdout(predicate::str::contains("due"))
        .stdout(predicate::str::contains("pending"));
}

#[test]
fn config_from_environment() {
    let setup = Setup::new("");
    Command::cargo_bin("knxcal")
        .unwrap()
        .env("KNXCAL_CONFIG", setup.config())
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("3d-before"));
}

#[test]
fn missing_config_exits_225() {
    let dir = TempDir::new().unwrap();
    Command::cargo_bin("knxcal")
        .unwrap()
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .arg("check")
        .assert()
        .code(225)
        .stderr(predicate::str::contains("Error reading config"));
}

#[test]
fn unknown_key_exits_225() {
    let setup = Setup::new("");
    let text = fs::read_to_string(setup.config()).unwrap();
    fs::write(
        setup.config(),
        text.replace("[knxcal]\n", "[knxcal]\nicalURL = \"old-style\"\n"),
    )
    .unwrap();

    setup.cmd().arg("check").assert().code(225);
}

#[test]
fn duplicate_trigger_exits_225() {
    let setup = Setup::new("");
    let mut text = fs::read_to_string(setup.config()).unwrap();
    text.push_str(TRIGGERS);
    fs::write(setup.config(), text).unwrap();

    setup.cmd().arg("check").assert().code(225);
}

#[test]
fn state_with_corrupt_file_exits_4() {
    let setup = Setup::new("");
    fs::write(setup.state_file(), "not a ledger").unwrap();

    setup
        .cmd()
        .arg("state")
        .assert()
        .code(4)
        .stderr(predicate::str::contains("Failed to read state file"));
}

#[test]
fn state_without_file_is_empty() {
    let setup = Setup::new("");
    setup
        .cmd()
        .arg("state")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"event_identity\": null"));
}

// ─────────────────────────────────────────────────────────────────────────────
// run
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn run_without_bus_records_due_triggers() {
    let setup = Setup::new("");
    setup
        .cmd()
        .arg("--no-knx")
        .assert()
        .success()
        .stderr(predicate::str::contains("KNX Calendar Gateway v"));

    let state = setup.state();
    assert!(state["event_identity"].as_str().unwrap().starts_with("bin-1/"));
    assert!(state["fired"].get("3d-before").is_some());
    assert!(state["fired"].get("after-end").is_none());
}

#[test]
fn second_run_does_not_refire() {
    let setup = Setup::new("");
    setup.cmd().args(["--no-knx", "run"]).assert().success();
    let first = setup.state();

    setup.cmd().args(["--no-knx", "run"]).assert().success();
    assert_eq!(setup.state(), first);
}

#[test]
fn no_state_leaves_no_file() {
    let setup = Setup::new("");
    setup
        .cmd()
        .args(["--no-knx", "--no-state"])
        .assert()
        .success();
    assert!(!setup.state_file().exists());
}

#[test]
fn new_occurrence_resets_state() {
    let setup = Setup::new("");
    setup.cmd().arg("--no-knx").assert().success();
    let first = setup.state();

    // The tracked event is replaced by a later one.
    fs::write(setup.dir.path().join("calendar.ics"), calendar(48)).unwrap();
    setup.cmd().arg("--no-knx").assert().success();
    let second = setup.state();

    assert_ne!(first["event_identity"], second["event_identity"]);
    assert!(second["fired"].get("3d-before").is_some());
}

#[test]
fn unreachable_feed_exits_3() {
    let setup = Setup::new("");
    fs::remove_file(setup.dir.path().join("calendar.ics")).unwrap();

    setup.cmd().arg("--no-knx").assert().code(3);
    assert!(!setup.state_file().exists());
}

#[test]
fn unwritable_state_exits_4() {
    let setup = Setup::new("");
    // A regular file where the state directory should be: every write fails,
    // regardless of the user the suite runs as.
    fs::write(setup.dir.path().join("blocker"), "").unwrap();
    let text = fs::read_to_string(setup.config()).unwrap();
    fs::write(
        setup.config(),
        text.replace("state_file = \"state.json\"", "state_file = \"blocker/state.json\""),
    )
    .unwrap();

    setup
        .cmd()
        .arg("--no-knx")
        .assert()
        .code(4)
        .stderr(predicate::str::contains("tick aborted"));
}

#[test]
fn absent_event_is_not_an_error() {
    let setup = Setup::new("");
    let text = fs::read_to_string(setup.config()).unwrap();
    fs::write(
        setup.config(),
        text.replace("event_name = \"Waste collection\"", "event_name = \"Paper\""),
    )
    .unwrap();

    setup
        .cmd()
        .arg("--no-knx")
        .assert()
        .success()
        .stderr(predicate::str::contains("No current occurrence"));
}

#[test]
fn silent_gateway_exits_2_and_records_nothing() {
    // Bound but never answers: the tunnel cannot be established.
    let gateway = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = gateway.local_addr().unwrap().port();
    let setup = Setup::new(&format!(
        "[connection]\ntype = \"tunneling\"\ngateway_ip = \"127.0.0.1\"\n\
         gateway_port = {}\ntimeout_secs = 1\n",
        port
    ));

    setup
        .cmd()
        .assert()
        .code(2)
        .stderr(predicate::str::contains("value not delivered"));
    assert!(!setup.state_file().exists());
}

#[test]
fn log_file_receives_output() {
    let setup = Setup::new("");
    let log = setup.dir.path().join("knxcal.log");
    setup
        .cmd()
        .arg("--no-knx")
        .arg("--log")
        .arg(&log)
        .assert()
        .success();

    let text = fs::read_to_string(&log).unwrap();
    assert!(text.contains("KNX Calendar Gateway v"));
    assert!(!text.contains('\u{1b}'), "log file must not contain ANSI escapes");
}

#[test]
fn log_file_rotates_at_size_cap() {
    let setup = Setup::new("");
    let log = setup.dir.path().join("knxcal.log");
    setup
        .cmd()
        .args(["--no-knx", "--debug", "--log-max-bytes", "200", "--log-backups", "2", "--log"])
        .arg(&log)
        .assert()
        .success();

    let backup = |n: usize| setup.dir.path().join(format!("knxcal.log.{}", n));
    assert!(backup(1).exists(), "log was not rotated");
    assert!(!backup(3).exists(), "more backups kept than configured");
    assert!(!fs::read_to_string(&log).unwrap().is_empty());
}
