//! Coverage for TOML check files and shell-command checks.

use std::path::Path;
use std::time::Duration;

use pagerunit::check::command::{parse_checks, CommandCheck, CommandSource};
use pagerunit::check::source::{CheckSource, LoadError};
use pagerunit::check::{Check, FailureKind};

const CHECKS: &str = r#"
[[check]]
name = "diskFull"
description = "Root filesystem has space."
run = "exit 1"

[[check]]
name = "pingOk"
run = "true"

[[check]]
name = "bad/name"
run = "true"

[[check]]
name = "noCommand"

[[check]]
name = "retired"
run = "exit 1"
disabled = true

[[check]]
name = "quiet"
run = "exit 1"
silent = true
"#;

#[test]
fn parse_skips_unusable_entries() {
    let checks = match parse_checks(CHECKS, Path::new("checks.toml")) {
        Ok(checks) => checks,
        Err(err) => panic!("checks should parse: {err}"),
    };
    let names: Vec<&str> = checks.iter().map(|c| c.name()).collect();
    assert_eq!(names, vec!["diskFull", "pingOk", "retired", "quiet"]);
    assert_eq!(checks[0].description(), Some("Root filesystem has space."));
    assert_eq!(checks[1].description(), None);
}

#[test]
fn parse_rejects_invalid_toml() {
    let result = parse_checks("[[check]\nname =", Path::new("broken.toml"));
    assert!(matches!(result, Err(LoadError::Parse { .. })));
}

#[test]
fn empty_file_has_no_checks() {
    let checks = parse_checks("", Path::new("empty.toml"));
    assert!(matches!(checks, Ok(ref c) if c.is_empty()));
}

#[tokio::test]
async fn disabled_and_silent_entries_pass() {
    let checks = match parse_checks(CHECKS, Path::new("checks.toml")) {
        Ok(checks) => checks,
        Err(err) => panic!("checks should parse: {err}"),
    };
    for check in checks.iter().filter(|c| matches!(c.name(), "retired" | "quiet")) {
        assert!(check.run().await.is_ok(), "{} should pass", check.name());
    }
}

#[test]
fn missing_source_file_is_a_load_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let source = CommandSource::new(dir.path().join("absent.toml"));
    assert!(source.id().ends_with("absent.toml"));
    assert!(matches!(source.load(), Err(LoadError::Io { .. })));
}

#[test]
fn source_reads_file_from_disk() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("checks.toml");
    std::fs::write(&path, CHECKS).expect("write checks");

    let source = CommandSource::new(&path);
    assert_eq!(source.path(), path.as_path());
    let loaded = source.load().expect("source should load");
    assert_eq!(loaded.len(), 4);
}

#[tokio::test]
async fn zero_exit_passes() {
    let check = CommandCheck::new("ok", "true");
    assert!(check.run().await.is_ok());
}

#[tokio::test]
async fn non_zero_exit_is_an_assertion_with_stderr() {
    let check = CommandCheck::new("diskFull", "echo 'disk 97% full' >&2; exit 3");
    let failure = match check.run().await {
        Ok(()) => panic!("command should fail"),
        Err(failure) => failure,
    };
    assert_eq!(failure.kind, FailureKind::Assertion);
    assert_eq!(failure.message, "disk 97% full");
    assert_eq!(failure.location, "echo 'disk 97% full' >&2; exit 3");
}

#[tokio::test]
async fn silent_exit_reports_status_code() {
    let check = CommandCheck::new("quietFail", "exit 4");
    let failure = match check.run().await {
        Ok(()) => panic!("command should fail"),
        Err(failure) => failure,
    };
    assert_eq!(failure.message, "exit status 4");
}

#[tokio::test]
async fn timeout_is_a_runtime_error() {
    let check = CommandCheck::new("hung", "sleep 5").with_timeout(Duration::from_millis(100));
    let failure = match check.run().await {
        Ok(()) => panic!("command should time out"),
        Err(failure) => failure,
    };
    assert_eq!(failure.kind, FailureKind::Error);
    assert!(failure.message.starts_with("timed out"));
}
