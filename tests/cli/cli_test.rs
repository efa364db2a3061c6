//! CLI contract tests.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::TempDir;

const CHECKS: &str = r#"
[[check]]
name = "diskFull"
description = "Root filesystem has space."
run = "echo 'disk 97% full' >&2; exit 1"

[[check]]
name = "pingOk"
run = "true"
"#;

struct Sandbox {
    dir: TempDir,
    checks: PathBuf,
}

impl Sandbox {
    fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let checks = dir.path().join("checks.toml");
        fs::write(&checks, CHECKS).expect("write checks");
        Self { dir, checks }
    }

    fn state_dir(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    /// A command isolated from the caller's home and environment.
    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("pagerunit").expect("binary should build");
        cmd.env("HOME", self.dir.path())
            .env("PAGERUNIT_STATE_DIR", self.state_dir())
            .env("PAGERUNIT_HOST", "testhost")
            .env_remove("PAGERUNIT_MAIL_ADDRESS")
            .env_remove("PAGERUNIT_SMS_ADDRESS")
            .env_remove("PAGERUNIT_SMTP_USERNAME")
            .env_remove("PAGERUNIT_SMTP_PASSWORD");
        cmd
    }
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.assert().success();
    String::from_utf8_lossy(&output.get_output().stdout).into_owned()
}

fn write_config(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join("pagerunit.toml");
    fs::write(&path, contents).expect("write config");
    path
}

#[test]
fn help_lists_subcommands() {
    let sandbox = Sandbox::new();
    let help = stdout_of(sandbox.cmd().arg("--help"));
    for sub in ["start", "check", "status", "clear"] {
        assert!(help.contains(sub), "help should mention {sub}");
    }
}

#[test]
fn check_requires_a_source() {
    let sandbox = Sandbox::new();
    sandbox.cmd().arg("check").assert().failure();
}

#[test]
fn dry_run_prints_messages_and_records_markers() {
    let sandbox = Sandbox::new();
    let config = write_config(
        sandbox.dir.path(),
        "[mail]\naddress = \"ops@example.com\"\n[sms]\naddress = \"5551234@sms.example.com\"\nbatch = true\n",
    );

    let out = stdout_of(
        sandbox
            .cmd()
            .arg("check")
            .arg("--config")
            .arg(&config)
            .arg("--dry-run")
            .arg(&sandbox.checks),
    );

    assert!(out.contains("To: ops@example.com"));
    assert!(out.contains("Subject: PROBLEM diskFull on testhost"));
    assert!(out.contains("disk 97% full"));
    assert!(out.contains("[attachment diskFull.json]"));
    assert!(out.contains("PROBLEMS: diskFull; RECOVERIES: (none) on testhost"));
    assert!(sandbox.state_dir().join("diskFull").is_file());
    assert!(!sandbox.state_dir().join("pingOk").exists());

    // Second run: already reported, nothing to print.
    let again = stdout_of(
        sandbox
            .cmd()
            .arg("check")
            .arg("--config")
            .arg(&config)
            .arg("--dry-run")
            .arg(&sandbox.checks),
    );
    assert!(!again.contains("PROBLEM diskFull"));
}

#[test]
fn status_and_clear_manage_markers() {
    let sandbox = Sandbox::new();
    let empty = stdout_of(sandbox.cmd().arg("status"));
    assert!(empty.contains("no outstanding problems"));

    sandbox
        .cmd()
        .arg("check")
        .arg("--dry-run")
        .arg(&sandbox.checks)
        .assert()
        .success();

    let listed = stdout_of(sandbox.cmd().arg("status"));
    assert!(listed.contains("diskFull"));
    assert!(listed.contains("since"));

    let cleared = stdout_of(sandbox.cmd().args(["clear", "diskFull"]));
    assert!(cleared.contains("cleared diskFull"));

    let again = stdout_of(sandbox.cmd().args(["clear", "diskFull"]));
    assert!(again.contains("no outstanding problem"));
}

#[test]
fn missing_smtp_username_is_fatal_at_startup() {
    let sandbox = Sandbox::new();
    let output = sandbox
        .cmd()
        .env("PAGERUNIT_MAIL_ADDRESS", "ops@example.com")
        .arg("check")
        .arg(&sandbox.checks)
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&output.get_output().stderr).into_owned();
    assert!(stderr.contains("smtp.username"));
    assert!(!sandbox.state_dir().join("diskFull").exists());
}

#[test]
fn missing_smtp_password_is_fatal_at_startup() {
    let sandbox = Sandbox::new();
    let output = sandbox
        .cmd()
        .env("PAGERUNIT_MAIL_ADDRESS", "ops@example.com")
        .env("PAGERUNIT_SMTP_USERNAME", "bot@example.com")
        .arg("check")
        .arg(&sandbox.checks)
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&output.get_output().stderr).into_owned();
    assert!(stderr.contains("PAGERUNIT_SMTP_PASSWORD"));
}

#[test]
fn missing_explicit_config_is_an_error() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .arg("status")
        .arg("--config")
        .arg(sandbox.dir.path().join("absent.toml"))
        .assert()
        .failure();
}
