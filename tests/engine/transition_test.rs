//! Coverage for the per-check state machine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tempfile::TempDir;

use pagerunit::check::{Check, CheckFailure, FnCheck};
use pagerunit::engine::Engine;
use pagerunit::result::{Outcome, NO_EXPLANATION};
use pagerunit::state::MarkerStore;

const HOST: &str = "web1.example.com";

fn engine() -> (TempDir, Engine) {
    let dir = TempDir::new().expect("temp dir");
    let store = MarkerStore::open(dir.path()).expect("store should open");
    (dir, Engine::new(store, HOST))
}

fn always_failing() -> FnCheck {
    FnCheck::new("diskFull", || Err(CheckFailure::assertion("disk 97% full")))
        .with_description("Root filesystem has space.")
}

/// A check whose outcome is flipped from the test.
fn toggled(name: &str, healthy: Arc<AtomicBool>) -> FnCheck {
    FnCheck::new(name, move || {
        if healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CheckFailure::assertion("down"))
        }
    })
}

#[tokio::test]
async fn always_failing_check_alerts_once() {
    let (_dir, engine) = engine();
    let check = always_failing();

    let first = engine.run(&check).await.expect("first run");
    let problem = match first {
        Some(result) => result,
        None => panic!("first failure should produce a problem"),
    };
    assert_eq!(problem.outcome, Outcome::Problem);
    assert_eq!(problem.name, "diskFull");
    assert_eq!(problem.fqdn, HOST);
    assert_eq!(problem.exc.as_deref(), Some("disk 97% full"));
    assert!(problem
        .line
        .as_deref()
        .is_some_and(|line| line.contains("transition_test.rs")));
    assert_eq!(problem.doc, "Root filesystem has space.\n");
    assert!(matches!(engine.store().exists("diskFull"), Ok(true)));

    for _ in 0..3 {
        let repeat = engine.run(&check).await.expect("repeat run");
        assert!(repeat.is_none());
        assert!(matches!(engine.store().exists("diskFull"), Ok(true)));
    }
}

#[tokio::test]
async fn fail_then_pass_recovers_once() {
    let (_dir, engine) = engine();
    let healthy = Arc::new(AtomicBool::new(false));
    let check = toggled("pingOk", Arc::clone(&healthy));

    let problem = engine.run(&check).await.expect("failing run");
    assert!(problem.is_some_and(|r| r.is_problem()));

    healthy.store(true, Ordering::SeqCst);
    let recovery = match engine.run(&check).await.expect("passing run") {
        Some(result) => result,
        None => panic!("pass after problem should recover"),
    };
    assert_eq!(recovery.outcome, Outcome::Recovery);
    assert!(recovery.exc.is_none());
    assert!(recovery.line.is_none());
    assert!(matches!(engine.store().exists("pingOk"), Ok(false)));

    let steady = engine.run(&check).await.expect("steady run");
    assert!(steady.is_none());
}

#[tokio::test]
async fn always_passing_check_is_silent() {
    let (_dir, engine) = engine();
    let check = FnCheck::new("pingOk", || Ok(()));

    for _ in 0..3 {
        assert!(engine.run(&check).await.expect("run").is_none());
    }
    assert!(engine.store().list().expect("list").is_empty());
}

#[test]
fn problem_transition_is_idempotent() {
    let (_dir, engine) = engine();
    let check = always_failing();
    let failure = CheckFailure::assertion("disk 97% full");

    let first = engine.problem(&check, &failure).expect("first problem");
    assert!(first.is_some());
    let second = engine.problem(&check, &failure).expect("second problem");
    assert!(second.is_none());
}

#[test]
fn recovery_without_marker_is_a_no_op() {
    let (_dir, engine) = engine();
    let check = always_failing();
    assert!(matches!(engine.recovery(&check), Ok(None)));
}

#[tokio::test]
async fn empty_message_gets_placeholder() {
    let (_dir, engine) = engine();
    let check = FnCheck::new("mute", || Err(CheckFailure::error("")));

    let result = engine.run(&check).await.expect("run");
    let exc = result.and_then(|r| r.exc);
    assert_eq!(exc.as_deref(), Some(NO_EXPLANATION));
}

#[tokio::test]
async fn runtime_errors_classify_as_problems() {
    let (_dir, engine) = engine();
    let check = FnCheck::new("explodes", || panic!("bad state"));

    let result = engine.run(&check).await.expect("run");
    assert!(result.is_some_and(|r| r.outcome == Outcome::Problem));
}

#[tokio::test]
async fn description_whitespace_is_normalised() {
    let (_dir, engine) = engine();
    let check = FnCheck::new("diskFull", || Err(CheckFailure::assertion("full")))
        .with_description("\n\tRoot filesystem\r\n\t  has space.\t \r\n");

    let result = engine.run(&check).await.expect("run");
    let doc = result.map(|r| r.doc);
    assert_eq!(doc.as_deref(), Some("Root filesystem\nhas space.\n"));
}

#[tokio::test]
async fn invalid_name_is_an_engine_error() {
    let (_dir, engine) = engine();
    let check = FnCheck::new("../escape", || Err(CheckFailure::assertion("x")));
    assert!(engine.run(&check).await.is_err());
    assert_eq!(check.name(), "../escape");
}
