//! End-to-end cycles over in-memory sources and transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use pagerunit::check::command::CommandSource;
use pagerunit::check::source::{CheckSource, StaticSource};
use pagerunit::check::CheckFailure;
use pagerunit::config::{MailConfig, SmsConfig};
use pagerunit::cycle::Runner;
use pagerunit::delivery::Dispatcher;
use pagerunit::engine::Engine;
use pagerunit::result::{CheckResult, Outcome};
use pagerunit::state::MarkerStore;
use pagerunit::transport::{MemoryTransport, Transport};

const HOST: &str = "web1.example.com";

struct Harness {
    _dir: TempDir,
    store: MarkerStore,
    transport: Arc<MemoryTransport>,
    runner: Runner,
}

fn harness(sources: Vec<Box<dyn CheckSource>>, mail: MailConfig, sms: SmsConfig) -> Harness {
    let dir = TempDir::new().expect("temp dir");
    let store = MarkerStore::open(dir.path().join("state")).expect("store should open");
    let transport = Arc::new(MemoryTransport::new());
    let dispatcher = Dispatcher::new(
        mail,
        sms,
        HOST,
        Arc::clone(&transport) as Arc<dyn Transport>,
    )
    .expect("templates should validate");
    let runner = Runner::new(sources, Engine::new(store.clone(), HOST), dispatcher);
    Harness {
        _dir: dir,
        store,
        transport,
        runner,
    }
}

fn batched_channels() -> (MailConfig, SmsConfig) {
    (
        MailConfig {
            address: Some("ops@example.com".to_owned()),
            batch: true,
            ..MailConfig::default()
        },
        SmsConfig {
            address: Some("5551234@sms.example.com".to_owned()),
            batch: true,
            ..SmsConfig::default()
        },
    )
}

fn disk_and_ping() -> Box<dyn CheckSource> {
    Box::new(
        StaticSource::new("builtin")
            .with_fn("diskFull", || Err(CheckFailure::assertion("disk 97% full")))
            .with_fn("pingOk", || Ok(())),
    )
}

#[tokio::test]
async fn failing_and_passing_check_batch_on_both_channels() {
    let (mail, sms) = batched_channels();
    let h = harness(vec![disk_and_ping()], mail, sms);

    let report = h.runner.run_once().await;
    assert_eq!(report.checks_run, 2);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.delivery.sent, 2);

    let messages = h.transport.messages();
    assert_eq!(messages.len(), 2);

    let mail = &messages[0];
    let subject = mail.subject.as_deref().unwrap_or_default();
    assert!(subject.contains("1 PROBLEMS, 0 RECOVERIES"));
    assert_eq!(subject, format!("1 PROBLEMS, 0 RECOVERIES on {HOST}"));
    assert_eq!(mail.texts().len(), 1);

    let attachments = mail.attachments();
    assert_eq!(attachments.len(), 1);
    let entries: Vec<CheckResult> =
        serde_json::from_value(attachments[0].1.clone()).expect("attachment should decode");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "diskFull");
    assert_eq!(entries[0].outcome, Outcome::Problem);

    let sms = &messages[1];
    assert_eq!(
        sms.texts(),
        vec![format!("PROBLEMS: diskFull; RECOVERIES: (none) on {HOST}").as_str()]
    );

    assert!(matches!(h.store.exists("diskFull"), Ok(true)));
    assert!(matches!(h.store.exists("pingOk"), Ok(false)));
}

#[tokio::test]
async fn repeated_failure_is_suppressed_across_cycles() {
    let (mail, sms) = batched_channels();
    let h = harness(vec![disk_and_ping()], mail, sms);

    h.runner.run_once().await;
    let second = h.runner.run_once().await;

    assert!(second.results.is_empty());
    assert_eq!(second.delivery.sent, 0);
    assert_eq!(h.transport.messages().len(), 2);
}

#[tokio::test]
async fn recovery_is_reported_in_a_later_cycle() {
    let healthy = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&healthy);
    let source = StaticSource::new("builtin").with_fn("pingOk", move || {
        if flag.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CheckFailure::assertion("no reply"))
        }
    });
    let mail = MailConfig {
        address: Some("ops@example.com".to_owned()),
        ..MailConfig::default()
    };
    let source: Box<dyn CheckSource> = Box::new(source);
    let h = harness(vec![source], mail, SmsConfig::default());

    let first = h.runner.run_once().await;
    assert_eq!(first.results.len(), 1);

    healthy.store(true, Ordering::SeqCst);
    let second = h.runner.run_once().await;
    assert_eq!(second.results.len(), 1);
    assert_eq!(second.results[0].outcome, Outcome::Recovery);

    let subjects: Vec<Option<String>> = h
        .transport
        .messages()
        .into_iter()
        .map(|m| m.subject)
        .collect();
    assert_eq!(
        subjects,
        vec![
            Some(format!("PROBLEM pingOk on {HOST}")),
            Some(format!("RECOVERY pingOk on {HOST}")),
        ]
    );
}

#[tokio::test]
async fn broken_source_does_not_stop_the_others() {
    let dir = TempDir::new().expect("temp dir");
    let missing: Box<dyn CheckSource> = Box::new(CommandSource::new(dir.path().join("gone.toml")));
    let (mail, sms) = batched_channels();
    let h = harness(vec![missing, disk_and_ping()], mail, sms);

    let report = h.runner.run_once().await;
    assert_eq!(report.load_errors, 1);
    assert_eq!(report.checks_run, 2);
    assert_eq!(report.results.len(), 1);
}

#[tokio::test]
async fn duplicate_names_across_sources_keep_the_first() {
    let shadow: Box<dyn CheckSource> = Box::new(
        StaticSource::new("shadow").with_fn("pingOk", || Err(CheckFailure::assertion("shadow"))),
    );
    let (mail, sms) = batched_channels();
    let h = harness(vec![disk_and_ping(), shadow], mail, sms);

    let report = h.runner.run_once().await;
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.checks_run, 2);
    let names: Vec<&str> = report.results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["diskFull"]);
}

#[tokio::test]
async fn command_checks_run_end_to_end() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("checks.toml");
    std::fs::write(
        &path,
        r#"
[[check]]
name = "diskFull"
description = "Root filesystem has space."
run = "echo 'disk 97% full' >&2; exit 1"

[[check]]
name = "pingOk"
run = "true"
"#,
    )
    .expect("write checks");

    let (mail, sms) = batched_channels();
    let source: Box<dyn CheckSource> = Box::new(CommandSource::new(&path));
    let h = harness(vec![source], mail, sms);

    let report = h.runner.run_once().await;
    assert_eq!(report.results.len(), 1);
    let result = &report.results[0];
    assert_eq!(result.exc.as_deref(), Some("disk 97% full"));
    assert_eq!(result.doc, "Root filesystem has space.\n");
}

#[tokio::test(start_paused = true)]
async fn run_forever_repeats_on_the_interval() {
    let mail = MailConfig {
        address: Some("ops@example.com".to_owned()),
        batch: true,
        heartbeat: true,
        ..MailConfig::default()
    };
    let source: Box<dyn CheckSource> = Box::new(StaticSource::new("empty"));
    let h = harness(vec![source], mail, SmsConfig::default());

    let looping = tokio::time::timeout(
        Duration::from_secs(25),
        h.runner.run_forever(Duration::from_secs(10)),
    )
    .await;

    assert!(looping.is_err(), "loop only ends when cancelled");
    assert_eq!(h.transport.messages().len(), 3);
}
