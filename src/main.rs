//! PagerUnit CLI entry point.
//!
//! Provides `start` (poll forever), `check` (one cycle), `status` (list
//! outstanding problems) and `clear` (drop a problem marker by hand).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};

use pagerunit::check::command::CommandSource;
use pagerunit::check::source::CheckSource;
use pagerunit::config::{load_config, runtime_paths, PagerUnitConfig};
use pagerunit::credentials::load_optional_credentials;
use pagerunit::cycle::Runner;
use pagerunit::delivery::Dispatcher;
use pagerunit::engine::Engine;
use pagerunit::message::{Message, Part};
use pagerunit::state::{MarkerRemove, MarkerStore};
use pagerunit::transport::{MemoryTransport, SmtpTransport, Transport};

/// PagerUnit: health checks that alert like failing unit tests.
#[derive(Parser)]
#[command(name = "pagerunit", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Options shared by every subcommand.
#[derive(Args)]
struct ConfigArgs {
    /// Extra config file layered over /etc/pagerunit.toml and ~/.pagerunit.toml.
    #[arg(long, short)]
    config: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run checks on an interval forever.
    Start {
        #[command(flatten)]
        config: ConfigArgs,
        /// Seconds between cycles (overrides `checks.interval_secs`).
        #[arg(long)]
        interval: Option<u64>,
        /// Directory for JSON log files.
        #[arg(long)]
        logs_dir: Option<PathBuf>,
        /// Check files to run.
        #[arg(required = true)]
        sources: Vec<PathBuf>,
    },
    /// Run every check once and exit.
    Check {
        #[command(flatten)]
        config: ConfigArgs,
        /// Compose messages and print them instead of sending.
        #[arg(long)]
        dry_run: bool,
        /// Check files to run.
        #[arg(required = true)]
        sources: Vec<PathBuf>,
    },
    /// List checks with an outstanding problem.
    Status {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Remove the problem marker for a check.
    Clear {
        #[command(flatten)]
        config: ConfigArgs,
        /// Check name.
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Start {
            config,
            interval,
            logs_dir,
            sources,
        } => handle_start(config.config.as_deref(), interval, logs_dir, &sources).await,
        Command::Check {
            config,
            dry_run,
            sources,
        } => handle_check(config.config.as_deref(), dry_run, &sources).await,
        Command::Status { config } => handle_status(config.config.as_deref()),
        Command::Clear { config, name } => handle_clear(config.config.as_deref(), &name),
    }
}

/// Run cycles forever.
async fn handle_start(
    config_path: Option<&Path>,
    interval: Option<u64>,
    logs_dir: Option<PathBuf>,
    sources: &[PathBuf],
) -> anyhow::Result<()> {
    let logs_dir = match logs_dir {
        Some(dir) => dir,
        None => runtime_paths()?.logs_dir,
    };
    let _logging_guard = pagerunit::logging::init_production(&logs_dir)?;

    let config = load_config(config_path)?;
    let transport = build_transport(&config)?;
    let runner = build_runner(&config, sources, transport)?;

    let interval_secs = interval.unwrap_or(config.checks.interval_secs).max(1);
    info!(
        sources = sources.len(),
        interval_secs,
        state_dir = %config.state.dirname.display(),
        "pagerunit started"
    );

    runner.run_forever(Duration::from_secs(interval_secs)).await;
    Ok(())
}

/// Run a single cycle.
async fn handle_check(
    config_path: Option<&Path>,
    dry_run: bool,
    sources: &[PathBuf],
) -> anyhow::Result<()> {
    pagerunit::logging::init_cli();

    let config = load_config(config_path)?;

    let recorder = Arc::new(MemoryTransport::new());
    let transport: Arc<dyn Transport> = if dry_run {
        Arc::clone(&recorder) as Arc<dyn Transport>
    } else {
        build_transport(&config)?
    };

    let runner = build_runner(&config, sources, transport)?;
    let report = runner.run_once().await;

    if dry_run {
        for message in recorder.messages() {
            println!("{}", format_message(&message));
        }
    }

    anyhow::ensure!(
        report.load_errors == 0 && report.engine_errors == 0,
        "cycle finished with {} source load error(s) and {} state error(s)",
        report.load_errors,
        report.engine_errors
    );
    Ok(())
}

/// Print outstanding problem markers.
fn handle_status(config_path: Option<&Path>) -> anyhow::Result<()> {
    pagerunit::logging::init_cli();

    let config = load_config(config_path)?;
    let store = MarkerStore::open(&config.state.dirname)?;
    let markers = store.list()?;

    if markers.is_empty() {
        println!("no outstanding problems");
        return Ok(());
    }
    for marker in markers {
        let since = marker
            .since
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_owned());
        println!("{}\tsince {since}", marker.name);
    }
    Ok(())
}

/// Remove one problem marker.
fn handle_clear(config_path: Option<&Path>, name: &str) -> anyhow::Result<()> {
    pagerunit::logging::init_cli();

    let config = load_config(config_path)?;
    let store = MarkerStore::open(&config.state.dirname)?;
    match store.remove(name)? {
        MarkerRemove::Removed => println!("cleared {name}"),
        MarkerRemove::NotPresent => println!("{name} has no outstanding problem"),
    }
    Ok(())
}

/// Build the SMTP transport, failing fast on missing credentials.
fn build_transport(config: &PagerUnitConfig) -> anyhow::Result<Arc<dyn Transport>> {
    if !config.needs_transport() {
        debug!("no delivery channel configured");
        return Ok(Arc::new(MemoryTransport::new()));
    }

    let username = config
        .smtp
        .username
        .as_deref()
        .context("smtp.username is required when mail.address or sms.address is set")?;

    let credentials = load_optional_credentials(&runtime_paths()?.env_file)?;
    let password = config
        .smtp
        .resolve_password(&credentials, |key| std::env::var(key).ok())
        .with_context(|| {
            format!(
                "SMTP password missing: set smtp.password or {}",
                config.smtp.password_env
            )
        })?;

    let transport = SmtpTransport::new(&config.smtp.server, config.smtp.port, username, &password)
        .context("failed to configure SMTP transport")?;
    Ok(Arc::new(transport))
}

/// Wire sources, engine and dispatcher together.
fn build_runner(
    config: &PagerUnitConfig,
    sources: &[PathBuf],
    transport: Arc<dyn Transport>,
) -> anyhow::Result<Runner> {
    let store = MarkerStore::open(&config.state.dirname).with_context(|| {
        format!(
            "failed to open state directory {}",
            config.state.dirname.display()
        )
    })?;
    let host = config.host();
    let engine = Engine::new(store, host.clone());

    let dispatcher = Dispatcher::new(config.mail.clone(), config.sms.clone(), host, transport)
        .map_err(|(name, e)| anyhow::anyhow!("invalid template {name}: {e}"))?;

    let sources = sources
        .iter()
        .map(|path| Box::new(CommandSource::new(path)) as Box<dyn CheckSource>)
        .collect();

    Ok(Runner::new(sources, engine, dispatcher))
}

/// Render a composed message for `--dry-run`.
fn format_message(message: &Message) -> String {
    let mut out = format!("To: {}\n", message.to.join(", "));
    if let Some(subject) = &message.subject {
        out.push_str(&format!("Subject: {subject}\n"));
    }
    for part in &message.parts {
        match part {
            Part::Text(text) => out.push_str(&format!("\n{text}\n")),
            Part::Json { filename, value } => {
                out.push_str(&format!("\n[attachment {filename}]\n{value}\n"));
            }
        }
    }
    out
}
