//! Shell-command checks defined in TOML files.
//!
//! ```toml
//! [[check]]
//! name = "disk_free"
//! description = "Root filesystem has at least 10% free."
//! run = "test $(df --output=pcent / | tail -1 | tr -dc 0-9) -lt 90"
//! timeout_secs = 10
//! ```
//!
//! Exit status 0 passes. A non-zero exit is an assertion failure whose
//! message is the command's stderr (or stdout). Spawn failures and timeouts
//! are runtime errors.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use super::source::{CheckSource, LoadError};
use super::{disabled, silent, Check, CheckFailure, CheckOutcome};
use crate::state::is_valid_marker_name;

/// Upper bound for a command check timeout.
const MAX_TIMEOUT_SECS: u64 = 3600;

/// Top-level layout of a check file.
#[derive(Debug, Deserialize)]
struct CheckFile {
    #[serde(default, rename = "check")]
    checks: Vec<CheckEntry>,
}

/// One `[[check]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckEntry {
    /// Check name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Shell command to run with `sh -c`.
    #[serde(default)]
    pub run: String,
    /// Seconds before the command is killed.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Skip the command and report success.
    #[serde(default)]
    pub disabled: bool,
    /// Ignore non-zero exits; spawn errors and timeouts still fail.
    #[serde(default)]
    pub silent: bool,
}

fn default_timeout_secs() -> u64 {
    30
}

/// A check file on disk, re-read every cycle.
#[derive(Debug, Clone)]
pub struct CommandSource {
    id: String,
    path: PathBuf,
}

impl CommandSource {
    /// Create a source for the TOML file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            id: path.display().to_string(),
            path,
        }
    }

    /// Path of the check file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckSource for CommandSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn load(&self) -> Result<Vec<Arc<dyn Check>>, LoadError> {
        let contents = std::fs::read_to_string(&self.path).map_err(|source| LoadError::Io {
            path: self.path.clone(),
            source,
        })?;
        parse_checks(&contents, &self.path)
    }
}

/// Parse check file contents into qualifying checks.
///
/// Entries with an unusable name or an empty command are skipped.
///
/// # Errors
///
/// Returns [`LoadError::Parse`] if the contents are not valid check TOML.
pub fn parse_checks(contents: &str, path: &Path) -> Result<Vec<Arc<dyn Check>>, LoadError> {
    let file: CheckFile = toml::from_str(contents).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let mut checks = Vec::with_capacity(file.checks.len());
    for entry in file.checks {
        if !is_valid_marker_name(&entry.name) {
            warn!(source = %path.display(), name = %entry.name, "skipping check with invalid name");
            continue;
        }
        if entry.run.trim().is_empty() {
            warn!(source = %path.display(), check = %entry.name, "skipping check without a command");
            continue;
        }

        let wrap_disabled = entry.disabled;
        let wrap_silent = entry.silent;
        let mut check: Arc<dyn Check> = Arc::new(CommandCheck::from_entry(entry));
        if wrap_silent {
            check = silent(check);
        }
        if wrap_disabled {
            check = disabled(check);
        }
        checks.push(check);
    }

    Ok(checks)
}

/// A check that runs a shell command.
#[derive(Debug, Clone)]
pub struct CommandCheck {
    name: String,
    description: Option<String>,
    run: String,
    timeout: Duration,
}

impl CommandCheck {
    /// Create a command check with the default timeout.
    pub fn new(name: impl Into<String>, run: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            run: run.into(),
            timeout: Duration::from_secs(default_timeout_secs()),
        }
    }

    fn from_entry(entry: CheckEntry) -> Self {
        Self {
            name: entry.name,
            description: entry.description,
            run: entry.run,
            timeout: Duration::from_secs(entry.timeout_secs.clamp(1, MAX_TIMEOUT_SECS)),
        }
    }

    /// Override the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Check for CommandCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    async fn run(&self) -> CheckOutcome {
        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.run)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CheckFailure::error_at(format!("failed to spawn: {e}"), &self.run))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(CheckFailure::error_at(
                    format!("failed to wait for command: {e}"),
                    &self.run,
                ))
            }
            Err(_) => {
                return Err(CheckFailure::error_at(
                    format!("timed out after {}s", self.timeout.as_secs()),
                    &self.run,
                ))
            }
        };

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let message = if !stderr.trim().is_empty() {
            stderr.trim().to_owned()
        } else if !stdout.trim().is_empty() {
            stdout.trim().to_owned()
        } else {
            match output.status.code() {
                Some(code) => format!("exit status {code}"),
                None => "terminated by signal".to_owned(),
            }
        };

        Err(CheckFailure::assertion_at(message, &self.run))
    }
}
