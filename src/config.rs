//! Configuration loading and validation.
//!
//! Configuration is layered: `/etc/pagerunit.toml`, then `~/.pagerunit.toml`,
//! then an explicit `--config` file. Later files override earlier ones key by
//! key, and environment variables override all files. Every section uses
//! `#[serde(default)]`, so an empty (or absent) file is valid.
//!
//! Precedence: env vars > explicit file > user file > system file > defaults.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::credentials::Credentials;

/// Fully qualified name of this machine.
///
/// Resolves the system host name to its addresses and reverse-resolves each
/// one, then picks a name with [`pick_fqdn`]. Falls back to the short name
/// when resolution fails, and to `localhost` when there is no name at all.
pub fn local_fqdn() -> String {
    let Some(name) = hostname::get().ok().and_then(|h| h.into_string().ok()) else {
        return "localhost".to_owned();
    };

    let candidates: Vec<String> = match dns_lookup::lookup_host(&name) {
        Ok(addrs) => addrs
            .iter()
            .filter_map(|addr| dns_lookup::lookup_addr(addr).ok())
            .collect(),
        Err(e) => {
            debug!(host = %name, error = %e, "host name did not resolve");
            Vec::new()
        }
    };
    pick_fqdn(&name, &candidates)
}

/// Choose the reported name among reverse-lookup `candidates` for `name`.
///
/// The first dotted name wins, then the first name, then `name` itself.
/// Numeric addresses are never names.
pub fn pick_fqdn(name: &str, candidates: &[String]) -> String {
    let names: Vec<&String> = candidates
        .iter()
        .filter(|c| !c.is_empty() && c.parse::<std::net::IpAddr>().is_err())
        .collect();
    names
        .iter()
        .find(|c| c.contains('.'))
        .or_else(|| names.first())
        .map_or_else(|| name.to_owned(), |c| (*c).clone())
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PagerUnitConfig {
    /// Primary (mail) channel.
    pub mail: MailConfig,
    /// Secondary (SMS-via-email-gateway) channel.
    pub sms: SmsConfig,
    /// SMTP relay used by both channels.
    pub smtp: SmtpConfig,
    /// Problem marker storage.
    pub state: StateConfig,
    /// Polling settings.
    pub checks: ChecksConfig,
}

/// Primary channel: rich mail with JSON attachments.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// Comma-separated recipients. Absent disables the channel.
    pub address: Option<String>,
    /// Send one combined message per cycle instead of one per result.
    pub batch: bool,
    /// Send the batch even when the cycle produced no results.
    pub heartbeat: bool,
    /// Subject for a problem.
    pub problem_subject: String,
    /// Body for a problem.
    pub problem_body: String,
    /// Subject for a recovery.
    pub recovery_subject: String,
    /// Body for a recovery.
    pub recovery_body: String,
    /// Subject for a batch.
    pub batch_subject: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            address: None,
            batch: false,
            heartbeat: false,
            problem_subject: "PROBLEM {name} on {fqdn}".to_owned(),
            problem_body: "{exc}\n\n\t{line}\n\n{doc}".to_owned(),
            recovery_subject: "RECOVERY {name} on {fqdn}".to_owned(),
            recovery_body: "{doc}".to_owned(),
            batch_subject: "{problems} PROBLEMS, {recoveries} RECOVERIES on {fqdn}".to_owned(),
        }
    }
}

/// Secondary channel: short plain-text messages for SMS gateways.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SmsConfig {
    /// Comma-separated recipients. Absent disables the channel.
    pub address: Option<String>,
    /// Send one combined message per cycle instead of one per result.
    pub batch: bool,
    /// Body for a problem.
    pub problem_body: String,
    /// Body for a recovery.
    pub recovery_body: String,
    /// Body for a batch.
    pub batch_body: String,
    /// Optional subject for a batch; SMS messages carry no subject by default.
    pub batch_subject: Option<String>,
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            address: None,
            batch: false,
            problem_body: "PROBLEM {name} on {fqdn}".to_owned(),
            recovery_body: "RECOVERY {name} on {fqdn}".to_owned(),
            batch_body: "PROBLEMS: {problems}; RECOVERIES: {recoveries} on {fqdn}".to_owned(),
            batch_subject: None,
        }
    }
}

/// SMTP relay settings.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    /// Relay host name.
    pub server: String,
    /// Relay port (STARTTLS).
    pub port: u16,
    /// Login user; also the `From` address.
    pub username: Option<String>,
    /// Inline password. Prefer `password_env`.
    pub password: Option<String>,
    /// Credential key or environment variable holding the password.
    pub password_env: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            server: "smtp.gmail.com".to_owned(),
            port: 587,
            username: None,
            password: None,
            password_env: "PAGERUNIT_SMTP_PASSWORD".to_owned(),
        }
    }
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "__REDACTED__"))
            .field("password_env", &self.password_env)
            .finish()
    }
}

impl SmtpConfig {
    /// Resolve the SMTP password.
    ///
    /// Order: inline `password`, then `credentials[password_env]`, then the
    /// process environment variable named by `password_env`.
    pub fn resolve_password(
        &self,
        credentials: &Credentials,
        env: impl Fn(&str) -> Option<String>,
    ) -> Option<String> {
        self.password
            .clone()
            .or_else(|| credentials.get(&self.password_env).map(str::to_owned))
            .or_else(|| env(&self.password_env))
            .filter(|p| !p.is_empty())
    }
}

/// Where problem markers live.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Marker directory.
    pub dirname: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dirname: PathBuf::from("/var/run/pagerunit"),
        }
    }
}

/// Polling settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChecksConfig {
    /// Seconds to sleep between cycles.
    pub interval_secs: u64,
    /// Host name reported in alerts; defaults to the system host name.
    pub host: Option<String>,
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            host: None,
        }
    }
}

/// Resolved filesystem locations.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    /// System-wide config file (`/etc/pagerunit.toml`).
    pub system_config: PathBuf,
    /// Per-user config file (`~/.pagerunit.toml`).
    pub user_config: PathBuf,
    /// Credentials file (`~/.pagerunit.env`).
    pub env_file: PathBuf,
    /// Log directory for the daemon (`~/.pagerunit/logs`).
    pub logs_dir: PathBuf,
}

/// Resolve runtime paths relative to the home directory.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn runtime_paths() -> anyhow::Result<RuntimePaths> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?
        .home_dir()
        .to_path_buf();
    Ok(RuntimePaths {
        system_config: PathBuf::from("/etc/pagerunit.toml"),
        user_config: home.join(".pagerunit.toml"),
        env_file: home.join(".pagerunit.env"),
        logs_dir: home.join(".pagerunit").join("logs"),
    })
}

impl PagerUnitConfig {
    /// Parse a single TOML document (no layering, no env overrides).
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Whether any delivery channel is enabled.
    pub fn needs_transport(&self) -> bool {
        self.mail.address.is_some() || self.sms.address.is_some()
    }

    /// Host name for results: the configured override or the local FQDN.
    pub fn host(&self) -> String {
        self.checks.host.clone().unwrap_or_else(local_fqdn)
    }

    /// Apply environment variable overrides.
    ///
    /// Takes a resolver function so tests need not touch the process env.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("PAGERUNIT_STATE_DIR") {
            self.state.dirname = PathBuf::from(v);
        }
        if let Some(v) = env("PAGERUNIT_SMTP_SERVER") {
            self.smtp.server = v;
        }
        if let Some(v) = env("PAGERUNIT_SMTP_PORT") {
            match v.parse() {
                Ok(port) => self.smtp.port = port,
                Err(_) => warn!(
                    var = "PAGERUNIT_SMTP_PORT",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("PAGERUNIT_SMTP_USERNAME") {
            self.smtp.username = Some(v);
        }
        if let Some(v) = env("PAGERUNIT_MAIL_ADDRESS") {
            self.mail.address = Some(v);
        }
        if let Some(v) = env("PAGERUNIT_SMS_ADDRESS") {
            self.sms.address = Some(v);
        }
        if let Some(v) = env("PAGERUNIT_HOST") {
            self.checks.host = Some(v);
        }
    }

    /// Validate that configuration values are within sane bounds.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.checks.interval_secs >= 1, "interval_secs must be >= 1");
        anyhow::ensure!(self.smtp.port != 0, "smtp.port must be non-zero");
        anyhow::ensure!(
            !self.state.dirname.as_os_str().is_empty(),
            "state.dirname must not be empty"
        );
        for (section, address) in [("mail", &self.mail.address), ("sms", &self.sms.address)] {
            if let Some(address) = address {
                anyhow::ensure!(
                    address.split(',').any(|a| !a.trim().is_empty()),
                    "{section}.address must list at least one recipient"
                );
            }
        }
        Ok(())
    }
}

/// Load configuration from the standard locations plus an optional explicit
/// file, apply environment overrides, and validate.
///
/// # Errors
///
/// Returns an error if the explicit file is missing, any file fails to
/// parse, or validation fails.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<PagerUnitConfig> {
    let paths = runtime_paths()?;
    let mut files = vec![paths.system_config, paths.user_config];
    if let Some(path) = explicit {
        anyhow::ensure!(path.exists(), "config file not found: {}", path.display());
        files.push(path.to_path_buf());
    }

    let mut config = load_layered(&files)?;
    config.apply_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Merge the given TOML files in order. Missing files are skipped.
///
/// # Errors
///
/// Returns an error if an existing file cannot be read or parsed.
pub fn load_layered(files: &[PathBuf]) -> anyhow::Result<PagerUnitConfig> {
    let mut merged = toml::Table::new();
    for path in files {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "config file not present, skipping");
                continue;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        let table: toml::Table = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        debug!(path = %path.display(), "loaded config file");
        merge_tables(&mut merged, table);
    }

    toml::Value::Table(merged)
        .try_into()
        .context("invalid configuration")
}

/// Recursively overlay `overlay` onto `base`.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
