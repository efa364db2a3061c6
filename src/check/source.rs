//! Where checks come from.
//!
//! A source is loaded fresh at the start of every cycle. A source that fails
//! to load is skipped for that cycle; the others still run.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use super::{Check, FnCheck};

/// Error type for loading a check source.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The source file could not be read.
    #[error("failed to read check source {path}: {source}")]
    Io {
        /// Path of the source.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The source file is not valid check TOML.
    #[error("failed to parse check source {path}: {source}")]
    Parse {
        /// Path of the source.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
}

/// A provider of checks.
pub trait CheckSource: Send + Sync {
    /// Identifier used in logs (usually a path).
    fn id(&self) -> &str;

    /// Produce the qualifying checks defined by this source, in order.
    ///
    /// Must not run any check.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`] if the source cannot be loaded.
    fn load(&self) -> Result<Vec<Arc<dyn Check>>, LoadError>;
}

/// Checks registered in code at startup.
pub struct StaticSource {
    id: String,
    checks: Vec<Arc<dyn Check>>,
}

impl StaticSource {
    /// Create an empty source.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            checks: Vec::new(),
        }
    }

    /// Register any check.
    #[must_use]
    pub fn with_check(mut self, check: Arc<dyn Check>) -> Self {
        self.checks.push(check);
        self
    }

    /// Register a function as a check.
    #[must_use]
    pub fn with_fn<F>(self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn() -> super::CheckOutcome + Send + Sync + 'static,
    {
        self.with_check(Arc::new(FnCheck::new(name, func)))
    }
}

impl CheckSource for StaticSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn load(&self) -> Result<Vec<Arc<dyn Check>>, LoadError> {
        Ok(self.checks.clone())
    }
}
