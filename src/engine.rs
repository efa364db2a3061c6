//! Per-check state machine.
//!
//! | prior marker | outcome | result   | marker after |
//! |--------------|---------|----------|--------------|
//! | absent       | pass    | none     | absent       |
//! | absent       | fail    | problem  | created      |
//! | present      | pass    | recovery | removed      |
//! | present      | fail    | none     | present      |
//!
//! The marker operation itself decides the transition: a create that finds
//! the marker already present suppresses the alert, and a remove that finds
//! nothing reports a steady pass.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::check::{Check, CheckFailure};
use crate::result::CheckResult;
use crate::state::{MarkerCreate, MarkerRemove, MarkerStore, StateError};
use crate::template::strip_description;

/// Error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The marker for this check could not be read or written.
    #[error("state error for check '{check}': {source}")]
    State {
        /// Check name.
        check: String,
        /// Underlying marker error.
        #[source]
        source: StateError,
    },
}

/// Runs checks and records their state transitions.
#[derive(Debug, Clone)]
pub struct Engine {
    store: MarkerStore,
    host: String,
}

impl Engine {
    /// Create an engine writing markers to `store` and reporting `host`.
    pub fn new(store: MarkerStore, host: impl Into<String>) -> Self {
        Self {
            store,
            host: host.into(),
        }
    }

    /// Host name stamped on every result.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Marker store used by this engine.
    pub fn store(&self) -> &MarkerStore {
        &self.store
    }

    /// Run `check` once and apply the resulting transition.
    ///
    /// Returns the result to deliver, or `None` for steady and suppressed
    /// checks.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be updated.
    pub async fn run(&self, check: &dyn Check) -> Result<Option<CheckResult>, EngineError> {
        match check.run().await {
            Ok(()) => self.recovery(check),
            Err(failure) => self.problem(check, &failure),
        }
    }

    /// Record a failure. Produces a result only on the first failure.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be created for any reason other
    /// than it already existing or storage being exhausted.
    pub fn problem(
        &self,
        check: &dyn Check,
        failure: &CheckFailure,
    ) -> Result<Option<CheckResult>, EngineError> {
        let name = check.name();
        let marker = self.store.create(name).map_err(|source| EngineError::State {
            check: name.to_owned(),
            source,
        })?;
        Ok(self.problem_for(check, failure, marker))
    }

    /// Decide what a failure produces given the marker create outcome.
    fn problem_for(
        &self,
        check: &dyn Check,
        failure: &CheckFailure,
        marker: MarkerCreate,
    ) -> Option<CheckResult> {
        let name = check.name();
        match marker {
            MarkerCreate::AlreadyExists => {
                debug!(check = %name, "problem already reported, suppressing");
                return None;
            }
            MarkerCreate::StorageExhausted => {
                warn!(check = %name, "no space left for problem marker, alerting anyway");
            }
            MarkerCreate::Created => {}
        }

        info!(
            check = %name,
            kind = ?failure.kind,
            "check has a problem"
        );
        Some(CheckResult::problem(
            name,
            &self.host,
            &failure.message,
            &failure.location,
            strip_description(check.description()),
        ))
    }

    /// Record a pass. Produces a result only if a problem was outstanding.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be removed for any reason other
    /// than it being absent.
    pub fn recovery(&self, check: &dyn Check) -> Result<Option<CheckResult>, EngineError> {
        let name = check.name();
        match self.store.remove(name).map_err(|source| EngineError::State {
            check: name.to_owned(),
            source,
        })? {
            MarkerRemove::NotPresent => {
                debug!(check = %name, "check passed");
                Ok(None)
            }
            MarkerRemove::Removed => {
                info!(check = %name, "check recovered");
                Ok(Some(CheckResult::recovery(
                    name,
                    &self.host,
                    strip_description(check.description()),
                )))
            }
        }
    }
}
