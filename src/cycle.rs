//! Polling cycles: load sources, run every check, deliver.
//!
//! Checks run one at a time in load order; batched delivery happens once,
//! after the last check. Cycles never overlap.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::check::registry::CheckRegistry;
use crate::check::source::CheckSource;
use crate::delivery::{DeliveryReport, Dispatcher};
use crate::engine::Engine;
use crate::result::CheckResult;

/// Summary of one cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Checks that were run.
    pub checks_run: usize,
    /// Problems and recoveries, in production order.
    pub results: Vec<CheckResult>,
    /// Sources that failed to load.
    pub load_errors: usize,
    /// Checks skipped because their name was already registered.
    pub duplicates: usize,
    /// Checks whose marker could not be updated.
    pub engine_errors: usize,
    /// Immediate and batch delivery totals.
    pub delivery: DeliveryReport,
}

/// Drives cycles over a fixed set of sources.
pub struct Runner {
    sources: Vec<Box<dyn CheckSource>>,
    engine: Engine,
    dispatcher: Dispatcher,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("sources", &self.sources.iter().map(|s| s.id()).collect::<Vec<_>>())
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl Runner {
    /// Create a runner.
    pub fn new(sources: Vec<Box<dyn CheckSource>>, engine: Engine, dispatcher: Dispatcher) -> Self {
        Self {
            sources,
            engine,
            dispatcher,
        }
    }

    /// Load every source into a fresh registry.
    ///
    /// A source that fails to load is skipped; a check whose name is already
    /// registered is rejected.
    fn discover(&self, report: &mut CycleReport) -> CheckRegistry {
        let mut registry = CheckRegistry::new();
        for source in &self.sources {
            let checks = match source.load() {
                Ok(checks) => checks,
                Err(e) => {
                    error!(source = %source.id(), error = %e, "failed to load check source");
                    report.load_errors = report.load_errors.saturating_add(1);
                    continue;
                }
            };
            debug!(source = %source.id(), count = checks.len(), "loaded check source");
            for check in checks {
                if let Err(e) = registry.register(check) {
                    warn!(source = %source.id(), error = %e, "rejecting check");
                    report.duplicates = report.duplicates.saturating_add(1);
                }
            }
        }
        registry
    }

    /// Run one full cycle.
    pub async fn run_once(&self) -> CycleReport {
        let mut report = CycleReport::default();
        let registry = self.discover(&mut report);

        for check in registry.iter() {
            report.checks_run = report.checks_run.saturating_add(1);
            match self.engine.run(check.as_ref()).await {
                Ok(Some(result)) => {
                    let delivered = self.dispatcher.deliver_immediate(&result).await;
                    report.delivery.merge(delivered);
                    report.results.push(result);
                }
                Ok(None) => {}
                Err(e) => {
                    error!(check = %check.name(), error = %e, "failed to record check state");
                    report.engine_errors = report.engine_errors.saturating_add(1);
                }
            }
        }

        let delivered = self.dispatcher.deliver_batch(&report.results).await;
        report.delivery.merge(delivered);

        info!(
            checks = report.checks_run,
            results = report.results.len(),
            load_errors = report.load_errors,
            engine_errors = report.engine_errors,
            sent = report.delivery.sent,
            failed = report.delivery.failed,
            "cycle complete"
        );
        report
    }

    /// Run cycles forever, sleeping `interval` between them.
    ///
    /// Only stopping the process ends the loop.
    pub async fn run_forever(&self, interval: Duration) {
        loop {
            self.run_once().await;
            tokio::time::sleep(interval).await;
        }
    }
}
