//! Normalised records emitted when a check changes state.

use serde::{Deserialize, Serialize};

use crate::template::Fields;

/// Placeholder used when a failure carries no message.
pub const NO_EXPLANATION: &str = "(no explanation)";

/// Which transition a [`CheckResult`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The check started failing.
    Problem,
    /// The check passed again after a reported problem.
    Recovery,
}

impl Outcome {
    /// Lowercase name used in templates and JSON.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Problem => "problem",
            Self::Recovery => "recovery",
        }
    }
}

/// One problem or recovery, produced at most once per check per cycle.
///
/// Serialises to the JSON attachment sent alongside human-readable mail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Check name.
    pub name: String,
    /// Host the check ran on.
    pub fqdn: String,
    /// Transition kind.
    pub outcome: Outcome,
    /// Failure explanation (problems only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exc: Option<String>,
    /// Source text at the point of failure (problems only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<String>,
    /// Normalised check description.
    pub doc: String,
}

impl CheckResult {
    /// Build a problem result. An empty message becomes [`NO_EXPLANATION`].
    pub fn problem(name: &str, fqdn: &str, message: &str, line: &str, doc: String) -> Self {
        let exc = if message.is_empty() {
            NO_EXPLANATION.to_owned()
        } else {
            message.to_owned()
        };
        Self {
            name: name.to_owned(),
            fqdn: fqdn.to_owned(),
            outcome: Outcome::Problem,
            exc: Some(exc),
            line: Some(line.to_owned()),
            doc,
        }
    }

    /// Build a recovery result.
    pub fn recovery(name: &str, fqdn: &str, doc: String) -> Self {
        Self {
            name: name.to_owned(),
            fqdn: fqdn.to_owned(),
            outcome: Outcome::Recovery,
            exc: None,
            line: None,
            doc,
        }
    }

    /// Whether this result reports a problem.
    pub fn is_problem(&self) -> bool {
        self.outcome == Outcome::Problem
    }

    /// Template fields for this result.
    ///
    /// `exc` and `line` are only present for problems, so a recovery
    /// template referencing them fails to render.
    pub fn fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("name", self.name.clone());
        fields.insert("fqdn", self.fqdn.clone());
        fields.insert("doc", self.doc.clone());
        fields.insert("outcome", self.outcome.as_str().to_owned());
        if let Some(exc) = &self.exc {
            fields.insert("exc", exc.clone());
        }
        if let Some(line) = &self.line {
            fields.insert("line", line.clone());
        }
        fields
    }
}

/// Problem and recovery tallies for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Names of problem results, in production order.
    pub problems: Vec<String>,
    /// Names of recovery results, in production order.
    pub recoveries: Vec<String>,
}

impl BatchSummary {
    /// Split a batch into problem and recovery names.
    pub fn from_results(results: &[CheckResult]) -> Self {
        let (problems, recoveries): (Vec<_>, Vec<_>) =
            results.iter().partition(|r| r.is_problem());
        Self {
            problems: problems.into_iter().map(|r| r.name.clone()).collect(),
            recoveries: recoveries.into_iter().map(|r| r.name.clone()).collect(),
        }
    }
}
