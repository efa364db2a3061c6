//! Checks: named, zero-argument units of verification.
//!
//! A check either passes or fails with a [`CheckFailure`]. Failures carry the
//! message and the source location where they were raised, which end up in
//! problem alerts as `{exc}` and `{line}`.

use std::cell::RefCell;
use std::fmt;
use std::panic::{AssertUnwindSafe, Location};
use std::sync::{Arc, Once};

use async_trait::async_trait;

/// Shell-command checks loaded from TOML files.
pub mod command;
/// Typed registry of checks for one cycle.
pub mod registry;
/// Check sources and load errors.
pub mod source;

/// Tagged outcome of one check invocation.
pub type CheckOutcome = Result<(), CheckFailure>;

/// How a check failed. Both kinds classify as a problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// An explicit assertion inside the check did not hold.
    Assertion,
    /// Any other runtime failure (I/O error, panic, timeout, ...).
    Error,
}

/// A failed check invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckFailure {
    /// Assertion or runtime error.
    pub kind: FailureKind,
    /// Failure message; may be empty.
    pub message: String,
    /// Source text at the point of failure.
    pub location: String,
}

impl CheckFailure {
    /// An assertion failure located at the caller.
    #[track_caller]
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::assertion_at(message, caller_location())
    }

    /// An assertion failure with an explicit location.
    pub fn assertion_at(message: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Assertion,
            message: message.into(),
            location: location.into(),
        }
    }

    /// A runtime error located at the caller.
    #[track_caller]
    pub fn error(message: impl Into<String>) -> Self {
        Self::error_at(message, caller_location())
    }

    /// A runtime error with an explicit location.
    pub fn error_at(message: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Error,
            message: message.into(),
            location: location.into(),
        }
    }
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.location)
    }
}

impl<E> From<E> for CheckFailure
where
    E: std::error::Error + Send + Sync + 'static,
{
    #[track_caller]
    fn from(err: E) -> Self {
        Self::error(err.to_string())
    }
}

#[track_caller]
fn caller_location() -> String {
    let loc = Location::caller();
    format!("{}:{}", loc.file(), loc.line())
}

/// Fail the enclosing check with an assertion failure unless `cond` holds.
///
/// The failure location records the file, line and the condition's source.
///
/// ```
/// use pagerunit::check;
/// use pagerunit::check::CheckOutcome;
///
/// fn free_space_ok() -> CheckOutcome {
///     let free_gb = 42;
///     check!(free_gb > 10, "only {free_gb} GB free");
///     Ok(())
/// }
/// assert!(free_space_ok().is_ok());
/// ```
#[macro_export]
macro_rules! check {
    ($cond:expr $(,)?) => {
        if !$cond {
            return ::core::result::Result::Err($crate::check::CheckFailure::assertion_at(
                "",
                ::core::concat!(
                    ::core::file!(),
                    ":",
                    ::core::line!(),
                    ": check!(",
                    ::core::stringify!($cond),
                    ")"
                ),
            ));
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return ::core::result::Result::Err($crate::check::CheckFailure::assertion_at(
                ::std::format!($($arg)+),
                ::core::concat!(
                    ::core::file!(),
                    ":",
                    ::core::line!(),
                    ": check!(",
                    ::core::stringify!($cond),
                    ")"
                ),
            ));
        }
    };
}

/// A named, zero-argument unit of verification.
#[async_trait]
pub trait Check: Send + Sync {
    /// Unique name; also the marker file name.
    fn name(&self) -> &str;

    /// Optional human-readable description.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Run the check once.
    async fn run(&self) -> CheckOutcome;
}

type CheckFn = Box<dyn Fn() -> CheckOutcome + Send + Sync>;

thread_local! {
    /// `file:line` of the most recent panic on this thread.
    static PANIC_LOCATION: RefCell<Option<String>> = const { RefCell::new(None) };
}

static LOCATION_HOOK: Once = Once::new();

/// Chain a panic hook that records where each panic was raised.
fn install_location_hook() {
    LOCATION_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let location = info
                .location()
                .map(|loc| format!("{}:{}", loc.file(), loc.line()));
            PANIC_LOCATION.with(|slot| *slot.borrow_mut() = location);
            previous(info);
        }));
    });
}

/// A check backed by a plain function or closure.
///
/// Panics inside the function are caught and reported as runtime errors
/// located at the panic site. If another hook replaced ours the location
/// falls back to `panic in <name>`.
pub struct FnCheck {
    name: String,
    description: Option<String>,
    func: CheckFn,
}

impl FnCheck {
    /// Wrap `func` as a check called `name`.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn() -> CheckOutcome + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: None,
            func: Box::new(func),
        }
    }

    /// Attach a description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl fmt::Debug for FnCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCheck")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Check for FnCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    async fn run(&self) -> CheckOutcome {
        install_location_hook();
        PANIC_LOCATION.with(|slot| *slot.borrow_mut() = None);

        match std::panic::catch_unwind(AssertUnwindSafe(|| (self.func)())) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_owned())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                let location = PANIC_LOCATION
                    .with(|slot| slot.borrow_mut().take())
                    .unwrap_or_else(|| format!("panic in {}", self.name));
                Err(CheckFailure::error_at(message, location))
            }
        }
    }
}

/// Never runs the wrapped check; always passes.
struct Disabled {
    inner: Arc<dyn Check>,
}

#[async_trait]
impl Check for Disabled {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> Option<&str> {
        self.inner.description()
    }

    async fn run(&self) -> CheckOutcome {
        Ok(())
    }
}

/// Runs the wrapped check but ignores assertion failures.
struct Silent {
    inner: Arc<dyn Check>,
}

#[async_trait]
impl Check for Silent {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> Option<&str> {
        self.inner.description()
    }

    async fn run(&self) -> CheckOutcome {
        match self.inner.run().await {
            Err(failure) if failure.kind == FailureKind::Assertion => Ok(()),
            other => other,
        }
    }
}

/// Disable a check: it is skipped and always reported as passing.
pub fn disabled(check: Arc<dyn Check>) -> Arc<dyn Check> {
    Arc::new(Disabled { inner: check })
}

/// Silence a check's assertion failures; runtime errors still count.
pub fn silent(check: Arc<dyn Check>) -> Arc<dyn Check> {
    Arc::new(Silent { inner: check })
}
