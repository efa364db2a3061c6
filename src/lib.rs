//! PagerUnit: a polling health-check runner whose checks read like unit tests.
//!
//! Each check passes or fails. The first failure of a check sends a problem
//! alert and drops a marker file; further failures stay quiet until the
//! check passes again, which removes the marker and sends a recovery. Alerts
//! go out by mail (with a JSON attachment) and by SMS gateway, either one
//! message per result or one batch per cycle.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod check;
pub mod config;
pub mod credentials;
pub mod cycle;
pub mod delivery;
pub mod engine;
pub mod logging;
pub mod message;
pub mod result;
pub mod state;
pub mod template;
pub mod transport;
