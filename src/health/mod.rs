//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Scheduler (monitor.rs):
//!     Interval timer per host
//!     → ActiveSession::on_interval (http.rs)
//!     → outcome reported to base session (session.rs)
//!     → host health updated (state.rs)
//!     → scheduler woken for the next cycle
//!
//! Deadline missed:
//!     monitor.rs → ActiveSession::on_timeout → network failure recorded
//! ```
//!
//! # Design Decisions
//! - State transitions require consecutive successes/failures
//! - Health state is per-host, shared with the upstream registry
//! - Protocol sessions never hold locks while calling out

pub mod http;
pub mod monitor;
pub mod session;
pub mod state;

pub use http::{HttpHealthCheckSession, HttpHealthChecker};
pub use monitor::{CycleResult, HealthMonitor, HostProbe};
pub use session::{ActiveSession, HealthCheckSession, HealthChecker, OutcomeReporter, ProbeOutcome};
pub use state::{FailureType, HealthState, HostHealth};
