//! Per-host health check bookkeeping shared by every protocol.
//!
//! # Responsibilities
//! - Turn probe outcomes into host health transitions
//! - Log transitions and record metrics
//! - Tell the scheduler a probe cycle has ended

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::health::state::{FailureType, HealthTransition};
use crate::observability::metrics;
use crate::upstream::Host;

/// Final outcome of one probe cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Failure(FailureType),
}

/// Sink for probe outcomes.
pub trait OutcomeReporter: Send + Sync {
    fn handle_success(&self);

    fn handle_failure(&self, reason: FailureType);
}

/// Protocol-specific half of a host's health check, driven by the scheduler.
pub trait ActiveSession: Send + Sync {
    /// Start a probe cycle. Calls are serialized with `on_timeout` and never
    /// overlap an in-flight cycle.
    fn on_interval(&self);

    /// The in-flight probe missed its deadline.
    ///
    /// Returns false if the cycle ended before the timeout was handled; its
    /// outcome has then been, or is being, reported.
    fn on_timeout(&self) -> bool;

    /// Release any held connection.
    fn close(&self);
}

/// Creates protocol sessions for hosts.
pub trait HealthChecker: Send + Sync {
    fn new_session(
        self: Arc<Self>,
        host: Arc<dyn Host>,
        reporter: Arc<dyn OutcomeReporter>,
    ) -> Arc<dyn ActiveSession>;
}

/// Thresholds applied to consecutive outcomes.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub healthy: usize,
    pub unhealthy: usize,
}

/// Base session: applies outcomes to a host and notifies the scheduler.
pub struct HealthCheckSession {
    host: Arc<dyn Host>,
    cluster: String,
    thresholds: Thresholds,
    outcomes: mpsc::UnboundedSender<ProbeOutcome>,
}

impl HealthCheckSession {
    /// Returns the session and the receiver the scheduler waits on.
    pub fn new(
        host: Arc<dyn Host>,
        cluster: impl Into<String>,
        thresholds: Thresholds,
    ) -> (Self, mpsc::UnboundedReceiver<ProbeOutcome>) {
        let (outcomes, rx) = mpsc::unbounded_channel();
        (
            Self {
                host,
                cluster: cluster.into(),
                thresholds,
                outcomes,
            },
            rx,
        )
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    /// Record a probe that missed its deadline.
    ///
    /// Timeouts count as network failures against the host.
    pub fn handle_timeout(&self) {
        tracing::warn!(
            cluster = %self.cluster,
            host = %self.host.address(),
            "Health check timed out"
        );
        metrics::record_timeout(&self.cluster);
        self.apply(ProbeOutcome::Failure(FailureType::Network));
    }

    fn apply(&self, outcome: ProbeOutcome) {
        let health = self.host.health();
        let transition = match outcome {
            ProbeOutcome::Success => {
                metrics::record_success(&self.cluster);
                health.mark_success(self.thresholds.healthy)
            }
            ProbeOutcome::Failure(reason) => {
                metrics::record_failure(&self.cluster, reason);
                health.mark_failure(self.thresholds.unhealthy)
            }
        };

        if let Some(HealthTransition { from, to }) = transition {
            tracing::info!(
                cluster = %self.cluster,
                host = %self.host.address(),
                from = %from,
                to = %to,
                "Host health changed"
            );
        }
        metrics::record_host_health(
            &self.cluster,
            &self.host.address().to_string(),
            health.is_healthy(),
        );

        // The scheduler may already be gone during shutdown.
        let _ = self.outcomes.send(outcome);
    }
}

impl OutcomeReporter for HealthCheckSession {
    fn handle_success(&self) {
        self.apply(ProbeOutcome::Success);
    }

    fn handle_failure(&self, reason: FailureType) {
        tracing::warn!(
            cluster = %self.cluster,
            host = %self.host.address(),
            reason = %reason,
            "Health check failed"
        );
        self.apply(ProbeOutcome::Failure(reason));
    }
}
