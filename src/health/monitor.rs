//! Active health check scheduling.
//!
//! # Responsibilities
//! - Drive one probe session per host on an interval
//! - Enforce the probe deadline and account for timeouts
//! - Stop cleanly on shutdown, releasing probe connections

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::health::session::{
    ActiveSession, HealthCheckSession, HealthChecker, ProbeOutcome, Thresholds,
};
use crate::health::state::FailureType;
use crate::upstream::{Cluster, Host, UpstreamHost};

/// Result of a single probe cycle as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleResult {
    Success,
    Failure(FailureType),
    TimedOut,
}

impl From<ProbeOutcome> for CycleResult {
    fn from(outcome: ProbeOutcome) -> Self {
        match outcome {
            ProbeOutcome::Success => CycleResult::Success,
            ProbeOutcome::Failure(reason) => CycleResult::Failure(reason),
        }
    }
}

/// One host's session pair plus the channel its outcomes arrive on.
pub struct HostProbe {
    host: Arc<UpstreamHost>,
    base: Arc<HealthCheckSession>,
    session: Arc<dyn ActiveSession>,
    outcomes: mpsc::UnboundedReceiver<ProbeOutcome>,
    timeout: Duration,
}

impl HostProbe {
    pub fn host(&self) -> &Arc<UpstreamHost> {
        &self.host
    }

    /// Run one probe cycle and wait for its result or the deadline.
    pub async fn probe(&mut self) -> CycleResult {
        // Outcomes left over from a timed-out cycle are stale.
        while self.outcomes.try_recv().is_ok() {}

        self.session.on_interval();
        match time::timeout(self.timeout, self.outcomes.recv()).await {
            Ok(Some(outcome)) => outcome.into(),
            Ok(None) | Err(_) => {
                if self.session.on_timeout() {
                    self.base.handle_timeout();
                    return CycleResult::TimedOut;
                }
                // The cycle finished as the deadline fired; its outcome is on the way.
                match self.outcomes.recv().await {
                    Some(outcome) => outcome.into(),
                    None => CycleResult::TimedOut,
                }
            }
        }
    }

    pub fn close(&self) {
        self.session.close();
    }
}

/// Schedules active health checks for every host of a cluster.
pub struct HealthMonitor {
    checker: Arc<dyn HealthChecker>,
    config: HealthCheckConfig,
}

impl HealthMonitor {
    pub fn new(checker: Arc<dyn HealthChecker>, config: HealthCheckConfig) -> Self {
        Self { checker, config }
    }

    /// Create the sessions for one host.
    pub fn probe_for(&self, cluster: &Cluster, host: Arc<UpstreamHost>) -> HostProbe {
        let dyn_host: Arc<dyn Host> = host.clone();
        let (base, outcomes) = HealthCheckSession::new(
            dyn_host.clone(),
            cluster.info().name(),
            Thresholds {
                healthy: self.config.healthy_threshold as usize,
                unhealthy: self.config.unhealthy_threshold as usize,
            },
        );
        let base = Arc::new(base);
        let session = self.checker.clone().new_session(dyn_host, base.clone());

        HostProbe {
            host,
            base,
            session,
            outcomes,
            timeout: self.config.timeout(),
        }
    }

    /// Probe every host once, concurrently.
    pub async fn probe_once(&self, cluster: &Cluster) -> Vec<(SocketAddr, CycleResult)> {
        let mut tasks = JoinSet::new();
        for host in cluster.hosts() {
            let mut probe = self.probe_for(cluster, host.clone());
            tasks.spawn(async move {
                let result = probe.probe().await;
                probe.close();
                (probe.host().address(), result)
            });
        }

        let mut results = Vec::with_capacity(cluster.hosts().len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => tracing::error!(error = %e, "Probe task failed"),
            }
        }
        results.sort_by_key(|(addr, _)| *addr);
        results
    }

    /// Probe every host until shutdown is signalled.
    pub async fn run(self, cluster: &Cluster, shutdown: broadcast::Receiver<()>) {
        if cluster.hosts().is_empty() {
            tracing::warn!(cluster = %cluster.info().name(), "No hosts to health check");
            return;
        }

        tracing::info!(
            cluster = %cluster.info().name(),
            hosts = cluster.hosts().len(),
            interval = self.config.interval_secs,
            timeout_ms = self.config.timeout_ms,
            path = %self.config.path,
            protocol = %self.config.protocol,
            "Health monitor starting"
        );

        let schedule = Schedule {
            interval: self.config.interval(),
            jitter_ms: self.config.interval_jitter_ms,
        };
        let mut tasks = JoinSet::new();
        for host in cluster.hosts() {
            let probe = self.probe_for(cluster, host.clone());
            tasks.spawn(run_host(probe, schedule, shutdown.resubscribe()));
        }
        while tasks.join_next().await.is_some() {}

        tracing::info!(cluster = %cluster.info().name(), "Health monitor stopped");
    }
}

#[derive(Debug, Clone, Copy)]
struct Schedule {
    interval: Duration,
    jitter_ms: u64,
}

impl Schedule {
    fn jitter(&self) -> Duration {
        if self.jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(fastrand::u64(0..=self.jitter_ms))
        }
    }
}

async fn run_host(mut probe: HostProbe, schedule: Schedule, mut shutdown: broadcast::Receiver<()>) {
    let addr = probe.host().address();

    // Spread the first probes of a large cluster.
    let startup = schedule.jitter();
    if !startup.is_zero() {
        tokio::select! {
            _ = time::sleep(startup) => {}
            _ = shutdown.recv() => {
                probe.close();
                return;
            }
        }
    }

    loop {
        tokio::select! {
            result = probe.probe() => {
                tracing::debug!(host = %addr, result = ?result, "Probe cycle finished");
            }
            _ = shutdown.recv() => break,
        }

        tokio::select! {
            _ = time::sleep(schedule.interval + schedule.jitter()) => {}
            _ = shutdown.recv() => break,
        }
    }

    probe.close();
    tracing::debug!(host = %addr, "Health checker for host stopped");
}
