//! Metrics collection and exposition.
//!
//! # Metrics
//! - `health_check_attempts_total` (counter): probes sent, by cluster
//! - `health_check_success_total` (counter): successful probes, by cluster
//! - `health_check_failure_total` (counter): failed probes, by cluster and reason
//! - `health_check_timeouts_total` (counter): probes torn down by the deadline
//! - `upstream_host_healthy` (gauge): 1=healthy, 0=unhealthy
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exposition is opt-in via configuration

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::health::state::FailureType;

/// Install the Prometheus recorder and its HTTP listener.
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter")
        }
    }
}

pub fn record_attempt(cluster: &str) {
    metrics::counter!("health_check_attempts_total", "cluster" => cluster.to_string()).increment(1);
}

pub fn record_success(cluster: &str) {
    metrics::counter!("health_check_success_total", "cluster" => cluster.to_string()).increment(1);
}

pub fn record_failure(cluster: &str, reason: FailureType) {
    metrics::counter!(
        "health_check_failure_total",
        "cluster" => cluster.to_string(),
        "reason" => reason.as_str()
    )
    .increment(1);
}

pub fn record_timeout(cluster: &str) {
    metrics::counter!("health_check_timeouts_total", "cluster" => cluster.to_string()).increment(1);
}

pub fn record_host_health(cluster: &str, host: &str, healthy: bool) {
    metrics::gauge!(
        "upstream_host_healthy",
        "cluster" => cluster.to_string(),
        "host" => host.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}
