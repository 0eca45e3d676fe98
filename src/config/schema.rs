//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the prober.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::stream::CodecProtocol;

/// Root configuration for the health prober.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HealthProbeConfig {
    /// Cluster whose hosts are probed.
    pub cluster: ClusterConfig,

    /// Active health check settings.
    pub health_check: HealthCheckConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Cluster definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Logical cluster name, sent as the probe's host header.
    pub name: String,

    /// Hosts belonging to the cluster.
    pub hosts: Vec<HostConfig>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            hosts: Vec::new(),
        }
    }
}

/// A single upstream host.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostConfig {
    /// Host address (e.g., "127.0.0.1:3000").
    pub address: String,
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Path to probe.
    pub path: String,

    /// Optional name of the service behind the cluster.
    pub service_name: Option<String>,

    /// Wire protocol used for the probe connection.
    pub protocol: CodecProtocol,

    /// Delay between the end of one probe and the start of the next.
    pub interval_secs: u64,

    /// Upper bound of the random jitter added to every interval.
    pub interval_jitter_ms: u64,

    /// Time allowed for a probe to complete before the connection is torn down.
    pub timeout_ms: u64,

    /// Time allowed to establish the TCP connection.
    pub connect_timeout_ms: u64,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            path: "/health".to_string(),
            service_name: None,
            protocol: CodecProtocol::Http1,
            interval_secs: 10,
            interval_jitter_ms: 0,
            timeout_ms: 2000,
            connect_timeout_ms: 1000,
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
