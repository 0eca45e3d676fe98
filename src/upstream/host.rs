//! Upstream host and cluster abstractions.
//!
//! # Responsibilities
//! - Represent a single upstream host and its health
//! - Hand out connection data for new probe connections
//! - Group hosts under a named cluster

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::{ClusterConfig, HealthCheckConfig};
use crate::health::state::{HealthState, HostHealth};
use crate::net::{ConnectionGuard, ConnectionTracker};

/// Read-only cluster information shared by every host in it.
#[derive(Debug)]
pub struct ClusterInfo {
    name: String,
}

impl ClusterInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Logical cluster name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Metadata describing the host a connection belongs to.
#[derive(Debug, Clone)]
pub struct HostDescription {
    pub cluster: String,
    pub address: SocketAddr,
}

/// Everything a codec client needs to dial a host.
#[derive(Debug)]
pub struct ConnectionSpec {
    pub address: SocketAddr,
    pub connect_timeout: Duration,
    /// Held by whoever owns the connection; dropping it marks the connection closed.
    pub guard: ConnectionGuard,
}

/// Result of `Host::create_connection`.
#[derive(Debug)]
pub struct CreateConnectionData {
    pub connection: ConnectionSpec,
    pub host_info: HostDescription,
}

/// A backend endpoint as seen by the health checker.
pub trait Host: Send + Sync {
    fn address(&self) -> SocketAddr;

    fn health(&self) -> &HostHealth;

    fn create_connection(&self) -> CreateConnectionData;
}

/// A statically configured host.
#[derive(Debug)]
pub struct UpstreamHost {
    address: SocketAddr,
    cluster: Arc<ClusterInfo>,
    connect_timeout: Duration,
    health: HostHealth,
    connections: ConnectionTracker,
}

impl UpstreamHost {
    pub fn new(address: SocketAddr, cluster: Arc<ClusterInfo>, connect_timeout: Duration) -> Self {
        Self {
            address,
            cluster,
            connect_timeout,
            health: HostHealth::new(),
            connections: ConnectionTracker::new(),
        }
    }

    /// Number of probe connections currently open to this host.
    pub fn open_connections(&self) -> u64 {
        self.connections.open_count()
    }

    pub fn snapshot(&self) -> HostSnapshot {
        HostSnapshot {
            address: self.address,
            state: self.health.state(),
            healthy: self.health.is_healthy(),
            consecutive_successes: self.health.consecutive_successes(),
            consecutive_failures: self.health.consecutive_failures(),
            open_connections: self.open_connections(),
        }
    }
}

/// Point-in-time view of a host, as printed by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct HostSnapshot {
    pub address: SocketAddr,
    pub state: HealthState,
    pub healthy: bool,
    pub consecutive_successes: usize,
    pub consecutive_failures: usize,
    pub open_connections: u64,
}

impl Host for UpstreamHost {
    fn address(&self) -> SocketAddr {
        self.address
    }

    fn health(&self) -> &HostHealth {
        &self.health
    }

    fn create_connection(&self) -> CreateConnectionData {
        let guard = self.connections.track();
        tracing::debug!(
            host = %self.address,
            connection_id = %guard.id(),
            "Creating probe connection"
        );
        CreateConnectionData {
            connection: ConnectionSpec {
                address: self.address,
                connect_timeout: self.connect_timeout,
                guard,
            },
            host_info: HostDescription {
                cluster: self.cluster.name().to_string(),
                address: self.address,
            },
        }
    }
}

/// A named group of hosts.
#[derive(Debug)]
pub struct Cluster {
    info: Arc<ClusterInfo>,
    hosts: Vec<Arc<UpstreamHost>>,
}

impl Cluster {
    /// Build a cluster from configuration. Unparsable addresses are skipped.
    pub fn from_config(config: &ClusterConfig, health_check: &HealthCheckConfig) -> Self {
        let info = Arc::new(ClusterInfo::new(config.name.clone()));
        let mut hosts = Vec::with_capacity(config.hosts.len());

        for host in &config.hosts {
            match host.address.parse() {
                Ok(addr) => hosts.push(Arc::new(UpstreamHost::new(
                    addr,
                    info.clone(),
                    health_check.connect_timeout(),
                ))),
                Err(_) => tracing::warn!(address = %host.address, "Invalid host address"),
            }
        }

        Self { info, hosts }
    }

    pub fn info(&self) -> &Arc<ClusterInfo> {
        &self.info
    }

    pub fn hosts(&self) -> &[Arc<UpstreamHost>] {
        &self.hosts
    }

    /// Hosts the membership authority currently considers routable.
    pub fn healthy_hosts(&self) -> Vec<Arc<UpstreamHost>> {
        self.hosts
            .iter()
            .filter(|h| h.health().is_healthy())
            .cloned()
            .collect()
    }
}
