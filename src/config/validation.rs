//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, thresholds > 0)
//! - Check that host and metrics addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: HealthProbeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::HealthProbeConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("cluster name must not be empty")]
    EmptyClusterName,

    #[error("cluster has no hosts")]
    NoHosts,

    #[error("invalid host address: {0}")]
    InvalidHostAddress(String),

    #[error("health check path must start with '/': {0}")]
    InvalidPath(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("timeout ({timeout_ms}ms) must be shorter than the interval ({interval_secs}s)")]
    TimeoutExceedsInterval { timeout_ms: u64, interval_secs: u64 },

    #[error("unknown log level: {0}")]
    UnknownLogLevel(String),

    #[error("invalid metrics address: {0}")]
    InvalidMetricsAddress(String),
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &HealthProbeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.cluster.name.trim().is_empty() {
        errors.push(ValidationError::EmptyClusterName);
    }
    if config.cluster.hosts.is_empty() {
        errors.push(ValidationError::NoHosts);
    }
    for host in &config.cluster.hosts {
        if host.address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidHostAddress(host.address.clone()));
        }
    }

    let hc = &config.health_check;
    if !hc.path.starts_with('/') {
        errors.push(ValidationError::InvalidPath(hc.path.clone()));
    }
    if hc.interval_secs == 0 {
        errors.push(ValidationError::Zero("interval_secs"));
    }
    if hc.timeout_ms == 0 {
        errors.push(ValidationError::Zero("timeout_ms"));
    }
    if hc.connect_timeout_ms == 0 {
        errors.push(ValidationError::Zero("connect_timeout_ms"));
    }
    if hc.healthy_threshold == 0 {
        errors.push(ValidationError::Zero("healthy_threshold"));
    }
    if hc.unhealthy_threshold == 0 {
        errors.push(ValidationError::Zero("unhealthy_threshold"));
    }
    if hc.interval_secs > 0 && hc.timeout() >= hc.interval() {
        errors.push(ValidationError::TimeoutExceedsInterval {
            timeout_ms: hc.timeout_ms,
            interval_secs: hc.interval_secs,
        });
    }

    let obs = &config.observability;
    if !LOG_LEVELS.contains(&obs.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::UnknownLogLevel(obs.log_level.clone()));
    }
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidMetricsAddress(obs.metrics_address.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
