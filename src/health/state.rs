//! Host health state machine.
//!
//! # States
//! - Unknown: not probed yet, still routable
//! - Healthy: host receives traffic
//! - Unhealthy: host excluded by the membership authority
//!
//! # State Transitions
//! ```text
//! Unknown/Unhealthy → Healthy: consecutive successes >= healthy_threshold
//! Unknown/Healthy → Unhealthy: consecutive failures >= unhealthy_threshold
//! ```
//!
//! # Design Decisions
//! - Hysteresis prevents flapping
//! - Counters reset when the opposite outcome is observed

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use serde::Serialize;

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Unknown => write!(f, "unknown"),
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Reason attached to a failed probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureType {
    /// A well-formed response reported an unhealthy status.
    Active,
    /// The connection or stream failed before a response completed.
    Network,
}

impl FailureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureType::Active => "active",
            FailureType::Network => "network",
        }
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change produced by a probe outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthTransition {
    pub from: HealthState,
    pub to: HealthState,
}

/// Per-host health bookkeeping shared between the prober and readers.
#[derive(Debug)]
pub struct HostHealth {
    /// Current health state (0=Unknown, 1=Healthy, 2=Unhealthy).
    state: AtomicU8,
    consecutive_failures: AtomicUsize,
    consecutive_successes: AtomicUsize,
}

impl Default for HostHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl HostHealth {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(HealthState::Unknown as u8),
            consecutive_failures: AtomicUsize::new(0),
            consecutive_successes: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Relaxed))
    }

    /// Return true if the host is routable (Healthy or Unknown).
    pub fn is_healthy(&self) -> bool {
        self.state() != HealthState::Unhealthy
    }

    pub fn consecutive_failures(&self) -> usize {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn consecutive_successes(&self) -> usize {
        self.consecutive_successes.load(Ordering::Relaxed)
    }

    /// Record a successful probe.
    pub fn mark_success(&self, healthy_threshold: usize) -> Option<HealthTransition> {
        self.consecutive_failures.store(0, Ordering::Relaxed);

        let current = self.state();
        if current == HealthState::Healthy {
            return None;
        }

        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes < healthy_threshold {
            return None;
        }

        self.state.store(HealthState::Healthy as u8, Ordering::Relaxed);
        self.consecutive_successes.store(0, Ordering::Relaxed);
        Some(HealthTransition {
            from: current,
            to: HealthState::Healthy,
        })
    }

    /// Record a failed probe.
    pub fn mark_failure(&self, unhealthy_threshold: usize) -> Option<HealthTransition> {
        self.consecutive_successes.store(0, Ordering::Relaxed);

        let current = self.state();
        if current == HealthState::Unhealthy {
            return None;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures < unhealthy_threshold {
            return None;
        }

        self.state.store(HealthState::Unhealthy as u8, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        Some(HealthTransition {
            from: current,
            to: HealthState::Unhealthy,
        })
    }
}
