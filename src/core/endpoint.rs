//! Endpoint model and load-balancing strategies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::util::serde::Capability;

/// Consecutive failures after which an endpoint is considered unhealthy.
///
/// Shared by live calls and health probes so both flip liveness at the same point.
pub const FAILURE_THRESHOLD: u32 = 3;

/// Rule used to pick among healthy endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Rotate through the healthy set in registration order.
    RoundRobin,
    /// Lowest priority value first, then lowest latency, then registration order.
    #[default]
    Priority,
    /// Fewest in-flight requests first, ties broken as in `Priority`.
    QueueLength,
}

impl Strategy {
    /// Configuration name of the strategy.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::Priority => "priority",
            Self::QueueLength => "queue_length",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round_robin" => Ok(Self::RoundRobin),
            "priority" => Ok(Self::Priority),
            "queue_length" => Ok(Self::QueueLength),
            other => Err(format!("unknown strategy `{other}`")),
        }
    }
}

/// Snapshot of one backend endpoint: static configuration plus the health
/// state observed at the time the snapshot was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Stable identifier (configured id or the URL).
    pub id: String,
    /// Base URL of the backend.
    pub url: String,
    /// Capability the endpoint serves.
    pub capability: Capability,
    /// Lower values are preferred.
    pub priority: u32,
    /// Extra attempts on this endpoint before failing over.
    pub max_retries: u32,
    /// Static configuration flag; disabled endpoints are never selected.
    pub enabled: bool,
    /// Dynamic liveness.
    pub healthy: bool,
    /// Latency of the last successful call or probe.
    pub last_latency_ms: Option<u64>,
    /// When latency/liveness was last observed (ms since epoch).
    pub last_checked_at_ms: Option<u64>,
    /// Failures since the last success.
    pub consecutive_failures: u32,
}

impl Endpoint {
    /// Whether the endpoint may be selected.
    #[must_use]
    pub const fn is_eligible(&self) -> bool {
        self.enabled && self.healthy
    }
}

/// Mutable health portion of an endpoint, guarded inside the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EndpointHealth {
    pub healthy: bool,
    pub last_latency_ms: Option<u64>,
    pub last_checked_at_ms: Option<u64>,
    pub consecutive_failures: u32,
}

impl Default for EndpointHealth {
    fn default() -> Self {
        Self {
            healthy: true,
            last_latency_ms: None,
            last_checked_at_ms: None,
            consecutive_failures: 0,
        }
    }
}

impl EndpointHealth {
    /// Record a successful call or probe.
    pub fn record_success(&mut self, latency_ms: u64, at_ms: u64) {
        self.last_latency_ms = Some(latency_ms);
        self.last_checked_at_ms = Some(at_ms);
        self.consecutive_failures = 0;
    }

    /// Record a failure; returns true when this failure flipped the endpoint
    /// from healthy to unhealthy.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.healthy && self.consecutive_failures >= FAILURE_THRESHOLD {
            self.healthy = false;
            return true;
        }
        false
    }
}
