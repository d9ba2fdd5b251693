//! API-facing request/response models.

use serde::{Deserialize, Serialize};

use crate::config::DispatchConfig;
use crate::core::endpoint::Strategy;
use crate::core::task::{ScheduledTask, TaskStatus};
use crate::util::serde::{Capability, TaskId};

/// Task status response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    /// Task identifier.
    pub task_id: TaskId,
    /// Current status.
    pub status: TaskStatus,
    /// Failed attempts so far.
    pub attempts: u32,
    /// Attempt budget.
    pub max_attempts: u32,
    /// Latest failure, if any.
    pub reason: Option<String>,
}

impl From<&ScheduledTask> for TaskStatusResponse {
    fn from(task: &ScheduledTask) -> Self {
        Self {
            task_id: task.id,
            status: task.status,
            attempts: task.attempts,
            max_attempts: task.max_attempts,
            reason: task.last_error.clone(),
        }
    }
}

/// Configured pool summary for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Capability name.
    pub name: String,
    /// Selection strategy.
    pub strategy: Strategy,
    /// Configured endpoints.
    pub endpoints: usize,
    /// Static (or starting) concurrency.
    pub concurrency: usize,
    /// Whether dynamic concurrency is on.
    pub dynamic: bool,
}

/// Liveness of one capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityHealth {
    /// Capability.
    pub capability: Capability,
    /// At least one endpoint is enabled and healthy.
    pub healthy: bool,
    /// Count of enabled and healthy endpoints.
    pub healthy_endpoints: usize,
}

/// Health response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchHealth {
    /// Every capability has a healthy endpoint and the queue admits work.
    pub ok: bool,
    /// Memory backpressure is active.
    pub backpressure: bool,
    /// Per-capability liveness, sorted by capability.
    pub capabilities: Vec<CapabilityHealth>,
}

/// Build pool listings from a configuration, sorted by name.
#[must_use]
pub fn list_pools(cfg: &DispatchConfig) -> Vec<PoolSnapshot> {
    let mut pools: Vec<PoolSnapshot> = cfg
        .capabilities
        .iter()
        .map(|(name, capability)| PoolSnapshot {
            name: name.clone(),
            strategy: capability.pool.strategy,
            endpoints: capability.endpoints.len(),
            concurrency: capability.queue.concurrency,
            dynamic: capability.queue.dynamic.is_some(),
        })
        .collect();
    pools.sort_by(|a, b| a.name.cmp(&b.name));
    pools
}
