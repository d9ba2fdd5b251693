//! Dispatch layer configuration structures.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::endpoint::Strategy;

/// One backend endpoint as configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Optional stable identifier; defaults to the URL.
    #[serde(default)]
    pub id: Option<String>,
    /// Base URL of the backend.
    pub url: String,
    /// Static enable flag.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Lower values are preferred.
    #[serde(default = "default_endpoint_priority")]
    pub priority: u32,
    /// Extra attempts on this endpoint before failing over.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl EndpointConfig {
    /// Endpoint with default priority, retries and enabled flag.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: None,
            url: url.into(),
            enabled: true,
            priority: default_endpoint_priority(),
            max_retries: default_max_retries(),
        }
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the per-endpoint retry budget.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the enabled flag.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set an explicit identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Identifier used for logging and status.
    #[must_use]
    pub fn effective_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.url)
    }

    /// Validate endpoint values.
    pub fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("endpoint url must not be empty".into());
        }
        Ok(())
    }
}

/// Pool-level knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Load-balancing strategy; immutable once the pool is built.
    #[serde(default)]
    pub strategy: Strategy,
    /// Per-attempt request timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Delay between attempts.
    #[serde(default = "default_pool_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Interval between health-check rounds.
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    /// Path appended to the endpoint URL for liveness probes.
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            timeout_ms: default_timeout_ms(),
            retry_delay_ms: default_pool_retry_delay_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
            health_path: default_health_path(),
        }
    }
}

impl PoolConfig {
    /// Per-attempt timeout as a duration.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Retry delay as a duration.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Health-check interval as a duration.
    #[must_use]
    pub const fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Validate pool values.
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout_ms == 0 {
            return Err("timeout_ms must be greater than 0".into());
        }
        if self.health_check_interval_ms == 0 {
            return Err("health_check_interval_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// Bounds and thresholds for dynamic concurrency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicConcurrencyConfig {
    /// Lowest allowed concurrency.
    pub min: usize,
    /// Highest allowed concurrency.
    pub max: usize,
    /// Normalized CPU load above which concurrency steps down.
    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold: f64,
    /// Memory utilization ratio above which concurrency steps down.
    #[serde(default = "default_mem_threshold")]
    pub mem_threshold: f64,
    /// Interval between adjustments.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for DynamicConcurrencyConfig {
    fn default() -> Self {
        Self {
            min: 1,
            max: 10,
            cpu_threshold: default_cpu_threshold(),
            mem_threshold: default_mem_threshold(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl DynamicConcurrencyConfig {
    /// Tick interval as a duration.
    #[must_use]
    pub const fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Validate bounds and thresholds.
    pub fn validate(&self) -> Result<(), String> {
        if self.min == 0 {
            return Err("dynamic min must be at least 1".into());
        }
        if self.min > self.max {
            return Err(format!(
                "dynamic min ({}) must not exceed max ({})",
                self.min, self.max
            ));
        }
        for (name, value) in [
            ("cpu_threshold", self.cpu_threshold),
            ("mem_threshold", self.mem_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(format!("{name} must be in (0, 1], got {value}"));
            }
        }
        if self.tick_ms == 0 {
            return Err("tick_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// Queue lane knobs for one capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Static concurrency, also the starting point in dynamic mode.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Dynamic mode; absent means `concurrency` is fixed.
    #[serde(default)]
    pub dynamic: Option<DynamicConcurrencyConfig>,
    /// Reject new submissions once this many are already waiting.
    #[serde(default)]
    pub max_pending: Option<usize>,
    /// Upper bound on a single running task.
    #[serde(default)]
    pub task_timeout_ms: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            dynamic: None,
            max_pending: None,
            task_timeout_ms: None,
        }
    }
}

impl QueueConfig {
    /// Validate lane values.
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("concurrency must be greater than 0".into());
        }
        if let Some(dynamic) = &self.dynamic {
            dynamic.validate()?;
        }
        if self.max_pending == Some(0) {
            return Err("max_pending must be greater than 0 when set".into());
        }
        if self.task_timeout_ms == Some(0) {
            return Err("task_timeout_ms must be greater than 0 when set".into());
        }
        Ok(())
    }
}

/// Everything configured for one capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityConfig {
    /// Pool knobs.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Endpoints in registration order.
    pub endpoints: Vec<EndpointConfig>,
    /// Queue lane knobs.
    #[serde(default)]
    pub queue: QueueConfig,
}

impl CapabilityConfig {
    /// Validate the capability.
    pub fn validate(&self) -> Result<(), String> {
        self.pool.validate()?;
        self.queue.validate()?;
        if self.endpoints.is_empty() {
            return Err("at least one endpoint must be configured".into());
        }
        for (idx, endpoint) in self.endpoints.iter().enumerate() {
            endpoint
                .validate()
                .map_err(|e| format!("endpoint #{idx} invalid: {e}"))?;
        }
        Ok(())
    }
}

/// Memory admission control knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Used memory above which queues enter backpressure.
    #[serde(default = "default_memory_threshold_gb")]
    pub threshold_gb: f64,
    /// Interval between memory checks.
    #[serde(default = "default_memory_check_interval_ms")]
    pub check_interval_ms: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            threshold_gb: default_memory_threshold_gb(),
            check_interval_ms: default_memory_check_interval_ms(),
        }
    }
}

impl MemoryConfig {
    /// Threshold in bytes.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn threshold_bytes(&self) -> u64 {
        (self.threshold_gb * 1024.0 * 1024.0 * 1024.0) as u64
    }

    /// Check interval as a duration.
    #[must_use]
    pub const fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// Validate memory values.
    pub fn validate(&self) -> Result<(), String> {
        if self.threshold_gb.is_nan() || self.threshold_gb <= 0.0 {
            return Err("memory threshold_gb must be greater than 0".into());
        }
        if self.check_interval_ms == 0 {
            return Err("memory check_interval_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// Task scheduler knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between polls for due tasks.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Attempts allowed per task unless the task says otherwise.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Minimum delay between attempts of the same task.
    #[serde(default = "default_scheduler_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// How long terminal tasks are kept before the poll loop prunes them.
    /// Unset keeps them forever.
    #[serde(default)]
    pub retention_ms: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_scheduler_retry_delay_ms(),
            retention_ms: None,
        }
    }
}

impl SchedulerConfig {
    /// Poll interval as a duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Terminal task retention, if pruning is enabled.
    #[must_use]
    pub fn retention(&self) -> Option<Duration> {
        self.retention_ms.map(Duration::from_millis)
    }

    /// Validate scheduler values.
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".into());
        }
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".into());
        }
        if self.retention_ms == Some(0) {
            return Err("retention_ms must be greater than 0 when set".into());
        }
        Ok(())
    }
}

/// Root dispatch configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Map of capability name to configuration.
    pub capabilities: HashMap<String, CapabilityConfig>,
    /// Memory admission control.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Scheduler knobs.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl DispatchConfig {
    /// Validate all capabilities and ensure at least one exists.
    pub fn validate(&self) -> Result<(), String> {
        if self.capabilities.is_empty() {
            return Err("at least one capability must be defined".into());
        }
        for (name, capability) in &self.capabilities {
            if name.trim().is_empty() {
                return Err("capability names must not be empty".into());
            }
            capability
                .validate()
                .map_err(|e| format!("capability `{name}` invalid: {e}"))?;
        }
        self.memory.validate()?;
        self.scheduler.validate()
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and parse a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        Self::from_json_str(&input)
    }
}

const fn default_true() -> bool {
    true
}

const fn default_endpoint_priority() -> u32 {
    1
}

const fn default_max_retries() -> u32 {
    2
}

const fn default_timeout_ms() -> u64 {
    600_000
}

const fn default_pool_retry_delay_ms() -> u64 {
    1_000
}

const fn default_health_check_interval_ms() -> u64 {
    30_000
}

fn default_health_path() -> String {
    "/".into()
}

const fn default_cpu_threshold() -> f64 {
    0.7
}

const fn default_mem_threshold() -> f64 {
    0.8
}

const fn default_tick_ms() -> u64 {
    5_000
}

const fn default_concurrency() -> usize {
    1
}

const fn default_memory_threshold_gb() -> f64 {
    4.0
}

const fn default_memory_check_interval_ms() -> u64 {
    1_000
}

const fn default_poll_interval_ms() -> u64 {
    30_000
}

const fn default_max_attempts() -> u32 {
    3
}

// Two hours.
const fn default_scheduler_retry_delay_ms() -> u64 {
    2 * 60 * 60 * 1_000
}
