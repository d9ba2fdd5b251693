//! Shared fakes for integration tests: scripted backends, probes and metrics.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use adaptive_dispatch::config::{EndpointConfig, PoolConfig};
use adaptive_dispatch::core::{
    BackendExecutor, Endpoint, EndpointPool, HealthProbe, ScheduledTask, Strategy, SystemMetrics,
};
use adaptive_dispatch::util::{Capability, TaskId};
use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;

pub const GB: u64 = 1024 * 1024 * 1024;

// ============================================================================
// Pools
// ============================================================================

pub fn pool_config(strategy: Strategy) -> PoolConfig {
    PoolConfig {
        strategy,
        retry_delay_ms: 0,
        ..PoolConfig::default()
    }
}

pub fn pool(strategy: Strategy, endpoints: &[EndpointConfig]) -> EndpointPool {
    EndpointPool::new(Capability::inference(), pool_config(strategy), endpoints).unwrap()
}

pub fn endpoint(url: &str, priority: u32) -> EndpointConfig {
    EndpointConfig::new(url).with_priority(priority)
}

// ============================================================================
// Backend executor
// ============================================================================

/// Backend whose per-URL behavior is scripted: a number of failures before
/// succeeding, permanent failure, or a fixed delay.
#[derive(Default)]
pub struct ScriptedBackend {
    failures_left: Mutex<HashMap<String, u32>>,
    always_fail: Mutex<HashSet<String>>,
    latency: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_times(self, url: &str, times: u32) -> Self {
        self.failures_left.lock().insert(url.to_string(), times);
        self
    }

    pub fn always_fail(self, url: &str) -> Self {
        self.always_fail.lock().insert(url.to_string());
        self
    }

    pub fn with_latency(self, url: &str, latency: Duration) -> Self {
        self.latency.lock().insert(url.to_string(), latency);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl BackendExecutor<String, String> for ScriptedBackend {
    async fn call(&self, endpoint: &Endpoint, payload: &String) -> anyhow::Result<String> {
        self.calls.lock().push(endpoint.url.clone());
        let latency = self.latency.lock().get(&endpoint.url).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.always_fail.lock().contains(&endpoint.url) {
            return Err(anyhow!("backend {} unavailable", endpoint.url));
        }
        {
            let mut failures = self.failures_left.lock();
            if let Some(left) = failures.get_mut(&endpoint.url) {
                if *left > 0 {
                    *left -= 1;
                    return Err(anyhow!("backend {} returned 503", endpoint.url));
                }
            }
        }
        Ok(format!("{}:{payload}", endpoint.url))
    }
}

// ============================================================================
// Task delivery
// ============================================================================

/// Delivery that records delivered task ids and can be switched to fail.
#[derive(Default)]
pub struct RecordingDelivery {
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
    delivered: Mutex<Vec<TaskId>>,
    calls: AtomicUsize,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let delivery = Self::default();
        delivery.set_failing(true);
        delivery
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock() = Some(delay);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<TaskId> {
        self.delivered.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendExecutor<ScheduledTask, ()> for RecordingDelivery {
    async fn call(&self, endpoint: &Endpoint, task: &ScheduledTask) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("delivery via {} failed", endpoint.url));
        }
        self.delivered.lock().push(task.id);
        Ok(())
    }
}

// ============================================================================
// Health probe
// ============================================================================

/// Probe reporting endpoints listed as down as failing.
#[derive(Default)]
pub struct ScriptedProbe {
    down: Mutex<HashSet<String>>,
    hang: AtomicBool,
    probed: Mutex<Vec<String>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_down(&self, url: &str, down: bool) {
        let mut set = self.down.lock();
        if down {
            set.insert(url.to_string());
        } else {
            set.remove(url);
        }
    }

    /// Make every probe hang far beyond any probe timeout.
    pub fn set_hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    pub fn probed(&self) -> Vec<String> {
        self.probed.lock().clone()
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self, endpoint: &Endpoint) -> anyhow::Result<()> {
        self.probed.lock().push(endpoint.url.clone());
        if self.hang.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }
        if self.down.lock().contains(&endpoint.url) {
            return Err(anyhow!("connection refused"));
        }
        Ok(())
    }
}

// ============================================================================
// System metrics
// ============================================================================

/// Metrics with values set by the test.
pub struct FakeMetrics {
    cpu_millis: AtomicU64,
    used: AtomicU64,
    total: AtomicU64,
}

impl FakeMetrics {
    pub fn new(cpu_load: f64, used_bytes: u64, total_bytes: u64) -> Self {
        let metrics = Self {
            cpu_millis: AtomicU64::new(0),
            used: AtomicU64::new(used_bytes),
            total: AtomicU64::new(total_bytes),
        };
        metrics.set_cpu(cpu_load);
        metrics
    }

    /// Idle host with 16 GB of memory, 1 GB used.
    pub fn idle() -> Self {
        Self::new(0.05, GB, 16 * GB)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn set_cpu(&self, load: f64) {
        self.cpu_millis
            .store((load * 1000.0).round() as u64, Ordering::SeqCst);
    }

    pub fn set_used(&self, used_bytes: u64) {
        self.used.store(used_bytes, Ordering::SeqCst);
    }
}

impl SystemMetrics for FakeMetrics {
    #[allow(clippy::cast_precision_loss)]
    fn cpu_load(&self) -> f64 {
        self.cpu_millis.load(Ordering::SeqCst) as f64 / 1000.0
    }

    fn memory_used_bytes(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }

    fn memory_total_bytes(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }
}
