//! Builders turning a [`DispatchConfig`] into pools, queues and a dispatcher.

use std::sync::Arc;

use crate::config::{CapabilityConfig, DispatchConfig, MemoryConfig};
use crate::core::audit::AuditSink;
use crate::core::concurrency_queue::{ConcurrencyQueue, LaneLimits};
use crate::core::dynamic_concurrency::ConcurrencyBudget;
use crate::core::endpoint_pool::EndpointPool;
use crate::core::error::DispatchError;
use crate::core::health::HealthProbe;
use crate::core::metrics::SystemMetrics;
use crate::core::registry::EndpointRegistry;
use crate::core::scheduler::{TaskDelivery, TaskScheduler};
use crate::core::task::TaskStore;
use crate::infra::store::InMemoryTaskStore;
use crate::runtime::dispatcher::Dispatcher;
use crate::util::serde::Capability;

/// Build the pool for one configured capability.
pub fn build_pool(name: &str, cfg: &CapabilityConfig) -> Result<EndpointPool, DispatchError> {
    EndpointPool::new(Capability::new(name), cfg.pool.clone(), &cfg.endpoints)
}

/// Build the concurrency budget for one configured capability.
pub fn build_budget(name: &str, cfg: &CapabilityConfig) -> Result<ConcurrencyBudget, DispatchError> {
    let capability = Capability::new(name);
    match &cfg.queue.dynamic {
        Some(dynamic) => ConcurrencyBudget::dynamic(capability, dynamic, cfg.queue.concurrency),
        None => Ok(ConcurrencyBudget::fixed(capability, cfg.queue.concurrency)),
    }
}

/// Build a registry holding one pool per configured capability.
pub fn build_registry(cfg: &DispatchConfig) -> Result<EndpointRegistry, DispatchError> {
    cfg.validate()
        .map_err(|e| DispatchError::InvalidConfig(format!("config invalid: {e}")))?;

    let registry = EndpointRegistry::new();
    for (name, capability) in &cfg.capabilities {
        registry.insert(build_pool(name, capability)?)?;
    }
    Ok(registry)
}

/// Build a queue with one lane per configured capability.
pub fn build_queue(
    cfg: &DispatchConfig,
    metrics: Option<Arc<dyn SystemMetrics>>,
) -> Result<ConcurrencyQueue, DispatchError> {
    cfg.validate()
        .map_err(|e| DispatchError::InvalidConfig(format!("config invalid: {e}")))?;

    let memory: MemoryConfig = cfg.memory.clone();
    let mut queue = ConcurrencyQueue::new(memory);
    if let Some(metrics) = metrics {
        queue = queue.with_metrics(metrics);
    }
    for (name, capability) in &cfg.capabilities {
        let limits = LaneLimits::from(&capability.queue);
        queue = queue.with_lane(build_budget(name, capability)?, limits);
    }
    Ok(queue)
}

/// Assembles a [`Dispatcher`] from configuration and collaborators.
///
/// Only the delivery executor is required. Defaults: in-memory task store, no
/// metrics source (no memory backpressure, no dynamic concurrency), HTTP
/// probes on each pool's `health_path`, no audit sink.
pub struct DispatcherBuilder {
    config: DispatchConfig,
    store: Option<Arc<dyn TaskStore>>,
    metrics: Option<Arc<dyn SystemMetrics>>,
    probe: Option<Arc<dyn HealthProbe>>,
    delivery: Option<Arc<TaskDelivery>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl DispatcherBuilder {
    /// Start from a configuration.
    #[must_use]
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config,
            store: None,
            metrics: None,
            probe: None,
            delivery: None,
            audit: None,
        }
    }

    /// Durable store for scheduled tasks.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// System metrics for memory backpressure and dynamic concurrency.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn SystemMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Probe used for every pool instead of the HTTP default.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Executor delivering scheduled tasks.
    #[must_use]
    pub fn with_delivery(mut self, delivery: Arc<TaskDelivery>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    /// Audit sink for task lifecycle events.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Validate the configuration and wire everything together.
    pub fn build(self) -> Result<Dispatcher, DispatchError> {
        let delivery = self.delivery.ok_or_else(|| {
            DispatchError::InvalidConfig("a delivery executor is required".into())
        })?;
        let registry = Arc::new(build_registry(&self.config)?);
        let queue = Arc::new(build_queue(&self.config, self.metrics.clone())?);
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new()));

        let mut scheduler = TaskScheduler::new(
            store,
            Arc::clone(&queue),
            Arc::clone(&registry),
            delivery,
            self.config.scheduler.clone(),
        );
        if let Some(audit) = self.audit {
            scheduler = scheduler.with_audit(audit);
        }

        Ok(Dispatcher::from_parts(
            self.config,
            registry,
            queue,
            Arc::new(scheduler),
            self.metrics,
            self.probe,
        ))
    }
}
