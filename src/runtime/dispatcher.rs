//! Dispatcher facade: the entry point collaborators use.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::DispatchConfig;
use crate::core::concurrency_queue::{ConcurrencyQueue, QueueStats};
use crate::core::dynamic_concurrency::DynamicConcurrencyController;
use crate::core::endpoint_pool::{EndpointPool, PoolStatus};
use crate::core::error::DispatchError;
use crate::core::executor::BackendExecutor;
use crate::core::health::{HealthChecker, HealthProbe};
use crate::core::metrics::SystemMetrics;
use crate::core::registry::EndpointRegistry;
use crate::core::scheduler::TaskScheduler;
use crate::core::task::{NewTask, ScheduledTask};
use crate::infra::probe::HttpProbe;
use crate::runtime::api::{CapabilityHealth, DispatchHealth};
use crate::runtime::background::{BackgroundTasks, LoopSpawner};
use crate::util::serde::{Capability, OwnerKey, TaskId};

/// Loops of a started dispatcher; health loops are tracked per capability so
/// a replaced pool gets a fresh checker.
struct Running {
    spawner: LoopSpawner,
    health: HashMap<Capability, CancellationToken>,
}

impl Running {
    fn is_active(&self) -> bool {
        !self.spawner.is_shut_down()
    }
}

/// Pools, queue and scheduler for all capabilities, built by
/// [`DispatcherBuilder`](crate::builders::DispatcherBuilder).
pub struct Dispatcher {
    config: DispatchConfig,
    registry: Arc<EndpointRegistry>,
    queue: Arc<ConcurrencyQueue>,
    scheduler: Arc<TaskScheduler>,
    metrics: Option<Arc<dyn SystemMetrics>>,
    probe: Option<Arc<dyn HealthProbe>>,
    running: Mutex<Option<Running>>,
}

impl Dispatcher {
    pub(crate) fn from_parts(
        config: DispatchConfig,
        registry: Arc<EndpointRegistry>,
        queue: Arc<ConcurrencyQueue>,
        scheduler: Arc<TaskScheduler>,
        metrics: Option<Arc<dyn SystemMetrics>>,
        probe: Option<Arc<dyn HealthProbe>>,
    ) -> Self {
        Self {
            config,
            registry,
            queue,
            scheduler,
            metrics,
            probe,
            running: Mutex::new(None),
        }
    }

    /// Configuration the dispatcher was built from.
    #[must_use]
    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Endpoint pools.
    #[must_use]
    pub const fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    /// Concurrency queue.
    #[must_use]
    pub const fn queue(&self) -> &Arc<ConcurrencyQueue> {
        &self.queue
    }

    /// Task scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    /// Run one ad-hoc call through the capability's queue lane and pool.
    ///
    /// Errors from the taxonomy are surfaced as-is; the caller decides
    /// whether to retry.
    pub async fn submit_work<P, T>(
        &self,
        capability: &Capability,
        executor: &dyn BackendExecutor<P, T>,
        payload: &P,
    ) -> Result<T, DispatchError>
    where
        P: Send + Sync,
        T: Send,
    {
        let pool = self.registry.get(capability)?;
        self.queue
            .submit(capability, async move { pool.execute_with(executor, payload).await })
            .await
    }

    /// Create a scheduled task.
    pub async fn create_task(&self, new: NewTask) -> Result<TaskId, DispatchError> {
        self.scheduler.create_task(new).await
    }

    /// Approve a pending task.
    pub async fn approve_task(&self, id: TaskId) -> Result<ScheduledTask, DispatchError> {
        self.scheduler.approve_task(id).await
    }

    /// Cancel a task; `false` only when it does not exist.
    pub async fn cancel_task(&self, id: TaskId) -> Result<bool, DispatchError> {
        self.scheduler.cancel_task(id).await
    }

    /// Delete a task record.
    pub async fn delete_task(&self, id: TaskId) -> Result<bool, DispatchError> {
        self.scheduler.delete_task(id).await
    }

    /// Tasks belonging to `owner`.
    pub async fn list_tasks(&self, owner: &OwnerKey) -> Result<Vec<ScheduledTask>, DispatchError> {
        self.scheduler.list_tasks(owner).await
    }

    /// Endpoints, strategy and health summary of one pool.
    pub fn get_pool_status(&self, capability: &Capability) -> Result<PoolStatus, DispatchError> {
        Ok(self.registry.get(capability)?.status())
    }

    /// Queue lane statistics of one capability.
    pub fn queue_stats(&self, capability: &Capability) -> Result<QueueStats, DispatchError> {
        self.queue.stats(capability)
    }

    /// Swap the pool of a capability that already has a queue lane.
    ///
    /// On a started dispatcher the old pool's health loop is stopped and one
    /// is spawned for the new pool; otherwise the new pool is probed from the
    /// next [`start`](Self::start).
    pub fn replace_pool(&self, pool: EndpointPool) -> Result<Option<Arc<EndpointPool>>, DispatchError> {
        self.queue.budget(pool.capability())?;
        let capability = pool.capability().clone();

        let mut running = self.running.lock();
        let previous = self.registry.replace(pool);
        if let Some(running) = running.as_mut().filter(|r| r.is_active()) {
            if let Some(old) = running.health.remove(&capability) {
                old.cancel();
            }
            let installed = self.registry.get(&capability)?;
            let token = self.spawn_health(&running.spawner, installed);
            running.health.insert(capability.clone(), token);
            info!(capability = %capability, "health loop restarted for replaced pool");
        }
        Ok(previous)
    }

    /// Whether loops from [`start`](Self::start) are still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.lock().as_ref().is_some_and(Running::is_active)
    }

    /// Overall liveness.
    #[must_use]
    pub fn health(&self) -> DispatchHealth {
        let capabilities: Vec<CapabilityHealth> = self
            .registry
            .pools()
            .iter()
            .map(|pool| {
                let summary = pool.status().summary;
                CapabilityHealth {
                    capability: pool.capability().clone(),
                    healthy: summary.healthy > 0,
                    healthy_endpoints: summary.healthy,
                }
            })
            .collect();
        let backpressure = self.queue.is_backpressured();
        DispatchHealth {
            ok: !backpressure && capabilities.iter().all(|c| c.healthy),
            backpressure,
            capabilities,
        }
    }

    /// Spawn health checks, the memory monitor, dynamic controllers and the
    /// scheduler loop on the current tokio runtime.
    ///
    /// Fails with [`DispatchError::AlreadyStarted`] while loops from an
    /// earlier call are running. After the returned [`BackgroundTasks`] is
    /// shut down or dropped the dispatcher can be started again.
    pub fn start(&self) -> Result<BackgroundTasks, DispatchError> {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(Running::is_active) {
            return Err(DispatchError::AlreadyStarted);
        }
        let mut tasks = BackgroundTasks::current()?;
        let spawner = tasks.spawner();

        let mut health = HashMap::new();
        for pool in self.registry.pools() {
            let capability = pool.capability().clone();
            health.insert(capability, self.spawn_health(&spawner, pool));
        }

        if self.metrics.is_some() {
            let queue = Arc::clone(&self.queue);
            tasks.spawn("memory-monitor", |token| queue.run_memory_monitor(token));
        }

        for (name, capability) in &self.config.capabilities {
            let Some(dynamic) = &capability.queue.dynamic else {
                continue;
            };
            let Some(metrics) = &self.metrics else {
                warn!(capability = %name, "dynamic concurrency configured without metrics source");
                continue;
            };
            let controller = DynamicConcurrencyController::new(
                Arc::clone(&self.queue),
                &Capability::new(name.as_str()),
                Arc::clone(metrics),
                dynamic.tick(),
            )?;
            tasks.spawn(format!("concurrency:{name}"), |token| controller.run(token));
        }

        let scheduler = Arc::clone(&self.scheduler);
        tasks.spawn("scheduler", |token| scheduler.run(token));

        *running = Some(Running { spawner, health });
        info!(tasks = tasks.len(), "dispatcher started");
        Ok(tasks)
    }

    fn spawn_health(&self, spawner: &LoopSpawner, pool: Arc<EndpointPool>) -> CancellationToken {
        let probe: Arc<dyn HealthProbe> = match &self.probe {
            Some(probe) => Arc::clone(probe),
            None => Arc::new(HttpProbe::new(pool.config().health_path.clone())),
        };
        let name = format!("health:{}", pool.capability());
        let checker = HealthChecker::new(pool, probe);
        spawner.spawn_scoped(name, |token| checker.run(token))
    }
}
