//! Per-capability endpoint pool: selection, failover and status.
//!
//! The pool owns the health state of its endpoints. Live calls made through
//! [`EndpointPool::execute`] and probes run by the
//! [`HealthChecker`](crate::core::health::HealthChecker) both feed the same
//! counters, and selection only ever considers endpoints that are enabled and
//! currently healthy.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{EndpointConfig, PoolConfig};
use crate::core::endpoint::{Endpoint, EndpointHealth, Strategy};
use crate::core::error::DispatchError;
use crate::core::executor::BackendExecutor;
use crate::util::clock::{duration_ms, now_ms};
use crate::util::serde::Capability;

/// One registered endpoint and its mutable state.
#[derive(Debug)]
struct EndpointSlot {
    id: String,
    url: String,
    priority: u32,
    max_retries: u32,
    enabled: bool,
    health: RwLock<EndpointHealth>,
    in_flight: AtomicUsize,
}

impl EndpointSlot {
    fn snapshot(&self, capability: &Capability) -> Endpoint {
        let health = *self.health.read();
        Endpoint {
            id: self.id.clone(),
            url: self.url.clone(),
            capability: capability.clone(),
            priority: self.priority,
            max_retries: self.max_retries,
            enabled: self.enabled,
            healthy: health.healthy,
            last_latency_ms: health.last_latency_ms,
            last_checked_at_ms: health.last_checked_at_ms,
            consecutive_failures: health.consecutive_failures,
        }
    }
}

/// Decrements the in-flight counter when the attempt finishes, however it ends.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl<'a> InFlightGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Endpoint snapshot plus the number of calls currently running against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointStatus {
    /// Endpoint snapshot.
    #[serde(flatten)]
    pub endpoint: Endpoint,
    /// Calls currently in flight.
    pub in_flight: usize,
}

/// Aggregate counts for a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSummary {
    /// Registered endpoints.
    pub total: usize,
    /// Endpoints enabled in configuration.
    pub enabled: usize,
    /// Endpoints that are enabled and currently healthy.
    pub healthy: usize,
}

/// Point-in-time view of a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Capability served.
    pub capability: Capability,
    /// Selection strategy.
    pub strategy: Strategy,
    /// Endpoints in registration order.
    pub endpoints: Vec<EndpointStatus>,
    /// Aggregate counts.
    pub summary: HealthSummary,
}

/// A set of interchangeable endpoints serving one capability.
#[derive(Debug)]
pub struct EndpointPool {
    capability: Capability,
    config: PoolConfig,
    slots: Vec<EndpointSlot>,
    cursor: AtomicUsize,
}

impl EndpointPool {
    /// Build a pool. Endpoints keep their configuration order as registration
    /// order and start out healthy.
    pub fn new(
        capability: Capability,
        config: PoolConfig,
        endpoints: &[EndpointConfig],
    ) -> Result<Self, DispatchError> {
        config.validate().map_err(|e| {
            DispatchError::InvalidConfig(format!("pool `{capability}` invalid: {e}"))
        })?;

        let mut seen = HashSet::new();
        let mut slots = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            endpoint.validate().map_err(DispatchError::InvalidConfig)?;
            let id = endpoint.effective_id().to_string();
            if !seen.insert(id.clone()) {
                return Err(DispatchError::InvalidConfig(format!(
                    "duplicate endpoint `{id}` in pool `{capability}`"
                )));
            }
            slots.push(EndpointSlot {
                id,
                url: endpoint.url.clone(),
                priority: endpoint.priority,
                max_retries: endpoint.max_retries,
                enabled: endpoint.enabled,
                health: RwLock::new(EndpointHealth::default()),
                in_flight: AtomicUsize::new(0),
            });
        }

        Ok(Self {
            capability,
            config,
            slots,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Capability served by this pool.
    #[must_use]
    pub const fn capability(&self) -> &Capability {
        &self.capability
    }

    /// Selection strategy, fixed for the life of the pool.
    #[must_use]
    pub const fn strategy(&self) -> Strategy {
        self.config.strategy
    }

    /// Pool configuration.
    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Snapshots of every registered endpoint in registration order.
    #[must_use]
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.slots
            .iter()
            .map(|slot| slot.snapshot(&self.capability))
            .collect()
    }

    /// Whether at least one endpoint is enabled and healthy.
    #[must_use]
    pub fn has_healthy_endpoints(&self) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.enabled && slot.health.read().healthy)
    }

    /// Pick an endpoint with the pool's strategy.
    pub fn select_endpoint(&self) -> Result<Endpoint, DispatchError> {
        self.pick(&HashSet::new())
            .map(|idx| self.slots[idx].snapshot(&self.capability))
            .ok_or_else(|| DispatchError::NoHealthyEndpoint(self.capability.clone()))
    }

    /// Run `operation` against selected endpoints until one succeeds.
    ///
    /// Each endpoint gets `1 + max_retries` attempts, each bounded by the
    /// request timeout, with the retry delay between consecutive attempts.
    /// An endpoint that turns unhealthy stops being retried. Endpoints already
    /// tried during this call are never selected again.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, DispatchError>
    where
        F: FnMut(Endpoint) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let timeout = self.config.request_timeout();
        let retry_delay = self.config.retry_delay();
        let mut tried = HashSet::new();
        let mut attempts: u32 = 0;
        let mut last_error: Option<String> = None;

        while let Some(idx) = self.pick(&tried) {
            tried.insert(idx);
            let slot = &self.slots[idx];
            debug!(capability = %self.capability, endpoint = %slot.id, "endpoint selected");

            for _ in 0..=slot.max_retries {
                if attempts > 0 && !retry_delay.is_zero() {
                    tokio::time::sleep(retry_delay).await;
                }
                attempts += 1;

                let endpoint = slot.snapshot(&self.capability);
                let started = Instant::now();
                let outcome = {
                    let _in_flight = InFlightGuard::new(&slot.in_flight);
                    tokio::time::timeout(timeout, operation(endpoint)).await
                };

                let message = match outcome {
                    Ok(Ok(value)) => {
                        let latency = duration_ms(started.elapsed());
                        slot.health.write().record_success(latency, now_ms());
                        debug!(
                            capability = %self.capability,
                            endpoint = %slot.id,
                            latency_ms = latency,
                            attempts,
                            "backend call succeeded"
                        );
                        return Ok(value);
                    }
                    Ok(Err(err)) => format!("{err:#}"),
                    Err(_) => format!("timed out after {timeout:?}"),
                };

                warn!(
                    capability = %self.capability,
                    endpoint = %slot.id,
                    attempt = attempts,
                    error = %message,
                    "backend call failed"
                );
                last_error = Some(message);

                let mut health = slot.health.write();
                if health.record_failure() {
                    info!(
                        capability = %self.capability,
                        endpoint = %slot.id,
                        failures = health.consecutive_failures,
                        "endpoint marked unhealthy"
                    );
                }
                if !health.healthy {
                    break;
                }
            }
        }

        match last_error {
            None => Err(DispatchError::NoHealthyEndpoint(self.capability.clone())),
            Some(last_error) => Err(DispatchError::AllEndpointsExhausted {
                capability: self.capability.clone(),
                attempts,
                last_error,
            }),
        }
    }

    /// [`execute`](Self::execute) through a [`BackendExecutor`].
    pub async fn execute_with<P, T>(
        &self,
        executor: &dyn BackendExecutor<P, T>,
        payload: &P,
    ) -> Result<T, DispatchError>
    where
        P: Send + Sync,
        T: Send,
    {
        self.execute(move |endpoint| async move { executor.call(&endpoint, payload).await })
            .await
    }

    /// Point-in-time status of the pool.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let endpoints: Vec<EndpointStatus> = self
            .slots
            .iter()
            .map(|slot| EndpointStatus {
                endpoint: slot.snapshot(&self.capability),
                in_flight: slot.in_flight.load(Ordering::Acquire),
            })
            .collect();
        let summary = HealthSummary {
            total: endpoints.len(),
            enabled: endpoints.iter().filter(|s| s.endpoint.enabled).count(),
            healthy: endpoints.iter().filter(|s| s.endpoint.is_eligible()).count(),
        };
        PoolStatus {
            capability: self.capability.clone(),
            strategy: self.config.strategy,
            endpoints,
            summary,
        }
    }

    /// Enabled endpoints with their slot index, for the health checker.
    pub(crate) fn probe_targets(&self) -> Vec<(usize, Endpoint)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.enabled)
            .map(|(idx, slot)| (idx, slot.snapshot(&self.capability)))
            .collect()
    }

    /// Apply a successful probe: clears failures and restores liveness.
    pub(crate) fn record_probe_success(&self, idx: usize, latency_ms: u64) {
        let Some(slot) = self.slots.get(idx) else {
            return;
        };
        let mut health = slot.health.write();
        let recovered = !health.healthy;
        health.record_success(latency_ms, now_ms());
        health.healthy = true;
        if recovered {
            info!(capability = %self.capability, endpoint = %slot.id, "endpoint recovered");
        }
    }

    /// Apply a failed probe. Returns whether the endpoint is still healthy.
    pub(crate) fn record_probe_failure(&self, idx: usize) -> bool {
        let Some(slot) = self.slots.get(idx) else {
            return false;
        };
        let mut health = slot.health.write();
        health.last_checked_at_ms = Some(now_ms());
        if health.record_failure() {
            info!(
                capability = %self.capability,
                endpoint = %slot.id,
                failures = health.consecutive_failures,
                "endpoint marked unhealthy by health check"
            );
        }
        health.healthy
    }

    fn rank(&self, idx: usize, health: &EndpointHealth) -> (u32, u64, usize) {
        (
            self.slots[idx].priority,
            health.last_latency_ms.unwrap_or(u64::MAX),
            idx,
        )
    }

    fn pick(&self, exclude: &HashSet<usize>) -> Option<usize> {
        let candidates: Vec<(usize, EndpointHealth)> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(idx, slot)| slot.enabled && !exclude.contains(idx))
            .filter_map(|(idx, slot)| {
                let health = *slot.health.read();
                health.healthy.then_some((idx, health))
            })
            .collect();
        if candidates.is_empty() {
            return None;
        }

        match self.config.strategy {
            Strategy::RoundRobin => {
                let turn = self.cursor.fetch_add(1, Ordering::Relaxed);
                Some(candidates[turn % candidates.len()].0)
            }
            Strategy::Priority => candidates
                .iter()
                .min_by_key(|(idx, health)| self.rank(*idx, health))
                .map(|(idx, _)| *idx),
            Strategy::QueueLength => candidates
                .iter()
                .min_by_key(|(idx, health)| {
                    (
                        self.slots[*idx].in_flight.load(Ordering::Acquire),
                        self.rank(*idx, health),
                    )
                })
                .map(|(idx, _)| *idx),
        }
    }
}
