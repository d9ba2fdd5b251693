//! Periodic liveness probing for an endpoint pool.
//!
//! Probe outcomes only update pool state. Nothing here is surfaced to callers
//! of the pool; a failing probe is logged and counted, never raised.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::endpoint::Endpoint;
use crate::core::endpoint_pool::EndpointPool;
use crate::util::clock::duration_ms;

/// Upper bound on a single probe.
pub const MAX_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Lightweight liveness check against one endpoint.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Succeeds when the endpoint is alive.
    async fn probe(&self, endpoint: &Endpoint) -> anyhow::Result<()>;
}

/// Outcome counts of one probing round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Endpoints probed (enabled ones only).
    pub probed: usize,
    /// Endpoints healthy after the round.
    pub healthy: usize,
    /// Endpoints unhealthy after the round.
    pub unhealthy: usize,
}

/// Probes every enabled endpoint of one pool on a fixed interval.
pub struct HealthChecker {
    pool: Arc<EndpointPool>,
    probe: Arc<dyn HealthProbe>,
    probe_timeout: Duration,
    interval: Duration,
}

impl HealthChecker {
    /// Checker using the pool's health-check interval and a probe timeout of
    /// `min(5s, request timeout)`.
    pub fn new(pool: Arc<EndpointPool>, probe: Arc<dyn HealthProbe>) -> Self {
        let probe_timeout = pool.config().request_timeout().min(MAX_PROBE_TIMEOUT);
        let interval = pool.config().health_check_interval();
        Self {
            pool,
            probe,
            probe_timeout,
            interval,
        }
    }

    /// Override the probe timeout; still capped at five seconds.
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout.min(MAX_PROBE_TIMEOUT);
        self
    }

    /// Effective probe timeout.
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// Pool being checked.
    #[must_use]
    pub const fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }

    /// Probe all enabled endpoints concurrently and apply the results.
    pub async fn check_once(&self) -> HealthReport {
        let targets = self.pool.probe_targets();
        let probes = targets.into_iter().map(|(idx, endpoint)| async move {
            let started = Instant::now();
            let outcome = tokio::time::timeout(self.probe_timeout, self.probe.probe(&endpoint)).await;
            (idx, endpoint, started.elapsed(), outcome)
        });

        let mut report = HealthReport::default();
        for (idx, endpoint, elapsed, outcome) in join_all(probes).await {
            report.probed += 1;
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(format!("{err:#}")),
                Err(_) => Some(format!("probe timed out after {:?}", self.probe_timeout)),
            };
            let healthy = match failure {
                None => {
                    self.pool.record_probe_success(idx, duration_ms(elapsed));
                    true
                }
                Some(reason) => {
                    debug!(
                        capability = %self.pool.capability(),
                        endpoint = %endpoint.id,
                        reason = %reason,
                        "health probe failed"
                    );
                    self.pool.record_probe_failure(idx)
                }
            };
            if healthy {
                report.healthy += 1;
            } else {
                report.unhealthy += 1;
            }
        }
        report
    }

    /// Probe on the configured interval until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            capability = %self.pool.capability(),
            interval_ms = duration_ms(self.interval),
            "health checker starting"
        );
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    info!(capability = %self.pool.capability(), "health checker shutting down");
                    break;
                }

                _ = interval.tick() => {
                    let report = self.check_once().await;
                    debug!(
                        capability = %self.pool.capability(),
                        probed = report.probed,
                        healthy = report.healthy,
                        unhealthy = report.unhealthy,
                        "health check round complete"
                    );
                }
            }
        }
    }
}
