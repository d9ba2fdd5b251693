//! Concurrency budgets and the load-driven controller that adjusts them.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::DynamicConcurrencyConfig;
use crate::core::concurrency_queue::ConcurrencyQueue;
use crate::core::error::DispatchError;
use crate::core::metrics::SystemMetrics;
use crate::util::clock::{duration_ms, now_ms};
use crate::util::serde::Capability;

/// Fraction of a threshold below which load counts as comfortably low.
pub const HEADROOM_RATIO: f64 = 0.8;

/// Allowed number of simultaneously running tasks for one capability.
///
/// `current` always stays within `[min, max]`. In fixed mode `min`, `max` and
/// `current` are equal and never change.
#[derive(Debug)]
pub struct ConcurrencyBudget {
    capability: Capability,
    min: usize,
    max: usize,
    current: AtomicUsize,
    cpu_threshold: f64,
    mem_threshold: f64,
    last_adjusted_at_ms: AtomicU64,
    dynamic: bool,
}

/// Serializable view of a budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    /// Capability the budget belongs to.
    pub capability: Capability,
    /// Lower bound.
    pub min: usize,
    /// Upper bound.
    pub max: usize,
    /// Current limit.
    pub current: usize,
    /// CPU threshold.
    pub cpu_threshold: f64,
    /// Memory threshold.
    pub mem_threshold: f64,
    /// Last adjustment time, if any.
    pub last_adjusted_at_ms: Option<u64>,
    /// Whether the controller may change `current`.
    pub dynamic: bool,
}

impl ConcurrencyBudget {
    /// Static budget; a concurrency of zero is raised to one.
    #[must_use]
    pub fn fixed(capability: Capability, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            capability,
            min: concurrency,
            max: concurrency,
            current: AtomicUsize::new(concurrency),
            cpu_threshold: 1.0,
            mem_threshold: 1.0,
            last_adjusted_at_ms: AtomicU64::new(0),
            dynamic: false,
        }
    }

    /// Dynamic budget starting at `initial`, clamped into the bounds.
    pub fn dynamic(
        capability: Capability,
        config: &DynamicConcurrencyConfig,
        initial: usize,
    ) -> Result<Self, DispatchError> {
        config.validate().map_err(|e| {
            DispatchError::InvalidConfig(format!("dynamic concurrency for `{capability}`: {e}"))
        })?;
        Ok(Self {
            capability,
            min: config.min,
            max: config.max,
            current: AtomicUsize::new(initial.clamp(config.min, config.max)),
            cpu_threshold: config.cpu_threshold,
            mem_threshold: config.mem_threshold,
            last_adjusted_at_ms: AtomicU64::new(0),
            dynamic: true,
        })
    }

    /// Capability the budget belongs to.
    #[must_use]
    pub const fn capability(&self) -> &Capability {
        &self.capability
    }

    /// Current limit.
    #[must_use]
    pub fn current(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    /// Lower bound.
    #[must_use]
    pub const fn min(&self) -> usize {
        self.min
    }

    /// Upper bound.
    #[must_use]
    pub const fn max(&self) -> usize {
        self.max
    }

    /// Whether the controller may adjust the limit.
    #[must_use]
    pub const fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    /// Serializable view.
    #[must_use]
    pub fn snapshot(&self) -> BudgetSnapshot {
        let last = self.last_adjusted_at_ms.load(Ordering::Acquire);
        BudgetSnapshot {
            capability: self.capability.clone(),
            min: self.min,
            max: self.max,
            current: self.current(),
            cpu_threshold: self.cpu_threshold,
            mem_threshold: self.mem_threshold,
            last_adjusted_at_ms: (last > 0).then_some(last),
            dynamic: self.dynamic,
        }
    }

    /// Lower the limit by one. Returns `(from, to)` if it changed.
    pub(crate) fn step_down(&self, at_ms: u64) -> Option<(usize, usize)> {
        self.step(at_ms, |current| (current > self.min).then(|| current - 1))
    }

    /// Raise the limit by one. Returns `(from, to)` if it changed.
    pub(crate) fn step_up(&self, at_ms: u64) -> Option<(usize, usize)> {
        self.step(at_ms, |current| (current < self.max).then(|| current + 1))
    }

    fn step(&self, at_ms: u64, next: impl Fn(usize) -> Option<usize>) -> Option<(usize, usize)> {
        if !self.dynamic {
            return None;
        }
        let from = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, &next)
            .ok()?;
        let to = next(from)?;
        self.last_adjusted_at_ms.store(at_ms, Ordering::Release);
        Some((from, to))
    }
}

/// Result of one controller tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Adjustment {
    /// Load above a threshold; limit lowered.
    Decreased {
        /// Previous limit.
        from: usize,
        /// New limit.
        to: usize,
    },
    /// Load comfortably low; limit raised.
    Increased {
        /// Previous limit.
        from: usize,
        /// New limit.
        to: usize,
    },
    /// No change (in the dead band or already at a bound).
    Unchanged,
    /// Budget is fixed.
    Disabled,
}

/// Steps one capability's concurrency up or down from CPU and memory load.
pub struct DynamicConcurrencyController {
    queue: Arc<ConcurrencyQueue>,
    budget: Arc<ConcurrencyBudget>,
    metrics: Arc<dyn SystemMetrics>,
    interval: Duration,
}

impl DynamicConcurrencyController {
    /// Controller for the lane of `capability` in `queue`.
    pub fn new(
        queue: Arc<ConcurrencyQueue>,
        capability: &Capability,
        metrics: Arc<dyn SystemMetrics>,
        interval: Duration,
    ) -> Result<Self, DispatchError> {
        let budget = queue.budget(capability)?;
        Ok(Self {
            queue,
            budget,
            metrics,
            interval,
        })
    }

    /// Budget under control.
    #[must_use]
    pub const fn budget(&self) -> &Arc<ConcurrencyBudget> {
        &self.budget
    }

    /// Read load once and move the limit by at most one step.
    pub fn adjust_once(&self) -> Adjustment {
        if !self.budget.is_dynamic() {
            return Adjustment::Disabled;
        }
        let cpu = self.metrics.cpu_load();
        let mem = self.metrics.memory_utilization();
        let budget = &self.budget;
        let now = now_ms();

        if cpu > budget.cpu_threshold || mem > budget.mem_threshold {
            return match budget.step_down(now) {
                Some((from, to)) => {
                    info!(
                        capability = %budget.capability,
                        cpu_load = cpu,
                        mem_utilization = mem,
                        from,
                        to,
                        "concurrency decreased"
                    );
                    Adjustment::Decreased { from, to }
                }
                None => Adjustment::Unchanged,
            };
        }

        if cpu < budget.cpu_threshold * HEADROOM_RATIO && mem < budget.mem_threshold * HEADROOM_RATIO {
            if let Some((from, to)) = budget.step_up(now) {
                info!(
                    capability = %budget.capability,
                    cpu_load = cpu,
                    mem_utilization = mem,
                    from,
                    to,
                    "concurrency increased"
                );
                self.queue.pump(&budget.capability);
                return Adjustment::Increased { from, to };
            }
        }

        Adjustment::Unchanged
    }

    /// Tick until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            capability = %self.budget.capability,
            interval_ms = duration_ms(self.interval),
            min = self.budget.min,
            max = self.budget.max,
            "dynamic concurrency controller starting"
        );
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; let load settle first.
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    info!(capability = %self.budget.capability, "dynamic concurrency controller shutting down");
                    break;
                }

                _ = interval.tick() => {
                    let adjustment = self.adjust_once();
                    debug!(capability = %self.budget.capability, ?adjustment, "concurrency tick");
                }
            }
        }
    }
}
