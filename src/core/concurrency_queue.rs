//! Concurrency-limited job queue with memory admission control.
//!
//! Each capability gets its own lane. A lane runs at most
//! [`ConcurrencyBudget::current`] tasks at once and parks the rest in FIFO
//! order. While the host is over its memory threshold the whole queue is in
//! backpressure: new submissions are refused with
//! [`DispatchError::QueueSaturated`] and parked submissions are not started,
//! while tasks already running finish normally.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{MemoryConfig, QueueConfig};
use crate::core::dynamic_concurrency::ConcurrencyBudget;
use crate::core::error::DispatchError;
use crate::core::metrics::SystemMetrics;
use crate::util::clock::{duration_ms, now_ms};
use crate::util::serde::{Capability, TaskId};

/// Identity of one submission while it waits or runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTask {
    /// Submission identifier.
    pub id: TaskId,
    /// Lane the submission belongs to.
    pub capability: Capability,
    /// When the submission was accepted.
    pub enqueued_at_ms: u64,
}

/// Optional per-lane limits beyond the concurrency budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneLimits {
    /// Refuse new work once this many submissions are waiting.
    pub max_pending: Option<usize>,
    /// Upper bound on a running task.
    pub task_timeout: Option<Duration>,
}

impl From<&QueueConfig> for LaneLimits {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_pending: config.max_pending,
            task_timeout: config.task_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Counters and occupancy for one lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Lane capability.
    pub capability: Capability,
    /// Tasks currently running.
    pub running: usize,
    /// Tasks waiting for a slot.
    pub waiting: usize,
    /// Current concurrency limit.
    pub limit: usize,
    /// Submissions accepted.
    pub submitted: u64,
    /// Tasks that finished with success.
    pub completed: u64,
    /// Tasks that finished with an error or timed out.
    pub failed: u64,
    /// Submissions refused at admission.
    pub rejected: u64,
}

struct Waiter {
    task: QueueTask,
    tx: oneshot::Sender<SlotPermit>,
}

#[derive(Default)]
struct LaneState {
    running: usize,
    waiting: VecDeque<Waiter>,
}

struct Lane {
    capability: Capability,
    budget: Arc<ConcurrencyBudget>,
    limits: LaneLimits,
    backpressure: Arc<AtomicBool>,
    state: Mutex<LaneState>,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

impl Lane {
    /// Hand free slots to waiters in FIFO order. Caller holds the state lock.
    fn grant(self: &Arc<Self>, state: &mut LaneState) {
        if self.backpressure.load(Ordering::Acquire) {
            return;
        }
        while state.running < self.budget.current() {
            let Some(waiter) = state.waiting.pop_front() else {
                break;
            };
            state.running += 1;
            let permit = SlotPermit {
                lane: Arc::clone(self),
                armed: true,
            };
            if let Err(mut permit) = waiter.tx.send(permit) {
                // Submitter went away between parking and the grant.
                permit.armed = false;
                state.running -= 1;
            } else {
                debug!(capability = %self.capability, task_id = %waiter.task.id, "slot granted");
            }
        }
    }

    fn pump(self: &Arc<Self>) {
        let mut state = self.state.lock();
        self.grant(&mut state);
    }

    fn reject(&self, task_id: TaskId, reason: &str) -> DispatchError {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        warn!(capability = %self.capability, task_id = %task_id, reason, "submission rejected");
        DispatchError::QueueSaturated(self.capability.clone())
    }
}

/// A running slot; releasing it lets the next waiter start.
struct SlotPermit {
    lane: Arc<Lane>,
    armed: bool,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.lane.state.lock();
        state.running = state.running.saturating_sub(1);
        self.lane.grant(&mut state);
    }
}

/// Removes a parked submission if its future is dropped before the grant.
struct WaitGuard<'a> {
    lane: &'a Lane,
    task_id: TaskId,
    armed: bool,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.lane
                .state
                .lock()
                .waiting
                .retain(|waiter| waiter.task.id != self.task_id);
        }
    }
}

enum Admission {
    Ready(SlotPermit),
    Parked(oneshot::Receiver<SlotPermit>),
}

/// Per-capability concurrency lanes sharing one memory admission gate.
pub struct ConcurrencyQueue {
    lanes: HashMap<Capability, Arc<Lane>>,
    backpressure: Arc<AtomicBool>,
    memory: MemoryConfig,
    metrics: Option<Arc<dyn SystemMetrics>>,
}

impl ConcurrencyQueue {
    /// Queue without lanes; add them with [`with_lane`](Self::with_lane).
    #[must_use]
    pub fn new(memory: MemoryConfig) -> Self {
        Self {
            lanes: HashMap::new(),
            backpressure: Arc::new(AtomicBool::new(false)),
            memory,
            metrics: None,
        }
    }

    /// Memory source for admission control. Without one the queue never
    /// enters backpressure.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn SystemMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Add (or replace) the lane for the budget's capability.
    #[must_use]
    pub fn with_lane(mut self, budget: ConcurrencyBudget, limits: LaneLimits) -> Self {
        let capability = budget.capability().clone();
        let lane = Lane {
            capability: capability.clone(),
            budget: Arc::new(budget),
            limits,
            backpressure: Arc::clone(&self.backpressure),
            state: Mutex::new(LaneState::default()),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        };
        self.lanes.insert(capability, Arc::new(lane));
        self
    }

    /// Capabilities with a lane, sorted.
    #[must_use]
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps: Vec<Capability> = self.lanes.keys().cloned().collect();
        caps.sort();
        caps
    }

    /// Budget of a lane.
    pub fn budget(&self, capability: &Capability) -> Result<Arc<ConcurrencyBudget>, DispatchError> {
        Ok(Arc::clone(&self.lane(capability)?.budget))
    }

    /// Memory admission settings.
    #[must_use]
    pub const fn memory_config(&self) -> &MemoryConfig {
        &self.memory
    }

    /// Whether new work is currently refused.
    #[must_use]
    pub fn is_backpressured(&self) -> bool {
        self.backpressure.load(Ordering::Acquire)
    }

    /// Run `task` once a slot in the capability's lane is free.
    ///
    /// Refuses immediately with `QueueSaturated` under backpressure or when
    /// the lane's waiting line is full. The returned result is the task's own
    /// result, or `Timeout` if the lane bounds task duration and it elapsed.
    pub async fn submit<T, F>(&self, capability: &Capability, task: F) -> Result<T, DispatchError>
    where
        F: Future<Output = Result<T, DispatchError>>,
    {
        let lane = self.lane(capability)?;
        let entry = QueueTask {
            id: TaskId::new_v4(),
            capability: capability.clone(),
            enqueued_at_ms: now_ms(),
        };

        let admission = {
            let mut state = lane.state.lock();
            if self.is_backpressured() {
                return Err(lane.reject(entry.id, "memory backpressure"));
            }
            if state.waiting.is_empty() && state.running < lane.budget.current() {
                state.running += 1;
                Admission::Ready(SlotPermit {
                    lane: Arc::clone(&lane),
                    armed: true,
                })
            } else {
                if let Some(max) = lane.limits.max_pending {
                    if state.waiting.len() >= max {
                        return Err(lane.reject(entry.id, "waiting line full"));
                    }
                }
                let (tx, rx) = oneshot::channel();
                debug!(
                    capability = %capability,
                    task_id = %entry.id,
                    waiting = state.waiting.len() + 1,
                    "submission parked"
                );
                state.waiting.push_back(Waiter {
                    task: entry.clone(),
                    tx,
                });
                Admission::Parked(rx)
            }
        };
        lane.submitted.fetch_add(1, Ordering::Relaxed);

        let permit = match admission {
            Admission::Ready(permit) => permit,
            Admission::Parked(rx) => {
                let mut guard = WaitGuard {
                    lane: lane.as_ref(),
                    task_id: entry.id,
                    armed: true,
                };
                let permit = rx
                    .await
                    .map_err(|_| DispatchError::QueueClosed(capability.clone()))?;
                guard.armed = false;
                permit
            }
        };

        let result = match lane.limits.task_timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(result) => result,
                Err(_) => Err(DispatchError::Timeout(limit)),
            },
            None => task.await,
        };
        drop(permit);

        match &result {
            Ok(_) => lane.completed.fetch_add(1, Ordering::Relaxed),
            Err(_) => lane.failed.fetch_add(1, Ordering::Relaxed),
        };
        debug!(
            capability = %capability,
            task_id = %entry.id,
            ok = result.is_ok(),
            waited_ms = now_ms().saturating_sub(entry.enqueued_at_ms),
            "task finished"
        );
        result
    }

    /// Submissions currently waiting in a lane, oldest first.
    pub fn waiting_tasks(&self, capability: &Capability) -> Result<Vec<QueueTask>, DispatchError> {
        let lane = self.lane(capability)?;
        let state = lane.state.lock();
        Ok(state.waiting.iter().map(|w| w.task.clone()).collect())
    }

    /// Occupancy and counters for a lane.
    pub fn stats(&self, capability: &Capability) -> Result<QueueStats, DispatchError> {
        let lane = self.lane(capability)?;
        let (running, waiting) = {
            let state = lane.state.lock();
            (state.running, state.waiting.len())
        };
        Ok(QueueStats {
            capability: capability.clone(),
            running,
            waiting,
            limit: lane.budget.current(),
            submitted: lane.submitted.load(Ordering::Relaxed),
            completed: lane.completed.load(Ordering::Relaxed),
            failed: lane.failed.load(Ordering::Relaxed),
            rejected: lane.rejected.load(Ordering::Relaxed),
        })
    }

    /// Start waiters if the lane has room (after a budget increase).
    pub fn pump(&self, capability: &Capability) {
        if let Some(lane) = self.lanes.get(capability) {
            lane.pump();
        }
    }

    /// Compare used memory against the threshold and update backpressure.
    /// Returns whether the queue is backpressured afterwards.
    pub fn check_memory(&self) -> bool {
        let Some(metrics) = &self.metrics else {
            return false;
        };
        let used = metrics.memory_used_bytes();
        let threshold = self.memory.threshold_bytes();
        let over = used > threshold;
        let was = self.backpressure.swap(over, Ordering::AcqRel);
        if over && !was {
            info!(used_bytes = used, threshold_bytes = threshold, "memory backpressure on");
        } else if !over && was {
            info!(used_bytes = used, threshold_bytes = threshold, "memory backpressure off");
            for lane in self.lanes.values() {
                lane.pump();
            }
        }
        over
    }

    /// Check memory on the configured interval until `shutdown` is cancelled.
    pub async fn run_memory_monitor(self: Arc<Self>, shutdown: CancellationToken) {
        if self.metrics.is_none() {
            debug!("no metrics source, memory monitor not started");
            return;
        }
        let period = self.memory.check_interval();
        info!(interval_ms = duration_ms(period), "memory monitor starting");
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    info!("memory monitor shutting down");
                    break;
                }

                _ = interval.tick() => {
                    self.check_memory();
                }
            }
        }
    }

    fn lane(&self, capability: &Capability) -> Result<Arc<Lane>, DispatchError> {
        self.lanes
            .get(capability)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownCapability(capability.clone()))
    }
}
