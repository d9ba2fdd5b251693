//! Persistent task scheduler: polls the store for due tasks and delivers them
//! through the concurrency queue and the capability's endpoint pool.
//!
//! Retries across time live here and are bounded by each task's
//! `max_attempts`; retries across endpoints live in the pool. A failed
//! attempt (including a saturated queue or exhausted pool) increments
//! `attempts` and leaves the task `approved` until the budget is spent, at
//! which point it becomes `failed`. Nothing is dropped silently.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::core::audit::{build_audit_event, AuditAction, AuditSink};
use crate::core::concurrency_queue::ConcurrencyQueue;
use crate::core::error::DispatchError;
use crate::core::executor::BackendExecutor;
use crate::core::registry::EndpointRegistry;
use crate::core::task::{DueQuery, NewTask, ScheduledTask, TaskPatch, TaskStatus, TaskStore};
use crate::util::clock::{duration_ms, now_ms};
use crate::util::serde::{OwnerKey, TaskId};

/// Delivers a scheduled task to one endpoint.
pub type TaskDelivery = dyn BackendExecutor<ScheduledTask, ()>;

/// Result of one dispatch attempt.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Delivered; the task is now `sent`.
    Sent(ScheduledTask),
    /// Attempt failed with attempts left; the task stays `approved`.
    Retrying {
        /// Updated record.
        task: ScheduledTask,
        /// Why the attempt failed.
        error: DispatchError,
    },
    /// Last attempt failed; the task is now `failed`.
    Failed(ScheduledTask),
    /// Expiry passed; the task is now `expired`.
    Expired(ScheduledTask),
    /// Another dispatch of the same task is in flight.
    Skipped(TaskId),
}

impl DispatchOutcome {
    /// Map to the error taxonomy: `Ok` only for a delivered task. A skipped
    /// dispatch maps to [`DispatchError::DispatchInFlight`].
    pub fn into_result(self) -> Result<ScheduledTask, DispatchError> {
        match self {
            Self::Sent(task) => Ok(task),
            Self::Retrying { error, .. } => Err(error),
            Self::Failed(task) => Err(DispatchError::MaxAttemptsExceeded {
                id: task.id,
                attempts: task.attempts,
            }),
            Self::Expired(task) => Err(DispatchError::TaskExpired(task.id)),
            Self::Skipped(id) => Err(DispatchError::DispatchInFlight(id)),
        }
    }
}

/// Counts from one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollReport {
    /// Tasks returned by the due query.
    pub due: usize,
    /// Delivered.
    pub sent: usize,
    /// Failed with attempts left.
    pub retrying: usize,
    /// Failed terminally.
    pub failed: usize,
    /// Marked expired.
    pub expired: usize,
    /// Already in flight from an overlapping poll.
    pub skipped: usize,
    /// Store errors hit while recording outcomes.
    pub errors: Vec<String>,
}

/// Removes a task from the claim set when its dispatch ends.
struct Claim<'a> {
    claims: &'a Mutex<HashSet<TaskId>>,
    id: TaskId,
}

impl<'a> Claim<'a> {
    fn acquire(claims: &'a Mutex<HashSet<TaskId>>, id: TaskId) -> Option<Self> {
        claims.lock().insert(id).then_some(Self { claims, id })
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.claims.lock().remove(&self.id);
    }
}

/// Owns every scheduled task record and drives them through their lifecycle.
pub struct TaskScheduler {
    store: Arc<dyn TaskStore>,
    queue: Arc<ConcurrencyQueue>,
    registry: Arc<EndpointRegistry>,
    delivery: Arc<TaskDelivery>,
    config: SchedulerConfig,
    audit: Option<Arc<dyn AuditSink>>,
    claims: Mutex<HashSet<TaskId>>,
}

impl TaskScheduler {
    /// Build a scheduler.
    pub fn new(
        store: Arc<dyn TaskStore>,
        queue: Arc<ConcurrencyQueue>,
        registry: Arc<EndpointRegistry>,
        delivery: Arc<TaskDelivery>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
            delivery,
            config,
            audit: None,
            claims: Mutex::new(HashSet::new()),
        }
    }

    /// Record lifecycle transitions to `audit`.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Scheduler settings.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Create a task and return its id. The capability must have a pool.
    pub async fn create_task(&self, new: NewTask) -> Result<TaskId, DispatchError> {
        self.registry.get(&new.capability)?;
        let task = new.into_task(self.config.max_attempts, now_ms())?;
        let id = task.id;
        self.store.insert_task(task.clone()).await?;
        info!(
            task_id = %id,
            owner = %task.owner,
            capability = %task.capability,
            scheduled_at_ms = task.scheduled_at_ms,
            status = %task.status,
            "task created"
        );
        self.record(&task, AuditAction::Create, None);
        Ok(id)
    }

    /// Fetch one task.
    pub async fn get_task(&self, id: TaskId) -> Result<ScheduledTask, DispatchError> {
        self.store
            .get_task(id)
            .await?
            .ok_or(DispatchError::TaskNotFound(id))
    }

    /// Move a pending task to approved. Approving an approved task is a no-op.
    pub async fn approve_task(&self, id: TaskId) -> Result<ScheduledTask, DispatchError> {
        let task = self.get_task(id).await?;
        if task.status == TaskStatus::Approved {
            return Ok(task);
        }
        let task = self
            .store
            .update_task_status(id, TaskPatch::status(TaskStatus::Approved))
            .await?;
        info!(task_id = %id, "task approved");
        self.record(&task, AuditAction::Approve, None);
        Ok(task)
    }

    /// Cancel a task. Returns `false` only when no such task exists;
    /// cancelling a terminal task is a successful no-op.
    pub async fn cancel_task(&self, id: TaskId) -> Result<bool, DispatchError> {
        let Some(task) = self.store.get_task(id).await? else {
            return Ok(false);
        };
        if task.status.is_terminal() {
            debug!(task_id = %id, status = %task.status, "cancel of terminal task ignored");
            return Ok(true);
        }
        let task = self
            .store
            .update_task_status(
                id,
                TaskPatch::status(TaskStatus::Cancelled).with_finished_at(now_ms()),
            )
            .await?;
        info!(task_id = %id, "task cancelled");
        self.record(&task, AuditAction::Cancel, None);
        Ok(true)
    }

    /// Remove a task record. Idempotent; returns whether a record was removed.
    pub async fn delete_task(&self, id: TaskId) -> Result<bool, DispatchError> {
        let existing = self.store.get_task(id).await?;
        let removed = self.store.delete_task(id).await?;
        if let (true, Some(task)) = (removed, existing) {
            info!(task_id = %id, "task deleted");
            self.record(&task, AuditAction::Delete, None);
        }
        Ok(removed)
    }

    /// Tasks of one owner, including terminal ones.
    pub async fn list_tasks(&self, owner: &OwnerKey) -> Result<Vec<ScheduledTask>, DispatchError> {
        self.store.list_tasks(owner).await
    }

    /// Attempt an approved task immediately, ignoring its schedule and the
    /// retry delay.
    pub async fn retry_now(&self, id: TaskId, now_ms: u64) -> Result<DispatchOutcome, DispatchError> {
        let task = self.get_task(id).await?;
        if task.status != TaskStatus::Approved {
            return Err(DispatchError::InvalidTransition {
                id,
                from: task.status,
                to: TaskStatus::Sent,
            });
        }
        if !task.has_attempts_left() {
            return Err(DispatchError::MaxAttemptsExceeded {
                id,
                attempts: task.attempts,
            });
        }
        let Some(_claim) = Claim::acquire(&self.claims, id) else {
            return Ok(DispatchOutcome::Skipped(id));
        };
        self.dispatch(task, now_ms).await
    }

    /// Dispatch every due task once and expire the ones past their expiry.
    pub async fn poll_once(&self, now_ms: u64) -> Result<PollReport, DispatchError> {
        let query = DueQuery {
            now_ms,
            retry_delay_ms: self.config.retry_delay_ms,
        };
        let due = self.store.find_due_tasks(query).await?;
        let mut report = PollReport {
            due: due.len(),
            ..PollReport::default()
        };

        let runs = due.into_iter().map(move |task| async move {
            let id = task.id;
            let Some(_claim) = Claim::acquire(&self.claims, id) else {
                return (id, Ok(DispatchOutcome::Skipped(id)));
            };
            (id, self.dispatch(task, now_ms).await)
        });

        for (id, outcome) in join_all(runs).await {
            match outcome {
                Ok(DispatchOutcome::Sent(_)) => report.sent += 1,
                Ok(DispatchOutcome::Retrying { .. }) => report.retrying += 1,
                Ok(DispatchOutcome::Failed(_)) => report.failed += 1,
                Ok(DispatchOutcome::Expired(_)) => report.expired += 1,
                Ok(DispatchOutcome::Skipped(_)) => report.skipped += 1,
                Err(err) => {
                    error!(task_id = %id, error = %err, "failed to record dispatch outcome");
                    report.errors.push(format!("{id}: {err}"));
                }
            }
        }
        Ok(report)
    }

    /// Remove terminal tasks that finished more than `retention` before
    /// `now_ms`. Returns how many records were removed.
    pub async fn cleanup(&self, retention: Duration, now_ms: u64) -> Result<usize, DispatchError> {
        let cutoff = now_ms.saturating_sub(duration_ms(retention));
        let pruned = self.store.prune_terminal(cutoff).await?;
        if pruned > 0 {
            info!(pruned, cutoff_ms = cutoff, "terminal tasks pruned");
        }
        Ok(pruned)
    }

    /// Poll on the configured interval until `shutdown` is cancelled. When a
    /// retention is configured, terminal tasks older than it are pruned
    /// after each poll.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let period = self.config.poll_interval();
        info!(interval_ms = duration_ms(period), "task scheduler starting");
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    info!("task scheduler shutting down");
                    break;
                }

                _ = interval.tick() => {
                    let now = now_ms();
                    match self.poll_once(now).await {
                        Ok(report) if report.due > 0 => info!(
                            due = report.due,
                            sent = report.sent,
                            retrying = report.retrying,
                            failed = report.failed,
                            expired = report.expired,
                            skipped = report.skipped,
                            errors = report.errors.len(),
                            "poll complete"
                        ),
                        Ok(_) => debug!("poll found no due tasks"),
                        Err(err) => error!(error = %err, "poll failed"),
                    }
                    if let Some(retention) = self.config.retention() {
                        if let Err(err) = self.cleanup(retention, now).await {
                            error!(error = %err, "task cleanup failed");
                        }
                    }
                }
            }
        }
    }

    async fn dispatch(&self, task: ScheduledTask, now_ms: u64) -> Result<DispatchOutcome, DispatchError> {
        if task.is_expired(now_ms) {
            let task = self
                .store
                .update_task_status(
                    task.id,
                    TaskPatch::status(TaskStatus::Expired).with_finished_at(now_ms),
                )
                .await?;
            info!(task_id = %task.id, attempts = task.attempts, "task expired");
            self.record(&task, AuditAction::Expire, None);
            return Ok(DispatchOutcome::Expired(task));
        }

        self.record(&task, AuditAction::Attempt, None);
        debug!(
            task_id = %task.id,
            capability = %task.capability,
            attempt = task.attempts + 1,
            "dispatching task"
        );

        let delivered = match self.registry.get(&task.capability) {
            Ok(pool) => {
                let delivery = self.delivery.as_ref();
                let payload = &task;
                self.queue
                    .submit(&task.capability, async move {
                        pool.execute_with(delivery, payload).await
                    })
                    .await
            }
            Err(err) => Err(err),
        };

        match delivered {
            Ok(()) => {
                let patch = TaskPatch::status(TaskStatus::Sent)
                    .with_last_attempt_at(now_ms)
                    .with_sent_at(now_ms)
                    .with_finished_at(now_ms);
                let task = self.store.update_task_status(task.id, patch).await?;
                info!(task_id = %task.id, capability = %task.capability, "task sent");
                self.record(&task, AuditAction::Sent, None);
                Ok(DispatchOutcome::Sent(task))
            }
            Err(err) => {
                let attempts = (task.attempts + 1).min(task.max_attempts);
                let message = err.to_string();
                let mut patch = TaskPatch::default()
                    .with_attempts(attempts)
                    .with_last_attempt_at(now_ms)
                    .with_error(message.clone());
                let exhausted = attempts >= task.max_attempts;
                if exhausted {
                    patch.status = Some(TaskStatus::Failed);
                    patch.finished_at_ms = Some(now_ms);
                }
                let task = self.store.update_task_status(task.id, patch).await?;
                if exhausted {
                    warn!(task_id = %task.id, attempts, error = %message, "task failed, attempts exhausted");
                    self.record(&task, AuditAction::Fail, Some(message));
                    Ok(DispatchOutcome::Failed(task))
                } else {
                    warn!(
                        task_id = %task.id,
                        attempts,
                        max_attempts = task.max_attempts,
                        error = %message,
                        "task attempt failed, will retry"
                    );
                    self.record(&task, AuditAction::Retry, Some(message));
                    Ok(DispatchOutcome::Retrying { task, error: err })
                }
            }
        }
    }

    fn record(&self, task: &ScheduledTask, action: AuditAction, detail: Option<String>) {
        if let Some(audit) = &self.audit {
            audit.record(build_audit_event(task, action, detail));
        }
    }
}
