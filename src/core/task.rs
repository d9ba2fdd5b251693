//! Durable scheduled tasks, their state machine and the store they live in.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::DispatchError;
use crate::util::serde::{Capability, OwnerKey, TaskId};

/// Status of a scheduled task.
///
/// `Sent`, `Failed`, `Cancelled` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, waiting for approval.
    Pending,
    /// Eligible for dispatch once due.
    Approved,
    /// Delivered.
    Sent,
    /// Attempts exhausted.
    Failed,
    /// Cancelled by a caller.
    Cancelled,
    /// Expiry passed before delivery.
    Expired,
}

impl TaskStatus {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// No transition leaves a terminal status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Sent | Self::Failed | Self::Cancelled | Self::Expired
        )
    }

    /// Whether moving from `self` to `next` is allowed. Staying in the same
    /// non-terminal status is allowed.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => !matches!(next, Self::Sent),
            Self::Approved => !matches!(next, Self::Pending),
            Self::Sent | Self::Failed | Self::Cancelled | Self::Expired => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable unit of deferred work, such as a reminder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// Task identifier.
    pub id: TaskId,
    /// Who the task belongs to.
    pub owner: OwnerKey,
    /// Backend capability used for delivery.
    pub capability: Capability,
    /// Human-readable description.
    pub description: String,
    /// Free-form data for the executor.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Earliest dispatch time (ms since epoch).
    pub scheduled_at_ms: u64,
    /// After this instant the task expires instead of being sent.
    pub expiry_at_ms: Option<u64>,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Failed attempts so far.
    pub attempts: u32,
    /// Attempt budget.
    pub max_attempts: u32,
    /// Time of the latest attempt.
    pub last_attempt_at_ms: Option<u64>,
    /// Creation time.
    pub created_at_ms: u64,
    /// Message of the latest failure.
    pub last_error: Option<String>,
    /// Delivery time.
    pub sent_at_ms: Option<u64>,
    /// When the task reached a terminal status.
    #[serde(default)]
    pub finished_at_ms: Option<u64>,
}

impl ScheduledTask {
    /// Whether the expiry has passed at `now_ms`.
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expiry_at_ms.is_some_and(|expiry| now_ms > expiry)
    }

    /// Whether the task still has attempts left.
    #[must_use]
    pub const fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Approved, due, not expired, attempts left and out of the retry delay.
    #[must_use]
    pub fn is_due(&self, query: &DueQuery) -> bool {
        self.status == TaskStatus::Approved
            && self.has_attempts_left()
            && self.scheduled_at_ms <= query.now_ms
            && !self.is_expired(query.now_ms)
            && self
                .last_attempt_at_ms
                .is_none_or(|last| last.saturating_add(query.retry_delay_ms) <= query.now_ms)
    }

    /// Terminal task that finished before `cutoff_ms`. Records written
    /// without a finish time fall back to their latest known timestamp.
    #[must_use]
    pub fn finished_before(&self, cutoff_ms: u64) -> bool {
        if !self.status.is_terminal() {
            return false;
        }
        let finished = self
            .finished_at_ms
            .or(self.sent_at_ms)
            .or(self.last_attempt_at_ms)
            .unwrap_or(self.created_at_ms);
        finished < cutoff_ms
    }

    /// Non-terminal task whose expiry passed; the poll marks it expired.
    #[must_use]
    pub fn needs_expiry(&self, now_ms: u64) -> bool {
        !self.status.is_terminal() && self.is_expired(now_ms)
    }

    /// Apply `patch`, enforcing the state machine and the attempt budget.
    pub fn apply(&mut self, patch: &TaskPatch) -> Result<(), DispatchError> {
        if let Some(next) = patch.status {
            if !self.status.can_transition_to(next) {
                return Err(DispatchError::InvalidTransition {
                    id: self.id,
                    from: self.status,
                    to: next,
                });
            }
        } else if self.status.is_terminal() && !patch.is_empty() {
            return Err(DispatchError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: self.status,
            });
        }
        if let Some(attempts) = patch.attempts {
            if attempts > self.max_attempts {
                return Err(DispatchError::MaxAttemptsExceeded {
                    id: self.id,
                    attempts,
                });
            }
            self.attempts = attempts;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(at) = patch.last_attempt_at_ms {
            self.last_attempt_at_ms = Some(at);
        }
        if let Some(error) = &patch.last_error {
            self.last_error = Some(error.clone());
        }
        if let Some(at) = patch.sent_at_ms {
            self.sent_at_ms = Some(at);
        }
        if let Some(at) = patch.finished_at_ms {
            self.finished_at_ms = Some(at);
        }
        Ok(())
    }
}

/// Partial update of a scheduled task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    /// New status.
    pub status: Option<TaskStatus>,
    /// New attempt count.
    pub attempts: Option<u32>,
    /// Attempt timestamp.
    pub last_attempt_at_ms: Option<u64>,
    /// Failure message.
    pub last_error: Option<String>,
    /// Delivery timestamp.
    pub sent_at_ms: Option<u64>,
    /// Terminal status timestamp.
    #[serde(default)]
    pub finished_at_ms: Option<u64>,
}

impl TaskPatch {
    /// Patch changing only the status.
    #[must_use]
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Set the attempt count.
    #[must_use]
    pub const fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Set the attempt timestamp.
    #[must_use]
    pub const fn with_last_attempt_at(mut self, at_ms: u64) -> Self {
        self.last_attempt_at_ms = Some(at_ms);
        self
    }

    /// Set the failure message.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    /// Set the delivery timestamp.
    #[must_use]
    pub const fn with_sent_at(mut self, at_ms: u64) -> Self {
        self.sent_at_ms = Some(at_ms);
        self
    }

    /// Set the terminal status timestamp.
    #[must_use]
    pub const fn with_finished_at(mut self, at_ms: u64) -> Self {
        self.finished_at_ms = Some(at_ms);
        self
    }

    /// Whether the patch changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.attempts.is_none()
            && self.last_attempt_at_ms.is_none()
            && self.last_error.is_none()
            && self.sent_at_ms.is_none()
            && self.finished_at_ms.is_none()
    }
}

/// Selection window for due tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueQuery {
    /// Poll instant.
    pub now_ms: u64,
    /// Minimum gap between attempts of one task.
    pub retry_delay_ms: u64,
}

/// Request to create a scheduled task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    /// Owner of the task.
    pub owner: OwnerKey,
    /// Delivery capability.
    pub capability: Capability,
    /// Human-readable description.
    pub description: String,
    /// Free-form data for the executor.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Earliest dispatch time.
    pub scheduled_at_ms: u64,
    /// Optional expiry.
    #[serde(default)]
    pub expiry_at_ms: Option<u64>,
    /// Attempt budget; the scheduler default applies when absent.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Start as `approved` (default) or `pending`.
    #[serde(default = "default_approved")]
    pub approved: bool,
}

const fn default_approved() -> bool {
    true
}

impl NewTask {
    /// Approved task with no expiry and the default attempt budget.
    pub fn new(
        owner: OwnerKey,
        capability: Capability,
        description: impl Into<String>,
        scheduled_at_ms: u64,
    ) -> Self {
        Self {
            owner,
            capability,
            description: description.into(),
            payload: serde_json::Value::Null,
            scheduled_at_ms,
            expiry_at_ms: None,
            max_attempts: None,
            approved: true,
        }
    }

    /// Expire the task after `expiry_at_ms`.
    #[must_use]
    pub const fn with_expiry(mut self, expiry_at_ms: u64) -> Self {
        self.expiry_at_ms = Some(expiry_at_ms);
        self
    }

    /// Override the attempt budget.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Attach executor data.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Require approval before the task can be dispatched.
    #[must_use]
    pub const fn pending(mut self) -> Self {
        self.approved = false;
        self
    }

    /// Materialize the record.
    pub fn into_task(self, default_max_attempts: u32, now_ms: u64) -> Result<ScheduledTask, DispatchError> {
        let max_attempts = self.max_attempts.unwrap_or(default_max_attempts);
        if max_attempts == 0 {
            return Err(DispatchError::InvalidConfig(
                "max_attempts must be at least 1".into(),
            ));
        }
        if let Some(expiry) = self.expiry_at_ms {
            if expiry < self.scheduled_at_ms {
                return Err(DispatchError::InvalidConfig(
                    "expiry must not precede the scheduled time".into(),
                ));
            }
        }
        Ok(ScheduledTask {
            id: TaskId::new_v4(),
            owner: self.owner,
            capability: self.capability,
            description: self.description,
            payload: self.payload,
            scheduled_at_ms: self.scheduled_at_ms,
            expiry_at_ms: self.expiry_at_ms,
            status: if self.approved {
                TaskStatus::Approved
            } else {
                TaskStatus::Pending
            },
            attempts: 0,
            max_attempts,
            last_attempt_at_ms: None,
            created_at_ms: now_ms,
            last_error: None,
            sent_at_ms: None,
            finished_at_ms: None,
        })
    }
}

/// Durable storage for scheduled tasks.
///
/// Only the scheduler writes through this trait. `update_task_status` must
/// enforce [`ScheduledTask::apply`] so no backend can break the state machine.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new record.
    async fn insert_task(&self, task: ScheduledTask) -> Result<(), DispatchError>;

    /// Tasks that are due (see [`ScheduledTask::is_due`]) plus non-terminal
    /// tasks whose expiry passed, ordered by scheduled time.
    async fn find_due_tasks(&self, query: DueQuery) -> Result<Vec<ScheduledTask>, DispatchError>;

    /// Apply a patch and return the updated record.
    async fn update_task_status(
        &self,
        id: TaskId,
        patch: TaskPatch,
    ) -> Result<ScheduledTask, DispatchError>;

    /// Remove a record. Returns whether it existed.
    async fn delete_task(&self, id: TaskId) -> Result<bool, DispatchError>;

    /// Fetch one record.
    async fn get_task(&self, id: TaskId) -> Result<Option<ScheduledTask>, DispatchError>;

    /// Records owned by `owner`, ordered by scheduled time.
    async fn list_tasks(&self, owner: &OwnerKey) -> Result<Vec<ScheduledTask>, DispatchError>;

    /// Remove terminal records that finished before `cutoff_ms`
    /// (see [`ScheduledTask::finished_before`]). Returns how many went.
    async fn prune_terminal(&self, cutoff_ms: u64) -> Result<usize, DispatchError>;
}
