//! Audit trail for scheduled task lifecycle transitions.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::task::ScheduledTask;
use crate::util::clock::now_ms;
use crate::util::serde::{Capability, TaskId};

/// Lifecycle step recorded for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Task created.
    Create,
    /// Pending task approved.
    Approve,
    /// Delivery attempt started.
    Attempt,
    /// Attempt failed; the task will be retried.
    Retry,
    /// Task delivered.
    Sent,
    /// Attempts exhausted.
    Fail,
    /// Expiry passed.
    Expire,
    /// Cancelled by a caller.
    Cancel,
    /// Record removed.
    Delete,
}

impl AuditAction {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Approve => "approve",
            Self::Attempt => "attempt",
            Self::Retry => "retry",
            Self::Sent => "sent",
            Self::Fail => "fail",
            Self::Expire => "expire",
            Self::Cancel => "cancel",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit event structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Related task identifier.
    pub task_id: TaskId,
    /// Capability the task is delivered through.
    pub capability: Capability,
    /// Owner of the task (`tenant:recipient`).
    pub owner: String,
    /// Action taken.
    pub action: AuditAction,
    /// Timestamp milliseconds.
    pub created_at_ms: u64,
    /// Additional context, such as a failure message.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: AuditEvent);
}

/// Bounded in-memory audit sink for tests and development.
#[derive(Debug)]
pub struct InMemoryAuditSink {
    events: Mutex<VecDeque<AuditEvent>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a sink keeping at most `max_events` events (oldest dropped first).
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events)),
            max_events,
        }
    }

    /// Snapshot of stored events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Actions recorded for one task, in order.
    #[must_use]
    pub fn actions_for(&self, task_id: TaskId) -> Vec<AuditAction> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.task_id == task_id)
            .map(|e| e.action)
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Build an audit event for `task`.
pub fn build_audit_event(
    task: &ScheduledTask,
    action: AuditAction,
    detail: Option<String>,
) -> AuditEvent {
    let created_at_ms = now_ms();
    AuditEvent {
        event_id: format!("{}-{}-{}", task.id, action, created_at_ms),
        task_id: task.id,
        capability: task.capability.clone(),
        owner: task.owner.to_string(),
        action,
        created_at_ms,
        detail,
    }
}
