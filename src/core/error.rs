//! Error types for dispatch operations.

use std::time::Duration;

use thiserror::Error;

use crate::core::task::TaskStatus;
use crate::util::serde::{Capability, TaskId};

/// Errors produced by the dispatch layer.
///
/// Pools and queues surface these to their direct caller instead of retrying
/// indefinitely: retries across endpoints are bounded by the pool, retries
/// across time are bounded by the scheduler.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The pool has zero enabled and healthy endpoints.
    #[error("no healthy endpoint for capability `{0}`")]
    NoHealthyEndpoint(Capability),
    /// Every eligible endpoint was tried during this call and failed.
    #[error("all endpoints exhausted for capability `{capability}` after {attempts} attempts: {last_error}")]
    AllEndpointsExhausted {
        /// Capability of the pool.
        capability: Capability,
        /// Total attempts made across endpoints.
        attempts: u32,
        /// Message of the final failure.
        last_error: String,
    },
    /// Admission refused (memory backpressure or a full waiting line).
    #[error("queue saturated for capability `{0}`")]
    QueueSaturated(Capability),
    /// A scheduled task was skipped because its expiry passed.
    #[error("task {0} expired before dispatch")]
    TaskExpired(TaskId),
    /// A scheduled task used its last attempt and failed.
    #[error("task {id} exceeded max attempts ({attempts})")]
    MaxAttemptsExceeded {
        /// Task identifier.
        id: TaskId,
        /// Attempts made.
        attempts: u32,
    },
    /// No pool or queue lane exists for the capability.
    #[error("unknown capability `{0}`")]
    UnknownCapability(Capability),
    /// No task record with this id.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
    /// Attempted to move a task along a transition the state machine forbids.
    #[error("invalid transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        /// Task identifier.
        id: TaskId,
        /// Current status.
        from: TaskStatus,
        /// Requested status.
        to: TaskStatus,
    },
    /// Another dispatch of the same task is still in flight.
    #[error("task {0} is already being dispatched")]
    DispatchInFlight(TaskId),
    /// The dispatcher's background loops are already running.
    #[error("dispatcher already started")]
    AlreadyStarted,
    /// An operation exceeded its time budget.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    /// A queue lane stopped before granting a slot.
    #[error("queue closed for capability `{0}`")]
    QueueClosed(Capability),
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Durable store failure with context.
    #[error("store error: {0}")]
    Store(String),
}

impl DispatchError {
    /// Whether the failure is worth retrying later (as opposed to a
    /// permanent configuration or state error).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NoHealthyEndpoint(_)
                | Self::AllEndpointsExhausted { .. }
                | Self::QueueSaturated(_)
                | Self::Timeout(_)
                | Self::QueueClosed(_)
                | Self::DispatchInFlight(_)
        )
    }
}
