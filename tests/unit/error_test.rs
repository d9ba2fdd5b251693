//! Tests for error types

use std::time::Duration;

use adaptive_dispatch::core::{DispatchError, TaskStatus};
use adaptive_dispatch::util::{Capability, TaskId};

#[test]
fn test_no_healthy_endpoint_error() {
    let err = DispatchError::NoHealthyEndpoint(Capability::inference());
    assert_eq!(format!("{}", err), "no healthy endpoint for capability `inference`");
}

#[test]
fn test_all_endpoints_exhausted_error() {
    let err = DispatchError::AllEndpointsExhausted {
        capability: Capability::transcription(),
        attempts: 4,
        last_error: "backend returned 503".to_string(),
    };
    assert_eq!(
        format!("{}", err),
        "all endpoints exhausted for capability `transcription` after 4 attempts: backend returned 503"
    );
}

#[test]
fn test_queue_saturated_error() {
    let err = DispatchError::QueueSaturated(Capability::inference());
    assert_eq!(format!("{}", err), "queue saturated for capability `inference`");
}

#[test]
fn test_task_errors() {
    let id = TaskId::nil();
    assert_eq!(
        format!("{}", DispatchError::TaskExpired(id)),
        format!("task {id} expired before dispatch")
    );
    assert_eq!(
        format!("{}", DispatchError::MaxAttemptsExceeded { id, attempts: 3 }),
        format!("task {id} exceeded max attempts (3)")
    );
    assert_eq!(
        format!(
            "{}",
            DispatchError::InvalidTransition {
                id,
                from: TaskStatus::Sent,
                to: TaskStatus::Approved,
            }
        ),
        format!("invalid transition for task {id}: sent -> approved")
    );
}

#[test]
fn test_timeout_error() {
    let err = DispatchError::Timeout(Duration::from_millis(250));
    assert_eq!(format!("{}", err), "operation timed out after 250ms");
}

#[test]
fn test_transient_classification() {
    assert!(DispatchError::QueueSaturated(Capability::inference()).is_transient());
    assert!(DispatchError::NoHealthyEndpoint(Capability::inference()).is_transient());
    assert!(DispatchError::Timeout(Duration::from_secs(1)).is_transient());
    assert!(!DispatchError::InvalidConfig("bad".into()).is_transient());
    assert!(!DispatchError::UnknownCapability(Capability::new("ocr")).is_transient());
    assert!(!DispatchError::TaskNotFound(TaskId::nil()).is_transient());
    assert!(DispatchError::DispatchInFlight(TaskId::nil()).is_transient());
    assert!(!DispatchError::AlreadyStarted.is_transient());
}
