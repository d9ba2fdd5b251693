//! Tests for scheduled task requests and patches

use adaptive_dispatch::core::{DispatchError, NewTask, TaskPatch, TaskStatus};
use adaptive_dispatch::util::{Capability, OwnerKey};

#[test]
fn test_new_task_json_defaults() {
    let input = r#"{
        "owner": { "tenant": "acme", "recipient": "chat-7" },
        "capability": "inference",
        "description": "water the plants",
        "scheduled_at_ms": 1000
    }"#;
    let new: NewTask = serde_json::from_str(input).unwrap();
    assert!(new.approved);
    assert!(new.payload.is_null());
    assert_eq!(new.expiry_at_ms, None);

    let task = new.into_task(4, 900).unwrap();
    assert_eq!(task.status, TaskStatus::Approved);
    assert_eq!(task.max_attempts, 4);
    assert_eq!(task.attempts, 0);
    assert_eq!(task.created_at_ms, 900);
}

#[test]
fn test_expiry_before_schedule_rejected() {
    let err = NewTask::new(OwnerKey::new("t", "r"), Capability::inference(), "x", 2_000)
        .with_expiry(1_000)
        .into_task(3, 0)
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidConfig(_)));
}

#[test]
fn test_payload_is_carried() {
    let task = NewTask::new(OwnerKey::new("t", "r"), Capability::transcription(), "x", 0)
        .with_payload(serde_json::json!({ "audio_url": "s3://bucket/a.wav" }))
        .into_task(3, 0)
        .unwrap();
    assert_eq!(task.payload["audio_url"], "s3://bucket/a.wav");
}

#[test]
fn test_status_names() {
    assert_eq!(serde_json::to_string(&TaskStatus::Cancelled).unwrap(), "\"cancelled\"");
    assert_eq!(TaskStatus::Expired.to_string(), "expired");
    assert!(TaskStatus::Failed.is_terminal());
    assert!(!TaskStatus::Approved.is_terminal());
}

#[test]
fn test_patch_builders() {
    assert!(TaskPatch::default().is_empty());
    let patch = TaskPatch::status(TaskStatus::Sent)
        .with_attempts(1)
        .with_last_attempt_at(5)
        .with_error("boom")
        .with_sent_at(6);
    assert!(!patch.is_empty());
    assert_eq!(patch.status, Some(TaskStatus::Sent));
    assert_eq!(patch.last_error.as_deref(), Some("boom"));
}
