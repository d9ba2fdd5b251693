//! Tests for audit events

use adaptive_dispatch::core::{
    build_audit_event, AuditAction, AuditSink, InMemoryAuditSink, NewTask,
};
use adaptive_dispatch::util::{Capability, OwnerKey};

#[test]
fn test_build_audit_event() {
    let task = NewTask::new(OwnerKey::new("acme", "u1"), Capability::inference(), "note", 10)
        .into_task(3, 5)
        .unwrap();
    let event = build_audit_event(&task, AuditAction::Retry, Some("503".into()));

    assert_eq!(event.task_id, task.id);
    assert_eq!(event.capability, Capability::inference());
    assert_eq!(event.owner, "acme:u1");
    assert_eq!(event.action, AuditAction::Retry);
    assert_eq!(event.detail.as_deref(), Some("503"));
    assert!(event.event_id.starts_with(&task.id.to_string()));
}

#[test]
fn test_audit_action_serialization() {
    let json = serde_json::to_string(&AuditAction::Expire).unwrap();
    assert_eq!(json, "\"expire\"");
    assert_eq!(AuditAction::Sent.as_str(), "sent");
}

#[test]
fn test_zero_capacity_sink_stores_nothing() {
    let task = NewTask::new(OwnerKey::new("t", "r"), Capability::inference(), "x", 0)
        .into_task(1, 0)
        .unwrap();
    let sink = InMemoryAuditSink::new(0);
    sink.record(build_audit_event(&task, AuditAction::Create, None));
    assert!(sink.events().is_empty());
}
