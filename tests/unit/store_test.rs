//! Tests for task store backends

use std::io::Write;

use adaptive_dispatch::core::{
    DispatchError, DueQuery, NewTask, ScheduledTask, TaskPatch, TaskStatus, TaskStore,
};
use adaptive_dispatch::infra::{FileTaskStore, InMemoryTaskStore};
use adaptive_dispatch::util::{Capability, OwnerKey};

fn task(recipient: &str, scheduled_at_ms: u64) -> ScheduledTask {
    NewTask::new(
        OwnerKey::new("acme", recipient),
        Capability::inference(),
        "reminder",
        scheduled_at_ms,
    )
    .into_task(2, 0)
    .unwrap()
}

fn query(now_ms: u64) -> DueQuery {
    DueQuery {
        now_ms,
        retry_delay_ms: 100,
    }
}

/// Behavior every backend must share.
async fn exercise_contract(store: &dyn TaskStore) {
    let early = task("a", 100);
    let late = task("a", 200);
    let future = task("b", 10_000);
    for t in [late.clone(), early.clone(), future.clone()] {
        store.insert_task(t).await.unwrap();
    }
    assert!(matches!(
        store.insert_task(early.clone()).await,
        Err(DispatchError::Store(_))
    ));

    let due: Vec<_> = store
        .find_due_tasks(query(500))
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(due, vec![early.id, late.id]);

    let updated = store
        .update_task_status(
            early.id,
            TaskPatch::default().with_attempts(1).with_last_attempt_at(500),
        )
        .await
        .unwrap();
    assert_eq!(updated.attempts, 1);
    // Inside the retry delay.
    let due = store.find_due_tasks(query(550)).await.unwrap();
    assert_eq!(due.len(), 1);

    let err = store
        .update_task_status(early.id, TaskPatch::default().with_attempts(3))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::MaxAttemptsExceeded { .. }));

    store
        .update_task_status(late.id, TaskPatch::status(TaskStatus::Sent))
        .await
        .unwrap();
    let err = store
        .update_task_status(late.id, TaskPatch::status(TaskStatus::Approved))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidTransition { .. }));

    let owned = store.list_tasks(&OwnerKey::new("acme", "a")).await.unwrap();
    assert_eq!(owned.len(), 2);
    assert_eq!(owned[1].status, TaskStatus::Sent);

    assert!(store.delete_task(future.id).await.unwrap());
    assert!(!store.delete_task(future.id).await.unwrap());
    assert!(store.get_task(future.id).await.unwrap().is_none());
    assert!(matches!(
        store
            .update_task_status(future.id, TaskPatch::status(TaskStatus::Cancelled))
            .await,
        Err(DispatchError::TaskNotFound(_))
    ));
}

/// Terminal records older than the cutoff go; live and recent ones stay.
async fn exercise_pruning(store: &dyn TaskStore) -> (ScheduledTask, ScheduledTask) {
    let old_sent = task("a", 100);
    let recent_cancelled = task("a", 200);
    let live = task("b", 300);
    for t in [old_sent.clone(), recent_cancelled.clone(), live.clone()] {
        store.insert_task(t).await.unwrap();
    }
    store
        .update_task_status(
            old_sent.id,
            TaskPatch::status(TaskStatus::Sent)
                .with_sent_at(1_000)
                .with_finished_at(1_000),
        )
        .await
        .unwrap();
    store
        .update_task_status(
            recent_cancelled.id,
            TaskPatch::status(TaskStatus::Cancelled).with_finished_at(5_000),
        )
        .await
        .unwrap();

    assert_eq!(store.prune_terminal(1_000).await.unwrap(), 0);
    assert_eq!(store.prune_terminal(2_000).await.unwrap(), 1);
    assert!(store.get_task(old_sent.id).await.unwrap().is_none());
    assert!(store.get_task(recent_cancelled.id).await.unwrap().is_some());
    // Approved records are never pruned, however old.
    assert_eq!(store.prune_terminal(u64::MAX).await.unwrap(), 1);
    assert!(store.get_task(live.id).await.unwrap().is_some());
    (live, recent_cancelled)
}

#[tokio::test]
async fn test_in_memory_store_prunes_terminal_tasks() {
    let store = InMemoryTaskStore::new();
    exercise_pruning(&store).await;
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_file_store_prunes_terminal_tasks_durably() {
    let dir = tempfile::tempdir().unwrap();
    let (live, cancelled) = {
        let store = FileTaskStore::open(dir.path(), "tasks").unwrap();
        exercise_pruning(&store).await
    };

    let reopened = FileTaskStore::open(dir.path(), "tasks").unwrap();
    assert!(reopened.get_task(live.id).await.unwrap().is_some());
    assert!(reopened.get_task(cancelled.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_in_memory_store_contract() {
    let store = InMemoryTaskStore::new();
    exercise_contract(&store).await;
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn test_file_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileTaskStore::open(dir.path(), "tasks").unwrap();
    exercise_contract(&store).await;
    assert!(store.path().ends_with("tasks.jsonl"));
}

#[tokio::test]
async fn test_file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let t = task("a", 100);
    {
        let store = FileTaskStore::open(dir.path(), "tasks").unwrap();
        store.insert_task(t.clone()).await.unwrap();
        store
            .update_task_status(
                t.id,
                TaskPatch::default()
                    .with_attempts(1)
                    .with_last_attempt_at(150)
                    .with_error("backend returned 503"),
            )
            .await
            .unwrap();
    }

    let reopened = FileTaskStore::open(dir.path(), "tasks").unwrap();
    let loaded = reopened.get_task(t.id).await.unwrap().unwrap();
    assert_eq!(loaded.attempts, 1);
    assert_eq!(loaded.last_attempt_at_ms, Some(150));
    assert_eq!(loaded.last_error.as_deref(), Some("backend returned 503"));
    assert_eq!(loaded.status, TaskStatus::Approved);
    assert!(!dir.path().join("tasks.jsonl.tmp").exists());
}

#[test]
fn test_file_store_rejects_corrupt_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut file = std::fs::File::create(dir.path().join("tasks.jsonl")).unwrap();
    writeln!(file, "{{ not a task").unwrap();
    drop(file);

    let err = FileTaskStore::open(dir.path(), "tasks").unwrap_err();
    assert!(err.to_string().contains("parse line 1"));
}
