//! Tests for background task management and API models

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use adaptive_dispatch::core::{NewTask, TaskStatus};
use adaptive_dispatch::runtime::{BackgroundTasks, CapabilityHealth, DispatchHealth, TaskStatusResponse};
use adaptive_dispatch::util::{Capability, OwnerKey};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_background_tasks_stop_on_shutdown() {
    let mut tasks = BackgroundTasks::current().unwrap();
    let ticks = Arc::new(AtomicUsize::new(0));

    for name in ["first", "second"] {
        let ticks = Arc::clone(&ticks);
        tasks.spawn(name, move |token| async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(Duration::from_millis(5)) => {
                        ticks.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        });
    }
    assert_eq!(tasks.names(), vec!["first", "second"]);
    assert_eq!(tasks.len(), 2);

    tokio::time::sleep(Duration::from_millis(30)).await;
    tasks.shutdown().await;

    let after = ticks.load(Ordering::SeqCst);
    assert!(after > 0);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), after);
}

#[tokio::test]
async fn test_dropping_background_tasks_cancels_token() {
    let tasks = BackgroundTasks::current().unwrap();
    let token = tasks.token();
    assert!(tasks.is_empty());
    drop(tasks);
    assert!(token.is_cancelled());
}

#[test]
fn test_background_tasks_need_runtime() {
    assert!(BackgroundTasks::current().is_err());
}

#[test]
fn test_task_status_response() {
    let task = NewTask::new(OwnerKey::new("t", "r"), Capability::inference(), "x", 0)
        .with_max_attempts(5)
        .into_task(3, 0)
        .unwrap();
    let response = TaskStatusResponse::from(&task);
    assert_eq!(response.task_id, task.id);
    assert_eq!(response.status, TaskStatus::Approved);
    assert_eq!(response.max_attempts, 5);
    assert_eq!(response.reason, None);

    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["status"], "approved");
}

#[test]
fn test_health_serialization() {
    let health = DispatchHealth {
        ok: false,
        backpressure: true,
        capabilities: vec![CapabilityHealth {
            capability: Capability::transcription(),
            healthy: true,
            healthy_endpoints: 2,
        }],
    };
    let json = serde_json::to_value(&health).unwrap();
    assert_eq!(json["backpressure"], true);
    assert_eq!(json["capabilities"][0]["capability"], "transcription");
}
