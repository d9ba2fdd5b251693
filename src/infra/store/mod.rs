//! Task store backends.

pub mod file;
pub mod memory;

pub use file::FileTaskStore;
pub use memory::InMemoryTaskStore;

use std::collections::HashMap;

use crate::core::error::DispatchError;
use crate::core::task::{DueQuery, ScheduledTask, TaskPatch};
use crate::util::serde::{OwnerKey, TaskId};

/// Due or expiring tasks, oldest schedule first.
fn select_due(tasks: &HashMap<TaskId, ScheduledTask>, query: &DueQuery) -> Vec<ScheduledTask> {
    let mut due: Vec<ScheduledTask> = tasks
        .values()
        .filter(|t| t.is_due(query) || t.needs_expiry(query.now_ms))
        .cloned()
        .collect();
    sort_by_schedule(&mut due);
    due
}

fn select_owned(tasks: &HashMap<TaskId, ScheduledTask>, owner: &OwnerKey) -> Vec<ScheduledTask> {
    let mut owned: Vec<ScheduledTask> = tasks
        .values()
        .filter(|t| &t.owner == owner)
        .cloned()
        .collect();
    sort_by_schedule(&mut owned);
    owned
}

/// Remove terminal records finished before `cutoff_ms`, returning them.
fn take_finished(
    tasks: &mut HashMap<TaskId, ScheduledTask>,
    cutoff_ms: u64,
) -> Vec<ScheduledTask> {
    let ids: Vec<TaskId> = tasks
        .values()
        .filter(|t| t.finished_before(cutoff_ms))
        .map(|t| t.id)
        .collect();
    ids.iter().filter_map(|id| tasks.remove(id)).collect()
}

fn sort_by_schedule(tasks: &mut [ScheduledTask]) {
    tasks.sort_by_key(|t| (t.scheduled_at_ms, t.created_at_ms, t.id));
}

/// Apply `patch` in place, returning the updated record.
fn apply_patch(
    tasks: &mut HashMap<TaskId, ScheduledTask>,
    id: TaskId,
    patch: &TaskPatch,
) -> Result<ScheduledTask, DispatchError> {
    let task = tasks.get_mut(&id).ok_or(DispatchError::TaskNotFound(id))?;
    task.apply(patch)?;
    Ok(task.clone())
}
