//! In-memory task store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{apply_patch, select_due, select_owned, take_finished};
use crate::core::error::DispatchError;
use crate::core::task::{DueQuery, ScheduledTask, TaskPatch, TaskStore};
use crate::util::serde::{OwnerKey, TaskId};

/// Task store kept in process memory; contents are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, ScheduledTask>>,
}

impl InMemoryTaskStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert_task(&self, task: ScheduledTask) -> Result<(), DispatchError> {
        let mut tasks = self.tasks.write();
        if tasks.contains_key(&task.id) {
            return Err(DispatchError::Store(format!("task {} already exists", task.id)));
        }
        tasks.insert(task.id, task);
        Ok(())
    }

    async fn find_due_tasks(&self, query: DueQuery) -> Result<Vec<ScheduledTask>, DispatchError> {
        Ok(select_due(&self.tasks.read(), &query))
    }

    async fn update_task_status(
        &self,
        id: TaskId,
        patch: TaskPatch,
    ) -> Result<ScheduledTask, DispatchError> {
        apply_patch(&mut self.tasks.write(), id, &patch)
    }

    async fn delete_task(&self, id: TaskId) -> Result<bool, DispatchError> {
        Ok(self.tasks.write().remove(&id).is_some())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<ScheduledTask>, DispatchError> {
        Ok(self.tasks.read().get(&id).cloned())
    }

    async fn list_tasks(&self, owner: &OwnerKey) -> Result<Vec<ScheduledTask>, DispatchError> {
        Ok(select_owned(&self.tasks.read(), owner))
    }

    async fn prune_terminal(&self, cutoff_ms: u64) -> Result<usize, DispatchError> {
        Ok(take_finished(&mut self.tasks.write(), cutoff_ms).len())
    }
}
