//! File-backed task store using JSON lines.
//!
//! The whole store is loaded on open and rewritten on every mutation, so a
//! write costs time proportional to the number of records kept; prune
//! terminal records to bound it. Writes run on the blocking thread pool and
//! go to a sibling temp file that is then renamed over the original, so a
//! crash mid-write leaves the previous contents intact.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{apply_patch, select_due, select_owned, take_finished};
use crate::core::error::DispatchError;
use crate::core::task::{DueQuery, ScheduledTask, TaskPatch, TaskStore};
use crate::util::serde::{OwnerKey, TaskId};

fn store_err(context: &str, err: impl std::fmt::Display) -> DispatchError {
    DispatchError::Store(format!("{context}: {err}"))
}

/// Durable task store persisted to `<dir>/<name>.jsonl`.
#[derive(Debug)]
pub struct FileTaskStore {
    path: PathBuf,
    tasks: Mutex<HashMap<TaskId, ScheduledTask>>,
}

impl FileTaskStore {
    /// Open (or create) the store in `dir`.
    pub fn open(dir: impl AsRef<Path>, name: &str) -> Result<Self, DispatchError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| store_err("create store dir", e))?;
        let path = dir.join(format!("{name}.jsonl"));
        let tasks = Self::load(&path)?;
        debug!(path = %path.display(), tasks = tasks.len(), "task store opened");
        Ok(Self {
            path,
            tasks: Mutex::new(tasks),
        })
    }

    /// Backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<HashMap<TaskId, ScheduledTask>, DispatchError> {
        let mut tasks = HashMap::new();
        if !path.exists() {
            return Ok(tasks);
        }
        let file = File::open(path).map_err(|e| store_err("open store", e))?;
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| store_err("read store", e))?;
            if line.trim().is_empty() {
                continue;
            }
            let task: ScheduledTask = serde_json::from_str(&line)
                .map_err(|e| store_err(&format!("parse line {}", lineno + 1), e))?;
            tasks.insert(task.id, task);
        }
        Ok(tasks)
    }

    /// Rewrite the backing file with `tasks`. Callers hold the store lock
    /// for the duration so writes never interleave.
    async fn persist(&self, tasks: &HashMap<TaskId, ScheduledTask>) -> Result<(), DispatchError> {
        let contents = encode(tasks)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_replacing(&path, &contents))
            .await
            .map_err(|e| store_err("join store writer", e))?
    }
}

fn encode(tasks: &HashMap<TaskId, ScheduledTask>) -> Result<Vec<u8>, DispatchError> {
    let mut ordered: Vec<&ScheduledTask> = tasks.values().collect();
    ordered.sort_by_key(|t| (t.created_at_ms, t.id));
    let mut out = Vec::new();
    for task in ordered {
        serde_json::to_writer(&mut out, task).map_err(|e| store_err("encode task", e))?;
        out.push(b'\n');
    }
    Ok(out)
}

fn write_replacing(path: &Path, contents: &[u8]) -> Result<(), DispatchError> {
    let tmp = path.with_extension("jsonl.tmp");
    {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .map_err(|e| store_err("open temp file", e))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(contents)
            .map_err(|e| store_err("write store", e))?;
        writer.flush().map_err(|e| store_err("flush store", e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| store_err("sync store", e))?;
    }
    fs::rename(&tmp, path).map_err(|e| store_err("replace store", e))
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn insert_task(&self, task: ScheduledTask) -> Result<(), DispatchError> {
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&task.id) {
            return Err(DispatchError::Store(format!("task {} already exists", task.id)));
        }
        let id = task.id;
        tasks.insert(id, task);
        if let Err(err) = self.persist(&tasks).await {
            tasks.remove(&id);
            return Err(err);
        }
        Ok(())
    }

    async fn find_due_tasks(&self, query: DueQuery) -> Result<Vec<ScheduledTask>, DispatchError> {
        Ok(select_due(&*self.tasks.lock().await, &query))
    }

    async fn update_task_status(
        &self,
        id: TaskId,
        patch: TaskPatch,
    ) -> Result<ScheduledTask, DispatchError> {
        let mut tasks = self.tasks.lock().await;
        let previous = tasks.get(&id).cloned();
        let updated = apply_patch(&mut tasks, id, &patch)?;
        if let Err(err) = self.persist(&tasks).await {
            if let Some(previous) = previous {
                tasks.insert(id, previous);
            }
            return Err(err);
        }
        Ok(updated)
    }

    async fn delete_task(&self, id: TaskId) -> Result<bool, DispatchError> {
        let mut tasks = self.tasks.lock().await;
        let Some(removed) = tasks.remove(&id) else {
            return Ok(false);
        };
        if let Err(err) = self.persist(&tasks).await {
            tasks.insert(id, removed);
            return Err(err);
        }
        Ok(true)
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<ScheduledTask>, DispatchError> {
        Ok(self.tasks.lock().await.get(&id).cloned())
    }

    async fn list_tasks(&self, owner: &OwnerKey) -> Result<Vec<ScheduledTask>, DispatchError> {
        Ok(select_owned(&*self.tasks.lock().await, owner))
    }

    async fn prune_terminal(&self, cutoff_ms: u64) -> Result<usize, DispatchError> {
        let mut tasks = self.tasks.lock().await;
        let removed = take_finished(&mut tasks, cutoff_ms);
        if removed.is_empty() {
            return Ok(0);
        }
        if let Err(err) = self.persist(&tasks).await {
            for task in removed {
                tasks.insert(task.id, task);
            }
            return Err(err);
        }
        debug!(path = %self.path.display(), pruned = removed.len(), "terminal tasks pruned");
        Ok(removed.len())
    }
}
