//! Task work source
//!
//! The store only ever moves a task from `pending` to `completed`; it never
//! deletes. Retention is somebody else's job.

use super::types::{Task, TaskId, TaskPayload, TaskStatus};
use crate::errors::StorageError;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new pending task
    async fn enqueue(&self, payload: TaskPayload) -> Result<Task, StorageError>;

    /// Oldest pending tasks first, at most `limit`
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<Task>, StorageError>;

    /// Acknowledge a task. Completing an already completed task is a no-op.
    async fn mark_completed(&self, id: TaskId) -> Result<(), StorageError>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StorageError>;
}

/// Process-local task store
#[derive(Debug)]
pub struct InMemoryTaskStore {
    tasks: Mutex<BTreeMap<TaskId, Task>>,
    next_id: AtomicU64,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<TaskId, Task>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every task ever enqueued, completed ones included
    pub fn all(&self) -> Vec<Task> {
        self.lock().values().cloned().collect()
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn enqueue(&self, payload: TaskPayload) -> Result<Task, StorageError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let task = Task::new(id, payload);
        self.lock().insert(id, task.clone());
        Ok(task)
    }

    async fn fetch_pending(&self, limit: usize) -> Result<Vec<Task>, StorageError> {
        Ok(self
            .lock()
            .values()
            .filter(|task| task.is_pending())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_completed(&self, id: TaskId) -> Result<(), StorageError> {
        let mut tasks = self.lock();
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("task {}", id)))?;
        if task.status == TaskStatus::Pending {
            task.status = TaskStatus::Completed;
            task.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StorageError> {
        Ok(self.lock().get(&id).cloned())
    }
}
