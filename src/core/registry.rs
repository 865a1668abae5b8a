//! In-memory task registry with an enforced lifecycle.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::core::error::OrchestratorError;
use crate::core::metrics::MetricsSnapshot;
use crate::core::task::{Task, TaskKind, TaskStatus, TaskUpdate};
use crate::util::TaskId;

/// Message recorded on cancelled tasks.
pub const CANCELLED_MESSAGE: &str = "task cancelled";

#[derive(Default)]
struct Inner {
    tasks: HashMap<TaskId, Task>,
    order: Vec<TaskId>,
}

/// Map of task id to task record behind one `parking_lot::RwLock`.
#[derive(Default)]
pub struct TaskRegistry {
    inner: RwLock<Inner>,
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.inner.read().order.len())
            .finish()
    }
}

impl TaskRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new record.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::Validation`] when the id is already taken.
    pub fn create(&self, task: Task) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.write();
        if inner.tasks.contains_key(&task.id) {
            return Err(OrchestratorError::Validation(format!(
                "task id already exists: {}",
                task.id
            )));
        }
        inner.order.push(task.id.clone());
        inner.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Apply `update` to an existing record.
    ///
    /// A rejected update leaves the record untouched.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::NotFound`] when the record is gone and
    /// [`OrchestratorError::InvalidTransition`] for a missing edge, including
    /// any move out of a terminal status.
    pub fn update(&self, id: &str, update: TaskUpdate) -> Result<Task, OrchestratorError> {
        let mut inner = self.inner.write();
        let task = inner
            .tasks
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;
        Self::transition(id, task, update)
    }

    /// Apply `update` to `id`, creating the record when absent.
    ///
    /// Existing records follow the same rules as [`Self::update`].
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::InvalidTransition`] for a missing edge.
    pub fn upsert(&self, id: &str, update: TaskUpdate) -> Result<Task, OrchestratorError> {
        let mut inner = self.inner.write();
        if let Some(task) = inner.tasks.get_mut(id) {
            return Self::transition(id, task, update);
        }

        if update.status != TaskStatus::Pending {
            tracing::warn!(task_id = id, status = %update.status, "upsert created task outside pending");
        }
        let kind = update.patch.kind.unwrap_or_default();
        let mut task = Task::new(id.to_string(), kind, update.status);
        task.apply(update);
        inner.order.push(id.to_string());
        inner.tasks.insert(id.to_string(), task.clone());
        Ok(task)
    }

    fn transition(id: &str, task: &mut Task, update: TaskUpdate) -> Result<Task, OrchestratorError> {
        if !task.status.can_transition_to(update.status) {
            return Err(OrchestratorError::InvalidTransition {
                id: id.to_string(),
                from: task.status,
                to: update.status,
            });
        }
        let from = task.status;
        task.apply(update);
        if from != task.status {
            tracing::debug!(task_id = id, %from, to = %task.status, "status changed");
        }
        Ok(task.clone())
    }

    /// Copy of the record.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Task> {
        self.inner.read().tasks.get(id).cloned()
    }

    /// Whether the id is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().tasks.contains_key(id)
    }

    /// Current status.
    #[must_use]
    pub fn status(&self, id: &str) -> Option<TaskStatus> {
        self.inner.read().tasks.get(id).map(|t| t.status)
    }

    /// Whether the task has been cancelled. A deleted record counts as
    /// cancelled, since only terminal tasks can be deleted.
    #[must_use]
    pub fn is_cancelled(&self, id: &str) -> bool {
        self.status(id).is_none_or(|s| s == TaskStatus::Cancelled)
    }

    /// Records in insertion order, filtered and truncated to `limit`.
    #[must_use]
    pub fn list(
        &self,
        status: Option<TaskStatus>,
        kind: Option<TaskKind>,
        limit: usize,
    ) -> Vec<Task> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.tasks.get(id))
            .filter(|t| status.is_none_or(|s| t.status == s))
            .filter(|t| kind.is_none_or(|k| t.kind == k))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Remove a terminal record. Returns `false` for missing or live tasks.
    pub fn delete(&self, id: &str) -> bool {
        let mut inner = self.inner.write();
        match inner.tasks.get(id) {
            Some(task) if task.status.is_terminal() => {
                inner.tasks.remove(id);
                inner.order.retain(|t| t != id);
                tracing::info!(task_id = id, "task deleted");
                true
            }
            Some(task) => {
                tracing::debug!(task_id = id, status = %task.status, "refusing to delete live task");
                false
            }
            None => false,
        }
    }

    /// Move a pending, queued or running task to `cancelled`, keeping progress.
    pub fn cancel(&self, id: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(task) = inner.tasks.get_mut(id) else {
            return false;
        };
        if task.status.is_terminal() {
            return false;
        }
        task.apply(TaskUpdate::status(TaskStatus::Cancelled).message(CANCELLED_MESSAGE));
        tracing::info!(task_id = id, "task cancelled");
        true
    }

    /// Merge a metrics snapshot, mirror epoch counters and recompute progress.
    ///
    /// Allowed in any status so late delegate output is never lost.
    pub fn update_metrics(&self, id: &str, metrics: &MetricsSnapshot) -> Option<Task> {
        let mut inner = self.inner.write();
        let task = inner.tasks.get_mut(id)?;
        task.latest_metrics.merge(metrics);
        if let Some(epoch) = task.latest_metrics.epoch {
            task.current_epoch = Some(epoch);
        }
        if let Some(total) = task.latest_metrics.total_epochs {
            task.total_epochs = Some(total);
        }
        if !task.status.is_terminal() {
            task.refresh_progress();
        }
        task.updated_at = crate::util::now();
        Some(task.clone())
    }

    /// Number of tasks per kind.
    #[must_use]
    pub fn counts_by_kind(&self) -> HashMap<TaskKind, usize> {
        let inner = self.inner.read();
        let mut counts: HashMap<TaskKind, usize> =
            TaskKind::ALL.into_iter().map(|k| (k, 0)).collect();
        for task in inner.tasks.values() {
            *counts.entry(task.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Total number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().tasks.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().tasks.is_empty()
    }
}
