//! Wire DTOs for an HTTP facade over [`Orchestrator`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{
    ActiveEntry, HealthReport, LimitTable, MetricsSnapshot, Orchestrator, ResourceSnapshot, Spawn,
    Task, TaskKind, TaskStatus, UsageTable,
};
use crate::util::TaskId;

const STATUS_SUCCESS: &str = "success";
const STATUS_ERROR: &str = "error";

/// One task as seen by clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    /// Task identifier.
    pub task_id: TaskId,
    /// Task kind.
    pub task_type: TaskKind,
    /// Current status.
    pub status: TaskStatus,
    /// Status message.
    pub message: Option<String>,
    /// Percentage complete.
    pub progress: u8,
    /// Concrete device, or the requested one before admission.
    pub device: Option<String>,
    /// Admission priority.
    pub priority: u8,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// RFC 3339 update time.
    pub updated_at: String,
    /// Model name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Current epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_epoch: Option<u32>,
    /// Epoch budget.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_epochs: Option<u32>,
    /// Latest metrics, absent until something was reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_metrics: Option<MetricsSnapshot>,
    /// Preprocessing statistics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<serde_json::Value>,
}

impl From<&Task> for TaskResponse {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            task_type: task.kind,
            status: task.status,
            message: (!task.message.is_empty()).then(|| task.message.clone()),
            progress: task.progress,
            device: task
                .device
                .clone()
                .or_else(|| (!task.requested_device.is_empty()).then(|| task.requested_device.clone())),
            priority: task.priority.get(),
            created_at: task.created_at.to_rfc3339(),
            updated_at: task.updated_at.to_rfc3339(),
            model: task.model.clone(),
            current_epoch: task.current_epoch,
            total_epochs: task.total_epochs,
            latest_metrics: (!task.latest_metrics.is_empty()).then(|| task.latest_metrics.clone()),
            stats: task.stats.clone(),
        }
    }
}

/// Task listing grouped by kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskListResponse {
    /// Training tasks.
    pub training_tasks: Vec<TaskResponse>,
    /// Inference tasks.
    pub inference_tasks: Vec<TaskResponse>,
    /// Preprocessing tasks.
    pub preprocessing_tasks: Vec<TaskResponse>,
    /// Number of training tasks listed.
    pub total_training: usize,
    /// Number of inference tasks listed.
    pub total_inference: usize,
    /// Number of preprocessing tasks listed.
    pub total_preprocessing: usize,
}

impl TaskListResponse {
    /// Bucket `tasks` by kind, keeping order.
    #[must_use]
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let mut out = Self::default();
        for task in tasks {
            let bucket = match task.kind {
                TaskKind::Training => &mut out.training_tasks,
                TaskKind::Inference => &mut out.inference_tasks,
                TaskKind::Preprocessing => &mut out.preprocessing_tasks,
            };
            bucket.push(TaskResponse::from(task));
        }
        out.total_training = out.training_tasks.len();
        out.total_inference = out.inference_tasks.len();
        out.total_preprocessing = out.preprocessing_tasks.len();
        out
    }

    /// List through an orchestrator.
    #[must_use]
    pub fn list<S>(
        orchestrator: &Orchestrator<S>,
        status: Option<TaskStatus>,
        kind: Option<TaskKind>,
        limit: Option<usize>,
    ) -> Self
    where
        S: Spawn + Clone + Send + Sync + 'static,
    {
        Self::from_tasks(&orchestrator.list_tasks(status, kind, limit))
    }
}

/// Outcome of cancel/delete style actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskActionResponse {
    /// `success` or `error`.
    pub status: String,
    /// Human-readable outcome.
    pub message: String,
    /// Target task.
    pub task_id: TaskId,
}

impl TaskActionResponse {
    fn new(ok: bool, message: &str, task_id: &str) -> Self {
        Self {
            status: if ok { STATUS_SUCCESS } else { STATUS_ERROR }.to_string(),
            message: message.to_string(),
            task_id: task_id.to_string(),
        }
    }

    /// Response for a cancel request.
    #[must_use]
    pub fn cancelled(task_id: &str, ok: bool) -> Self {
        let message = if ok {
            "task cancelled"
        } else {
            "task not found or cannot be cancelled"
        };
        Self::new(ok, message, task_id)
    }

    /// Response for a delete request.
    #[must_use]
    pub fn deleted(task_id: &str, ok: bool) -> Self {
        let message = if ok {
            "task deleted"
        } else {
            "task not found or still running"
        };
        Self::new(ok, message, task_id)
    }

    /// Response for a submission.
    #[must_use]
    pub fn submitted(task_id: &str) -> Self {
        Self::new(true, "task created", task_id)
    }
}

/// Pool ledger for clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceStatusResponse {
    /// Running counts per concrete device.
    pub usage: UsageTable,
    /// Holders per concrete device.
    pub active: BTreeMap<String, Vec<ActiveEntry>>,
    /// Configured limits.
    pub limits: LimitTable,
    /// Whether any GPU is configured.
    pub gpu_available: bool,
}

impl From<ResourceSnapshot> for ResourceStatusResponse {
    fn from(snapshot: ResourceSnapshot) -> Self {
        let gpu_available = snapshot
            .usage
            .keys()
            .any(|d| crate::core::class_of(d) == crate::core::GPU_CLASS);
        Self {
            usage: snapshot.usage,
            active: snapshot.active,
            limits: snapshot.limits,
            gpu_available,
        }
    }
}

/// Runtime limit change request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceConfigUpdate {
    /// Partial limits to deep-merge.
    #[serde(default)]
    pub max_concurrent: Option<LimitTable>,
}

impl ResourceConfigUpdate {
    /// Apply through an orchestrator.
    pub fn apply<S>(self, orchestrator: &Orchestrator<S>) -> ConfigUpdateResponse
    where
        S: Spawn + Clone + Send + Sync + 'static,
    {
        let Some(partial) = self.max_concurrent else {
            return ConfigUpdateResponse {
                status: STATUS_ERROR.to_string(),
                message: "no limits supplied".to_string(),
                limits: orchestrator.resource_status().limits,
            };
        };
        orchestrator.update_limits(partial);
        ConfigUpdateResponse {
            status: STATUS_SUCCESS.to_string(),
            message: "resource limits updated".to_string(),
            limits: orchestrator.resource_status().limits,
        }
    }
}

/// Result of a limit update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigUpdateResponse {
    /// `success` or `error`.
    pub status: String,
    /// Human-readable outcome.
    pub message: String,
    /// Limits after the update.
    pub limits: LimitTable,
}

/// Liveness response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `healthy` when the process answers.
    pub status: String,
    /// RFC 3339 time of the check.
    pub timestamp: String,
    /// Crate version.
    pub version: String,
    /// Registered training tasks.
    pub training_tasks: usize,
    /// Registered inference tasks.
    pub inference_tasks: usize,
    /// Registered preprocessing tasks.
    pub preprocessing_tasks: usize,
    /// Attached live log consumers.
    pub active_log_streams: usize,
}

impl From<&HealthReport> for HealthResponse {
    fn from(report: &HealthReport) -> Self {
        let count = |kind| report.tasks_by_kind.get(&kind).copied().unwrap_or(0);
        Self {
            status: "healthy".to_string(),
            timestamp: crate::util::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            training_tasks: count(TaskKind::Training),
            inference_tasks: count(TaskKind::Inference),
            preprocessing_tasks: count(TaskKind::Preprocessing),
            active_log_streams: report.active_log_streams,
        }
    }
}
