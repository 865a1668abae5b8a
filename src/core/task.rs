//! Task records, kinds and the lifecycle state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::metrics::MetricsSnapshot;
use crate::util::{Priority, TaskId};

/// Category of work a task performs.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Model training.
    #[default]
    Training,
    /// Model inference.
    Inference,
    /// Dataset preprocessing (split, augment, crop).
    Preprocessing,
}

impl TaskKind {
    /// All kinds in listing order.
    pub const ALL: [Self; 3] = [Self::Training, Self::Inference, Self::Preprocessing];

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Training => "training",
            Self::Inference => "inference",
            Self::Preprocessing => "preprocessing",
        }
    }

    /// Whether tasks of this kind are admitted through the resource pool.
    #[must_use]
    pub const fn uses_pool(self) -> bool {
        !matches!(self, Self::Preprocessing)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, worker not yet started.
    #[default]
    Pending,
    /// Waiting for admission.
    Queued,
    /// Holding an allocation, delegate executing.
    Running,
    /// Delegate returned normally.
    Completed,
    /// Delegate or admission failed.
    Failed,
    /// Cancelled by request.
    Cancelled,
}

impl TaskStatus {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// `completed`, `failed` and `cancelled` are terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine has an edge from `self` to `next`.
    ///
    /// A same-status move is allowed for non-terminal statuses and refreshes
    /// the record.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use TaskStatus::{Cancelled, Completed, Failed, Pending, Queued, Running};
        match (self, next) {
            (Completed | Failed | Cancelled, _) => false,
            (Pending, Pending | Queued | Cancelled)
            | (Queued, Queued | Running | Cancelled | Failed)
            | (Running, Running | Completed | Failed | Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one submitted job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier.
    pub id: TaskId,
    /// Work category.
    pub kind: TaskKind,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Human-readable status message.
    pub message: String,
    /// Percentage in `0..=100`.
    pub progress: u8,
    /// Device string from the request (`cpu`, `cuda`, `cuda:1`).
    pub requested_device: String,
    /// Concrete device once allocated.
    pub device: Option<String>,
    /// Admission priority, lower ranks first.
    pub priority: Priority,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Model architecture name, when relevant.
    pub model: Option<String>,
    /// Epoch budget for training.
    pub total_epochs: Option<u32>,
    /// Last epoch reported by the delegate.
    pub current_epoch: Option<u32>,
    /// Latest merged metrics.
    pub latest_metrics: MetricsSnapshot,
    /// Delegate-supplied statistics (preprocessing).
    pub stats: Option<serde_json::Value>,
}

impl Task {
    /// Fresh record in `status` with defaults for everything else.
    #[must_use]
    pub fn new(id: TaskId, kind: TaskKind, status: TaskStatus) -> Self {
        let now = crate::util::now();
        Self {
            id,
            kind,
            status,
            message: String::new(),
            progress: 0,
            requested_device: String::new(),
            device: None,
            priority: Priority::default(),
            created_at: now,
            updated_at: now,
            model: None,
            total_epochs: None,
            current_epoch: None,
            latest_metrics: MetricsSnapshot::default(),
            stats: None,
        }
    }

    /// Apply an update without checking the state machine.
    pub(crate) fn apply(&mut self, update: TaskUpdate) {
        self.status = update.status;
        self.updated_at = crate::util::now();
        if let Some(message) = update.message {
            self.message = message;
        }
        if let Some(progress) = update.progress {
            self.progress = progress.min(100);
        }
        update.patch.apply_to(self);
    }

    /// Recompute progress from the epoch counters when both are known.
    pub(crate) fn refresh_progress(&mut self) {
        if let (Some(cur), Some(total)) = (self.current_epoch, self.total_epochs) {
            if total > 0 {
                let pct = u64::from(cur.min(total)) * 100 / u64::from(total);
                self.progress = u8::try_from(pct).unwrap_or(100);
            }
        }
    }
}

/// Optional field overrides carried by an upsert.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    /// Task kind; only meaningful on creation.
    pub kind: Option<TaskKind>,
    /// Requested device string.
    pub requested_device: Option<String>,
    /// Allocated device.
    pub device: Option<String>,
    /// Admission priority.
    pub priority: Option<Priority>,
    /// Model name.
    pub model: Option<String>,
    /// Epoch budget.
    pub total_epochs: Option<u32>,
    /// Current epoch.
    pub current_epoch: Option<u32>,
    /// Replacement metrics snapshot.
    pub latest_metrics: Option<MetricsSnapshot>,
    /// Delegate statistics.
    pub stats: Option<serde_json::Value>,
}

impl TaskPatch {
    fn apply_to(self, task: &mut Task) {
        if let Some(v) = self.requested_device {
            task.requested_device = v;
        }
        if let Some(v) = self.device {
            task.device = Some(v);
        }
        if let Some(v) = self.priority {
            task.priority = v;
        }
        if let Some(v) = self.model {
            task.model = Some(v);
        }
        if let Some(v) = self.total_epochs {
            task.total_epochs = Some(v);
        }
        if let Some(v) = self.current_epoch {
            task.current_epoch = Some(v);
        }
        if let Some(v) = self.latest_metrics {
            task.latest_metrics = v;
        }
        if let Some(v) = self.stats {
            task.stats = Some(v);
        }
    }
}

/// Status change plus optional field updates for [`crate::core::TaskRegistry::upsert`].
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    /// Target status.
    pub status: TaskStatus,
    /// Replacement message.
    pub message: Option<String>,
    /// Replacement progress.
    pub progress: Option<u8>,
    /// Additional field overrides.
    pub patch: TaskPatch,
}

impl TaskUpdate {
    /// Update targeting `status` with nothing else changed.
    #[must_use]
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Set the message.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set the progress.
    #[must_use]
    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Set the kind (used when the upsert creates the record).
    #[must_use]
    pub fn kind(mut self, kind: TaskKind) -> Self {
        self.patch.kind = Some(kind);
        self
    }

    /// Set the allocated device.
    #[must_use]
    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.patch.device = Some(device.into());
        self
    }

    /// Set delegate statistics.
    #[must_use]
    pub fn stats(mut self, stats: serde_json::Value) -> Self {
        self.patch.stats = Some(stats);
        self
    }

    /// Replace the whole patch.
    #[must_use]
    pub fn with_patch(mut self, patch: TaskPatch) -> Self {
        self.patch = patch;
        self
    }
}
