//! Error types for orchestration and delegate execution.

use thiserror::Error;

use crate::core::task::{TaskKind, TaskStatus};

/// Errors produced by orchestrator components.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Request rejected before a task was created.
    #[error("validation error: {0}")]
    Validation(String),
    /// Device string does not name a device or device class in the pool.
    #[error("unknown device: {0}")]
    UnknownDevice(String),
    /// No task with this id.
    #[error("task not found: {0}")]
    NotFound(String),
    /// Status change out of a terminal state or along a missing edge.
    #[error("invalid transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        /// Task identifier.
        id: String,
        /// Current status.
        from: TaskStatus,
        /// Requested status.
        to: TaskStatus,
    },
    /// No member of the requested device has headroom for this kind.
    #[error("capacity exceeded on {device} for {kind}")]
    CapacityExceeded {
        /// Requested device or device class.
        device: String,
        /// Task kind.
        kind: TaskKind,
    },
    /// Admission wait exceeded the configured bound.
    #[error("allocation timed out for task {task_id} on {device}")]
    AllocationTimeout {
        /// Task identifier.
        task_id: String,
        /// Requested device or device class.
        device: String,
    },
    /// A live log consumer is already attached to this task.
    #[error("log stream already attached for task {0}")]
    StreamBusy(String),
    /// Configuration failed validation.
    #[error("config error: {0}")]
    Config(String),
}

/// Errors a delegate may report back to its worker.
#[derive(Debug, Error)]
pub enum DelegateError {
    /// The delegate observed the cancellation predicate and aborted.
    #[error("cancelled")]
    Cancelled,
    /// Any other failure; the text becomes the task message.
    #[error("{0}")]
    Failed(String),
    /// Filesystem failure while preparing or writing artifacts.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DelegateError {
    /// Convenience constructor for [`DelegateError::Failed`].
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
