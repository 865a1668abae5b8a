//! Contracts for the external numerical collaborators and the context
//! they run with.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::error::DelegateError;
use crate::core::registry::TaskRegistry;
use crate::core::reporter::TaskReporter;
use crate::core::request::PreprocessJob;
use crate::util::TaskId;

/// What a delegate can see of its task while running.
#[derive(Clone)]
pub struct TaskContext {
    task_id: TaskId,
    device: String,
    registry: Arc<TaskRegistry>,
    reporter: Arc<TaskReporter>,
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task_id)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl TaskContext {
    /// Context for `task_id` running on `device`.
    pub fn new(
        task_id: impl Into<TaskId>,
        device: impl Into<String>,
        registry: Arc<TaskRegistry>,
        reporter: Arc<TaskReporter>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            device: device.into(),
            registry,
            reporter,
        }
    }

    /// Task identifier.
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Concrete device the task was admitted on.
    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Whether cancellation was requested or the task was deleted.
    /// Delegates should poll this at safe points.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.registry.is_cancelled(&self.task_id)
    }

    /// `Err(DelegateError::Cancelled)` once cancellation was requested.
    ///
    /// # Errors
    ///
    /// [`DelegateError::Cancelled`] when the task was cancelled.
    pub fn check_cancelled(&self) -> Result<(), DelegateError> {
        if self.is_cancelled() {
            Err(DelegateError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Progress sink for this task.
    #[must_use]
    pub fn reporter(&self) -> &TaskReporter {
        &self.reporter
    }
}

/// Everything a trainer is constructed from.
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    /// Architecture name.
    pub model: String,
    /// Training split root.
    pub train_path: PathBuf,
    /// Validation split root.
    pub val_path: PathBuf,
    /// Number of output classes.
    pub num_classes: u32,
    /// Checkpoint directory.
    pub save_path: PathBuf,
    /// Optional initial weights.
    pub weight_path: Option<PathBuf>,
    /// Concrete device.
    pub device: String,
    /// Mini-batch size.
    pub batch_size: u32,
    /// Shuffle the training split.
    pub shuffle: bool,
    /// Square input resolution.
    pub image_size: u32,
    /// Optimiser learning rate.
    pub learning_rate: f64,
    /// Start from pretrained weights.
    pub pretrained: bool,
    /// Cancellation and reporting.
    pub context: TaskContext,
}

/// A constructed training run.
pub trait Trainer: Send {
    /// Train for `num_epochs`, reporting through the context.
    ///
    /// # Errors
    ///
    /// [`DelegateError::Cancelled`] after observing cancellation, anything
    /// else on failure.
    fn train(&mut self, num_epochs: u32) -> Result<(), DelegateError>;
}

/// Builds trainers.
pub trait TrainerFactory: Send + Sync {
    /// Construct a trainer.
    ///
    /// # Errors
    ///
    /// Any construction failure; it fails the task.
    fn build(&self, config: TrainerConfig) -> Result<Box<dyn Trainer>, DelegateError>;
}

/// Everything an inferencer is constructed from.
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// Model configuration file.
    pub config_path: PathBuf,
    /// Model weights.
    pub weight_path: PathBuf,
    /// Concrete device.
    pub device: String,
    /// Cancellation and reporting.
    pub context: TaskContext,
}

/// A loaded inference model.
pub trait Inferencer: Send {
    /// Run over `source` and write results under `save`.
    ///
    /// # Errors
    ///
    /// [`DelegateError::Cancelled`] after observing cancellation, anything
    /// else on failure.
    fn inference(&mut self, source: &Path, save: &Path) -> Result<(), DelegateError>;
}

/// Builds inferencers.
pub trait InferenceFactory: Send + Sync {
    /// Load a model.
    ///
    /// # Errors
    ///
    /// Any load failure; it fails the task.
    fn build(&self, config: InferenceConfig) -> Result<Box<dyn Inferencer>, DelegateError>;
}

/// Dataset split / augment / crop.
pub trait Preprocessor: Send + Sync {
    /// Run `job`, returning optional statistics stored on the task.
    ///
    /// # Errors
    ///
    /// [`DelegateError::Cancelled`] after observing cancellation, anything
    /// else on failure.
    fn run(
        &self,
        job: &PreprocessJob,
        ctx: &TaskContext,
    ) -> Result<Option<serde_json::Value>, DelegateError>;
}

/// The set of delegates an orchestrator dispatches to.
#[derive(Clone)]
pub struct Delegates {
    /// Training backend.
    pub trainer: Arc<dyn TrainerFactory>,
    /// Inference backend.
    pub inference: Arc<dyn InferenceFactory>,
    /// Preprocessing backend.
    pub preprocessor: Arc<dyn Preprocessor>,
}

impl Delegates {
    /// Bundle three backends.
    pub fn new(
        trainer: Arc<dyn TrainerFactory>,
        inference: Arc<dyn InferenceFactory>,
        preprocessor: Arc<dyn Preprocessor>,
    ) -> Self {
        Self {
            trainer,
            inference,
            preprocessor,
        }
    }
}

impl std::fmt::Debug for Delegates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delegates").finish_non_exhaustive()
    }
}
