//! Submission payloads and their intrinsic validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::OrchestratorError;
use crate::core::task::TaskKind;
use crate::util::Priority;

fn default_device() -> String {
    crate::core::device::GPU_CLASS.to_string()
}

const fn default_batch_size() -> u32 {
    8
}

const fn default_num_epochs() -> u32 {
    100
}

const fn default_learning_rate() -> f64 {
    0.0001
}

const fn default_image_size() -> u32 {
    224
}

const fn default_true() -> bool {
    true
}

const fn default_train_ratio() -> f64 {
    0.8
}

fn require_path(label: &str, path: &Path) -> Result<(), OrchestratorError> {
    if path.exists() {
        Ok(())
    } else {
        Err(OrchestratorError::Validation(format!(
            "{label} does not exist: {}",
            path.display()
        )))
    }
}

/// Start a training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRequest {
    /// Architecture name; must be in the supported list.
    pub model: String,
    /// Number of output classes.
    pub num_classes: u32,
    /// Training split root.
    pub train_path: PathBuf,
    /// Validation split root.
    pub val_path: PathBuf,
    /// Checkpoint directory, created by the worker.
    pub save_path: PathBuf,
    /// Mini-batch size.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Epoch budget.
    #[serde(default = "default_num_epochs")]
    pub num_epochs: u32,
    /// Learning rate.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Square input resolution.
    #[serde(default = "default_image_size")]
    pub image_size: u32,
    /// Device or device class.
    #[serde(default = "default_device")]
    pub device: String,
    /// Optional initial weights.
    #[serde(default)]
    pub weight_path: Option<PathBuf>,
    /// Start from pretrained weights.
    #[serde(default = "default_true")]
    pub pretrained: bool,
    /// Shuffle the training split.
    #[serde(default = "default_true")]
    pub shuffle: bool,
    /// Caller-chosen id.
    #[serde(default)]
    pub task_id: Option<String>,
    /// Admission priority; the configured default when absent.
    #[serde(default)]
    pub priority: Option<Priority>,
    /// Free-form note.
    #[serde(default)]
    pub description: Option<String>,
}

impl TrainingRequest {
    /// Minimal request with defaults for every optional field.
    pub fn new(
        model: impl Into<String>,
        num_classes: u32,
        train_path: impl Into<PathBuf>,
        val_path: impl Into<PathBuf>,
        save_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            model: model.into(),
            num_classes,
            train_path: train_path.into(),
            val_path: val_path.into(),
            save_path: save_path.into(),
            batch_size: default_batch_size(),
            num_epochs: default_num_epochs(),
            learning_rate: default_learning_rate(),
            image_size: default_image_size(),
            device: default_device(),
            weight_path: None,
            pretrained: true,
            shuffle: true,
            task_id: None,
            priority: None,
            description: None,
        }
    }

    /// Field checks that do not depend on configuration.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::Validation`] on a bad value or a missing path.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.num_classes == 0 {
            return Err(OrchestratorError::Validation("num_classes must be >= 1".into()));
        }
        if self.batch_size == 0 {
            return Err(OrchestratorError::Validation("batch_size must be >= 1".into()));
        }
        if self.num_epochs == 0 {
            return Err(OrchestratorError::Validation("num_epochs must be >= 1".into()));
        }
        if self.image_size < 32 {
            return Err(OrchestratorError::Validation("image_size must be >= 32".into()));
        }
        if self.learning_rate.partial_cmp(&0.0) != Some(std::cmp::Ordering::Greater) {
            return Err(OrchestratorError::Validation("learning_rate must be > 0".into()));
        }
        require_path("training set path", &self.train_path)?;
        require_path("validation set path", &self.val_path)
    }
}

/// Run inference over one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// Model configuration file.
    #[serde(alias = "cfg_path")]
    pub config_path: PathBuf,
    /// Model weights.
    pub weight_path: PathBuf,
    /// Input data.
    pub source_path: PathBuf,
    /// Output directory; `./results/` when absent.
    #[serde(default)]
    pub save_path: Option<PathBuf>,
    /// Device or device class.
    #[serde(default = "default_device")]
    pub device: String,
    /// Caller-chosen id.
    #[serde(default)]
    pub task_id: Option<String>,
    /// Admission priority; the configured default when absent.
    #[serde(default)]
    pub priority: Option<Priority>,
}

/// Output directory used when an inference request names none.
pub const DEFAULT_INFERENCE_SAVE_PATH: &str = "./results/";

impl InferenceRequest {
    /// Minimal request with defaults for every optional field.
    pub fn new(
        config_path: impl Into<PathBuf>,
        weight_path: impl Into<PathBuf>,
        source_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config_path: config_path.into(),
            weight_path: weight_path.into(),
            source_path: source_path.into(),
            save_path: None,
            device: default_device(),
            task_id: None,
            priority: None,
        }
    }

    /// Output directory, falling back to [`DEFAULT_INFERENCE_SAVE_PATH`].
    #[must_use]
    pub fn save_path_or_default(&self) -> PathBuf {
        self.save_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_INFERENCE_SAVE_PATH))
    }

    /// All three input paths must exist.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::Validation`] naming the first missing path.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        require_path("config file", &self.config_path)?;
        require_path("weight file", &self.weight_path)?;
        require_path("source path", &self.source_path)
    }
}

/// One inference task per source path, sharing model and device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchInferenceRequest {
    /// Model configuration file.
    #[serde(alias = "cfg_path")]
    pub config_path: PathBuf,
    /// Model weights.
    pub weight_path: PathBuf,
    /// Inputs, one task each.
    pub source_paths: Vec<PathBuf>,
    /// Each task saves to `<base>/<index>`.
    #[serde(default)]
    pub save_base_path: Option<PathBuf>,
    /// Device or device class.
    #[serde(default = "default_device")]
    pub device: String,
    /// Admission priority; the configured default when absent.
    #[serde(default)]
    pub priority: Option<Priority>,
}

impl BatchInferenceRequest {
    /// Expand into per-source requests.
    #[must_use]
    pub fn expand(&self) -> Vec<InferenceRequest> {
        self.source_paths
            .iter()
            .enumerate()
            .map(|(idx, source)| InferenceRequest {
                config_path: self.config_path.clone(),
                weight_path: self.weight_path.clone(),
                source_path: source.clone(),
                save_path: self.save_base_path.as_ref().map(|base| base.join(idx.to_string())),
                device: self.device.clone(),
                task_id: None,
                priority: self.priority,
            })
            .collect()
    }
}

/// A dataset operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum PreprocessJob {
    /// Split a class-per-folder dataset into train/val(/test).
    Split {
        /// Source dataset.
        input_path: PathBuf,
        /// Destination root.
        output_path: PathBuf,
        /// Fraction for training, `0.1..=0.9`.
        #[serde(default = "default_train_ratio")]
        train_ratio: f64,
        /// Optional validation fraction for a three-way split, `0.05..=0.5`.
        #[serde(default)]
        val_ratio: Option<f64>,
    },
    /// Write augmented copies of the train and valid folders.
    Augment {
        /// Dataset containing `train` and `valid`.
        dataset_path: PathBuf,
        /// Destination; the delegate picks one when absent.
        #[serde(default)]
        output_path: Option<PathBuf>,
        /// Augmentation names; the delegate's defaults when absent.
        #[serde(default)]
        methods: Option<Vec<String>>,
    },
    /// Crop every image to a fixed rectangle.
    Crop {
        /// Source images.
        input_path: PathBuf,
        /// Destination root.
        output_path: PathBuf,
        /// Left edge.
        x: u32,
        /// Top edge.
        y: u32,
        /// Width, > 0.
        width: u32,
        /// Height, > 0.
        height: u32,
    },
}

impl PreprocessJob {
    /// Wire name of the operation.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Split { .. } => "split",
            Self::Augment { .. } => "augment",
            Self::Crop { .. } => "crop",
        }
    }

    /// Range and path checks.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::Validation`] on a bad value or a missing path.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        match self {
            Self::Split {
                input_path,
                train_ratio,
                val_ratio,
                ..
            } => {
                if !(0.1..=0.9).contains(train_ratio) {
                    return Err(OrchestratorError::Validation(format!(
                        "train_ratio must be within 0.1..=0.9, got {train_ratio}"
                    )));
                }
                if let Some(val) = val_ratio {
                    if !(0.05..=0.5).contains(val) {
                        return Err(OrchestratorError::Validation(format!(
                            "val_ratio must be within 0.05..=0.5, got {val}"
                        )));
                    }
                    if train_ratio + val >= 1.0 {
                        return Err(OrchestratorError::Validation(
                            "train_ratio + val_ratio must be < 1".into(),
                        ));
                    }
                }
                require_path("input path", input_path)
            }
            Self::Augment { dataset_path, .. } => require_path("dataset path", dataset_path),
            Self::Crop {
                input_path,
                width,
                height,
                ..
            } => {
                if *width == 0 || *height == 0 {
                    return Err(OrchestratorError::Validation(
                        "crop width and height must be > 0".into(),
                    ));
                }
                require_path("input path", input_path)
            }
        }
    }
}

/// Start a preprocessing job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessRequest {
    /// The operation and its parameters.
    #[serde(flatten)]
    pub job: PreprocessJob,
    /// Caller-chosen id.
    #[serde(default)]
    pub task_id: Option<String>,
    /// Free-form note.
    #[serde(default)]
    pub description: Option<String>,
}

impl PreprocessRequest {
    /// Request for `job` with a generated id.
    #[must_use]
    pub const fn new(job: PreprocessJob) -> Self {
        Self {
            job,
            task_id: None,
            description: None,
        }
    }
}

/// Any submittable job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "task_type", rename_all = "snake_case")]
pub enum TaskRequest {
    /// Training run.
    Training(TrainingRequest),
    /// Single inference.
    Inference(InferenceRequest),
    /// Dataset operation.
    Preprocessing(PreprocessRequest),
}

impl TaskRequest {
    /// Kind of task this request creates.
    #[must_use]
    pub const fn kind(&self) -> TaskKind {
        match self {
            Self::Training(_) => TaskKind::Training,
            Self::Inference(_) => TaskKind::Inference,
            Self::Preprocessing(_) => TaskKind::Preprocessing,
        }
    }

    /// Caller-chosen id, if any.
    #[must_use]
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::Training(r) => r.task_id.as_deref(),
            Self::Inference(r) => r.task_id.as_deref(),
            Self::Preprocessing(r) => r.task_id.as_deref(),
        }
    }

    /// Requested device; preprocessing always runs on the CPU.
    #[must_use]
    pub fn device(&self) -> &str {
        match self {
            Self::Training(r) => &r.device,
            Self::Inference(r) => &r.device,
            Self::Preprocessing(_) => crate::core::device::CPU_DEVICE,
        }
    }

    /// Explicit priority, if any.
    #[must_use]
    pub const fn priority(&self) -> Option<Priority> {
        match self {
            Self::Training(r) => r.priority,
            Self::Inference(r) => r.priority,
            Self::Preprocessing(_) => None,
        }
    }
}

impl From<TrainingRequest> for TaskRequest {
    fn from(r: TrainingRequest) -> Self {
        Self::Training(r)
    }
}

impl From<InferenceRequest> for TaskRequest {
    fn from(r: InferenceRequest) -> Self {
        Self::Inference(r)
    }
}

impl From<PreprocessRequest> for TaskRequest {
    fn from(r: PreprocessRequest) -> Self {
        Self::Preprocessing(r)
    }
}
