//! Core orchestration: devices, capacity accounting, task lifecycle,
//! workers and log streaming.

pub mod delegate;
pub mod device;
pub mod error;
pub mod event;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod reporter;
pub mod request;
pub mod resource_pool;
pub mod stream;
pub mod task;
pub mod worker;

pub use delegate::{
    Delegates, InferenceConfig, InferenceFactory, Inferencer, Preprocessor, TaskContext, Trainer,
    TrainerConfig, TrainerFactory,
};
pub use device::{class_of, DeviceTopology, CPU_DEVICE, GPU_CLASS};
pub use error::{AppResult, DelegateError, OrchestratorError};
pub use event::{LogEvent, LogLevel};
pub use metrics::{LogLineParser, MetricsSnapshot, ParsedLine, Stage};
pub use orchestrator::{HealthReport, Orchestrator, PENDING_MESSAGE};
pub use registry::{TaskRegistry, CANCELLED_MESSAGE};
pub use reporter::TaskReporter;
pub use request::{
    BatchInferenceRequest, InferenceRequest, PreprocessJob, PreprocessRequest, TaskRequest,
    TrainingRequest,
};
pub use resource_pool::{
    ActiveEntry, Admission, Allocation, LimitTable, ResourcePool, ResourceSnapshot, UsageTable,
};
pub use stream::{LogStream, StreamEnd, StreamFrame, STREAM_END_MESSAGE};
pub use task::{Task, TaskKind, TaskPatch, TaskStatus, TaskUpdate};
pub use worker::{AdmissionTiming, Spawn, TaskWorker};
