//! Per-task worker: admission, delegate execution, outcome mapping and
//! guaranteed release.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::core::delegate::{Delegates, InferenceConfig, TaskContext, TrainerConfig};
use crate::core::error::DelegateError;
use crate::core::event::{LogEvent, LogLevel};
use crate::core::registry::{TaskRegistry, CANCELLED_MESSAGE};
use crate::core::reporter::TaskReporter;
use crate::core::request::TaskRequest;
use crate::core::resource_pool::{Admission, Allocation, ResourcePool};
use crate::core::task::{TaskKind, TaskStatus, TaskUpdate};
use crate::infra::log_hub::LogHub;
use crate::infra::wait_queue::AdmissionTicket;
use crate::util::{Priority, TaskId};

/// Abstraction for spawning task execution on a runtime.
pub trait Spawn {
    /// Spawn a detached future.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Admission timing for one worker.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionTiming {
    /// Fallback re-check interval while waiting.
    pub backoff: Duration,
    /// Give up and fail the task after this long.
    pub timeout: Option<Duration>,
}

/// Drives one task from `pending` to a terminal status.
pub struct TaskWorker {
    task_id: TaskId,
    request: TaskRequest,
    priority: Priority,
    timing: AdmissionTiming,
    registry: Arc<TaskRegistry>,
    hub: Arc<LogHub>,
    pool: Arc<ResourcePool>,
    delegates: Delegates,
}

enum Outcome {
    Completed(Option<serde_json::Value>),
    Cancelled,
    Failed(String),
}

impl TaskWorker {
    /// Worker for an already-registered `pending` task.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        task_id: TaskId,
        request: TaskRequest,
        priority: Priority,
        timing: AdmissionTiming,
        registry: Arc<TaskRegistry>,
        hub: Arc<LogHub>,
        pool: Arc<ResourcePool>,
        delegates: Delegates,
    ) -> Self {
        Self {
            task_id,
            request,
            priority,
            timing,
            registry,
            hub,
            pool,
            delegates,
        }
    }

    fn emit(&self, level: LogLevel, message: impl Into<String>) {
        self.hub.push(&self.task_id, LogEvent::new(level, message));
    }

    fn set(&self, update: TaskUpdate) -> bool {
        match self.registry.update(&self.task_id, update) {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!(task_id = %self.task_id, error = %err, "status update skipped");
                false
            }
        }
    }

    /// Run the task to completion. Never panics and never leaks capacity.
    pub async fn run(self) {
        let kind = self.request.kind();
        let requested = self.request.device().to_string();

        if !self.set(TaskUpdate::status(TaskStatus::Queued).message("waiting for resources...")) {
            tracing::info!(task_id = %self.task_id, "task cancelled or deleted before queueing");
            return;
        }
        self.emit(
            LogLevel::Info,
            format!("waiting for {} resources...", requested.to_uppercase()),
        );
        tracing::info!(task_id = %self.task_id, device = %requested, %kind, "task queued");

        let allocation = match self.admit(kind, &requested).await {
            Some(Ok(allocation)) => allocation,
            Some(Err(message)) => {
                self.emit(LogLevel::Error, message.clone());
                self.set(TaskUpdate::status(TaskStatus::Failed).message(message));
                return;
            }
            None => return,
        };
        let device = allocation
            .as_ref()
            .map_or_else(|| crate::core::device::CPU_DEVICE.to_string(), |a| a.device().to_string());

        if !self.set(
            TaskUpdate::status(TaskStatus::Running)
                .message(format!("{kind} running..."))
                .device(device.clone()),
        ) {
            tracing::info!(task_id = %self.task_id, "task cancelled at admission");
            return;
        }
        self.emit(LogLevel::Info, format!("resources allocated, using device: {device}"));
        self.emit(LogLevel::Info, format!("starting {kind}..."));
        tracing::info!(task_id = %self.task_id, device = %device, %kind, "task running");

        let reporter = Arc::new(TaskReporter::new(
            self.task_id.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.hub),
        ));
        let ctx = TaskContext::new(
            self.task_id.clone(),
            device.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&reporter),
        );
        let request = self.request.clone();
        let delegates = self.delegates.clone();
        let joined =
            tokio::task::spawn_blocking(move || execute(&request, &delegates, &ctx)).await;

        let outcome = match joined {
            Ok(Ok(_)) if self.registry.is_cancelled(&self.task_id) => Outcome::Cancelled,
            Ok(Ok(stats)) => Outcome::Completed(stats),
            Ok(Err(DelegateError::Cancelled)) => Outcome::Cancelled,
            Ok(Err(err)) => Outcome::Failed(err.to_string()),
            Err(join) => {
                tracing::error!(task_id = %self.task_id, error = %join, "delegate panicked");
                Outcome::Failed("delegate panicked".to_string())
            }
        };
        self.finish(kind, &reporter, outcome);
        drop(allocation);
    }

    /// `Some(Ok(None))` for work that bypasses the pool, `None` when the
    /// task was cancelled while waiting.
    async fn admit(
        &self,
        kind: TaskKind,
        requested: &str,
    ) -> Option<Result<Option<Allocation>, String>> {
        if !kind.uses_pool() {
            return Some(Ok(None));
        }
        let ticket = AdmissionTicket::new(self.task_id.clone(), requested, kind, self.priority);
        let registry = Arc::clone(&self.registry);
        let task_id = self.task_id.clone();
        let admission = self
            .pool
            .acquire(ticket, self.timing.backoff, self.timing.timeout, move || {
                registry.is_cancelled(&task_id)
            })
            .await;
        match admission {
            Ok(Admission::Granted(allocation)) => Some(Ok(Some(allocation))),
            Ok(Admission::Cancelled) => {
                tracing::info!(task_id = %self.task_id, "cancelled while waiting for admission");
                None
            }
            Err(err) => {
                tracing::warn!(task_id = %self.task_id, error = %err, "admission failed");
                Some(Err(err.to_string()))
            }
        }
    }

    fn finish(&self, kind: TaskKind, reporter: &TaskReporter, outcome: Outcome) {
        match outcome {
            Outcome::Completed(stats) => {
                match kind {
                    TaskKind::Training => reporter.info("Training completed"),
                    _ => self.emit(LogLevel::Info, format!("{kind} completed")),
                }
                let mut update = TaskUpdate::status(TaskStatus::Completed)
                    .message(format!("{kind} completed"))
                    .progress(100);
                if let Some(stats) = stats {
                    update = update.stats(stats);
                }
                self.set(update);
                tracing::info!(task_id = %self.task_id, %kind, "task completed");
            }
            Outcome::Cancelled => {
                self.emit(LogLevel::Warning, CANCELLED_MESSAGE);
                if !self.registry.is_cancelled(&self.task_id) {
                    self.set(TaskUpdate::status(TaskStatus::Cancelled).message(CANCELLED_MESSAGE));
                }
                tracing::info!(task_id = %self.task_id, %kind, "task cancelled");
            }
            Outcome::Failed(message) => {
                self.emit(LogLevel::Error, message.clone());
                self.set(TaskUpdate::status(TaskStatus::Failed).message(message.clone()));
                tracing::error!(task_id = %self.task_id, %kind, error = %message, "task failed");
            }
        }
    }
}

/// Blocking delegate call for one request.
fn execute(
    request: &TaskRequest,
    delegates: &Delegates,
    ctx: &TaskContext,
) -> Result<Option<serde_json::Value>, DelegateError> {
    match request {
        TaskRequest::Training(req) => {
            std::fs::create_dir_all(&req.save_path)?;
            let reporter = ctx.reporter();
            reporter.info(&format!("model: {}", req.model));
            reporter.info(&format!("device: {}", ctx.device()));
            reporter.info(&format!("batch size: {}", req.batch_size));
            reporter.info(&format!("epochs: {}", req.num_epochs));
            let mut trainer = delegates.trainer.build(TrainerConfig {
                model: req.model.clone(),
                train_path: req.train_path.clone(),
                val_path: req.val_path.clone(),
                num_classes: req.num_classes,
                save_path: req.save_path.clone(),
                weight_path: req.weight_path.clone(),
                device: ctx.device().to_string(),
                batch_size: req.batch_size,
                shuffle: req.shuffle,
                image_size: req.image_size,
                learning_rate: req.learning_rate,
                pretrained: req.pretrained,
                context: ctx.clone(),
            })?;
            trainer.train(req.num_epochs)?;
            Ok(None)
        }
        TaskRequest::Inference(req) => {
            let mut inferencer = delegates.inference.build(InferenceConfig {
                config_path: req.config_path.clone(),
                weight_path: req.weight_path.clone(),
                device: ctx.device().to_string(),
                context: ctx.clone(),
            })?;
            let save = req.save_path_or_default();
            ctx.reporter()
                .info(&format!("running inference on {}", req.source_path.display()));
            inferencer.inference(&req.source_path, &save)?;
            ctx.reporter()
                .info(&format!("results saved to {}", save.display()));
            Ok(None)
        }
        TaskRequest::Preprocessing(req) => {
            ctx.reporter()
                .info(&format!("starting {} operation", req.job.operation()));
            delegates.preprocessor.run(&req.job, ctx)
        }
    }
}
