//! Facade tying the pool, registry, log hub and workers together.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::OrchestratorConfig;
use crate::core::delegate::Delegates;
use crate::core::error::OrchestratorError;
use crate::core::event::{LogEvent, LogLevel};
use crate::core::metrics::MetricsSnapshot;
use crate::core::registry::TaskRegistry;
use crate::core::request::{BatchInferenceRequest, TaskRequest};
use crate::core::resource_pool::{LimitTable, ResourcePool, ResourceSnapshot};
use crate::core::stream::{open_stream, LogStream};
use crate::core::task::{Task, TaskKind, TaskStatus};
use crate::core::worker::{AdmissionTiming, Spawn, TaskWorker};
use crate::infra::log_hub::LogHub;
use crate::util::{generate_task_id, TaskId};

/// Message on freshly submitted tasks.
pub const PENDING_MESSAGE: &str = "waiting to start";

/// Liveness summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Registered tasks per kind.
    pub tasks_by_kind: BTreeMap<TaskKind, usize>,
    /// Tasks with an attached live log consumer.
    pub active_log_streams: usize,
    /// Pool ledger.
    pub resources: ResourceSnapshot,
}

/// Entry point for submitting and observing tasks.
#[derive(Clone)]
pub struct Orchestrator<S> {
    config: Arc<OrchestratorConfig>,
    registry: Arc<TaskRegistry>,
    hub: Arc<LogHub>,
    pool: Arc<ResourcePool>,
    delegates: Delegates,
    spawner: S,
}

impl<S> std::fmt::Debug for Orchestrator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("pool", &self.pool)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl<S> Orchestrator<S>
where
    S: Spawn + Clone + Send + Sync + 'static,
{
    /// Validate `config` and build a fresh pool, registry and log hub.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::Config`] when validation fails.
    pub fn new(
        config: OrchestratorConfig,
        delegates: Delegates,
        spawner: S,
    ) -> Result<Self, OrchestratorError> {
        config.validate().map_err(OrchestratorError::Config)?;
        let pool = ResourcePool::new(
            config.topology(),
            config.limits.clone(),
            config.admission_policy,
        );
        tracing::info!(
            devices = ?pool.topology().devices(),
            policy = ?config.admission_policy,
            "orchestrator ready"
        );
        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(TaskRegistry::new()),
            hub: Arc::new(LogHub::new()),
            pool: Arc::new(pool),
            delegates,
            spawner,
        })
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Shared resource pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<ResourcePool> {
        &self.pool
    }

    /// Shared task registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    fn check(&self, request: &TaskRequest) -> Result<(), OrchestratorError> {
        match request {
            TaskRequest::Training(req) => {
                if !self.config.supported_models.iter().any(|m| m == &req.model) {
                    return Err(OrchestratorError::Validation(format!(
                        "unsupported model: {}",
                        req.model
                    )));
                }
                req.validate()?;
            }
            TaskRequest::Inference(req) => req.validate()?,
            TaskRequest::Preprocessing(req) => req.job.validate()?,
        }
        self.pool.resolve_device(request.device())?;
        Ok(())
    }

    /// Validate, register as `pending` and schedule a worker.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::Validation`] or [`OrchestratorError::UnknownDevice`];
    /// nothing is registered on error.
    pub fn submit(&self, request: impl Into<TaskRequest>) -> Result<TaskId, OrchestratorError> {
        let request = request.into();
        self.check(&request)?;
        self.register(request)
    }

    fn register(&self, request: TaskRequest) -> Result<TaskId, OrchestratorError> {
        let kind = request.kind();
        let id = generate_task_id(request.task_id());
        let priority = request
            .priority()
            .unwrap_or_else(|| self.config.default_priority_for(kind));

        let mut task = Task::new(id.clone(), kind, TaskStatus::Pending);
        task.message = PENDING_MESSAGE.to_string();
        task.requested_device = request.device().to_string();
        task.priority = priority;
        if let TaskRequest::Training(req) = &request {
            task.model = Some(req.model.clone());
            task.total_epochs = Some(req.num_epochs);
            task.latest_metrics = MetricsSnapshot {
                total_epochs: Some(req.num_epochs),
                ..MetricsSnapshot::default()
            };
        }
        self.registry.create(task)?;
        self.hub.open(&id);

        let timing = AdmissionTiming {
            backoff: self.config.backoff_for(kind),
            timeout: self.config.admission_timeout(),
        };
        let worker = TaskWorker::new(
            id.clone(),
            request,
            priority,
            timing,
            Arc::clone(&self.registry),
            Arc::clone(&self.hub),
            Arc::clone(&self.pool),
            self.delegates.clone(),
        );
        self.spawner.spawn(worker.run());
        tracing::info!(task_id = %id, %kind, %priority, "task submitted");
        Ok(id)
    }

    /// One inference task per source path; save paths are `<base>/<index>`.
    ///
    /// Every expanded request is validated before any task is registered.
    ///
    /// # Errors
    ///
    /// The first validation failure.
    pub fn submit_batch_inference(
        &self,
        batch: BatchInferenceRequest,
    ) -> Result<Vec<TaskId>, OrchestratorError> {
        if batch.source_paths.is_empty() {
            return Err(OrchestratorError::Validation(
                "source_paths must not be empty".into(),
            ));
        }
        let requests: Vec<TaskRequest> = batch.expand().into_iter().map(Into::into).collect();
        for request in &requests {
            self.check(request)?;
        }
        requests
            .into_iter()
            .map(|request| self.register(request))
            .collect()
    }

    /// Copy of a task record.
    #[must_use]
    pub fn get_task(&self, task_id: &str) -> Option<Task> {
        self.registry.get(task_id)
    }

    /// Tasks in submission order; `limit` defaults to the configured page size.
    #[must_use]
    pub fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        kind: Option<TaskKind>,
        limit: Option<usize>,
    ) -> Vec<Task> {
        self.registry
            .list(status, kind, limit.unwrap_or(self.config.default_list_limit))
    }

    /// Cancel a live task. Running delegates observe it cooperatively.
    pub fn cancel(&self, task_id: &str) -> bool {
        if !self.registry.cancel(task_id) {
            return false;
        }
        self.hub.push(
            task_id,
            LogEvent::new(LogLevel::Warning, "task cancelled by user"),
        );
        self.pool.wake_waiters();
        true
    }

    /// Delete a terminal task together with its logs.
    pub fn delete(&self, task_id: &str) -> bool {
        if !self.registry.delete(task_id) {
            return false;
        }
        self.hub.remove(task_id);
        true
    }

    /// Attach the single live log consumer.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::NotFound`] or [`OrchestratorError::StreamBusy`].
    pub fn stream_log(&self, task_id: &str) -> Result<LogStream, OrchestratorError> {
        open_stream(
            task_id,
            Arc::clone(&self.registry),
            Arc::clone(&self.hub),
            self.config.stream_poll_interval(),
        )
    }

    /// Full log history.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::NotFound`] for an unknown task.
    pub fn logs(&self, task_id: &str) -> Result<Vec<LogEvent>, OrchestratorError> {
        if !self.registry.contains(task_id) {
            return Err(OrchestratorError::NotFound(task_id.to_string()));
        }
        Ok(self.hub.history(task_id))
    }

    /// Pool ledger snapshot.
    #[must_use]
    pub fn resource_status(&self) -> ResourceSnapshot {
        self.pool.status()
    }

    /// Deep-merge new limits at runtime.
    pub fn update_limits(&self, partial: LimitTable) {
        self.pool.update_limits(partial);
    }

    /// Task counts, stream count and ledger.
    #[must_use]
    pub fn health(&self) -> HealthReport {
        HealthReport {
            tasks_by_kind: self.registry.counts_by_kind().into_iter().collect(),
            active_log_streams: self.hub.active_streams(),
            resources: self.pool.status(),
        }
    }
}
