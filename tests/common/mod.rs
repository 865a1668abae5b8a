//! Mock delegates and helpers shared by the integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use devicelot::builders::build_orchestrator;
use devicelot::config::OrchestratorConfig;
use devicelot::core::{
    DelegateError, Delegates, InferenceConfig, InferenceFactory, Inferencer, Orchestrator,
    PreprocessJob, Preprocessor, TaskContext, TaskStatus, Trainer, TrainerConfig, TrainerFactory,
};
use devicelot::runtime::TokioSpawner;
use serde_json::json;

/// How a mock delegate ends its run.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    /// Block until the harness releases one permit, observing cancellation.
    Hold,
    Fail(String),
    Panic,
    BuildFails(String),
}

#[derive(Debug, Clone)]
pub struct Started {
    pub task_id: String,
    pub device: String,
}

struct Shared {
    behavior: Behavior,
    started: flume::Sender<Started>,
    permits: flume::Receiver<()>,
}

impl Shared {
    fn begin(&self, ctx: &TaskContext) {
        let _ = self.started.send(Started {
            task_id: ctx.task_id().to_string(),
            device: ctx.device().to_string(),
        });
    }

    fn finish(&self, ctx: &TaskContext) -> Result<(), DelegateError> {
        match &self.behavior {
            Behavior::Succeed | Behavior::BuildFails(_) => Ok(()),
            Behavior::Hold => loop {
                ctx.check_cancelled()?;
                match self.permits.recv_timeout(Duration::from_millis(5)) {
                    Ok(()) | Err(flume::RecvTimeoutError::Disconnected) => return Ok(()),
                    Err(flume::RecvTimeoutError::Timeout) => {}
                }
            },
            Behavior::Fail(msg) => Err(DelegateError::failed(msg.clone())),
            Behavior::Panic => panic!("mock delegate exploded"),
        }
    }
}

struct MockTrainerFactory(Arc<Shared>);

struct MockTrainer {
    shared: Arc<Shared>,
    ctx: TaskContext,
}

impl TrainerFactory for MockTrainerFactory {
    fn build(&self, config: TrainerConfig) -> Result<Box<dyn Trainer>, DelegateError> {
        if let Behavior::BuildFails(msg) = &self.0.behavior {
            return Err(DelegateError::failed(msg.clone()));
        }
        Ok(Box::new(MockTrainer {
            shared: Arc::clone(&self.0),
            ctx: config.context,
        }))
    }
}

impl Trainer for MockTrainer {
    fn train(&mut self, num_epochs: u32) -> Result<(), DelegateError> {
        self.shared.begin(&self.ctx);
        let reporter = self.ctx.reporter();
        for epoch in 1..=num_epochs {
            self.ctx.check_cancelled()?;
            reporter.info(&format!("Epoch [{epoch}/{num_epochs}] started"));
            reporter.info("Train Loss: 0.5, Train Accuracy: 80.0%");
        }
        self.shared.finish(&self.ctx)
    }
}

struct MockInferenceFactory(Arc<Shared>);

struct MockInferencer {
    shared: Arc<Shared>,
    ctx: TaskContext,
}

impl InferenceFactory for MockInferenceFactory {
    fn build(&self, config: InferenceConfig) -> Result<Box<dyn Inferencer>, DelegateError> {
        if let Behavior::BuildFails(msg) = &self.0.behavior {
            return Err(DelegateError::failed(msg.clone()));
        }
        Ok(Box::new(MockInferencer {
            shared: Arc::clone(&self.0),
            ctx: config.context,
        }))
    }
}

impl Inferencer for MockInferencer {
    fn inference(&mut self, source: &Path, _save: &Path) -> Result<(), DelegateError> {
        self.shared.begin(&self.ctx);
        self.ctx
            .reporter()
            .info(&format!("processed {}", source.display()));
        self.shared.finish(&self.ctx)
    }
}

struct MockPreprocessor(Arc<Shared>);

impl Preprocessor for MockPreprocessor {
    fn run(
        &self,
        job: &PreprocessJob,
        ctx: &TaskContext,
    ) -> Result<Option<serde_json::Value>, DelegateError> {
        self.0.begin(ctx);
        self.0.finish(ctx)?;
        Ok(Some(json!({"operation": job.operation(), "files": 12})))
    }
}

/// An orchestrator over mock delegates plus the channels that drive them.
pub struct Harness {
    pub orchestrator: Orchestrator<TokioSpawner>,
    pub started: flume::Receiver<Started>,
    permits: flume::Sender<()>,
    pub dir: tempfile::TempDir,
}

/// Fast timings so admission and streaming react within milliseconds.
pub fn fast_config(gpu_count: usize) -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_gpu_count(gpu_count)
        .with_backoff(Duration::from_millis(20), Duration::from_millis(20))
        .with_stream_poll_interval(Duration::from_millis(10))
}

impl Harness {
    /// Must be called inside a tokio runtime.
    pub fn new(config: OrchestratorConfig, behavior: Behavior) -> Self {
        devicelot::util::init_tracing_with("devicelot=debug");
        let (started_tx, started_rx) = flume::unbounded();
        let (permit_tx, permit_rx) = flume::unbounded();
        let shared = Arc::new(Shared {
            behavior,
            started: started_tx,
            permits: permit_rx,
        });
        let delegates = Delegates::new(
            Arc::new(MockTrainerFactory(Arc::clone(&shared))),
            Arc::new(MockInferenceFactory(Arc::clone(&shared))),
            Arc::new(MockPreprocessor(shared)),
        );
        let orchestrator = build_orchestrator(config, delegates, TokioSpawner::current())
            .expect("valid config");
        let dir = tempfile::tempdir().expect("tempdir");
        for sub in ["train", "val", "cfg.yaml", "weights.pt", "images", "dataset"] {
            std::fs::create_dir_all(dir.path().join(sub)).expect("fixture dir");
        }
        Self {
            orchestrator,
            started: started_rx,
            permits: permit_tx,
            dir,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Let one held delegate finish.
    pub fn release_one(&self) {
        self.permits.send(()).expect("harness alive");
    }

    pub async fn next_started(&self) -> Started {
        tokio::time::timeout(Duration::from_secs(5), self.started.recv_async())
            .await
            .expect("a delegate should start")
            .expect("started channel open")
    }

    pub async fn wait_for(&self, task_id: &str, status: TaskStatus) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let current = self.orchestrator.get_task(task_id).map(|t| t.status);
            if current == Some(status) {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "task {task_id} stuck at {current:?}, expected {status:?}"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
