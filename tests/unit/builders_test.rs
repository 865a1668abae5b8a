//! Tests for builder modules

use std::sync::Arc;

use devicelot::builders::build_orchestrator;
use devicelot::config::OrchestratorConfig;
use devicelot::core::{
    DelegateError, Delegates, InferenceConfig, InferenceFactory, Inferencer, OrchestratorError,
    PreprocessJob, Preprocessor, TaskContext, Trainer, TrainerConfig, TrainerFactory,
};
use devicelot::runtime::TokioSpawner;

struct Unused;

impl TrainerFactory for Unused {
    fn build(&self, _config: TrainerConfig) -> Result<Box<dyn Trainer>, DelegateError> {
        Err(DelegateError::failed("unused"))
    }
}

impl InferenceFactory for Unused {
    fn build(&self, _config: InferenceConfig) -> Result<Box<dyn Inferencer>, DelegateError> {
        Err(DelegateError::failed("unused"))
    }
}

impl Preprocessor for Unused {
    fn run(
        &self,
        _job: &PreprocessJob,
        _ctx: &TaskContext,
    ) -> Result<Option<serde_json::Value>, DelegateError> {
        Ok(None)
    }
}

fn delegates() -> Delegates {
    Delegates::new(Arc::new(Unused), Arc::new(Unused), Arc::new(Unused))
}

#[tokio::test]
async fn test_build_orchestrator_with_gpus() {
    let cfg = OrchestratorConfig::default().with_gpu_count(2);
    let orch = build_orchestrator(cfg, delegates(), TokioSpawner::current()).unwrap();
    assert_eq!(orch.pool().topology().devices().len(), 3);
    let status = orch.resource_status();
    assert_eq!(status.active.len(), 3);
    assert!(status.usage.values().flat_map(|m| m.values()).all(|&n| n == 0));
}

#[tokio::test]
async fn test_build_rejects_invalid_config() {
    let mut cfg = OrchestratorConfig::default();
    cfg.default_list_limit = 0;
    let err = build_orchestrator(cfg, delegates(), TokioSpawner::current()).unwrap_err();
    assert!(matches!(err, OrchestratorError::Config(_)));
}
