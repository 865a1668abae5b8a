//! Builders to construct orchestrators from configuration.

use anyhow::Context;

use crate::config::OrchestratorConfig;
use crate::core::{AppResult, Delegates, Orchestrator, OrchestratorError, Spawn};
use crate::runtime::TokioSpawner;

/// Validate `cfg` and wire pool, registry and log hub around `spawner`.
///
/// # Errors
///
/// [`OrchestratorError::Config`] when the configuration is invalid.
pub fn build_orchestrator<S>(
    cfg: OrchestratorConfig,
    delegates: Delegates,
    spawner: S,
) -> Result<Orchestrator<S>, OrchestratorError>
where
    S: Spawn + Clone + Send + Sync + 'static,
{
    cfg.validate()
        .map_err(|e| OrchestratorError::Config(format!("config invalid: {e}")))?;
    Orchestrator::new(cfg, delegates, spawner)
}

/// Build an orchestrator that owns a runtime with `cfg.worker_threads` workers.
///
/// # Errors
///
/// Runtime construction or configuration failures.
pub fn build_with_runtime(
    cfg: OrchestratorConfig,
    delegates: Delegates,
) -> AppResult<Orchestrator<TokioSpawner>> {
    let spawner = TokioSpawner::with_worker_threads(cfg.worker_threads)
        .context("failed to start worker runtime")?;
    Ok(build_orchestrator(cfg, delegates, spawner)?)
}

/// [`build_with_runtime`] over [`OrchestratorConfig::from_env`].
///
/// # Errors
///
/// Environment parsing, runtime construction or configuration failures.
pub fn orchestrator_from_env(delegates: Delegates) -> AppResult<Orchestrator<TokioSpawner>> {
    let cfg = OrchestratorConfig::from_env()?;
    build_with_runtime(cfg, delegates)
}
