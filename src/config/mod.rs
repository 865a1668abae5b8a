//! Configuration models for devices, limits and timing.

pub mod orchestrator;

pub use orchestrator::{AdmissionPolicy, OrchestratorConfig, DEFAULT_SUPPORTED_MODELS};
