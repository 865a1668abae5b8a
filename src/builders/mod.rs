//! Builders wiring configuration, delegates and a runtime into an orchestrator.

pub mod orchestrator_builder;

pub use orchestrator_builder::{build_orchestrator, build_with_runtime, orchestrator_from_env};
