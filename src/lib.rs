//! # devicelot
//!
//! Resource-aware orchestration of training, inference and preprocessing jobs
//! over a pool of CPU and GPU devices.
//!
//! Tasks are submitted to an [`Orchestrator`](core::Orchestrator), registered as
//! `pending`, and handed to a per-task worker. The worker parks the task as
//! `queued` until the [`ResourcePool`](core::ResourcePool) can admit it on the
//! least-loaded eligible device, runs the numerical delegate off the async
//! runtime, and records the terminal outcome. Device capacity is accounted per
//! device and per task kind, so training and inference never starve each other.
//!
//! While a task runs, every log line its delegate emits is parsed for training
//! metrics, merged into the task record, and fanned out to a single live
//! consumer as Server-Sent-Event frames that finish with a status sentinel.
//!
//! ## Key Features
//!
//! - **Device classes**: ask for `cuda` and get the least-loaded `cuda:N`
//! - **Per-kind limits**: separate training and inference budgets, updatable at runtime
//! - **Wait-and-notify admission**: no busy polling, with optional priority ordering
//! - **Enforced lifecycle**: illegal status transitions are rejected
//! - **Live logs**: parsed metrics, epoch tracking and SSE framing
//!
//! ```rust,ignore
//! use devicelot::builders::build_orchestrator;
//! use devicelot::config::OrchestratorConfig;
//! use devicelot::core::{Delegates, TrainingRequest};
//! use devicelot::runtime::TokioSpawner;
//!
//! let cfg = OrchestratorConfig::default().with_gpu_count(2);
//! let orchestrator = build_orchestrator(cfg, my_delegates, TokioSpawner::current())?;
//! let task_id = orchestrator.submit(TrainingRequest::new(
//!     "resnet50", 10, "/data/train", "/data/val", "/models/run1",
//! ))?;
//! let mut frames = orchestrator.stream_log(&task_id)?;
//! while let Some(frame) = frames.next().await {
//!     print!("{}", frame.to_sse()?);
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core orchestration: devices, capacity, lifecycle, workers and streams.
pub mod core;
/// Configuration models for devices, limits and timing.
pub mod config;
/// Builders wiring configuration into an orchestrator.
pub mod builders;
/// In-memory infrastructure for admission and log storage.
pub mod infra;
/// Runtime adapters and API DTOs.
pub mod runtime;
/// Shared utilities.
pub mod util;

pub use crate::config::OrchestratorConfig;
pub use crate::core::{Orchestrator, OrchestratorError, TaskKind, TaskStatus};
