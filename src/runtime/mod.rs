//! Runtime adapters and the transport-facing API surface.

pub mod api;
pub mod tokio_spawner;

pub use api::{
    ConfigUpdateResponse, HealthResponse, ResourceConfigUpdate, ResourceStatusResponse,
    TaskActionResponse, TaskListResponse, TaskResponse,
};
pub use tokio_spawner::TokioSpawner;
