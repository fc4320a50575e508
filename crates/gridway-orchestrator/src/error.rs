//! Orchestrator error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("another orchestrator session is already active in this process")]
    SessionActive,

    #[error("host list is empty")]
    EmptyHosts,

    #[error(transparent)]
    Mode(#[from] gridway_core::CoreError),

    #[error("provisioning failed on {host}: {reason}")]
    Install { host: String, reason: String },

    #[error("work manifest {path} unreadable: {reason}")]
    Manifest { path: String, reason: String },

    #[error("worker backend error: {0}")]
    Backend(#[from] anyhow::Error),

    #[error(transparent)]
    Lifecycle(#[from] gridway_lifecycle::LifecycleError),

    #[error(transparent)]
    Partition(#[from] gridway_partition::PartitionError),

    #[error(transparent)]
    Capacity(#[from] gridway_capacity::CapacityError),

    #[error(transparent)]
    Remote(#[from] gridway_remote::RemoteError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
