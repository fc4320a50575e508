//! Lifecycle error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("scheduler failed to start on {host}: {reason}")]
    SchedulerStart { host: String, reason: String },

    #[error("worker {index} failed to start on {host}: {reason}")]
    WorkerStart {
        host: String,
        index: u32,
        reason: String,
    },

    #[error("cluster sync timed out: {observed}/{expected} workers after {secs}s")]
    SyncTimeout {
        expected: usize,
        observed: usize,
        secs: u64,
    },

    #[error("backend census failed: {0}")]
    Census(#[from] anyhow::Error),

    #[error(transparent)]
    Remote(#[from] gridway_remote::RemoteError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
