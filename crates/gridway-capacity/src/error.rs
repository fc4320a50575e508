//! Capacity model error types.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CapacityError {
    #[error("training file not found: {0}")]
    MissingTrainingFile(PathBuf),

    #[error("training file has {0} data rows, need at least 2")]
    NotEnoughData(usize),

    #[error("malformed training row {line}: {reason}")]
    MalformedRow { line: usize, reason: String },

    #[error("worker {host} reported non-finite or zero runtime {runtime}")]
    BadRuntime { host: String, runtime: f64 },

    #[error("model not trained yet")]
    Untrained,

    #[error("model blob error: {0}")]
    Blob(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type CapacityResult<T> = Result<T, CapacityError>;
