//! Partitioner error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("no slots to partition into")]
    NoSlots,

    #[error("slot {0} has non-positive capacity {1}")]
    BadCapacity(usize, f64),

    #[error("item \"{0}\" has non-finite or negative weight {1}")]
    BadWeight(String, f64),
}

pub type PartitionResult<T> = Result<T, PartitionError>;
