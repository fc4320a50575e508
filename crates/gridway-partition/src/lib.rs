//! gridway-partition — splits weighted work across capacity-weighted slots.
//!
//! Two algorithms behind one entry point:
//!
//! - **Greedy**: sort descending, assign each item to the slot with the
//!   smallest projected load. Fast, near-optimal for many items.
//! - **Exact**: branch-and-bound over slot assignments, minimizing the
//!   makespan (maximum per-slot load). Exponential worst case, gated by
//!   an item-count threshold.
//!
//! Loads are capacity-scaled: placing weight `w` on a slot with capacity
//! `c` adds `w / c` to that slot's load, so a slot with capacity 2.0
//! absorbs twice the raw weight of a capacity-1.0 slot at equal load.

mod error;
mod partitioner;

pub use error::{PartitionError, PartitionResult};
pub use partitioner::{
    EXACT_ITEM_THRESHOLD, build_plan, makespan, partition, partition_auto,
};
