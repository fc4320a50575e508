//! gridway-core — shared types for the Gridway orchestrator.
//!
//! Everything the other crates agree on lives here:
//!
//! - [`Host`] and [`WorkItem`] — the cluster and the work
//! - [`ExecutionMode`] — structured view of the wire bitmask
//! - [`DistributionPlan`] — work-to-slot assignment
//! - [`RunConfig`] — per-run configuration, resolved once and threaded
//!   explicitly through every component

pub mod config;
pub mod error;
pub mod mode;
pub mod types;

pub use config::RunConfig;
pub use error::{CoreError, CoreResult};
pub use mode::{Deployment, ExecutionMode};
pub use types::*;
