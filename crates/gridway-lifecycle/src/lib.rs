//! gridway-lifecycle — starting, tracking, and stopping cluster processes.
//!
//! The lifecycle manager:
//!
//! - Stages a small control script onto every host (one script, invoked
//!   locally or over SSH with identical semantics)
//! - Launches the backend scheduler and N workers per host, detached,
//!   recording a PID lease file per process
//! - Kills everything a lease points at, idempotently, plus a
//!   best-effort sweep for orphans by process name
//! - Waits for the expected number of workers to attach before any work
//!   is distributed — a partially-formed cluster never runs

pub mod error;
pub mod lease;
pub mod manager;
pub mod registry;

pub use error::{LifecycleError, LifecycleResult};
pub use lease::{PidLease, ProcessKind};
pub use manager::LifecycleManager;
pub use registry::TaskRegistry;
