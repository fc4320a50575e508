//! gridway-orchestrator — the session facade over the whole system.
//!
//! An [`OrchestratorSession`] decodes the execution mode once at the
//! edge, then walks a fixed state machine: Decoding → Installing |
//! Running | Simulating → Calibrating → Distributing → Cleaning → Done.
//! The distributed-execution backend and the work payload stay behind
//! the [`WorkerBackend`] trait.

pub mod backend;
pub mod error;
pub mod session;
pub mod sweep;

pub use backend::WorkerBackend;
pub use error::{OrchestratorError, OrchestratorResult};
pub use session::{OrchestratorSession, Phase, load_manifest};
pub use sweep::{SweepEntry, SweepReport, format_duration};
