//! The worker contract.
//!
//! The distributed-execution backend and the work payload are external
//! collaborators; the orchestrator drives them through this trait and
//! never assumes anything beyond it.

use std::collections::HashMap;
use std::future::Future;

use gridway_core::{DistributionPlan, ExecutionMode, WorkerTelemetry};

/// Client handle onto a running scheduler and its attached workers.
///
/// Implementations are expected to be cheap to construct once the
/// scheduler endpoint is reachable; the orchestrator polls
/// [`live_workers`](WorkerBackend::live_workers) until the cluster has
/// formed before dispatching any work.
pub trait WorkerBackend: Send + Sync + Sized {
    /// Connect to the scheduler endpoint.
    fn new(
        endpoint: &str,
        mode: ExecutionMode,
        verbosity: u8,
        extra_args: &[String],
    ) -> impl Future<Output = anyhow::Result<Self>> + Send;

    /// Census of currently-attached workers, with their telemetry.
    fn live_workers(&self) -> impl Future<Output = anyhow::Result<Vec<WorkerTelemetry>>> + Send;

    /// Telemetry for one worker by identifier.
    fn worker_info(
        &self,
        worker_id: &str,
    ) -> impl Future<Output = anyhow::Result<WorkerTelemetry>> + Send;

    /// Execute the plan; returns observed wall-clock runtime per host,
    /// in seconds.
    fn do_works(
        &self,
        plan: &DistributionPlan,
        meta: &HashMap<String, String>,
    ) -> impl Future<Output = anyhow::Result<HashMap<String, f64>>> + Send;

    /// Release the backend connection.
    fn shutdown(&self) -> impl Future<Output = anyhow::Result<()>> + Send;
}
