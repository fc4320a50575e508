//! The orchestrator session.
//!
//! One session owns the whole run: remote connections, process
//! lifecycle, calibration state, and the distribution plan all hang off
//! it. A process-wide guard forbids a second concurrent session, since
//! both would fight over the same PID leases and training history.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use gridway_bootstrap::{InstallKind, Provisioner};
use gridway_capacity::{Calibrator, CapacityError};
use gridway_core::{
    Deployment, ExecutionMode, Host, RunConfig, RunRecord, RunResult, WorkItem, WorkerTelemetry,
};
use gridway_lifecycle::LifecycleManager;
use gridway_partition::build_plan;
use gridway_remote::RemoteClient;

use crate::backend::WorkerBackend;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::sweep::SweepReport;

static SESSION_ACTIVE: AtomicBool = AtomicBool::new(false);

const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(60);
/// Sub-jobs per worker slot when pooled dispatch is on.
const POOLED_JOBS_PER_SLOT: usize = 4;

/// Where the state machine currently is. Transitions are logged; the
/// current phase is observable for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Decoding,
    Installing,
    Running,
    Simulating,
    Calibrating,
    Distributing,
    Cleaning,
    Done,
}

pub struct OrchestratorSession {
    config: RunConfig,
    hosts: Vec<Host>,
    client: Arc<RemoteClient>,
    lifecycle: Arc<LifecycleManager>,
    calibrator: Calibrator,
    phase: Phase,
    verbosity: u8,
    sync_timeout: Duration,
}

impl OrchestratorSession {
    /// Open a session over the given hosts.
    ///
    /// Fails if the host list is empty or another session is already
    /// active in this process. The local-host predicate is resolved here,
    /// once, for every host.
    pub fn new(config: RunConfig, mut hosts: Vec<Host>) -> OrchestratorResult<Self> {
        if hosts.is_empty() {
            return Err(OrchestratorError::EmptyHosts);
        }
        if SESSION_ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(OrchestratorError::SessionActive);
        }

        let client = Arc::new(RemoteClient::new(&config.ssh_user, config.ssh_key.clone()));
        for host in &mut hosts {
            host.is_local = client.is_local(&host.address);
        }
        let lifecycle = Arc::new(LifecycleManager::new(client.clone(), config.clone()));
        let calibrator =
            match Calibrator::open(config.training_file.clone(), config.model_file.clone()) {
                Ok(calibrator) => calibrator,
                Err(err) => {
                    SESSION_ACTIVE.store(false, Ordering::SeqCst);
                    return Err(err.into());
                }
            };

        Ok(Self {
            config,
            hosts,
            client,
            lifecycle,
            calibrator,
            phase: Phase::Decoding,
            verbosity: 0,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
        })
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    fn enter(&mut self, phase: Phase) {
        info!(?phase, "phase");
        self.phase = phase;
    }

    /// Execute one run. The deployment action selects the branch;
    /// feature flags modify it.
    pub async fn run<B: WorkerBackend>(
        &mut self,
        target: &str,
        mode: ExecutionMode,
        extra_args: &[String],
    ) -> OrchestratorResult<RunResult> {
        self.enter(Phase::Decoding);
        info!(mode = %mode.label(), %target, hosts = self.hosts.len(), "run starting");
        let started = Instant::now();

        let worker_runtimes = match mode.deployment {
            Deployment::Install => {
                self.install(mode, InstallKind::Install).await?;
                HashMap::new()
            }
            Deployment::Upgrade => {
                self.install(mode, InstallKind::Upgrade).await?;
                HashMap::new()
            }
            Deployment::Simulate => {
                self.simulate(target, mode)?;
                HashMap::new()
            }
            Deployment::Run => self.execute::<B>(target, mode, extra_args).await?,
        };

        self.enter(Phase::Done);
        let elapsed_secs = started.elapsed().as_secs_f64();
        info!(mode = %mode.label(), elapsed_secs, "run finished");
        Ok(RunResult {
            mode_label: mode.label(),
            elapsed_secs,
            worker_runtimes,
        })
    }

    /// Time every valid run-mode in `[from_bits, to_bits]` and persist a
    /// ranked report. A failed mode is recorded and skipped, not fatal.
    pub async fn sweep<B: WorkerBackend>(
        &mut self,
        target: &str,
        from_bits: u32,
        to_bits: u32,
        extra_args: &[String],
    ) -> OrchestratorResult<SweepReport> {
        let mut outcomes = Vec::new();
        for bits in from_bits..=to_bits {
            let Ok(mode) = ExecutionMode::from_bits(bits) else {
                continue;
            };
            if mode.deployment != Deployment::Run {
                continue;
            }
            info!(mode = %mode.label(), bits, "sweep timing");
            match self.run::<B>(target, mode, extra_args).await {
                Ok(result) => outcomes.push((mode, Ok(result.elapsed_secs))),
                Err(err) => {
                    warn!(mode = %mode.label(), %err, "sweep mode failed, continuing");
                    outcomes.push((mode, Err(err.to_string())));
                }
            }
        }

        let report = SweepReport::from_outcomes(target, outcomes);
        report.save(&self.config.report_file)?;
        info!(path = %self.config.report_file.display(), "benchmark report written");
        Ok(report)
    }

    async fn install(&mut self, mode: ExecutionMode, kind: InstallKind) -> OrchestratorResult<()> {
        self.enter(Phase::Installing);
        let mut config = self.config.clone();
        config.accelerated = config.accelerated || mode.accelerated;

        let provisioner = Provisioner::new(self.client.clone(), self.lifecycle.clone(), config);
        for (host, result) in provisioner.provision_all(&self.hosts, kind).await {
            if let Err(err) = result {
                return Err(OrchestratorError::Install {
                    host,
                    reason: err.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Build and report the plan without touching any host.
    fn simulate(&mut self, target: &str, mode: ExecutionMode) -> OrchestratorResult<()> {
        self.enter(Phase::Simulating);
        let items = load_manifest(target)?;

        self.enter(Phase::Distributing);
        let capacities = slot_capacities(&self.hosts);
        let plan = build_plan(&items, &capacities, jobs_per_slot(mode))?;
        for slot in 0..plan.slot_count() {
            info!(slot, weight = plan.slot_weight(slot), "planned share");
        }
        info!(
            slots = plan.slot_count(),
            items = plan.total_items(),
            "simulation complete, nothing executed"
        );
        Ok(())
    }

    /// The run branch: bring the cluster up, dispatch, feed runtimes
    /// back, and tear everything down whatever the outcome.
    async fn execute<B: WorkerBackend>(
        &mut self,
        target: &str,
        mode: ExecutionMode,
        extra_args: &[String],
    ) -> OrchestratorResult<HashMap<String, f64>> {
        self.enter(Phase::Running);
        let items = load_manifest(target)?;

        let scheduler_host = self
            .hosts
            .iter()
            .find(|h| h.is_local)
            .unwrap_or(&self.hosts[0])
            .clone();
        self.lifecycle.start_scheduler(&scheduler_host).await?;
        self.lifecycle.start_workers(&self.hosts).await?;

        let outcome = self.dispatch::<B>(&items, target, mode, extra_args).await;

        self.enter(Phase::Cleaning);
        for host in &self.hosts {
            if let Err(err) = self.lifecycle.kill(&host.address, 0, true).await {
                warn!(host = %host.address, %err, "kill failed during teardown");
            }
        }
        for (host, result) in self.lifecycle.clean_all(&self.hosts).await {
            if let Err(err) = result {
                warn!(%host, %err, "clean failed during teardown");
            }
        }

        outcome
    }

    async fn dispatch<B: WorkerBackend>(
        &mut self,
        items: &[WorkItem],
        target: &str,
        mode: ExecutionMode,
        extra_args: &[String],
    ) -> OrchestratorResult<HashMap<String, f64>> {
        let backend =
            B::new(&self.config.scheduler_endpoint(), mode, self.verbosity, extra_args).await?;

        let expected: usize = self.hosts.iter().map(|h| h.workers as usize).sum();
        self.lifecycle
            .await_sync(expected, self.sync_timeout, || async {
                Ok(backend.live_workers().await?.len())
            })
            .await?;

        self.enter(Phase::Calibrating);
        let telemetry = backend.live_workers().await?;
        let capacities = match self.calibrator.calibrate(&telemetry) {
            Ok(table) if !table.is_empty() => table,
            Ok(_) => default_capacities(&self.hosts),
            Err(CapacityError::Untrained) => {
                warn!("capacity model untrained, assuming uniform capacities");
                default_capacities(&self.hosts)
            }
            Err(err) => return Err(err.into()),
        };
        for host in &mut self.hosts {
            if let Some(&capacity) = capacities.get(&host.address) {
                host.capacity = capacity;
            }
        }

        self.enter(Phase::Distributing);
        let slot_caps = slot_capacities(&self.hosts);
        let plan = build_plan(items, &slot_caps, jobs_per_slot(mode))?;

        let mut meta = HashMap::new();
        meta.insert("target".to_string(), target.to_string());
        meta.insert("mode".to_string(), mode.code());
        let runtimes = backend.do_works(&plan, &meta).await?;

        let records: Vec<RunRecord> = runtimes
            .iter()
            .map(|(host, &runtime_secs)| RunRecord {
                host: host.clone(),
                runtime_secs,
            })
            .collect();
        let telemetry_by_host: HashMap<String, WorkerTelemetry> = telemetry
            .iter()
            .map(|t| (t.host.clone(), t.clone()))
            .collect();
        if let Err(err) = self
            .calibrator
            .update(&records, &telemetry_by_host, &capacities)
        {
            warn!(%err, "capacity history update failed");
        }

        if let Err(err) = backend.shutdown().await {
            warn!(%err, "backend shutdown failed");
        }
        Ok(runtimes)
    }
}

impl Drop for OrchestratorSession {
    fn drop(&mut self) {
        SESSION_ACTIVE.store(false, Ordering::SeqCst);
    }
}

fn jobs_per_slot(mode: ExecutionMode) -> usize {
    if mode.pooled { POOLED_JOBS_PER_SLOT } else { 1 }
}

/// One capacity entry per worker slot, host order preserved.
fn slot_capacities(hosts: &[Host]) -> Vec<f64> {
    hosts
        .iter()
        .flat_map(|h| std::iter::repeat(h.capacity).take(h.workers as usize))
        .collect()
}

fn default_capacities(hosts: &[Host]) -> HashMap<String, f64> {
    hosts.iter().map(|h| (h.address.clone(), 1.0)).collect()
}

/// Read the work manifest: a JSON array of `{label, weight}` items.
pub fn load_manifest(path: &str) -> OrchestratorResult<Vec<WorkItem>> {
    let content = std::fs::read_to_string(path).map_err(|e| OrchestratorError::Manifest {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&content).map_err(|e| OrchestratorError::Manifest {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;

    /// Session tests share the process-wide guard, so they run one at a
    /// time.
    static TEST_GUARD: Mutex<()> = Mutex::new(());

    struct MockBackend {
        telemetry: Vec<WorkerTelemetry>,
    }

    impl WorkerBackend for MockBackend {
        async fn new(
            _endpoint: &str,
            _mode: ExecutionMode,
            _verbosity: u8,
            _extra_args: &[String],
        ) -> anyhow::Result<Self> {
            let worker = |host: &str| WorkerTelemetry {
                host: host.to_string(),
                workers: 2,
                ram_total: 16000.0,
                ram_available: 12000.0,
                cpu_count: 4,
                cpu_frequency: 2400.0,
                network_speed: 1000.0,
            };
            Ok(Self {
                telemetry: vec![worker("localhost"), worker("localhost")],
            })
        }

        async fn live_workers(&self) -> anyhow::Result<Vec<WorkerTelemetry>> {
            Ok(self.telemetry.clone())
        }

        async fn worker_info(&self, worker_id: &str) -> anyhow::Result<WorkerTelemetry> {
            self.telemetry
                .iter()
                .find(|t| t.host == worker_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unknown worker {worker_id}"))
        }

        async fn do_works(
            &self,
            plan: &gridway_core::DistributionPlan,
            _meta: &HashMap<String, String>,
        ) -> anyhow::Result<HashMap<String, f64>> {
            assert!(plan.total_items() > 0);
            Ok([("localhost".to_string(), 1.5)].into())
        }

        async fn shutdown(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn config_in(dir: &Path) -> RunConfig {
        let mut config = RunConfig::default();
        config.ssh_user = "tester".to_string();
        config.work_dir = dir.join("grid/work");
        config.training_file = dir.join("history.csv");
        config.model_file = dir.join("model.json");
        config.report_file = dir.join("report.json");
        config.backend_process = "gw-fake-backend".to_string();
        config
    }

    fn install_fake_backend(dir: &Path, config: &mut RunConfig) {
        use std::os::unix::fs::PermissionsExt;
        let bin = dir.join("gw-fake-backend");
        std::fs::write(&bin, "#!/bin/sh\nsleep 300\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        config.backend_process = bin.to_string_lossy().into_owned();
    }

    fn write_manifest(dir: &Path) -> String {
        let path = dir.join("work.json");
        std::fs::write(
            &path,
            r#"[{"label":"a","weight":50.0},{"label":"b","weight":30.0},{"label":"c","weight":20.0}]"#,
        )
        .unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn second_session_is_rejected() {
        let _guard = TEST_GUARD.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();

        let first =
            OrchestratorSession::new(config_in(dir.path()), vec![Host::new("a", 1)]).unwrap();
        let second = OrchestratorSession::new(config_in(dir.path()), vec![Host::new("b", 1)]);
        assert!(matches!(second, Err(OrchestratorError::SessionActive)));

        drop(first);
        OrchestratorSession::new(config_in(dir.path()), vec![Host::new("c", 1)]).unwrap();
    }

    #[test]
    fn empty_hosts_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = OrchestratorSession::new(config_in(dir.path()), Vec::new());
        assert!(matches!(result, Err(OrchestratorError::EmptyHosts)));
    }

    #[test]
    fn manifest_errors_name_the_path() {
        let err = load_manifest("/nonexistent/work.json").unwrap_err();
        assert!(matches!(err, OrchestratorError::Manifest { .. }));
    }

    #[test]
    fn slot_capacities_expand_per_worker() {
        let mut fast = Host::new("fast", 2);
        fast.capacity = 2.0;
        let slow = Host::new("slow", 1);
        assert_eq!(slot_capacities(&[fast, slow]), vec![2.0, 2.0, 1.0]);
    }

    #[tokio::test]
    async fn simulate_plans_without_executing() {
        let _guard = TEST_GUARD.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_manifest(dir.path());

        let mut session =
            OrchestratorSession::new(config_in(dir.path()), vec![Host::new("h1", 2)]).unwrap();
        let mode = ExecutionMode::from_code("s").unwrap();
        let result = session
            .run::<MockBackend>(&manifest, mode, &[])
            .await
            .unwrap();

        assert_eq!(result.mode_label, "simulate");
        assert!(result.worker_runtimes.is_empty());
        assert_eq!(session.phase(), Phase::Done);
        // No process was started, so no lease ever existed.
        assert!(!dir.path().join("grid").exists());
    }

    #[tokio::test]
    async fn run_branch_executes_and_tears_down() {
        let _guard = TEST_GUARD.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        install_fake_backend(dir.path(), &mut config);
        let manifest = write_manifest(dir.path());

        let mut session =
            OrchestratorSession::new(config, vec![Host::new("localhost", 2)]).unwrap();
        let result = session
            .run::<MockBackend>(&manifest, ExecutionMode::run(), &[])
            .await
            .unwrap();

        assert_eq!(result.worker_runtimes["localhost"], 1.5);
        assert_eq!(session.phase(), Phase::Done);

        // Teardown consumed every PID lease.
        let parent = dir.path().join("grid");
        let stray: Vec<_> = std::fs::read_dir(&parent)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .filter(|e| e.path().extension().is_some_and(|x| x == "pid"))
                    .collect()
            })
            .unwrap_or_default();
        assert!(stray.is_empty(), "leases left behind: {stray:?}");
    }

    #[tokio::test]
    async fn sweep_writes_ranked_report() {
        let _guard = TEST_GUARD.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        install_fake_backend(dir.path(), &mut config);
        let report_file = config.report_file.clone();
        let manifest = write_manifest(dir.path());

        let mut session =
            OrchestratorSession::new(config, vec![Host::new("localhost", 1)]).unwrap();
        let report = session
            .sweep::<MockBackend>(&manifest, 1, 1, &[])
            .await
            .unwrap();

        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].rank, Some(1));
        assert_eq!(report.entries[0].delta_secs, Some(0.0));
        assert!(report_file.exists());
    }
}
