//! The lifecycle manager.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use gridway_core::{Host, RunConfig};
use gridway_remote::RemoteClient;

use crate::error::{LifecycleError, LifecycleResult};
use crate::lease::{PidLease, ProcessKind};
use crate::registry::TaskRegistry;

/// The per-host control helper, staged verbatim onto every host.
pub const CONTROL_SCRIPT: &str = include_str!("../assets/gridwayctl.sh");
const CONTROL_SCRIPT_NAME: &str = "gridwayctl.sh";

const SYNC_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Starts, tracks, and stops the scheduler and worker processes.
pub struct LifecycleManager {
    client: Arc<RemoteClient>,
    config: RunConfig,
    registry: TaskRegistry,
    leases: Arc<Mutex<Vec<PidLease>>>,
}

impl LifecycleManager {
    pub fn new(client: Arc<RemoteClient>, config: RunConfig) -> Self {
        Self {
            client,
            config,
            registry: TaskRegistry::new(),
            leases: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn work_dir(&self) -> String {
        self.config.work_dir.to_string_lossy().into_owned()
    }

    /// Parent of the working directory — where PID leases and the
    /// control script live.
    fn parent_dir(&self) -> String {
        Path::new(&self.work_dir())
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| ".".to_string())
    }

    fn script_path(&self) -> String {
        format!("{}/{}", self.parent_dir(), CONTROL_SCRIPT_NAME)
    }

    /// Stage the control script onto a host. Safe to repeat.
    pub async fn stage_control_script(&self, host: &str) -> LifecycleResult<()> {
        let staging = std::env::temp_dir().join(CONTROL_SCRIPT_NAME);
        tokio::fs::write(&staging, CONTROL_SCRIPT).await?;

        self.client
            .exec(host, &format!("mkdir -p '{}'", self.parent_dir()))
            .await?;
        self.client
            .send_file(host, &staging, &self.script_path())
            .await?;
        self.client
            .exec(host, &format!("chmod 755 '{}'", self.script_path()))
            .await?;
        debug!(%host, path = %self.script_path(), "control script staged");
        Ok(())
    }

    /// Shell command that launches the backend scheduler, detached, and
    /// prints its PID.
    fn scheduler_command(&self) -> String {
        let wd = self.work_dir();
        let lease = format!("{}/{}", self.parent_dir(), PidLease::file_name(ProcessKind::Scheduler, 0));
        format!(
            "mkdir -p '{wd}' && cd '{wd}' && nohup {backend} scheduler --bind {endpoint} \
             > scheduler.log 2>&1 & echo $! > '{lease}' && cat '{lease}'",
            backend = self.config.backend_process,
            endpoint = self.config.scheduler_endpoint(),
        )
    }

    fn worker_command(&self, index: u32) -> String {
        let wd = self.work_dir();
        let lease = format!("{}/{}", self.parent_dir(), PidLease::file_name(ProcessKind::Worker, index));
        format!(
            "mkdir -p '{wd}' && cd '{wd}' && nohup {backend} worker --connect {endpoint} \
             --index {index} > worker-{index}.log 2>&1 & echo $! > '{lease}' && cat '{lease}'",
            backend = self.config.backend_process,
            endpoint = self.config.scheduler_endpoint(),
        )
    }

    /// Start the central scheduler on a host.
    pub async fn start_scheduler(&self, host: &Host) -> LifecycleResult<()> {
        self.stage_control_script(&host.address).await?;

        let output = self
            .client
            .exec(&host.address, &self.scheduler_command())
            .await?;
        let pid = parse_pid(&output).ok_or_else(|| LifecycleError::SchedulerStart {
            host: host.address.clone(),
            reason: format!("no PID in start output: {output:?}"),
        })?;

        self.leases.lock().await.push(PidLease {
            host: host.address.clone(),
            pid,
            kind: ProcessKind::Scheduler,
            index: 0,
        });
        info!(host = %host.address, pid, "scheduler started");
        Ok(())
    }

    /// Start every worker on every host — one named task per process,
    /// joined at the barrier before returning.
    pub async fn start_workers(&self, hosts: &[Host]) -> LifecycleResult<()> {
        for host in hosts {
            self.stage_control_script(&host.address).await?;

            for index in 0..host.workers {
                let client = self.client.clone();
                let leases = self.leases.clone();
                let address = host.address.clone();
                let command = self.worker_command(index);

                self.registry
                    .spawn(format!("start-worker-{address}-{index}"), async move {
                        let output = client.exec(&address, &command).await?;
                        let pid = parse_pid(&output)
                            .ok_or_else(|| anyhow::anyhow!("no PID in start output"))?;
                        leases.lock().await.push(PidLease {
                            host: address.clone(),
                            pid,
                            kind: ProcessKind::Worker,
                            index,
                        });
                        debug!(host = %address, index, pid, "worker started");
                        Ok(())
                    })
                    .await;
            }
        }

        let mut first_failure = None;
        for (name, result) in self.registry.join_all().await {
            if let Err(err) = result {
                warn!(task = %name, %err, "worker start failed");
                if first_failure.is_none() {
                    // Task name: start-worker-<host>-<index>.
                    let mut parts = name.rsplitn(2, '-');
                    let index = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                    let host = parts
                        .next()
                        .and_then(|s| s.strip_prefix("start-worker-"))
                        .unwrap_or("?")
                        .to_string();
                    first_failure = Some(LifecycleError::WorkerStart {
                        host,
                        index,
                        reason: err.to_string(),
                    });
                }
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => {
                info!(hosts = hosts.len(), "all workers started");
                Ok(())
            }
        }
    }

    /// Kill every leased process on a host.
    ///
    /// Reads and deletes every `*.pid` under the workdir parent, skips
    /// `exclude_pid`, signals the rest, and sweeps for orphans matching
    /// the backend's process name. Idempotent — a host with no live
    /// processes is not an error.
    pub async fn kill(&self, host: &str, exclude_pid: u32, force: bool) -> LifecycleResult<()> {
        self.stage_control_script(host).await?;

        let force_arg = if force { " force" } else { "" };
        self.client
            .exec(
                host,
                &format!(
                    "sh '{script}' kill '{parent}' '{backend}' {exclude_pid}{force_arg}",
                    script = self.script_path(),
                    parent = self.parent_dir(),
                    backend = self.config.backend_process,
                ),
            )
            .await?;

        self.leases.lock().await.retain(|lease| lease.host != host);
        debug!(%host, force, "kill pass complete");
        Ok(())
    }

    /// Purge the local working directory and force-kill any orphaned
    /// backend process owned by the current user. Failures are logged,
    /// never raised — this is the last-resort cleanup path.
    pub async fn clean_local(&self) {
        if let Err(err) = self.kill("localhost", std::process::id(), true).await {
            warn!(%err, "local kill sweep failed");
        }
        if let Err(err) = self
            .client
            .exec(
                "localhost",
                &format!("sh '{}' clean '{}'", self.script_path(), self.work_dir()),
            )
            .await
        {
            warn!(%err, "local clean failed");
        }
    }

    /// Purge a remote host's working directory.
    pub async fn clean_remote(&self, host: &str) -> LifecycleResult<()> {
        self.stage_control_script(host).await?;
        self.client
            .exec(
                host,
                &format!("sh '{}' clean '{}'", self.script_path(), self.work_dir()),
            )
            .await?;
        info!(%host, "remote workdir cleaned");
        Ok(())
    }

    /// Clean every host's working directory, fanning out in parallel.
    /// Per-host failures are reported without aborting siblings.
    pub async fn clean_all(&self, hosts: &[Host]) -> Vec<(String, LifecycleResult<()>)> {
        let cleans = hosts.iter().map(|host| async {
            let result = if host.is_local {
                self.clean_local().await;
                Ok(())
            } else {
                self.clean_remote(&host.address).await
            };
            (host.address.clone(), result)
        });
        join_all(cleans).await
    }

    /// Poll the backend's live-worker census until `expected` workers
    /// have attached or `timeout` elapses.
    ///
    /// A timeout is fatal: a partially-formed cluster cannot safely run
    /// work, so this error is meant to end the run.
    pub async fn await_sync<F, Fut>(
        &self,
        expected: usize,
        timeout: Duration,
        poll: F,
    ) -> LifecycleResult<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = anyhow::Result<usize>>,
    {
        let start = tokio::time::Instant::now();

        loop {
            let observed = poll().await?;
            if observed >= expected {
                info!(observed, expected, "cluster synchronized");
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(LifecycleError::SyncTimeout {
                    expected,
                    observed,
                    secs: timeout.as_secs(),
                });
            }
            debug!(observed, expected, "waiting for workers to attach");
            tokio::time::sleep(SYNC_POLL_INTERVAL).await;
        }
    }

    /// Snapshot of currently-held leases.
    pub async fn leases(&self) -> Vec<PidLease> {
        self.leases.lock().await.clone()
    }
}

fn parse_pid(output: &str) -> Option<u32> {
    output.trim().lines().last()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager_in(dir: &Path) -> LifecycleManager {
        let mut config = RunConfig::default();
        config.work_dir = dir.join("grid/work");
        config.backend_process = "gw-fake-backend".to_string();
        LifecycleManager::new(Arc::new(RemoteClient::new("tester", None)), config)
    }

    /// A stand-in backend binary that ignores its arguments and sleeps.
    fn install_fake_backend(dir: &Path, config: &mut RunConfig) {
        use std::os::unix::fs::PermissionsExt;
        let bin = dir.join("gw-fake-backend");
        std::fs::write(&bin, "#!/bin/sh\nsleep 300\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        config.backend_process = bin.to_string_lossy().into_owned();
    }

    #[test]
    fn control_script_has_both_subcommands() {
        assert!(CONTROL_SCRIPT.contains("kill)"));
        assert!(CONTROL_SCRIPT.contains("clean)"));
        assert!(CONTROL_SCRIPT.contains("pkill"));
    }

    #[test]
    fn commands_name_backend_and_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager_in(dir.path());
        let cmd = mgr.scheduler_command();
        assert!(cmd.contains("gw-fake-backend scheduler"));
        assert!(cmd.contains("--bind 0.0.0.0:8786"));
        assert!(cmd.contains("scheduler.pid"));

        let wcmd = mgr.worker_command(2);
        assert!(wcmd.contains("--index 2"));
        assert!(wcmd.contains("worker-2.pid"));
    }

    #[tokio::test]
    async fn kill_is_idempotent_with_no_processes() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager_in(dir.path());

        mgr.kill("localhost", 0, false).await.unwrap();
        mgr.kill("localhost", 0, false).await.unwrap();
    }

    #[tokio::test]
    async fn kill_sweep_matches_process_name_not_cmdline() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager_in(dir.path());

        // A bystander whose argv mentions the backend name but whose
        // process name is `sh`. The orphan sweep must not touch it.
        let mut bystander = tokio::process::Command::new("sh")
            .arg("-c")
            .arg("sleep 300 # gw-fake-backend")
            .spawn()
            .unwrap();

        mgr.kill("localhost", 0, true).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(
            bystander.try_wait().unwrap().is_none(),
            "sweep killed a process that only mentioned the backend name"
        );
        bystander.kill().await.unwrap();
    }

    #[tokio::test]
    async fn kill_removes_stale_lease_files() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager_in(dir.path());
        let parent = dir.path().join("grid");
        std::fs::create_dir_all(&parent).unwrap();
        let stale = parent.join("worker-0.pid");
        std::fs::write(&stale, "999999\n").unwrap();

        mgr.kill("localhost", 0, true).await.unwrap();
        assert!(!stale.exists(), "stale lease not consumed");
    }

    #[tokio::test]
    async fn scheduler_start_writes_lease_and_kill_reaps_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RunConfig::default();
        config.work_dir = dir.path().join("grid/work");
        install_fake_backend(dir.path(), &mut config);
        let mgr = LifecycleManager::new(Arc::new(RemoteClient::new("tester", None)), config);

        let host = Host::new("localhost", 1);
        mgr.start_scheduler(&host).await.unwrap();

        let leases = mgr.leases().await;
        assert_eq!(leases.len(), 1);
        assert_eq!(leases[0].kind, ProcessKind::Scheduler);
        let lease_file = dir.path().join("grid/scheduler.pid");
        assert!(lease_file.exists());

        mgr.kill("localhost", 0, true).await.unwrap();
        assert!(!lease_file.exists());
        assert!(mgr.leases().await.is_empty());
    }

    #[tokio::test]
    async fn workers_start_across_slots() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RunConfig::default();
        config.work_dir = dir.path().join("grid/work");
        install_fake_backend(dir.path(), &mut config);
        let mgr = LifecycleManager::new(Arc::new(RemoteClient::new("tester", None)), config);

        let host = Host::new("localhost", 3);
        mgr.start_workers(&[host]).await.unwrap();

        let leases = mgr.leases().await;
        assert_eq!(leases.len(), 3);
        for index in 0..3 {
            assert!(dir.path().join(format!("grid/worker-{index}.pid")).exists());
        }

        mgr.kill("localhost", 0, true).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn await_sync_times_out_in_window() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager_in(dir.path());

        let start = tokio::time::Instant::now();
        let err = mgr
            .await_sync(3, Duration::from_secs(5), || async { Ok(2) })
            .await
            .unwrap_err();

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(5), "returned early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(6), "returned late: {elapsed:?}");
        match err {
            LifecycleError::SyncTimeout { expected, observed, secs } => {
                assert_eq!((expected, observed, secs), (3, 2, 5));
            }
            other => panic!("expected SyncTimeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn await_sync_succeeds_once_workers_attach() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager_in(dir.path());
        let polls = AtomicUsize::new(0);

        mgr.await_sync(3, Duration::from_secs(10), || {
            let n = polls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(if n >= 4 { 3 } else { n }) }
        })
        .await
        .unwrap();

        assert!(polls.load(Ordering::SeqCst) >= 4);
    }

    #[tokio::test]
    async fn await_sync_propagates_census_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager_in(dir.path());

        let err = mgr
            .await_sync(1, Duration::from_secs(1), || async {
                Err(anyhow::anyhow!("scheduler unreachable"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Census(_)));
    }
}
