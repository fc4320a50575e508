//! Worker backend driven through the backend binary's client interface.
//!
//! The distributed-execution backend ships a `client` subcommand that
//! speaks JSON on stdout; this adapter shells out to it. The program
//! name follows the configured backend process name (`GRIDWAY_BACKEND`
//! overrides it, matching the run configuration's environment scheme).

use std::collections::HashMap;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use gridway_core::{DistributionPlan, ExecutionMode, WorkerTelemetry};
use gridway_orchestrator::WorkerBackend;

const DEFAULT_PROGRAM: &str = "gridway-backend";

pub struct ProcessBackend {
    program: String,
    endpoint: String,
    mode: ExecutionMode,
    verbosity: u8,
    extra_args: Vec<String>,
}

impl WorkerBackend for ProcessBackend {
    async fn new(
        endpoint: &str,
        mode: ExecutionMode,
        verbosity: u8,
        extra_args: &[String],
    ) -> anyhow::Result<Self> {
        let program =
            std::env::var("GRIDWAY_BACKEND").unwrap_or_else(|_| DEFAULT_PROGRAM.to_string());
        Ok(Self {
            program,
            endpoint: endpoint.to_string(),
            mode,
            verbosity,
            extra_args: extra_args.to_vec(),
        })
    }

    async fn live_workers(&self) -> anyhow::Result<Vec<WorkerTelemetry>> {
        let out = self.client(&["census"], None).await?;
        Ok(serde_json::from_str(&out)?)
    }

    async fn worker_info(&self, worker_id: &str) -> anyhow::Result<WorkerTelemetry> {
        let out = self.client(&["worker-info", worker_id], None).await?;
        Ok(serde_json::from_str(&out)?)
    }

    async fn do_works(
        &self,
        plan: &DistributionPlan,
        meta: &HashMap<String, String>,
    ) -> anyhow::Result<HashMap<String, f64>> {
        let mut args = vec!["do-works".to_string()];
        for (key, value) in meta {
            args.push("--meta".to_string());
            args.push(format!("{key}={value}"));
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        let plan_json = serde_json::to_string(plan)?;
        let out = self.client(&arg_refs, Some(plan_json.as_bytes())).await?;
        Ok(serde_json::from_str(&out)?)
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.client(&["shutdown"], None).await?;
        Ok(())
    }
}

impl ProcessBackend {
    async fn client(&self, args: &[&str], stdin: Option<&[u8]>) -> anyhow::Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("client")
            .args(args)
            .arg("--connect")
            .arg(&self.endpoint)
            .arg("--mode")
            .arg(self.mode.code());
        for _ in 0..self.verbosity {
            cmd.arg("-v");
        }
        cmd.args(&self.extra_args);
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

        debug!(program = %self.program, ?args, "backend client call");
        let mut child = cmd.spawn()?;
        if let Some(payload) = stdin {
            let mut handle = child
                .stdin
                .take()
                .ok_or_else(|| anyhow::anyhow!("backend client stdin unavailable"))?;
            handle.write_all(payload).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            anyhow::bail!(
                "backend client {:?} failed ({}): {}",
                args.first().copied().unwrap_or("?"),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn install_fake_client(dir: &Path) -> String {
        let bin = dir.join("gw-fake-client");
        std::fs::write(
            &bin,
            r#"#!/bin/sh
case "$2" in
census)
    echo '[{"host":"localhost","workers":1,"ram_total":16000.0,"ram_available":12000.0,"cpu_count":4,"cpu_frequency":2400.0,"network_speed":1000.0}]'
    ;;
do-works)
    cat > /dev/null
    echo '{"localhost": 2.5}'
    ;;
shutdown)
    ;;
*)
    echo "unknown subcommand $2" >&2
    exit 1
    ;;
esac
"#,
        )
        .unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        bin.to_string_lossy().into_owned()
    }

    fn backend_with(program: String) -> ProcessBackend {
        ProcessBackend {
            program,
            endpoint: "127.0.0.1:8786".to_string(),
            mode: ExecutionMode::run(),
            verbosity: 0,
            extra_args: Vec::new(),
        }
    }

    #[tokio::test]
    async fn census_parses_worker_telemetry() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_with(install_fake_client(dir.path()));

        let workers = backend.live_workers().await.unwrap();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].host, "localhost");
        assert_eq!(workers[0].cpu_count, 4);
    }

    #[tokio::test]
    async fn do_works_pipes_plan_and_parses_runtimes() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_with(install_fake_client(dir.path()));

        let plan = DistributionPlan {
            slots: vec![vec![vec![gridway_core::WorkItem::new("a", 1.0)]]],
        };
        let runtimes = backend.do_works(&plan, &HashMap::new()).await.unwrap();
        assert_eq!(runtimes["localhost"], 2.5);
    }

    #[tokio::test]
    async fn failed_client_call_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_with(install_fake_client(dir.path()));

        let err = backend.client(&["bogus"], None).await.unwrap_err();
        assert!(err.to_string().contains("unknown subcommand"));
    }
}
