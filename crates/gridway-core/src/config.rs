//! Run configuration.
//!
//! All environment-derived settings are resolved here, once per run, and
//! threaded explicitly through every component — no component does its
//! own environment lookups. An optional `gridway.toml` overlays the
//! environment defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::types::WorkerKind;

/// Everything a run needs to know about its environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Scheduler bind address.
    pub scheduler_addr: String,
    /// Scheduler bind port.
    pub scheduler_port: u16,
    /// Interpreter version pin, e.g. `"3.12.4"`. A non-semver value is a
    /// placeholder and triggers a remote version probe during bootstrap.
    pub interpreter_pin: String,
    /// Project root on every host, relative to the SSH home directory.
    pub project_dir: PathBuf,
    /// Working directory for worker state, PID leases, and artifacts.
    pub work_dir: PathBuf,
    /// Environment/package provisioner binary name.
    pub env_tool: String,
    /// SSH username for remote hosts.
    pub ssh_user: String,
    /// Private-key path; `None` probes the usual `~/.ssh` locations.
    pub ssh_key: Option<PathBuf>,
    /// Whether accelerator support was explicitly requested.
    pub accelerated: bool,
    /// Which work payload gets bundled.
    pub worker_kind: WorkerKind,
    /// Capacity-model training history (CSV).
    pub training_file: PathBuf,
    /// Persisted capacity-model blob (JSON).
    pub model_file: PathBuf,
    /// Benchmark-sweep report output (JSON).
    pub report_file: PathBuf,
    /// Data path handed to the post-install hook.
    pub data_dir: PathBuf,
    /// Process name of the distributed-execution backend, used by the
    /// kill sweep.
    pub backend_process: String,
    /// Where built artifacts (wheels/archives) are collected locally.
    pub artifact_dir: PathBuf,
    /// Support libraries built from source on the local host only.
    pub support_libs: Vec<PathBuf>,
    /// Build command for the work payload's native library.
    pub native_build_cmd: String,
    /// Post-install hook script, relative to the project dir.
    pub hook_script: String,
    /// Accelerator configuration overlay, included when the host reports
    /// accelerator hardware.
    pub accel_config: PathBuf,
    /// Extra variables forwarded verbatim to worker processes.
    pub extra_env: HashMap<String, String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            scheduler_addr: "0.0.0.0".to_string(),
            scheduler_port: 8786,
            interpreter_pin: "3.12".to_string(),
            project_dir: PathBuf::from("gridway"),
            work_dir: PathBuf::from("gridway/work"),
            env_tool: "uv".to_string(),
            ssh_user: "gridway".to_string(),
            ssh_key: None,
            accelerated: false,
            worker_kind: WorkerKind::Frames,
            training_file: PathBuf::from("capacity-history.csv"),
            model_file: PathBuf::from("capacity-model.json"),
            report_file: PathBuf::from("benchmark-report.json"),
            data_dir: PathBuf::from("data"),
            backend_process: "gridway-backend".to_string(),
            artifact_dir: PathBuf::from("dist"),
            support_libs: vec![
                PathBuf::from("libs/gridway-io"),
                PathBuf::from("libs/gridway-codec"),
            ],
            native_build_cmd: "make -C native".to_string(),
            hook_script: "post_install.sh".to_string(),
            accel_config: PathBuf::from("accel.toml"),
            extra_env: HashMap::new(),
        }
    }
}

/// Subset of fields accepted from `gridway.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FileConfig {
    scheduler_addr: Option<String>,
    scheduler_port: Option<u16>,
    interpreter_pin: Option<String>,
    project_dir: Option<PathBuf>,
    work_dir: Option<PathBuf>,
    env_tool: Option<String>,
    ssh_user: Option<String>,
    ssh_key: Option<PathBuf>,
    accelerated: Option<bool>,
    worker_kind: Option<String>,
    training_file: Option<PathBuf>,
    model_file: Option<PathBuf>,
    report_file: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    backend_process: Option<String>,
    artifact_dir: Option<PathBuf>,
    native_build_cmd: Option<String>,
    hook_script: Option<String>,
}

impl RunConfig {
    /// Resolve configuration from the process environment.
    ///
    /// Every `GRIDWAY_*` variable overrides the built-in default.
    pub fn from_env() -> CoreResult<Self> {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("GRIDWAY_SCHEDULER_ADDR") {
            cfg.scheduler_addr = v;
        }
        if let Ok(v) = std::env::var("GRIDWAY_SCHEDULER_PORT") {
            cfg.scheduler_port = v
                .parse()
                .map_err(|_| crate::CoreError::Config(format!("bad port: {v}")))?;
        }
        if let Ok(v) = std::env::var("GRIDWAY_INTERPRETER") {
            cfg.interpreter_pin = v;
        }
        if let Ok(v) = std::env::var("GRIDWAY_PROJECT_DIR") {
            cfg.project_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("GRIDWAY_WORK_DIR") {
            cfg.work_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("GRIDWAY_ENV_TOOL") {
            cfg.env_tool = v;
        }
        if let Ok(v) = std::env::var("GRIDWAY_SSH_USER") {
            cfg.ssh_user = v;
        }
        if let Ok(v) = std::env::var("GRIDWAY_SSH_KEY") {
            cfg.ssh_key = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("GRIDWAY_ACCELERATED") {
            cfg.accelerated = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("GRIDWAY_WORKER_KIND") {
            cfg.worker_kind = WorkerKind::parse(&v)
                .ok_or_else(|| crate::CoreError::Config(format!("unknown worker kind: {v}")))?;
        }
        if let Ok(v) = std::env::var("GRIDWAY_TRAINING_FILE") {
            cfg.training_file = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("GRIDWAY_MODEL_FILE") {
            cfg.model_file = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("GRIDWAY_DATA_DIR") {
            cfg.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("GRIDWAY_BACKEND") {
            cfg.backend_process = v;
        }

        Ok(cfg)
    }

    /// Overlay settings from a `gridway.toml` file.
    pub fn overlay_file(mut self, path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: FileConfig = toml::from_str(&content)?;

        if let Some(v) = file.scheduler_addr {
            self.scheduler_addr = v;
        }
        if let Some(v) = file.scheduler_port {
            self.scheduler_port = v;
        }
        if let Some(v) = file.interpreter_pin {
            self.interpreter_pin = v;
        }
        if let Some(v) = file.project_dir {
            self.project_dir = v;
        }
        if let Some(v) = file.work_dir {
            self.work_dir = v;
        }
        if let Some(v) = file.env_tool {
            self.env_tool = v;
        }
        if let Some(v) = file.ssh_user {
            self.ssh_user = v;
        }
        if let Some(v) = file.ssh_key {
            self.ssh_key = Some(v);
        }
        if let Some(v) = file.accelerated {
            self.accelerated = v;
        }
        if let Some(v) = file.worker_kind {
            self.worker_kind = WorkerKind::parse(&v)
                .ok_or_else(|| crate::CoreError::Config(format!("unknown worker kind: {v}")))?;
        }
        if let Some(v) = file.training_file {
            self.training_file = v;
        }
        if let Some(v) = file.model_file {
            self.model_file = v;
        }
        if let Some(v) = file.report_file {
            self.report_file = v;
        }
        if let Some(v) = file.data_dir {
            self.data_dir = v;
        }
        if let Some(v) = file.backend_process {
            self.backend_process = v;
        }
        if let Some(v) = file.artifact_dir {
            self.artifact_dir = v;
        }
        if let Some(v) = file.native_build_cmd {
            self.native_build_cmd = v;
        }
        if let Some(v) = file.hook_script {
            self.hook_script = v;
        }

        Ok(self)
    }

    /// Scheduler endpoint as `addr:port`.
    pub fn scheduler_endpoint(&self) -> String {
        format!("{}:{}", self.scheduler_addr, self.scheduler_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.scheduler_port, 8786);
        assert_eq!(cfg.env_tool, "uv");
        assert_eq!(cfg.scheduler_endpoint(), "0.0.0.0:8786");
    }

    #[test]
    fn overlay_from_toml() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
scheduler_port = 9000
env_tool = "pixi"
worker_kind = "columns"
accelerated = true
"#
        )
        .unwrap();

        let cfg = RunConfig::default().overlay_file(f.path()).unwrap();
        assert_eq!(cfg.scheduler_port, 9000);
        assert_eq!(cfg.env_tool, "pixi");
        assert_eq!(cfg.worker_kind, WorkerKind::Columns);
        assert!(cfg.accelerated);
        // Untouched fields keep their defaults.
        assert_eq!(cfg.scheduler_addr, "0.0.0.0");
    }

    #[test]
    fn overlay_rejects_bad_worker_kind() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, r#"worker_kind = "mystery""#).unwrap();
        assert!(RunConfig::default().overlay_file(f.path()).is_err());
    }
}
