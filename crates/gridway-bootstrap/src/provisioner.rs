//! The provisioning pipeline.

use std::sync::Arc;

use futures::future::join_all;
use regex::Regex;
use tracing::{debug, info, warn};

use gridway_core::{Host, RunConfig};
use gridway_lifecycle::LifecycleManager;
use gridway_remote::RemoteClient;

use crate::artifacts;
use crate::error::{BootstrapError, BootstrapResult};

/// Why a host is being provisioned — forwarded to the post-install hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallKind {
    Install,
    Upgrade,
}

impl InstallKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InstallKind::Install => "install",
            InstallKind::Upgrade => "upgrade",
        }
    }
}

/// Shell flavor on a host, used to build the PATH-export prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellFlavor {
    Bash,
    Posix,
}

impl ShellFlavor {
    /// Command prefix exporting the env tool's install locations.
    pub fn path_prefix(self) -> &'static str {
        match self {
            ShellFlavor::Bash => {
                "export PATH=\"$HOME/.local/bin:$HOME/.cargo/bin:$PATH\"; "
            }
            ShellFlavor::Posix => {
                "PATH=\"$HOME/.local/bin:$HOME/.cargo/bin:$PATH\"; export PATH; "
            }
        }
    }
}

/// Drives the ordered bootstrap steps for one host at a time.
pub struct Provisioner {
    client: Arc<RemoteClient>,
    lifecycle: Arc<LifecycleManager>,
    config: RunConfig,
    accel_probe: String,
    version_probe: String,
}

impl Provisioner {
    pub fn new(
        client: Arc<RemoteClient>,
        lifecycle: Arc<LifecycleManager>,
        config: RunConfig,
    ) -> Self {
        Self {
            client,
            lifecycle,
            config,
            accel_probe: "nvidia-smi -L".to_string(),
            version_probe: "python3 --version 2>&1".to_string(),
        }
    }

    /// Override the accelerator probe command.
    pub fn with_accel_probe(mut self, cmd: impl Into<String>) -> Self {
        self.accel_probe = cmd.into();
        self
    }

    /// Override the interpreter version probe command.
    pub fn with_version_probe(mut self, cmd: impl Into<String>) -> Self {
        self.version_probe = cmd.into();
        self
    }

    fn project_dir(&self) -> String {
        self.config.project_dir.to_string_lossy().into_owned()
    }

    /// Provision one host, idempotently.
    pub async fn provision(&self, host: &Host, kind: InstallKind) -> BootstrapResult<()> {
        let address = host.address.as_str();
        info!(host = %address, kind = kind.as_str(), "provisioning host");

        let flavor = self.detect_shell(address).await?;
        let prefix = flavor.path_prefix();

        self.ensure_env_tool(address, prefix).await?;
        self.install_interpreter(address, prefix).await?;
        self.reset_host(host).await?;
        self.init_skeleton(address, prefix).await?;

        if host.is_local {
            self.build_support_libs(prefix).await?;
        }

        let accelerated = self.check_accelerator(address).await?;
        self.transfer_artifacts(address).await?;
        self.sync_dependencies(address, prefix, accelerated).await?;
        self.run_hook(address, prefix, kind).await?;
        self.native_build(address, prefix).await?;

        info!(host = %address, "host provisioned");
        Ok(())
    }

    /// Provision many hosts in parallel; one host's failure is reported
    /// without aborting its siblings.
    pub async fn provision_all(
        &self,
        hosts: &[Host],
        kind: InstallKind,
    ) -> Vec<(String, BootstrapResult<()>)> {
        let installs = hosts.iter().map(|host| async move {
            let result = self.provision(host, kind).await;
            if let Err(err) = &result {
                warn!(host = %host.address, %err, "provisioning failed");
            }
            (host.address.clone(), result)
        });
        join_all(installs).await
    }

    // ── Steps ───────────────────────────────────────────────────────

    /// Step 1: identify the login shell to pick the right PATH export.
    pub async fn detect_shell(&self, host: &str) -> BootstrapResult<ShellFlavor> {
        let output = self
            .client
            .exec(host, "ps -p $$ -o comm= 2>/dev/null || echo sh")
            .await
            .map_err(|e| BootstrapError::ShellDetect {
                host: host.to_string(),
                reason: e.to_string(),
            })?;

        let shell = output.trim().rsplit('/').next().unwrap_or("sh").to_string();
        let flavor = if shell.contains("bash") || shell.contains("zsh") {
            ShellFlavor::Bash
        } else {
            ShellFlavor::Posix
        };
        debug!(%host, %shell, ?flavor, "shell detected");
        Ok(flavor)
    }

    /// Step 2: the env tool must exist; try its installer script if not.
    /// Failure of both is a hard error, never silently retried.
    async fn ensure_env_tool(&self, host: &str, prefix: &str) -> BootstrapResult<()> {
        let tool = &self.config.env_tool;
        let check = format!("{prefix}command -v {tool}");

        if self.client.exec(host, &check).await.is_ok() {
            debug!(%host, %tool, "env tool present");
            return Ok(());
        }

        info!(%host, %tool, "env tool absent, running installer");
        let installer = format!(
            "curl -LsSf https://astral.sh/{tool}/install.sh | sh || \
             wget -qO- https://astral.sh/{tool}/install.sh | sh"
        );
        if let Err(err) = self.client.exec(host, &installer).await {
            return Err(BootstrapError::EnvToolMissing {
                host: host.to_string(),
                tool: tool.clone(),
                reason: err.to_string(),
            });
        }

        // The installer may land the tool outside the current PATH.
        self.client.exec(host, &check).await.map_err(|err| {
            BootstrapError::EnvToolMissing {
                host: host.to_string(),
                tool: tool.clone(),
                reason: format!("still absent after installer: {err}"),
            }
        })?;
        Ok(())
    }

    /// Step 3: install the pinned interpreter. A non-semver pin is a
    /// placeholder — the remote interpreter's reported version wins.
    async fn install_interpreter(&self, host: &str, prefix: &str) -> BootstrapResult<()> {
        let pin = self.effective_pin(host).await?;
        let cmd = format!("{prefix}{} python install {pin}", self.config.env_tool);
        self.client
            .exec(host, &cmd)
            .await
            .map_err(|e| BootstrapError::InterpreterInstall {
                host: host.to_string(),
                pin: pin.clone(),
                reason: e.to_string(),
            })?;
        debug!(%host, %pin, "interpreter installed");
        Ok(())
    }

    /// Resolve the effective interpreter version for a host.
    pub async fn effective_pin(&self, host: &str) -> BootstrapResult<String> {
        let pin = &self.config.interpreter_pin;
        if semver::Version::parse(pin).is_ok()
            || semver::Version::parse(&format!("{pin}.0")).is_ok()
        {
            return Ok(pin.clone());
        }

        let output = self.client.exec(host, &self.version_probe).await.map_err(|e| {
            BootstrapError::InterpreterInstall {
                host: host.to_string(),
                pin: pin.clone(),
                reason: format!("version probe failed: {e}"),
            }
        })?;

        let re = Regex::new(r"(\d+\.\d+(?:\.\d+)?)").map_err(|e| {
            BootstrapError::InterpreterInstall {
                host: host.to_string(),
                pin: pin.clone(),
                reason: format!("version pattern: {e}"),
            }
        })?;
        let version = re
            .captures(&output)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| BootstrapError::InterpreterInstall {
                host: host.to_string(),
                pin: pin.clone(),
                reason: format!("no version in probe output: {output:?}"),
            })?;
        info!(%host, placeholder = %pin, probed = %version, "placeholder pin resolved");
        Ok(version)
    }

    /// Step 4: kill stale processes and purge the working directory.
    async fn reset_host(&self, host: &Host) -> BootstrapResult<()> {
        self.lifecycle.kill(&host.address, 0, true).await?;
        if host.is_local {
            self.lifecycle.clean_local().await;
        } else {
            self.lifecycle.clean_remote(&host.address).await?;
        }
        Ok(())
    }

    /// Step 5: lay down the bare project skeleton if it isn't there.
    async fn init_skeleton(&self, host: &str, prefix: &str) -> BootstrapResult<()> {
        let project = self.project_dir();
        let cmd = format!(
            "mkdir -p '{project}' && cd '{project}' && \
             [ -f pyproject.toml ] || {prefix}{} init --bare",
            self.config.env_tool
        );
        self.client
            .exec(host, &cmd)
            .await
            .map_err(|e| BootstrapError::Skeleton {
                host: host.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// Step 6 (local only): build the support libraries from source and
    /// copy their artifacts into the working tree.
    async fn build_support_libs(&self, prefix: &str) -> BootstrapResult<()> {
        let project = self.project_dir();
        for lib in &self.config.support_libs {
            let lib_str = lib.to_string_lossy();
            let cmd = format!(
                "cd '{lib_str}' && {prefix}{tool} build && \
                 mkdir -p '{project}/vendor' && cp dist/* '{project}/vendor/'",
                tool = self.config.env_tool,
            );
            self.client.exec("localhost", &cmd).await.map_err(|e| {
                BootstrapError::SupportLib {
                    lib: lib_str.into_owned(),
                    reason: e.to_string(),
                }
            })?;
            debug!(lib = %lib.display(), "support library built");
        }
        Ok(())
    }

    /// Best-effort accelerator probe. Absence downgrades silently unless
    /// acceleration was explicitly requested — then it is fatal for this
    /// host only.
    async fn check_accelerator(&self, host: &str) -> BootstrapResult<bool> {
        match self.client.exec(host, &self.accel_probe).await {
            Ok(output) if !output.trim().is_empty() => {
                debug!(%host, "accelerator present");
                Ok(true)
            }
            _ if self.config.accelerated => {
                Err(BootstrapError::AcceleratorMissing {
                    host: host.to_string(),
                })
            }
            _ => {
                debug!(%host, "no accelerator, using plain path");
                Ok(false)
            }
        }
    }

    /// Step 7a: transfer artifacts the host doesn't already have.
    async fn transfer_artifacts(&self, host: &str) -> BootstrapResult<()> {
        let found = artifacts::discover(&self.config.artifact_dir);
        if found.is_empty() {
            debug!(%host, "no artifacts to transfer");
            return Ok(());
        }

        let remote_dir = format!("{}/artifacts", self.project_dir());
        let mut to_send = Vec::new();
        for artifact in &found {
            let name = artifact
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let local_digest = artifacts::digest(artifact)?;
            let remote_digest = self
                .client
                .exec(
                    host,
                    &format!("sha256sum '{remote_dir}/{name}' 2>/dev/null | cut -d' ' -f1"),
                )
                .await
                .map(|out| out.trim().to_string())
                .unwrap_or_default();

            if remote_digest == local_digest {
                debug!(%host, %name, "artifact already present, skipping");
            } else {
                to_send.push(artifact.clone());
            }
        }

        if !to_send.is_empty() {
            info!(%host, count = to_send.len(), "transferring artifacts");
            self.client.send_files(host, &to_send, &remote_dir).await?;
        }
        Ok(())
    }

    /// Step 7b: sync declared dependencies. A missing-module failure is
    /// retried exactly once after installing the module it names.
    async fn sync_dependencies(
        &self,
        host: &str,
        prefix: &str,
        accelerated: bool,
    ) -> BootstrapResult<()> {
        if accelerated {
            let overlay = &self.config.accel_config;
            if overlay.exists() {
                let remote = format!("{}/{}", self.project_dir(), "accel.toml");
                self.client.send_file(host, overlay, &remote).await?;
                debug!(%host, "accelerator config overlay installed");
            }
        }

        let extra = if accelerated { " --extra accel" } else { "" };
        let cmd = format!(
            "cd '{}' && {prefix}{} sync{extra}",
            self.project_dir(),
            self.config.env_tool
        );

        match self.client.exec(host, &cmd).await {
            Ok(_) => Ok(()),
            Err(err) => {
                let text = err.to_string();
                let re = Regex::new(r#"[Nn]o module named ['"]?([A-Za-z0-9_.-]+)"#).map_err(
                    |e| BootstrapError::Sync {
                        host: host.to_string(),
                        reason: format!("module pattern: {e}"),
                    },
                )?;
                if let Some(module) = re.captures(&text).and_then(|c| c.get(1)) {
                    let module = module.as_str();
                    warn!(%host, module, "sync missing a module, installing and retrying once");
                    self.client
                        .exec(
                            host,
                            &format!("{prefix}{} pip install {module}", self.config.env_tool),
                        )
                        .await
                        .map_err(|e| BootstrapError::Sync {
                            host: host.to_string(),
                            reason: e.to_string(),
                        })?;
                    self.client.exec(host, &cmd).await.map_err(|e| {
                        BootstrapError::Sync {
                            host: host.to_string(),
                            reason: e.to_string(),
                        }
                    })?;
                    Ok(())
                } else {
                    Err(BootstrapError::Sync {
                        host: host.to_string(),
                        reason: text,
                    })
                }
            }
        }
    }

    /// Step 8: post-install hook with install-type and data-path args.
    async fn run_hook(&self, host: &str, prefix: &str, kind: InstallKind) -> BootstrapResult<()> {
        let project = self.project_dir();
        let hook = &self.config.hook_script;
        let cmd = format!(
            "cd '{project}' && if [ -f '{hook}' ]; then {prefix}sh '{hook}' {} '{}'; fi",
            kind.as_str(),
            self.config.data_dir.to_string_lossy(),
        );
        self.client
            .exec(host, &cmd)
            .await
            .map_err(|e| BootstrapError::Hook {
                host: host.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// Step 9: build the work payload's native library.
    async fn native_build(&self, host: &str, prefix: &str) -> BootstrapResult<()> {
        let cmd = format!(
            "cd '{}' && {prefix}{}",
            self.project_dir(),
            self.config.native_build_cmd
        );
        self.client
            .exec(host, &cmd)
            .await
            .map_err(|e| BootstrapError::NativeBuild {
                host: host.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}
