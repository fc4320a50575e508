//! Bootstrap error types.
//!
//! Every variant is fatal for the host it names; a multi-host install
//! reports per-host failures without aborting siblings.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("could not detect shell flavor on {host}: {reason}")]
    ShellDetect { host: String, reason: String },

    #[error("environment tool \"{tool}\" missing on {host} and installer failed: {reason}")]
    EnvToolMissing {
        host: String,
        tool: String,
        reason: String,
    },

    #[error("interpreter {pin} install failed on {host}: {reason}")]
    InterpreterInstall {
        host: String,
        pin: String,
        reason: String,
    },

    #[error("project skeleton init failed on {host}: {reason}")]
    Skeleton { host: String, reason: String },

    #[error("support library {lib} build failed: {reason}")]
    SupportLib { lib: String, reason: String },

    #[error("dependency sync failed on {host}: {reason}")]
    Sync { host: String, reason: String },

    #[error("accelerator requested but not present on {host}")]
    AcceleratorMissing { host: String },

    #[error("post-install hook failed on {host}: {reason}")]
    Hook { host: String, reason: String },

    #[error("native build failed on {host}: {reason}")]
    NativeBuild { host: String, reason: String },

    #[error(transparent)]
    Lifecycle(#[from] gridway_lifecycle::LifecycleError),

    #[error(transparent)]
    Remote(#[from] gridway_remote::RemoteError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type BootstrapResult<T> = Result<T, BootstrapError>;
