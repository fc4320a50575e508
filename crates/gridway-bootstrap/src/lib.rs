//! gridway-bootstrap — brings a bare host to a worker-ready state.
//!
//! The pipeline is strictly ordered and idempotent: re-provisioning an
//! already-provisioned host performs no duplicate installs. Steps:
//!
//! 1. Detect the remote shell flavor, compute a PATH-export prefix
//! 2. Verify or install the environment-provisioner tool
//! 3. Install the pinned interpreter (probing the remote version when
//!    the pin is a placeholder)
//! 4. Kill stale processes and purge the working directory
//! 5. Initialize the bare project skeleton
//! 6. (local host only) build the support libraries from source
//! 7. Transfer artifacts and sync project dependencies
//! 8. Run the post-install hook
//! 9. Build the work payload's native library
//!
//! Accelerator probing is best-effort: absence silently downgrades the
//! host unless acceleration was explicitly requested.

pub mod artifacts;
pub mod error;
pub mod provisioner;

pub use error::{BootstrapError, BootstrapResult};
pub use provisioner::{InstallKind, Provisioner, ShellFlavor};
