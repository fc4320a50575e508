//! PID leases.
//!
//! One plain-text file per spawned process, named deterministically by
//! role and index, living beside the per-host working directory. Created
//! on spawn, consumed and removed by the next kill pass — its own or a
//! stale one from a prior crashed run.

use serde::{Deserialize, Serialize};

/// What kind of process a lease tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessKind {
    Scheduler,
    Worker,
}

/// An on-disk record of a spawned process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidLease {
    pub host: String,
    pub pid: u32,
    pub kind: ProcessKind,
    /// Worker sequence index on its host; 0 for the scheduler.
    pub index: u32,
}

impl PidLease {
    /// Deterministic lease file name for a role and index.
    pub fn file_name(kind: ProcessKind, index: u32) -> String {
        match kind {
            ProcessKind::Scheduler => "scheduler.pid".to_string(),
            ProcessKind::Worker => format!("worker-{index}.pid"),
        }
    }

    pub fn file_name_for(&self) -> String {
        Self::file_name(self.kind, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_deterministic() {
        assert_eq!(PidLease::file_name(ProcessKind::Scheduler, 0), "scheduler.pid");
        assert_eq!(PidLease::file_name(ProcessKind::Worker, 3), "worker-3.pid");
    }
}
