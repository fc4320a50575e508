//! Shared types used across Gridway crates.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One machine participating in the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    /// Address — hostname or IP; `"localhost"` for the control machine.
    pub address: String,
    /// Number of worker processes to run on this host.
    pub workers: u32,
    /// Whether this is the control machine itself (cached predicate,
    /// computed once by the remote client).
    pub is_local: bool,
    /// Normalized relative capacity, 1.0 = slowest observed. Written by
    /// the calibration loop, read by the partitioner.
    pub capacity: f64,
}

impl Host {
    pub fn new(address: impl Into<String>, workers: u32) -> Self {
        Self {
            address: address.into(),
            workers,
            is_local: false,
            capacity: 1.0,
        }
    }
}

/// One opaque unit of work: a label and a relative cost estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub label: String,
    /// Relative weight — row count, byte size, whatever the payload
    /// collaborator measures cost in. Never subdivided.
    pub weight: f64,
}

impl WorkItem {
    pub fn new(label: impl Into<String>, weight: f64) -> Self {
        Self {
            label: label.into(),
            weight,
        }
    }
}

/// Work-to-slot assignment: outer index = worker slot, middle = sub-job,
/// inner = ordered items for that sub-job.
///
/// Invariant: every input item appears in exactly one slot, whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionPlan {
    pub slots: Vec<Vec<Vec<WorkItem>>>,
}

impl DistributionPlan {
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Total number of items across every slot and sub-job.
    pub fn total_items(&self) -> usize {
        self.slots
            .iter()
            .flat_map(|slot| slot.iter())
            .map(|job| job.len())
            .sum()
    }

    /// Summed weight assigned to one worker slot.
    pub fn slot_weight(&self, slot: usize) -> f64 {
        self.slots[slot]
            .iter()
            .flat_map(|job| job.iter())
            .map(|item| item.weight)
            .sum()
    }
}

/// The kind of work payload a worker runs.
///
/// Closed set, resolved once at configuration time; the lookup table
/// below maps each kind to the package bundled onto the hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerKind {
    Agent,
    Pipeline,
    Frames,
    Columns,
}

impl WorkerKind {
    /// Package name bundled for this worker kind.
    pub fn package_name(self) -> &'static str {
        match self {
            WorkerKind::Agent => "gridway-agent",
            WorkerKind::Pipeline => "gridway-pipeline",
            WorkerKind::Frames => "gridway-frames",
            WorkerKind::Columns => "gridway-columns",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "agent" => Some(WorkerKind::Agent),
            "pipeline" => Some(WorkerKind::Pipeline),
            "frames" => Some(WorkerKind::Frames),
            "columns" => Some(WorkerKind::Columns),
            _ => None,
        }
    }
}

/// Telemetry reported by a live worker, fed to the capacity model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerTelemetry {
    pub host: String,
    /// Worker processes on that host.
    pub workers: u32,
    pub ram_total: f64,
    pub ram_available: f64,
    pub cpu_count: u32,
    pub cpu_frequency: f64,
    pub network_speed: f64,
}

/// Per-worker observed wall-clock runtime for the last execution.
///
/// Transient — held only long enough to derive the next training sample
/// and rebalance the capacity table.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub host: String,
    pub runtime_secs: f64,
}

/// The outcome of one orchestrated run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub mode_label: String,
    pub elapsed_secs: f64,
    /// Observed per-worker runtimes, keyed by host address.
    pub worker_runtimes: HashMap<String, f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_accounting() {
        let plan = DistributionPlan {
            slots: vec![
                vec![vec![WorkItem::new("a", 3.0)], vec![WorkItem::new("b", 2.0)]],
                vec![vec![WorkItem::new("c", 5.0)]],
            ],
        };
        assert_eq!(plan.slot_count(), 2);
        assert_eq!(plan.total_items(), 3);
        assert_eq!(plan.slot_weight(0), 5.0);
        assert_eq!(plan.slot_weight(1), 5.0);
    }

    #[test]
    fn worker_kind_lookup() {
        assert_eq!(WorkerKind::parse("frames"), Some(WorkerKind::Frames));
        assert_eq!(WorkerKind::Frames.package_name(), "gridway-frames");
        assert_eq!(WorkerKind::parse("unknown"), None);
    }
}
