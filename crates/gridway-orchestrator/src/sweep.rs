//! Benchmark-sweep report.

use std::path::Path;

use serde::{Deserialize, Serialize};
use gridway_core::ExecutionMode;

use crate::error::OrchestratorResult;

/// One timed mode. Failures keep their error text and never get a rank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepEntry {
    pub label: String,
    pub bits: u32,
    pub seconds: Option<f64>,
    pub human: Option<String>,
    pub error: Option<String>,
    pub rank: Option<usize>,
    pub delta_secs: Option<f64>,
}

/// The persisted sweep report: every attempted mode, ranked ascending
/// by wall-clock time, with each entry's delta to the fastest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub target: String,
    pub entries: Vec<SweepEntry>,
}

impl SweepReport {
    pub fn from_outcomes(
        target: &str,
        outcomes: Vec<(ExecutionMode, Result<f64, String>)>,
    ) -> Self {
        let mut entries: Vec<SweepEntry> = outcomes
            .into_iter()
            .map(|(mode, outcome)| match outcome {
                Ok(seconds) => SweepEntry {
                    label: mode.label(),
                    bits: mode.to_bits(),
                    seconds: Some(seconds),
                    human: Some(format_duration(seconds)),
                    error: None,
                    rank: None,
                    delta_secs: None,
                },
                Err(error) => SweepEntry {
                    label: mode.label(),
                    bits: mode.to_bits(),
                    seconds: None,
                    human: None,
                    error: Some(error),
                    rank: None,
                    delta_secs: None,
                },
            })
            .collect();

        // Successes ranked ascending; failures sink to the bottom.
        entries.sort_by(|a, b| match (a.seconds, b.seconds) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        let fastest = entries.first().and_then(|e| e.seconds);
        for (i, entry) in entries.iter_mut().enumerate() {
            if let (Some(seconds), Some(fastest)) = (entry.seconds, fastest) {
                entry.rank = Some(i + 1);
                entry.delta_secs = Some(seconds - fastest);
            }
        }

        Self {
            target: target.to_string(),
            entries,
        }
    }

    pub fn fastest(&self) -> Option<&SweepEntry> {
        self.entries.iter().find(|e| e.rank == Some(1))
    }

    pub fn save(&self, path: &Path) -> OrchestratorResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Human-readable duration, e.g. `"1h 2m 5.5s"`.
pub fn format_duration(secs: f64) -> String {
    if secs >= 3600.0 {
        let hours = (secs / 3600.0).floor();
        let minutes = ((secs % 3600.0) / 60.0).floor();
        format!("{hours:.0}h {minutes:.0}m {:.1}s", secs % 60.0)
    } else if secs >= 60.0 {
        format!("{:.0}m {:.1}s", (secs / 60.0).floor(), secs % 60.0)
    } else {
        format!("{secs:.1}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(code: &str) -> ExecutionMode {
        ExecutionMode::from_code(code).unwrap()
    }

    #[test]
    fn ranking_is_ascending_with_deltas() {
        let report = SweepReport::from_outcomes(
            "work.json",
            vec![
                (mode("r"), Ok(20.0)),
                (mode("dr"), Ok(8.0)),
                (mode("cr"), Err("backend refused".to_string())),
                (mode("dcr"), Ok(12.5)),
            ],
        );

        let ranked: Vec<_> = report
            .entries
            .iter()
            .map(|e| (e.label.as_str(), e.rank, e.delta_secs))
            .collect();
        assert_eq!(
            ranked,
            vec![
                ("run+distributed", Some(1), Some(0.0)),
                ("run+compiled+distributed", Some(2), Some(4.5)),
                ("run", Some(3), Some(12.0)),
                ("run+compiled", None, None),
            ]
        );
        assert_eq!(report.fastest().unwrap().label, "run+distributed");
        assert_eq!(
            report.entries.last().unwrap().error.as_deref(),
            Some("backend refused")
        );
    }

    #[test]
    fn all_failures_yield_no_ranks() {
        let report = SweepReport::from_outcomes(
            "work.json",
            vec![(mode("r"), Err("a".into())), (mode("dr"), Err("b".into()))],
        );
        assert!(report.fastest().is_none());
        assert!(report.entries.iter().all(|e| e.rank.is_none()));
    }

    #[test]
    fn report_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let report = SweepReport::from_outcomes("work.json", vec![(mode("r"), Ok(1.0))]);
        report.save(&path).unwrap();

        let loaded: SweepReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.entries[0].label, "run");
        assert_eq!(loaded.entries[0].human.as_deref(), Some("1.0s"));
    }

    #[test]
    fn durations_format_by_magnitude() {
        assert_eq!(format_duration(12.34), "12.3s");
        assert_eq!(format_duration(75.0), "1m 15.0s");
        assert_eq!(format_duration(3725.5), "1h 2m 5.5s");
    }
}
