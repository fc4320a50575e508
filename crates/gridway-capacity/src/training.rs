//! Training-file I/O.
//!
//! Tabular CSV: a header row, two metadata rows (skipped on read), then
//! one data row per sample. Appends are append-only; the file is read in
//! full on every retrain.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{CapacityError, CapacityResult};

pub const HEADER: &str =
    "nb_workers,ram_total,ram_available,cpu_count,cpu_frequency,network_speed,label";
const META_ROWS: [&str; 2] = [
    "# source: gridway calibration,,,,,,",
    "# units: count / MB / MB / count / MHz / Mbps / relative,,,,,,",
];

/// Number of feature columns (label excluded).
pub const FEATURES: usize = 6;

/// One training row: host features and the observed capacity label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacitySample {
    pub workers: f64,
    pub ram_total: f64,
    pub ram_available: f64,
    pub cpu_count: f64,
    pub cpu_frequency: f64,
    pub network_speed: f64,
    pub label: f64,
}

impl CapacitySample {
    pub fn features(&self) -> [f64; FEATURES] {
        [
            self.workers,
            self.ram_total,
            self.ram_available,
            self.cpu_count,
            self.cpu_frequency,
            self.network_speed,
        ]
    }

    fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{}",
            self.workers,
            self.ram_total,
            self.ram_available,
            self.cpu_count,
            self.cpu_frequency,
            self.network_speed,
            self.label
        )
    }
}

/// The full training history, loaded into memory for a fit.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub samples: Vec<CapacitySample>,
}

impl TrainingSet {
    /// Read the whole history file.
    ///
    /// The header and the two metadata rows are skipped; blank lines are
    /// tolerated. A missing file is a typed error — callers decide
    /// whether that is fatal.
    pub fn load(path: &Path) -> CapacityResult<Self> {
        if !path.exists() {
            return Err(CapacityError::MissingTrainingFile(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;

        let mut samples = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            // Header + 2 metadata rows.
            if idx < 3 {
                continue;
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            samples.push(parse_row(idx + 1, line)?);
        }
        Ok(Self { samples })
    }

    /// Append samples, creating the file (with header and metadata rows)
    /// if it does not exist yet.
    pub fn append(path: &Path, samples: &[CapacitySample]) -> CapacityResult<()> {
        let fresh = !path.exists();
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        if fresh {
            writeln!(file, "{HEADER}")?;
            for meta in META_ROWS {
                writeln!(file, "{meta}")?;
            }
        }
        for sample in samples {
            writeln!(file, "{}", sample.to_csv_row())?;
        }
        Ok(())
    }

    /// Feature matrix and label vector for fitting.
    pub fn matrices(&self) -> (Array2<f64>, Array1<f64>) {
        let n = self.samples.len();
        let mut x = Array2::zeros((n, FEATURES));
        let mut y = Array1::zeros(n);
        for (row, sample) in self.samples.iter().enumerate() {
            for (col, value) in sample.features().into_iter().enumerate() {
                x[[row, col]] = value;
            }
            y[row] = sample.label;
        }
        (x, y)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn parse_row(line: usize, raw: &str) -> CapacityResult<CapacitySample> {
    let fields: Vec<&str> = raw.split(',').map(str::trim).collect();
    if fields.len() != FEATURES + 1 {
        return Err(CapacityError::MalformedRow {
            line,
            reason: format!("expected {} columns, got {}", FEATURES + 1, fields.len()),
        });
    }
    let mut values = [0.0_f64; FEATURES + 1];
    for (i, field) in fields.iter().enumerate() {
        values[i] = field.parse().map_err(|_| CapacityError::MalformedRow {
            line,
            reason: format!("not a number: \"{field}\""),
        })?;
    }
    Ok(CapacitySample {
        workers: values[0],
        ram_total: values[1],
        ram_available: values[2],
        cpu_count: values[3],
        cpu_frequency: values[4],
        network_speed: values[5],
        label: values[6],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(label: f64) -> CapacitySample {
        CapacitySample {
            workers: 2.0,
            ram_total: 16000.0,
            ram_available: 12000.0,
            cpu_count: 8.0,
            cpu_frequency: 2400.0,
            network_speed: 1000.0,
            label,
        }
    }

    #[test]
    fn append_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");

        TrainingSet::append(&path, &[sample(1.0), sample(2.5)]).unwrap();
        TrainingSet::append(&path, &[sample(1.5)]).unwrap();

        let set = TrainingSet::load(&path).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.samples[1].label, 2.5);

        // Header and the two metadata rows are written exactly once.
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().filter(|l| l.starts_with('#')).count(), 2);
        assert!(content.starts_with(HEADER));
    }

    #[test]
    fn load_skips_metadata_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");
        std::fs::write(
            &path,
            format!("{HEADER}\nmeta1,,,,,,\nmeta2,,,,,,\n1,2,3,4,5,6,1.5\n"),
        )
        .unwrap();

        let set = TrainingSet::load(&path).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.samples[0].label, 1.5);
    }

    #[test]
    fn missing_file_is_typed_error() {
        let err = TrainingSet::load(Path::new("/nonexistent/history.csv")).unwrap_err();
        assert!(matches!(err, CapacityError::MissingTrainingFile(_)));
    }

    #[test]
    fn malformed_row_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");
        std::fs::write(
            &path,
            format!("{HEADER}\nm,,,,,,\nm,,,,,,\n1,2,3,4,5,6,1.0\nnot,a,valid,row\n"),
        )
        .unwrap();

        let err = TrainingSet::load(&path).unwrap_err();
        assert!(matches!(err, CapacityError::MalformedRow { line: 5, .. }));
    }

    #[test]
    fn matrices_shape() {
        let set = TrainingSet {
            samples: vec![sample(1.0), sample(2.0), sample(3.0)],
        };
        let (x, y) = set.matrices();
        assert_eq!(x.shape(), &[3, FEATURES]);
        assert_eq!(y.len(), 3);
        assert_eq!(y[2], 3.0);
    }
}
