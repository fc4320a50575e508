//! Calibration loop — scores live workers and feeds runtimes back.

use std::collections::HashMap;
use std::path::PathBuf;

use sysinfo::System;
use tracing::{debug, info, warn};

use gridway_core::{RunRecord, WorkerTelemetry};

use crate::error::{CapacityError, CapacityResult};
use crate::model::CapacityModel;
use crate::training::{CapacitySample, TrainingSet};

/// Fraction of each pairwise runtime delta folded into the new label.
const CORRECTION_RATE: f64 = 0.1;
/// Held-out fraction for retrain evaluation.
const HOLD_OUT: f64 = 0.2;

/// Owns the capacity model and the training history on disk.
///
/// The in-memory model is only replaced after a successful fit, so a
/// failed retrain never leaves the calibrator without a usable model.
pub struct Calibrator {
    training_file: PathBuf,
    model_file: PathBuf,
    model: Option<CapacityModel>,
}

impl Calibrator {
    /// Create a calibrator, loading the persisted model blob if present.
    ///
    /// With no blob on disk a synchronous retrain from the training file
    /// is attempted. A fresh deployment with no usable history starts
    /// untrained — callers see [`CapacityError::Untrained`] from
    /// [`calibrate`](Self::calibrate) until the first runtimes are fed
    /// back. Malformed history is still an error.
    pub fn open(training_file: PathBuf, model_file: PathBuf) -> CapacityResult<Self> {
        let model = match CapacityModel::load(&model_file) {
            Ok(model) => {
                debug!(path = %model_file.display(), rows = model.trained_rows, "loaded capacity model");
                Some(model)
            }
            Err(err) => {
                warn!(path = %model_file.display(), %err, "no usable model blob, retraining");
                None
            }
        };

        let mut calibrator = Self {
            training_file,
            model_file,
            model,
        };
        if calibrator.model.is_none() {
            match calibrator.retrain() {
                Ok(_) => {}
                Err(CapacityError::MissingTrainingFile(_) | CapacityError::NotEnoughData(_)) => {
                    warn!("no training history yet, starting untrained");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(calibrator)
    }

    /// Refit the model from the entire training history.
    ///
    /// The history is split into a training head and a held-out tail for
    /// evaluation; the final model is refit on the full set and persisted
    /// atomically. The in-memory model is swapped only on success.
    pub fn retrain(&mut self) -> CapacityResult<f64> {
        let set = TrainingSet::load(&self.training_file)?;
        if set.len() < 2 {
            return Err(CapacityError::NotEnoughData(set.len()));
        }

        let (x, y) = set.matrices();
        let n = set.len();
        let held_out = ((n as f64 * HOLD_OUT).ceil() as usize).clamp(1, n - 1);
        let split = n - held_out;

        let head = CapacityModel::fit(
            x.slice(ndarray::s![..split, ..]),
            y.slice(ndarray::s![..split]),
        );
        let r2 = head.score(
            x.slice(ndarray::s![split.., ..]),
            y.slice(ndarray::s![split..]),
        );

        let mut model = CapacityModel::fit(x.view(), y.view());
        model.held_out_r2 = r2.is_finite().then_some(r2);
        model.save(&self.model_file)?;

        info!(rows = n, held_out, r2, "capacity model retrained");
        self.model = Some(model);
        Ok(r2)
    }

    /// Score live workers and return the normalized capacity table.
    ///
    /// Every raw score is divided by the minimum observed score and
    /// rounded to one decimal, so the slowest worker is always 1.0.
    pub fn calibrate(
        &self,
        live_workers: &[WorkerTelemetry],
    ) -> CapacityResult<HashMap<String, f64>> {
        let model = self.model.as_ref().ok_or(CapacityError::Untrained)?;
        if live_workers.is_empty() {
            return Ok(HashMap::new());
        }

        let raw: Vec<f64> = live_workers
            .iter()
            .map(|w| model.predict_one(&telemetry_features(w)).max(f64::MIN_POSITIVE))
            .collect();
        let min = raw.iter().copied().fold(f64::INFINITY, f64::min);

        let table: HashMap<String, f64> = live_workers
            .iter()
            .zip(&raw)
            .map(|(w, &score)| (w.host.clone(), ((score / min) * 10.0).round() / 10.0))
            .collect();

        debug!(workers = live_workers.len(), ?table, "calibrated capacities");
        Ok(table)
    }

    /// Fold one run's observed runtimes back into the training history.
    ///
    /// Each worker gets a new sample whose label is its current capacity
    /// nudged down by how much slower it ran than each peer:
    /// `0.1 × capacity × (Δruntime / runtime) / (peers − 1)` per peer.
    /// A single-worker run has no peers; its label is appended unchanged.
    /// Any non-finite or zero runtime aborts the whole update before a
    /// row is written.
    pub fn update(
        &mut self,
        records: &[RunRecord],
        telemetry: &HashMap<String, WorkerTelemetry>,
        capacities: &HashMap<String, f64>,
    ) -> CapacityResult<()> {
        for record in records {
            if !record.runtime_secs.is_finite() || record.runtime_secs <= 0.0 {
                return Err(CapacityError::BadRuntime {
                    host: record.host.clone(),
                    runtime: record.runtime_secs,
                });
            }
        }

        let peer_count = records.len().saturating_sub(1) as f64;
        let mut samples = Vec::with_capacity(records.len());

        for record in records {
            let capacity = capacities.get(&record.host).copied().unwrap_or(1.0);
            let correction = if peer_count == 0.0 {
                0.0
            } else {
                records
                    .iter()
                    .filter(|peer| peer.host != record.host)
                    .map(|peer| {
                        let delta = record.runtime_secs - peer.runtime_secs;
                        CORRECTION_RATE * capacity * (delta / record.runtime_secs) / peer_count
                    })
                    .sum()
            };

            let Some(info) = telemetry.get(&record.host) else {
                warn!(host = %record.host, "no telemetry for worker, skipping its sample");
                continue;
            };
            samples.push(CapacitySample {
                workers: f64::from(info.workers),
                ram_total: info.ram_total,
                ram_available: info.ram_available,
                cpu_count: f64::from(info.cpu_count),
                cpu_frequency: info.cpu_frequency,
                network_speed: info.network_speed,
                label: capacity - correction,
            });
        }

        TrainingSet::append(&self.training_file, &samples)?;
        info!(rows = samples.len(), "training history extended");
        self.retrain()?;
        Ok(())
    }

    /// Held-out score of the current model, if trained.
    pub fn held_out_r2(&self) -> Option<f64> {
        self.model.as_ref().and_then(|m| m.held_out_r2)
    }
}

fn telemetry_features(w: &WorkerTelemetry) -> [f64; crate::training::FEATURES] {
    [
        f64::from(w.workers),
        w.ram_total,
        w.ram_available,
        f64::from(w.cpu_count),
        w.cpu_frequency,
        w.network_speed,
    ]
}

/// Probe the local machine's resource features.
///
/// Remote hosts report their own telemetry through the worker contract;
/// this covers the control machine. Network speed is not measurable
/// locally, so the caller's estimate is passed through.
pub fn local_telemetry(host: &str, workers: u32, network_speed: f64) -> WorkerTelemetry {
    let mut sys = System::new_all();
    sys.refresh_all();

    WorkerTelemetry {
        host: host.to_string(),
        workers,
        ram_total: sys.total_memory() as f64 / 1e6,
        ram_available: sys.available_memory() as f64 / 1e6,
        cpu_count: sys.cpus().len() as u32,
        cpu_frequency: sys.cpus().first().map(|c| c.frequency()).unwrap_or(0) as f64,
        network_speed,
    }
}
