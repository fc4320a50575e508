//! gridway-capacity — the capacity model and calibration loop.
//!
//! Maps host resource features (worker count, RAM, CPU count/frequency,
//! network throughput) to a scalar capacity score with a bagged ensemble
//! of regression trees. The full training history lives in a CSV file;
//! the model is refit from the entire file after every run, never
//! incrementally on a single row.
//!
//! Calibration normalizes raw scores so the slowest observed worker is
//! always 1.0; the post-run update derives one new training row per
//! worker from its runtime relative to its peers.

pub mod calibrate;
pub mod error;
pub mod model;
pub mod training;

pub use calibrate::{Calibrator, local_telemetry};
pub use error::{CapacityError, CapacityResult};
pub use model::CapacityModel;
pub use training::{CapacitySample, TrainingSet};
