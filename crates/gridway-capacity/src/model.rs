//! Bagged regression-tree ensemble.
//!
//! Small, dependency-light ensemble regressor: each tree is a CART fit
//! on a bootstrap resample of the history, predictions are the tree
//! mean. Seeded RNG keeps fits reproducible. The serialized form is a
//! plain JSON blob, replaced atomically on every successful retrain.

use std::path::Path;

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::CapacityResult;
use crate::training::FEATURES;

const TREE_COUNT: usize = 24;
const MAX_DEPTH: usize = 6;
const MIN_SPLIT: usize = 2;
const BASE_SEED: u64 = 0x6772_6964;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn predict(&self, features: &[f64]) -> f64 {
        match self {
            Node::Leaf { value } => *value,
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if features[*feature] <= *threshold {
                    left.predict(features)
                } else {
                    right.predict(features)
                }
            }
        }
    }
}

/// The persisted capacity model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityModel {
    trees: Vec<Node>,
    /// R² on the held-out tail of the last retrain. `None` until a
    /// retrain has evaluated the model; NaN never reaches the blob
    /// (serde_json writes NaN as `null`, which would not load back).
    pub held_out_r2: Option<f64>,
    /// History size the model was fit on.
    pub trained_rows: usize,
}

impl CapacityModel {
    /// Fit a fresh ensemble on the given feature matrix and labels.
    pub fn fit(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Self {
        let n = x.nrows();
        let mut trees = Vec::with_capacity(TREE_COUNT);

        for t in 0..TREE_COUNT {
            let mut rng = StdRng::seed_from_u64(BASE_SEED.wrapping_add(t as u64));
            let rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            trees.push(grow(&x, &y, &rows, 0));
        }

        Self {
            trees,
            held_out_r2: None,
            trained_rows: n,
        }
    }

    /// Predict one capacity score from a feature vector.
    pub fn predict_one(&self, features: &[f64; FEATURES]) -> f64 {
        let sum: f64 = self.trees.iter().map(|t| t.predict(features)).sum();
        sum / self.trees.len() as f64
    }

    /// Predict a whole matrix row-wise.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        let mut out = Array1::zeros(x.nrows());
        for (i, row) in x.outer_iter().enumerate() {
            let mut features = [0.0_f64; FEATURES];
            for (j, v) in row.iter().enumerate() {
                features[j] = *v;
            }
            out[i] = self.predict_one(&features);
        }
        out
    }

    /// Coefficient of determination (R²) against known labels.
    ///
    /// May be negative for models worse than the mean predictor; only a
    /// NaN result indicates a degenerate evaluation.
    pub fn score(&self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> f64 {
        let predictions = self.predict(x);
        let mean = y.sum() / y.len() as f64;
        let ss_res: f64 = predictions
            .iter()
            .zip(y.iter())
            .map(|(p, t)| (t - p).powi(2))
            .sum();
        let ss_tot: f64 = y.iter().map(|t| (t - mean).powi(2)).sum();
        if ss_tot == 0.0 {
            // Constant labels: perfect if we match them, else worthless.
            return if ss_res < 1e-12 { 1.0 } else { 0.0 };
        }
        1.0 - ss_res / ss_tot
    }

    /// Load a persisted model blob.
    pub fn load(path: &Path) -> CapacityResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Persist atomically: write a sibling temp file, then rename over
    /// the target. The old blob survives any failure before the rename.
    pub fn save(&self, path: &Path) -> CapacityResult<()> {
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Grow one CART node over the row subset.
fn grow(x: &ArrayView2<'_, f64>, y: &ArrayView1<'_, f64>, rows: &[usize], depth: usize) -> Node {
    let mean = rows.iter().map(|&r| y[r]).sum::<f64>() / rows.len() as f64;

    if depth >= MAX_DEPTH || rows.len() < MIN_SPLIT {
        return Node::Leaf { value: mean };
    }

    let Some((feature, threshold)) = best_split(x, y, rows) else {
        return Node::Leaf { value: mean };
    };

    let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
        rows.iter().partition(|&&r| x[[r, feature]] <= threshold);

    if left_rows.is_empty() || right_rows.is_empty() {
        return Node::Leaf { value: mean };
    }

    Node::Split {
        feature,
        threshold,
        left: Box::new(grow(x, y, &left_rows, depth + 1)),
        right: Box::new(grow(x, y, &right_rows, depth + 1)),
    }
}

/// Best (feature, threshold) by sum-of-squared-error reduction, or None
/// when no split separates the rows.
fn best_split(
    x: &ArrayView2<'_, f64>,
    y: &ArrayView1<'_, f64>,
    rows: &[usize],
) -> Option<(usize, f64)> {
    let parent_sse = sse(y, rows);
    let mut best: Option<(usize, f64, f64)> = None;

    for feature in 0..x.ncols() {
        let mut values: Vec<f64> = rows.iter().map(|&r| x[[r, feature]]).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        values.dedup();

        for pair in values.windows(2) {
            let threshold = (pair[0] + pair[1]) / 2.0;
            let (l, r): (Vec<usize>, Vec<usize>) =
                rows.iter().partition(|&&row| x[[row, feature]] <= threshold);
            if l.is_empty() || r.is_empty() {
                continue;
            }
            let split_sse = sse(y, &l) + sse(y, &r);
            let gain = parent_sse - split_sse;
            if best.is_none_or(|(_, _, g)| gain > g) {
                best = Some((feature, threshold, gain));
            }
        }
    }

    best.filter(|&(_, _, gain)| gain > 1e-12)
        .map(|(f, t, _)| (f, t))
}

fn sse(y: &ArrayView1<'_, f64>, rows: &[usize]) -> f64 {
    let mean = rows.iter().map(|&r| y[r]).sum::<f64>() / rows.len() as f64;
    rows.iter().map(|&r| (y[r] - mean).powi(2)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2, array};

    fn toy_data() -> (Array2<f64>, Array1<f64>) {
        // Capacity roughly tracks cpu_count (column 3).
        let x = array![
            [1.0, 8000.0, 6000.0, 2.0, 2000.0, 100.0],
            [1.0, 16000.0, 12000.0, 4.0, 2400.0, 1000.0],
            [2.0, 16000.0, 8000.0, 4.0, 2400.0, 1000.0],
            [2.0, 32000.0, 24000.0, 8.0, 3000.0, 1000.0],
            [4.0, 64000.0, 48000.0, 16.0, 3200.0, 10000.0],
            [4.0, 64000.0, 32000.0, 16.0, 3200.0, 10000.0],
        ];
        let y = array![1.0, 1.8, 1.6, 3.1, 5.9, 5.5];
        (x, y)
    }

    #[test]
    fn fit_learns_monotone_signal() {
        let (x, y) = toy_data();
        let model = CapacityModel::fit(x.view(), y.view());

        let slow = model.predict_one(&[1.0, 8000.0, 6000.0, 2.0, 2000.0, 100.0]);
        let fast = model.predict_one(&[4.0, 64000.0, 48000.0, 16.0, 3200.0, 10000.0]);
        assert!(fast > slow, "fast host {fast} not above slow host {slow}");
    }

    #[test]
    fn fit_is_deterministic() {
        let (x, y) = toy_data();
        let a = CapacityModel::fit(x.view(), y.view());
        let b = CapacityModel::fit(x.view(), y.view());
        let probe = [2.0, 16000.0, 8000.0, 4.0, 2400.0, 1000.0];
        assert_eq!(a.predict_one(&probe), b.predict_one(&probe));
    }

    #[test]
    fn training_score_is_high() {
        let (x, y) = toy_data();
        let model = CapacityModel::fit(x.view(), y.view());
        let r2 = model.score(x.view(), y.view());
        assert!(r2.is_finite());
        assert!(r2 > 0.5, "training R² unexpectedly low: {r2}");
    }

    #[test]
    fn save_load_round_trip() {
        let (x, y) = toy_data();
        let model = CapacityModel::fit(x.view(), y.view());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        model.save(&path).unwrap();

        let loaded = CapacityModel::load(&path).unwrap();
        let probe = [2.0, 32000.0, 24000.0, 8.0, 3000.0, 1000.0];
        assert_eq!(model.predict_one(&probe), loaded.predict_one(&probe));
        assert_eq!(loaded.trained_rows, 6);
        // A fresh fit has no held-out score yet; the blob must still load.
        assert!(loaded.held_out_r2.is_none());
    }

    #[test]
    fn save_replaces_existing_blob() {
        let (x, y) = toy_data();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        std::fs::write(&path, "{not a model}").unwrap();
        let model = CapacityModel::fit(x.view(), y.view());
        model.save(&path).unwrap();

        assert!(CapacityModel::load(&path).is_ok());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn constant_labels_score_perfect() {
        let x = array![
            [1.0, 1.0, 1.0, 1.0, 1.0, 1.0],
            [2.0, 2.0, 2.0, 2.0, 2.0, 2.0],
        ];
        let y = array![3.0, 3.0];
        let model = CapacityModel::fit(x.view(), y.view());
        assert_eq!(model.score(x.view(), y.view()), 1.0);
    }
}
