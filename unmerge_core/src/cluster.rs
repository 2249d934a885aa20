//! Cluster center estimation for merged objects.
//!
//! A merged object's raw coordinate list is clustered into `k` partitions, one per
//! constituent object. Centers are always recomputed from the label assignment
//! rather than taken from the clustering loop, so any partition primitive that only
//! yields labels fits behind the same contract.

use crate::error::FeatureError;
use crate::traxel::FeatureArray;
use nalgebra::{DMatrix, DVector};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Estimate `k` centers from a flat coordinate list.
pub trait ClusterEstimator {
    /// Dimensionality of one point in the flat list.
    fn dims(&self) -> usize;

    /// Returns `k * dims()` values: the centers, one after another.
    fn estimate(&self, k: usize, flat: &[f64]) -> Result<FeatureArray, FeatureError>;
}

/// Configuration for k-means clustering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeansConfig {
    /// Upper bound on Lloyd iterations (default: 100)
    pub max_iterations: usize,

    /// Seed for k-means++ initialization (default: 42)
    pub seed: u64,

    /// Squared center shift below which iteration stops (default: 1e-12)
    pub tolerance: f64,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            seed: 42,
            tolerance: 1e-12,
        }
    }
}

/// k-means with deterministic k-means++ seeding.
#[derive(Debug, Clone)]
pub struct KMeans {
    dims: usize,
    config: KMeansConfig,
}

impl KMeans {
    pub fn new(dims: usize, config: KMeansConfig) -> Self {
        Self { dims, config }
    }

    pub fn with_defaults(dims: usize) -> Self {
        Self::new(dims, KMeansConfig::default())
    }

    /// k-means++ seeding: first center uniform, later ones proportional to the
    /// squared distance to the closest chosen center.
    fn seed_centers(&self, data: &DMatrix<f64>, k: usize, rng: &mut ChaCha8Rng) -> DMatrix<f64> {
        let n = data.ncols();
        let mut centers = DMatrix::<f64>::zeros(data.nrows(), k);
        let mut nearest = vec![f64::INFINITY; n];

        let mut chosen = rng.gen_range(0..n);
        for c in 0..k {
            centers.set_column(c, &data.column(chosen));
            for (i, d) in nearest.iter_mut().enumerate() {
                *d = d.min((data.column(i) - data.column(chosen)).norm_squared());
            }
            if c + 1 == k {
                break;
            }

            let total: f64 = nearest.iter().sum();
            let mut target = rng.gen::<f64>() * total;
            // Points at distance zero are never picked, so centers stay distinct.
            chosen = nearest
                .iter()
                .enumerate()
                .filter(|&(_, &d)| d > 0.0)
                .find(|&(_, &d)| {
                    target -= d;
                    target <= 0.0
                })
                .or_else(|| nearest.iter().enumerate().filter(|&(_, &d)| d > 0.0).last())
                .map(|(i, _)| i)
                .unwrap_or(chosen);
        }
        centers
    }

    /// Lloyd iterations; returns the final label per point.
    fn lloyd(&self, data: &DMatrix<f64>, mut centers: DMatrix<f64>) -> Vec<usize> {
        let n = data.ncols();
        let k = centers.ncols();
        let mut labels = vec![0usize; n];

        for iteration in 0..self.config.max_iterations.max(1) {
            for (i, label) in labels.iter_mut().enumerate() {
                *label = nearest_center(&centers, &data.column(i).into_owned());
            }

            let mut sums = DMatrix::<f64>::zeros(data.nrows(), k);
            let mut counts = vec![0usize; k];
            for (i, &label) in labels.iter().enumerate() {
                let updated = sums.column(label) + data.column(i);
                sums.set_column(label, &updated);
                counts[label] += 1;
            }

            let mut shift: f64 = 0.0;
            for c in 0..k {
                // Empty partitions keep their previous center.
                if counts[c] == 0 {
                    continue;
                }
                let mean = sums.column(c) / counts[c] as f64;
                shift = shift.max((&mean - centers.column(c)).norm_squared());
                centers.set_column(c, &mean);
            }

            if shift <= self.config.tolerance {
                debug!(iteration, "k-means converged");
                break;
            }
        }

        labels
    }
}

impl ClusterEstimator for KMeans {
    fn dims(&self) -> usize {
        self.dims
    }

    fn estimate(&self, k: usize, flat: &[f64]) -> Result<FeatureArray, FeatureError> {
        if self.dims == 0 {
            return Err(FeatureError::dimension(1, 0));
        }
        let data = flat_to_matrix(flat, self.dims, flat.len() / self.dims)?;

        let points = distinct_points(&data);
        if k == 0 || points < k {
            return Err(FeatureError::TooFewPoints { k, points });
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let initial = self.seed_centers(&data, k, &mut rng);
        let labels = self.lloyd(&data, initial);
        let centers = centers_from_labels(&data, &labels, k)?;

        Ok(centers.as_slice().to_vec())
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Reshape a flat array into a `rows x cols` matrix, one point per column.
pub fn flat_to_matrix(flat: &[f64], rows: usize, cols: usize) -> Result<DMatrix<f64>, FeatureError> {
    if rows * cols != flat.len() {
        return Err(FeatureError::dimension(rows * cols, flat.len()));
    }
    Ok(DMatrix::from_column_slice(rows, cols, flat))
}

/// Mean of the points assigned to each of the `k` labels.
pub fn centers_from_labels(
    data: &DMatrix<f64>,
    labels: &[usize],
    k: usize,
) -> Result<DMatrix<f64>, FeatureError> {
    if labels.len() != data.ncols() {
        return Err(FeatureError::dimension(data.ncols(), labels.len()));
    }

    let mut centers = DMatrix::<f64>::zeros(data.nrows(), k);
    let mut sizes = vec![0usize; k];
    for (i, &label) in labels.iter().enumerate() {
        if label >= k {
            return Err(FeatureError::dimension(k, label + 1));
        }
        let updated = centers.column(label) + data.column(i);
        centers.set_column(label, &updated);
        sizes[label] += 1;
    }

    for (c, &size) in sizes.iter().enumerate() {
        if size == 0 {
            return Err(FeatureError::EmptyCluster(c));
        }
        let mean = centers.column(c) / size as f64;
        centers.set_column(c, &mean);
    }
    Ok(centers)
}

fn nearest_center(centers: &DMatrix<f64>, point: &DVector<f64>) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for c in 0..centers.ncols() {
        let d = (centers.column(c) - point).norm_squared();
        if d < best_distance {
            best_distance = d;
            best = c;
        }
    }
    best
}

/// Number of distinct columns. `-0.0` and `0.0` count as the same coordinate.
fn distinct_points(data: &DMatrix<f64>) -> usize {
    let seen: HashSet<Vec<u64>> = data
        .column_iter()
        .map(|column| column.iter().map(|&x| (x + 0.0).to_bits()).collect())
        .collect();
    seen.len()
}
