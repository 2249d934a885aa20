//! Outlier detection over a track's feature sequence.
//!
//! The multivariate normal detector fits mean and sample covariance to all samples
//! of a sequence and flags every sample whose Mahalanobis distance exceeds a sigma
//! threshold. The distances themselves are kept as measures, so callers can use
//! them as a continuous "badness" score.

use crate::error::{FeatureError, TrackFeatureError};
use crate::traxel::FeatureArray;
use nalgebra::{DMatrix, DVector};
use tracing::debug;

/// Relative tolerance on singular values for the covariance rank test.
const RANK_TOLERANCE: f64 = 1e-10;

pub trait OutlierCalculator {
    fn name(&self) -> &'static str;

    /// Indices of the samples considered outliers, in ascending order.
    fn calculate(&mut self, features: &[FeatureArray]) -> Result<&[usize], TrackFeatureError>;

    /// Per-sample measure from the last successful `calculate`.
    fn measures(&self) -> &[f64];
}

/// Common length of all samples. Fails on empty, zero-length or ragged input.
pub fn sequence_dims(features: &[FeatureArray]) -> Result<usize, TrackFeatureError> {
    let first = features.first().ok_or(TrackFeatureError::EmptyInput)?;
    let dims = first.len();
    if dims == 0 {
        return Err(FeatureError::dimension(1, 0).into());
    }
    if let Some(bad) = features.iter().find(|f| f.len() != dims) {
        return Err(FeatureError::dimension(dims, bad.len()).into());
    }
    Ok(dims)
}

/// Multivariate normal outlier detection.
#[derive(Debug, Clone)]
pub struct MvnOutlierCalculator {
    sigma_threshold: f64,
    mean: DVector<f64>,
    covariance: DMatrix<f64>,
    inverse_covariance: DMatrix<f64>,
    measures: Vec<f64>,
    outliers: Vec<usize>,
}

impl Default for MvnOutlierCalculator {
    fn default() -> Self {
        Self::new(3.0)
    }
}

impl MvnOutlierCalculator {
    pub fn new(sigma_threshold: f64) -> Self {
        Self {
            sigma_threshold,
            mean: DVector::zeros(0),
            covariance: DMatrix::zeros(0, 0),
            inverse_covariance: DMatrix::zeros(0, 0),
            measures: Vec::new(),
            outliers: Vec::new(),
        }
    }

    pub fn sigma_threshold(&self) -> f64 {
        self.sigma_threshold
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    pub fn inverse_covariance(&self) -> &DMatrix<f64> {
        &self.inverse_covariance
    }
}

impl OutlierCalculator for MvnOutlierCalculator {
    fn name(&self) -> &'static str {
        "mvn_outlier"
    }

    fn calculate(&mut self, features: &[FeatureArray]) -> Result<&[usize], TrackFeatureError> {
        let dims = sequence_dims(features)?;
        let n = features.len();
        if n < dims + 1 {
            return Err(TrackFeatureError::SingularCovariance);
        }

        // One sample per column.
        let samples = DMatrix::from_fn(dims, n, |r, c| features[c][r]);
        let mean = samples.column_mean();

        let mut centered = samples;
        for mut column in centered.column_iter_mut() {
            column -= &mean;
        }
        let covariance = &centered * centered.transpose() / (n - 1) as f64;

        let eps = RANK_TOLERANCE * covariance.amax();
        if covariance.rank(eps) < dims {
            return Err(TrackFeatureError::SingularCovariance);
        }
        let inverse = covariance
            .clone()
            .try_inverse()
            .ok_or(TrackFeatureError::SingularCovariance)?;

        let measures: Vec<f64> = centered
            .column_iter()
            .map(|delta| {
                // d² = δᵀ Σ⁻¹ δ
                let d_squared = (delta.transpose() * &inverse * delta)[(0, 0)];
                d_squared.max(0.0).sqrt()
            })
            .collect();

        let outliers: Vec<usize> = measures
            .iter()
            .enumerate()
            .filter(|&(_, &d)| d > self.sigma_threshold)
            .map(|(i, _)| i)
            .collect();

        debug!(
            samples = n,
            dims,
            outliers = outliers.len(),
            "MVN outlier detection"
        );

        self.mean = mean;
        self.covariance = covariance;
        self.inverse_covariance = inverse;
        self.measures = measures;
        self.outliers = outliers;
        Ok(self.outliers.as_slice())
    }

    fn measures(&self) -> &[f64] {
        &self.measures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tight_grid_with_far_point() -> Vec<FeatureArray> {
        let mut samples: Vec<FeatureArray> = (0..6)
            .flat_map(|i| (0..5).map(move |j| vec![i as f64 * 0.1, j as f64 * 0.1]))
            .collect();
        samples.push(vec![100.0, 100.0]);
        samples
    }

    #[test]
    fn test_far_point_is_flagged() {
        let mut mvn = MvnOutlierCalculator::default();
        let samples = tight_grid_with_far_point();

        let outliers = mvn.calculate(&samples).unwrap().to_vec();
        assert_eq!(outliers, vec![30]);

        let measures = mvn.measures();
        assert_eq!(measures.len(), 31);
        assert!(measures[30] > 5.0);
        assert!(measures[..30].iter().all(|&d| d < 3.0));
    }

    #[test]
    fn test_mean_and_sample_covariance() {
        let samples = vec![
            vec![1.0, 2.0],
            vec![2.0, 3.0],
            vec![4.0, 2.0],
            vec![3.0, 5.0],
        ];
        let mut mvn = MvnOutlierCalculator::default();
        mvn.calculate(&samples).unwrap();

        assert_relative_eq!(mvn.mean()[0], 2.5);
        assert_relative_eq!(mvn.mean()[1], 3.0);
        // N - 1 normalization.
        assert_relative_eq!(mvn.covariance()[(0, 0)], 5.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(mvn.covariance()[(1, 1)], 2.0, epsilon = 1e-12);
        assert_relative_eq!(mvn.covariance()[(0, 1)], 1.0 / 3.0, epsilon = 1e-12);

        let identity = mvn.covariance() * mvn.inverse_covariance();
        assert_relative_eq!(identity[(0, 0)], 1.0, epsilon = 1e-9);
        assert_relative_eq!(identity[(0, 1)], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_too_few_samples_is_singular() {
        let mut mvn = MvnOutlierCalculator::default();
        let samples = vec![vec![0.0, 1.0, 2.0], vec![1.0, 0.0, 4.0]];
        assert_eq!(
            mvn.calculate(&samples),
            Err(TrackFeatureError::SingularCovariance)
        );
    }

    #[test]
    fn test_identical_samples_are_singular() {
        let mut mvn = MvnOutlierCalculator::default();
        let samples = vec![vec![1.0, 1.0]; 10];
        assert_eq!(
            mvn.calculate(&samples),
            Err(TrackFeatureError::SingularCovariance)
        );
    }

    #[test]
    fn test_collinear_samples_are_singular() {
        let mut mvn = MvnOutlierCalculator::default();
        let samples: Vec<FeatureArray> = (0..8).map(|i| vec![i as f64, 2.0 * i as f64]).collect();
        assert_eq!(
            mvn.calculate(&samples),
            Err(TrackFeatureError::SingularCovariance)
        );
    }

    #[test]
    fn test_empty_and_ragged_input() {
        let mut mvn = MvnOutlierCalculator::default();
        assert_eq!(mvn.calculate(&[]), Err(TrackFeatureError::EmptyInput));
        assert_eq!(
            mvn.calculate(&[vec![1.0, 2.0], vec![1.0]]),
            Err(TrackFeatureError::Feature(FeatureError::dimension(2, 1)))
        );
    }

    #[test]
    fn test_zero_length_samples_are_rejected() {
        let mut mvn = MvnOutlierCalculator::default();
        assert_eq!(
            mvn.calculate(&[vec![], vec![]]),
            Err(TrackFeatureError::Feature(FeatureError::dimension(1, 0)))
        );
        assert!(mvn.measures().is_empty());
    }
}
