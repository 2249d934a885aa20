//! Pairwise feature calculators.
//!
//! A calculator combines the features of two consecutive objects on a track into
//! one derived feature. Running one over a track gives the sequences the
//! aggregators consume.

use crate::error::FeatureError;
use crate::traxel::{FeatureArray, FeatureArrays};

pub trait FeatureCalculator {
    fn name(&self) -> &'static str;

    fn calculate(&self, a: &[f64], b: &[f64]) -> Result<FeatureArray, FeatureError>;
}

fn check_lengths(a: &[f64], b: &[f64]) -> Result<(), FeatureError> {
    if a.len() != b.len() {
        return Err(FeatureError::dimension(a.len(), b.len()));
    }
    Ok(())
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Returns the first feature unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl FeatureCalculator for Identity {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn calculate(&self, a: &[f64], _b: &[f64]) -> Result<FeatureArray, FeatureError> {
        Ok(a.to_vec())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AbsoluteDifference;

impl FeatureCalculator for AbsoluteDifference {
    fn name(&self) -> &'static str {
        "abs_diff"
    }

    fn calculate(&self, a: &[f64], b: &[f64]) -> Result<FeatureArray, FeatureError> {
        check_lengths(a, b)?;
        Ok(a.iter().zip(b).map(|(x, y)| (x - y).abs()).collect())
    }
}

/// Sum of squared differences, as a one-element feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct SquaredDifference;

impl FeatureCalculator for SquaredDifference {
    fn name(&self) -> &'static str {
        "sq_diff"
    }

    fn calculate(&self, a: &[f64], b: &[f64]) -> Result<FeatureArray, FeatureError> {
        check_lengths(a, b)?;
        Ok(vec![squared_distance(a, b)])
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ElementwiseSquaredDifference;

impl FeatureCalculator for ElementwiseSquaredDifference {
    fn name(&self) -> &'static str {
        "element_wise_sq_diff"
    }

    fn calculate(&self, a: &[f64], b: &[f64]) -> Result<FeatureArray, FeatureError> {
        check_lengths(a, b)?;
        Ok(a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).collect())
    }
}

/// Euclidean distance, as a one-element feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct SquareRootSquaredDifference;

impl FeatureCalculator for SquareRootSquaredDifference {
    fn name(&self) -> &'static str {
        "sqrt_sq_diff"
    }

    fn calculate(&self, a: &[f64], b: &[f64]) -> Result<FeatureArray, FeatureError> {
        check_lengths(a, b)?;
        Ok(vec![squared_distance(a, b).sqrt()])
    }
}

/// Element-wise `min / max`, so every component lies in `[0, 1]` for
/// non-negative inputs. Two zeros count as a perfect match; a zero maximum over a
/// negative minimum is a `DivisionByZero`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ratio;

impl FeatureCalculator for Ratio {
    fn name(&self) -> &'static str {
        "ratio"
    }

    fn calculate(&self, a: &[f64], b: &[f64]) -> Result<FeatureArray, FeatureError> {
        check_lengths(a, b)?;
        a.iter()
            .zip(b)
            .enumerate()
            .map(|(i, (&x, &y))| {
                let (lo, hi) = if x <= y { (x, y) } else { (y, x) };
                match (lo == 0.0, hi == 0.0) {
                    (true, true) => Ok(1.0),
                    (false, true) => Err(FeatureError::DivisionByZero(i)),
                    _ => Ok(lo / hi),
                }
            })
            .collect()
    }
}

/// Element-wise `a / b`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AsymmetricRatio;

impl FeatureCalculator for AsymmetricRatio {
    fn name(&self) -> &'static str {
        "asym_ratio"
    }

    fn calculate(&self, a: &[f64], b: &[f64]) -> Result<FeatureArray, FeatureError> {
        check_lengths(a, b)?;
        a.iter()
            .zip(b)
            .enumerate()
            .map(|(i, (&x, &y))| {
                if y == 0.0 {
                    Err(FeatureError::DivisionByZero(i))
                } else {
                    Ok(x / y)
                }
            })
            .collect()
    }
}

/// Apply `calculator` to every pair of consecutive samples.
///
/// A sequence of `n` samples yields `n - 1` results; fewer than two samples yield
/// none.
pub fn pairwise_series(
    features: &[FeatureArray],
    calculator: &dyn FeatureCalculator,
) -> Result<FeatureArrays, FeatureError> {
    features
        .windows(2)
        .map(|pair| calculator.calculate(&pair[0], &pair[1]))
        .collect()
}
