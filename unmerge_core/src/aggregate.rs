//! Feature aggregation over a track.
//!
//! An aggregator reduces a sequence of feature vectors (one per timestep, or one
//! per consecutive pair after a calculator ran) to either a vector or a scalar.

use crate::error::TrackFeatureError;
use crate::outlier::{sequence_dims, MvnOutlierCalculator, OutlierCalculator};
use crate::traxel::FeatureArray;
use serde::{Deserialize, Serialize};

/// How the min/max/mean aggregators turn a sequence into a scalar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarReduction {
    /// Reduce over every component of every sample (min of all values, ...)
    #[default]
    Componentwise,
    /// Mean of the vector-valued result
    VectorMean,
}

/// Output of an aggregator, tagged with its name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedFeature {
    pub name: String,
    pub value: AggregatedValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AggregatedValue {
    Vector(FeatureArray),
    Scalar(f64),
}

pub trait FeatureAggregator {
    fn name(&self) -> &'static str;

    fn vector_valued(&self, features: &[FeatureArray]) -> Result<FeatureArray, TrackFeatureError>;

    fn scalar_valued(&self, features: &[FeatureArray]) -> Result<f64, TrackFeatureError>;

    fn aggregate_vector(
        &self,
        features: &[FeatureArray],
    ) -> Result<AggregatedFeature, TrackFeatureError> {
        Ok(AggregatedFeature {
            name: self.name().to_string(),
            value: AggregatedValue::Vector(self.vector_valued(features)?),
        })
    }

    fn aggregate_scalar(
        &self,
        features: &[FeatureArray],
    ) -> Result<AggregatedFeature, TrackFeatureError> {
        Ok(AggregatedFeature {
            name: self.name().to_string(),
            value: AggregatedValue::Scalar(self.scalar_valued(features)?),
        })
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Element-wise fold of all samples, starting from the first one.
fn fold_elementwise(
    features: &[FeatureArray],
    f: impl Fn(f64, f64) -> f64,
) -> Result<FeatureArray, TrackFeatureError> {
    sequence_dims(features)?;
    let mut acc = features[0].clone();
    for sample in &features[1..] {
        for (a, &x) in acc.iter_mut().zip(sample) {
            *a = f(*a, x);
        }
    }
    Ok(acc)
}

fn all_values(features: &[FeatureArray]) -> Result<impl Iterator<Item = f64> + '_, TrackFeatureError> {
    sequence_dims(features)?;
    Ok(features.iter().flatten().copied())
}

// ============================================================================
// AGGREGATORS
// ============================================================================

/// Sum of consecutive differences, i.e. last sample minus first.
#[derive(Debug, Clone, Copy, Default)]
pub struct TotalDiffAggregator;

impl FeatureAggregator for TotalDiffAggregator {
    fn name(&self) -> &'static str {
        "total_diff"
    }

    fn vector_valued(&self, features: &[FeatureArray]) -> Result<FeatureArray, TrackFeatureError> {
        sequence_dims(features)?;
        let mut total = vec![0.0; features[0].len()];
        for pair in features.windows(2) {
            for (t, (next, prev)) in total.iter_mut().zip(pair[1].iter().zip(&pair[0])) {
                *t += next - prev;
            }
        }
        Ok(total)
    }

    /// Euclidean norm of the total difference.
    fn scalar_valued(&self, features: &[FeatureArray]) -> Result<f64, TrackFeatureError> {
        let total = self.vector_valued(features)?;
        Ok(total.iter().map(|x| x * x).sum::<f64>().sqrt())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MinAggregator {
    pub reduction: ScalarReduction,
}

impl FeatureAggregator for MinAggregator {
    fn name(&self) -> &'static str {
        "min"
    }

    fn vector_valued(&self, features: &[FeatureArray]) -> Result<FeatureArray, TrackFeatureError> {
        fold_elementwise(features, f64::min)
    }

    fn scalar_valued(&self, features: &[FeatureArray]) -> Result<f64, TrackFeatureError> {
        match self.reduction {
            ScalarReduction::Componentwise => {
                Ok(all_values(features)?.fold(f64::INFINITY, f64::min))
            }
            ScalarReduction::VectorMean => Ok(mean(&self.vector_valued(features)?)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MaxAggregator {
    pub reduction: ScalarReduction,
}

impl FeatureAggregator for MaxAggregator {
    fn name(&self) -> &'static str {
        "max"
    }

    fn vector_valued(&self, features: &[FeatureArray]) -> Result<FeatureArray, TrackFeatureError> {
        fold_elementwise(features, f64::max)
    }

    fn scalar_valued(&self, features: &[FeatureArray]) -> Result<f64, TrackFeatureError> {
        match self.reduction {
            ScalarReduction::Componentwise => {
                Ok(all_values(features)?.fold(f64::NEG_INFINITY, f64::max))
            }
            ScalarReduction::VectorMean => Ok(mean(&self.vector_valued(features)?)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MeanAggregator {
    pub reduction: ScalarReduction,
}

impl FeatureAggregator for MeanAggregator {
    fn name(&self) -> &'static str {
        "mean"
    }

    fn vector_valued(&self, features: &[FeatureArray]) -> Result<FeatureArray, TrackFeatureError> {
        let mut sum = fold_elementwise(features, |a, x| a + x)?;
        let n = features.len() as f64;
        for s in &mut sum {
            *s /= n;
        }
        Ok(sum)
    }

    fn scalar_valued(&self, features: &[FeatureArray]) -> Result<f64, TrackFeatureError> {
        match self.reduction {
            ScalarReduction::Componentwise => {
                let values: Vec<f64> = all_values(features)?.collect();
                Ok(mean(&values))
            }
            ScalarReduction::VectorMean => Ok(mean(&self.vector_valued(features)?)),
        }
    }
}

/// MVN outlier measures of every sample; the scalar is their mean.
///
/// A fresh detector is fitted per call, so the aggregator itself stays immutable.
#[derive(Debug, Clone, Copy)]
pub struct OutlierBadnessAggregator {
    pub sigma_threshold: f64,
}

impl Default for OutlierBadnessAggregator {
    fn default() -> Self {
        Self {
            sigma_threshold: 3.0,
        }
    }
}

impl FeatureAggregator for OutlierBadnessAggregator {
    fn name(&self) -> &'static str {
        "outlier_badness"
    }

    fn vector_valued(&self, features: &[FeatureArray]) -> Result<FeatureArray, TrackFeatureError> {
        let mut mvn = MvnOutlierCalculator::new(self.sigma_threshold);
        mvn.calculate(features)?;
        Ok(mvn.measures().to_vec())
    }

    fn scalar_valued(&self, features: &[FeatureArray]) -> Result<f64, TrackFeatureError> {
        Ok(mean(&self.vector_valued(features)?))
    }
}
