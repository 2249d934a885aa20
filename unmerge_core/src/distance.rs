//! Distances between traxels, used to re-attach transitions to split nodes.

use crate::error::FeatureError;
use crate::traxel::Traxel;

pub trait Distance {
    fn distance(&self, from: &Traxel, to: &Traxel) -> Result<f64, FeatureError>;
}

/// Euclidean distance between centers of mass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComDistance;

impl Distance for ComDistance {
    fn distance(&self, from: &Traxel, to: &Traxel) -> Result<f64, FeatureError> {
        let a = from.com()?;
        let b = to.com()?;
        if a.len() != b.len() {
            return Err(FeatureError::dimension(a.len(), b.len()));
        }
        Ok(a.iter()
            .zip(b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f64>()
            .sqrt())
    }
}
