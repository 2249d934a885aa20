//! Traxels: timestamped object measurements with named feature arrays.

use crate::error::FeatureError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single numeric feature (ordered sequence of values).
pub type FeatureArray = Vec<f64>;

/// A sequence of features, e.g. one per timestep along a track.
pub type FeatureArrays = Vec<FeatureArray>;

/// Well-known feature keys.
pub mod keys {
    /// Center of mass of the object
    pub const COM: &str = "com";

    /// Candidate centers for every merger count 1, 2, ..., concatenated
    pub const POSSIBLE_COMS: &str = "possibleCOMs";

    /// Centers for the merger count chosen by the tracker
    pub const MERGER_COMS: &str = "mergerCOMs";

    /// Flat list of all pixel/voxel coordinates of the object
    pub const COORD_LIST: &str = "Coord<ValueList>";
}

/// Object measurement at one timestep.
///
/// Identity is the pair `(id, timestep)`; ids are only unique within a timestep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Traxel {
    pub id: u32,
    pub timestep: i32,
    pub features: BTreeMap<String, FeatureArray>,
}

impl Traxel {
    /// Create a traxel without features.
    pub fn new(id: u32, timestep: i32) -> Self {
        Self {
            id,
            timestep,
            features: BTreeMap::new(),
        }
    }

    /// Builder-style feature insertion.
    pub fn with_feature(mut self, name: impl Into<String>, values: FeatureArray) -> Self {
        self.features.insert(name.into(), values);
        self
    }

    pub fn set_feature(&mut self, name: impl Into<String>, values: FeatureArray) {
        self.features.insert(name.into(), values);
    }

    pub fn feature(&self, name: &str) -> Option<&[f64]> {
        self.features.get(name).map(Vec::as_slice)
    }

    /// Get a feature, failing with `MissingFeature` if absent.
    pub fn require_feature(&self, name: &str) -> Result<&[f64], FeatureError> {
        self.feature(name).ok_or_else(|| FeatureError::missing(name))
    }

    /// Center of mass.
    #[inline]
    pub fn com(&self) -> Result<&[f64], FeatureError> {
        self.require_feature(keys::COM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_feature() {
        let trax = Traxel::new(3, 7).with_feature(keys::COM, vec![1.0, 2.0, 3.0]);

        assert_eq!(trax.com().unwrap(), &[1.0, 2.0, 3.0]);
        assert_eq!(
            trax.require_feature(keys::COORD_LIST),
            Err(FeatureError::MissingFeature(keys::COORD_LIST.to_string()))
        );
    }

    #[test]
    fn test_traxel_json_roundtrip_keeps_identity() {
        let trax = Traxel::new(12, -1).with_feature(keys::MERGER_COMS, vec![0.5; 6]);
        let json = serde_json::to_string(&trax).unwrap();
        let back: Traxel = serde_json::from_str(&json).unwrap();

        assert_eq!(back, trax);
    }
}
