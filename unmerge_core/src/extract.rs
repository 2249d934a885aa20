//! Feature extraction for merger nodes.
//!
//! Each extractor turns one merged traxel into `n_mergers` new traxels with their
//! own center of mass. The variants differ only in where the per-object
//! coordinates come from:
//! - `PossibleComsExtractor`: candidate centers precomputed for every merger count
//! - `MergerComsExtractor`: centers precomputed for the tracker's chosen count
//! - `ClusterExtractor`: clustering of the raw coordinate list

use crate::cluster::{ClusterEstimator, KMeans, KMeansConfig};
use crate::error::FeatureError;
use crate::traxel::{keys, Traxel};

/// Split a merged traxel into `n_mergers` traxels.
pub trait FeatureExtractor {
    /// New traxels get ids `max_id + 1 ..= max_id + n_mergers` and the merged
    /// traxel's timestep. The input is never modified.
    fn extract(&self, merged: &Traxel, n_mergers: usize, max_id: u32)
        -> Result<Vec<Traxel>, FeatureError>;
}

/// Build one traxel per center from `dims`-sized chunks of `centers`.
fn traxels_from_centers(
    merged: &Traxel,
    centers: &[f64],
    dims: usize,
    max_id: u32,
) -> Result<Vec<Traxel>, FeatureError> {
    if dims == 0 {
        return Err(FeatureError::dimension(1, 0));
    }
    Ok(centers
        .chunks(dims)
        .zip(1u32..)
        .map(|(com, offset)| {
            Traxel::new(max_id + offset, merged.timestep).with_feature(keys::COM, com.to_vec())
        })
        .collect())
}

fn slice_centers<'a>(
    values: &'a [f64],
    start: usize,
    end: usize,
) -> Result<&'a [f64], FeatureError> {
    values
        .get(start..end)
        .ok_or_else(|| FeatureError::dimension(end, values.len()))
}

// ============================================================================
// PRECOMPUTED CANDIDATES
// ============================================================================

/// Slice the centers for `n_mergers` out of `possibleCOMs`.
///
/// `possibleCOMs` holds the candidates for count 1, then count 2, and so on, so
/// the block for count `n` starts after `1 + 2 + ... + (n - 1)` centers.
#[derive(Debug, Clone)]
pub struct PossibleComsExtractor {
    pub dims: usize,
}

impl Default for PossibleComsExtractor {
    fn default() -> Self {
        Self { dims: 3 }
    }
}

impl FeatureExtractor for PossibleComsExtractor {
    fn extract(
        &self,
        merged: &Traxel,
        n_mergers: usize,
        max_id: u32,
    ) -> Result<Vec<Traxel>, FeatureError> {
        let possible = merged.require_feature(keys::POSSIBLE_COMS)?;
        let start = self.dims * n_mergers * n_mergers.saturating_sub(1) / 2;
        let end = self.dims * n_mergers * (n_mergers + 1) / 2;
        let centers = slice_centers(possible, start, end)?;
        traxels_from_centers(merged, centers, self.dims, max_id)
    }
}

/// Take the first `n_mergers` centers from `mergerCOMs`.
#[derive(Debug, Clone)]
pub struct MergerComsExtractor {
    pub dims: usize,
}

impl Default for MergerComsExtractor {
    fn default() -> Self {
        Self { dims: 3 }
    }
}

impl FeatureExtractor for MergerComsExtractor {
    fn extract(
        &self,
        merged: &Traxel,
        n_mergers: usize,
        max_id: u32,
    ) -> Result<Vec<Traxel>, FeatureError> {
        let merger_coms = merged.require_feature(keys::MERGER_COMS)?;
        let centers = slice_centers(merger_coms, 0, self.dims * n_mergers)?;
        traxels_from_centers(merged, centers, self.dims, max_id)
    }
}

// ============================================================================
// CLUSTERING
// ============================================================================

/// Cluster the raw coordinate list into `n_mergers` centers.
#[derive(Debug, Clone)]
pub struct ClusterExtractor<C: ClusterEstimator = KMeans> {
    estimator: C,
}

impl<C: ClusterEstimator> ClusterExtractor<C> {
    pub fn new(estimator: C) -> Self {
        Self { estimator }
    }
}

impl ClusterExtractor<KMeans> {
    /// k-means adapter over `dims`-dimensional coordinates.
    pub fn kmeans(dims: usize, config: KMeansConfig) -> Self {
        Self::new(KMeans::new(dims, config))
    }
}

impl<C: ClusterEstimator> FeatureExtractor for ClusterExtractor<C> {
    fn extract(
        &self,
        merged: &Traxel,
        n_mergers: usize,
        max_id: u32,
    ) -> Result<Vec<Traxel>, FeatureError> {
        if n_mergers == 0 {
            return Ok(Vec::new());
        }
        let coordinates = merged.require_feature(keys::COORD_LIST)?;
        let centers = self.estimator.estimate(n_mergers, coordinates)?;
        traxels_from_centers(merged, &centers, self.estimator.dims(), max_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merged() -> Traxel {
        // Candidates for count 1 (one center), count 2 (two), count 3 (three).
        let possible = vec![
            5.0, 5.0, 5.0, //
            1.0, 1.0, 1.0, 9.0, 9.0, 9.0, //
            1.0, 0.0, 0.0, 5.0, 0.0, 0.0, 9.0, 0.0, 0.0,
        ];
        Traxel::new(4, 2)
            .with_feature(keys::COM, vec![5.0, 5.0, 5.0])
            .with_feature(keys::POSSIBLE_COMS, possible)
            .with_feature(keys::MERGER_COMS, vec![2.0, 2.0, 2.0, 8.0, 8.0, 8.0])
    }

    #[test]
    fn test_possible_coms_triangular_offset() {
        let trax = merged();
        let children = PossibleComsExtractor::default().extract(&trax, 2, 10).unwrap();

        assert_eq!(children.len(), 2);
        assert_eq!(children[0].id, 11);
        assert_eq!(children[1].id, 12);
        assert_eq!(children[0].timestep, 2);
        assert_eq!(children[0].com().unwrap(), &[1.0, 1.0, 1.0]);
        assert_eq!(children[1].com().unwrap(), &[9.0, 9.0, 9.0]);

        let three = PossibleComsExtractor::default().extract(&trax, 3, 10).unwrap();
        assert_eq!(three[2].com().unwrap(), &[9.0, 0.0, 0.0]);

        // Input untouched.
        assert_eq!(trax, merged());
    }

    #[test]
    fn test_possible_coms_too_short() {
        assert_eq!(
            PossibleComsExtractor::default().extract(&merged(), 4, 0),
            Err(FeatureError::dimension(30, 18))
        );
    }

    #[test]
    fn test_merger_coms() {
        let children = MergerComsExtractor::default().extract(&merged(), 2, 0).unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[1].com().unwrap(), &[8.0, 8.0, 8.0]);
    }

    #[test]
    fn test_missing_features() {
        let bare = Traxel::new(1, 0);
        assert_eq!(
            PossibleComsExtractor::default().extract(&bare, 2, 0),
            Err(FeatureError::missing(keys::POSSIBLE_COMS))
        );
        assert_eq!(
            MergerComsExtractor::default().extract(&bare, 2, 0),
            Err(FeatureError::missing(keys::MERGER_COMS))
        );
        assert_eq!(
            ClusterExtractor::kmeans(3, KMeansConfig::default()).extract(&bare, 2, 0),
            Err(FeatureError::missing(keys::COORD_LIST))
        );
    }

    #[test]
    fn test_cluster_extractor_splits_coordinate_list() {
        let coords = vec![
            0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, //
            20.0, 0.0, 0.0, 20.0, 1.0, 0.0, 21.0, 0.0, 0.0,
        ];
        let trax = Traxel::new(7, 3).with_feature(keys::COORD_LIST, coords);
        let children = ClusterExtractor::kmeans(3, KMeansConfig::default())
            .extract(&trax, 2, 7)
            .unwrap();

        assert_eq!(children.len(), 2);
        assert_eq!(children.iter().map(|c| c.id).collect::<Vec<_>>(), vec![8, 9]);

        let mut xs: Vec<f64> = children.iter().map(|c| c.com().unwrap()[0]).collect();
        xs.sort_by(f64::total_cmp);
        assert!((xs[0] - 1.0 / 3.0).abs() < 1e-9);
        assert!((xs[1] - 61.0 / 3.0).abs() < 1e-9);
    }
}
