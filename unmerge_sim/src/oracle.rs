//! Ground truth oracle for simulation.
//!
//! The Oracle knows where every object really is. Each frame it produces the
//! detections a segmentation would: objects closer than the merge radius end up in
//! one detection, with the measurements a tracker would attach to it:
//! - `com`: centroid of all voxel samples
//! - `Coord<ValueList>`: the voxel samples themselves
//! - `possibleCOMs`: k-means centers for every count up to the true one
//! - `mergerCOMs`: noisy true positions of the members

use crate::error::SimError;
use nalgebra::Vector3;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use unmerge_core::{keys, ClusterEstimator, KMeans, KMeansConfig, Traxel};

/// A ground truth object in the simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruthObject {
    pub id: u32,

    /// Position [x, y, z]
    pub position: Vector3<f64>,

    /// Velocity per time unit
    pub velocity: Vector3<f64>,
}

/// One segmented blob, possibly covering several objects.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Ground truth ids of the objects inside, ascending
    pub members: Vec<u32>,
    pub com: Vector3<f64>,
    pub coords: Vec<f64>,
    pub possible_coms: Vec<f64>,
    pub merger_coms: Vec<f64>,
}

impl Detection {
    pub fn count(&self) -> usize {
        self.members.len()
    }

    pub fn shares_member(&self, other: &Detection) -> bool {
        self.members.iter().any(|m| other.members.contains(m))
    }

    /// Traxel carrying all measurements of this detection.
    pub fn to_traxel(&self, id: u32, timestep: i32) -> Traxel {
        Traxel::new(id, timestep)
            .with_feature(keys::COM, self.com.iter().copied().collect())
            .with_feature(keys::COORD_LIST, self.coords.clone())
            .with_feature(keys::POSSIBLE_COMS, self.possible_coms.clone())
            .with_feature(keys::MERGER_COMS, self.merger_coms.clone())
    }
}

/// The Oracle - maintains ground truth and generates detections.
pub struct Oracle {
    rng: ChaCha8Rng,
    objects: Vec<GroundTruthObject>,
    next_id: u32,

    /// Standard deviation of position measurements
    position_noise_std: f64,

    /// Standard deviation of voxel samples around an object's center
    object_spread: f64,

    /// Voxel samples per object
    points_per_object: usize,

    kmeans: KMeansConfig,
}

impl Oracle {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            objects: Vec::new(),
            next_id: 1,
            position_noise_std: 0.2,
            object_spread: 0.8,
            points_per_object: 24,
            kmeans: KMeansConfig {
                seed,
                ..KMeansConfig::default()
            },
        }
    }

    pub fn spawn_object(&mut self, position: Vector3<f64>, velocity: Vector3<f64>) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.objects.push(GroundTruthObject {
            id,
            position,
            velocity,
        });
        id
    }

    /// Constant-velocity motion.
    pub fn step(&mut self, dt: f64) {
        for object in &mut self.objects {
            object.position += object.velocity * dt;
        }
    }

    pub fn objects(&self) -> &[GroundTruthObject] {
        &self.objects
    }

    /// Ids and positions of all objects.
    pub fn ground_truth_positions(&self) -> Vec<(u32, Vector3<f64>)> {
        self.objects.iter().map(|o| (o.id, o.position)).collect()
    }

    /// Segment the current frame. Objects within `merge_radius` of each other,
    /// directly or through a chain, form one detection.
    pub fn detect(&mut self, merge_radius: f64) -> Result<Vec<Detection>, SimError> {
        let groups = proximity_groups(&self.objects, merge_radius);
        let spread = Normal::new(0.0, self.object_spread)?;
        let noise = Normal::new(0.0, self.position_noise_std)?;

        let mut detections = Vec::with_capacity(groups.len());
        for group in groups {
            let mut coords = Vec::with_capacity(group.len() * self.points_per_object * 3);
            let mut merger_coms = Vec::with_capacity(group.len() * 3);
            for &index in &group {
                let center = self.objects[index].position;
                for _ in 0..self.points_per_object {
                    for axis in 0..3 {
                        coords.push(center[axis] + spread.sample(&mut self.rng));
                    }
                }
                for axis in 0..3 {
                    merger_coms.push(center[axis] + noise.sample(&mut self.rng));
                }
            }

            let points = coords.len() / 3;
            let mut com = Vector3::zeros();
            for point in coords.chunks(3) {
                com += Vector3::new(point[0], point[1], point[2]);
            }
            com /= points as f64;

            let kmeans = KMeans::new(3, self.kmeans.clone());
            let mut possible_coms = Vec::new();
            for k in 1..=group.len() {
                possible_coms.extend(kmeans.estimate(k, &coords)?);
            }

            let mut members: Vec<u32> = group.iter().map(|&i| self.objects[i].id).collect();
            members.sort_unstable();

            detections.push(Detection {
                members,
                com,
                coords,
                possible_coms,
                merger_coms,
            });
        }
        Ok(detections)
    }
}

/// Single-linkage grouping of object indices, ordered by their first index.
fn proximity_groups(objects: &[GroundTruthObject], radius: f64) -> Vec<Vec<usize>> {
    let n = objects.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn root(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..n {
        for j in (i + 1)..n {
            if (objects[i].position - objects[j].position).norm() < radius {
                let (a, b) = (root(&mut parent, i), root(&mut parent, j));
                if a != b {
                    parent[a.max(b)] = a.min(b);
                }
            }
        }
    }

    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut group_of_root: Vec<Option<usize>> = vec![None; n];
    for i in 0..n {
        let r = root(&mut parent, i);
        match group_of_root[r] {
            Some(g) => groups[g].push(i),
            None => {
                group_of_root[r] = Some(groups.len());
                groups.push(vec![i]);
            }
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_objects_merge() {
        let mut oracle = Oracle::new(7);
        oracle.spawn_object(Vector3::new(0.0, 0.0, 0.0), Vector3::zeros());
        oracle.spawn_object(Vector3::new(1.0, 0.0, 0.0), Vector3::zeros());
        oracle.spawn_object(Vector3::new(30.0, 0.0, 0.0), Vector3::zeros());

        let detections = oracle.detect(3.0).unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].members, vec![1, 2]);
        assert_eq!(detections[1].members, vec![3]);

        let merger = &detections[0];
        assert_eq!(merger.coords.len(), 2 * 24 * 3);
        // Candidates for count 1 and 2.
        assert_eq!(merger.possible_coms.len(), 3 * 3);
        assert_eq!(merger.merger_coms.len(), 2 * 3);
        assert!((merger.com.x - 0.5).abs() < 0.5);
    }

    #[test]
    fn test_chained_objects_form_one_group() {
        let mut oracle = Oracle::new(1);
        for x in [0.0, 2.0, 4.0] {
            oracle.spawn_object(Vector3::new(x, 0.0, 0.0), Vector3::zeros());
        }
        let groups = proximity_groups(oracle.objects(), 2.5);
        assert_eq!(groups, vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_detection_is_deterministic() {
        let run = || {
            let mut oracle = Oracle::new(99);
            oracle.spawn_object(Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0));
            oracle.spawn_object(Vector3::new(0.5, 0.5, 0.0), Vector3::new(-1.0, 0.0, 0.0));
            oracle.step(0.1);
            oracle.detect(2.0).unwrap()[0].com
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_traxel_has_all_features() {
        let mut oracle = Oracle::new(3);
        oracle.spawn_object(Vector3::new(5.0, 5.0, 5.0), Vector3::zeros());
        let traxel = oracle.detect(1.0).unwrap()[0].to_traxel(4, 2);

        assert_eq!(traxel.id, 4);
        assert_eq!(traxel.timestep, 2);
        for key in [keys::COM, keys::COORD_LIST, keys::POSSIBLE_COMS, keys::MERGER_COMS] {
            assert!(traxel.feature(key).is_some(), "{}", key);
        }
    }
}
