//! Resolver configuration and strategy selection.

use crate::aggregate::ScalarReduction;
use crate::cluster::KMeansConfig;
use crate::disambiguate::{ArcDisambiguator, GreedyDisambiguator, ModelDisambiguator};
use crate::extract::{ClusterExtractor, FeatureExtractor, MergerComsExtractor, PossibleComsExtractor};
use serde::{Deserialize, Serialize};

/// Largest number of active arcs an object may have per direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DegreeLimits {
    /// Predecessors per object (default: 1)
    pub max_incoming: usize,

    /// Successors per object; 2 allows a division (default: 2)
    pub max_outgoing: usize,
}

impl Default for DegreeLimits {
    fn default() -> Self {
        Self {
            max_incoming: 1,
            max_outgoing: 2,
        }
    }
}

/// Configuration for merger resolution, disambiguation and track scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Dimensionality of center-of-mass coordinates (default: 3)
    pub coordinate_dims: usize,

    /// k-means parameters for the clustering extractor
    pub kmeans: KMeansConfig,

    /// Degree limits for both disambiguators
    pub degree_limits: DegreeLimits,

    /// Arc count above which the model disambiguator gives up on a node (default: 16)
    pub max_model_arcs: usize,

    /// Mahalanobis distance above which a sample is an outlier (default: 3.0)
    pub sigma_threshold: f64,

    /// Scalar rule of the min/max/mean aggregators (default: componentwise)
    pub scalar_reduction: ScalarReduction,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            coordinate_dims: 3,
            kmeans: KMeansConfig::default(),
            degree_limits: DegreeLimits::default(),
            max_model_arcs: 16,
            sigma_threshold: 3.0,
            scalar_reduction: ScalarReduction::default(),
        }
    }
}

impl ResolverConfig {
    /// Parse a JSON document; absent fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Where the per-object centers of a merger come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorKind {
    PossibleComs,
    MergerComs,
    #[serde(rename = "kmeans")]
    KMeans,
}

impl ExtractorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ExtractorKind::PossibleComs => "possible_coms",
            ExtractorKind::MergerComs => "merger_coms",
            ExtractorKind::KMeans => "kmeans",
        }
    }

    pub fn all() -> Vec<ExtractorKind> {
        vec![
            ExtractorKind::PossibleComs,
            ExtractorKind::MergerComs,
            ExtractorKind::KMeans,
        ]
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().into_iter().find(|k| k.name() == name)
    }

    pub fn build(&self, config: &ResolverConfig) -> Box<dyn FeatureExtractor> {
        let dims = config.coordinate_dims;
        match self {
            ExtractorKind::PossibleComs => Box::new(PossibleComsExtractor { dims }),
            ExtractorKind::MergerComs => Box::new(MergerComsExtractor { dims }),
            ExtractorKind::KMeans => Box::new(ClusterExtractor::kmeans(dims, config.kmeans.clone())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisambiguatorKind {
    Greedy,
    Model,
}

impl DisambiguatorKind {
    pub fn name(&self) -> &'static str {
        match self {
            DisambiguatorKind::Greedy => "greedy",
            DisambiguatorKind::Model => "model",
        }
    }

    pub fn all() -> Vec<DisambiguatorKind> {
        vec![DisambiguatorKind::Greedy, DisambiguatorKind::Model]
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().into_iter().find(|k| k.name() == name)
    }

    pub fn build(&self, config: &ResolverConfig) -> Box<dyn ArcDisambiguator> {
        match self {
            DisambiguatorKind::Greedy => Box::new(GreedyDisambiguator::new(config.degree_limits)),
            DisambiguatorKind::Model => Box::new(ModelDisambiguator::new(
                config.degree_limits,
                config.max_model_arcs,
            )),
        }
    }
}
