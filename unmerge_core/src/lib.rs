//! Unmerge Core - merger resolution for tracking hypotheses graphs
//!
//! A tracker sometimes explains several touching objects with one detection. This
//! library repairs such tracking results:
//! 1. **Merger resolution**: split every merger node into one node per object and
//!    re-attach its transitions to the nearest new node
//! 2. **Arc disambiguation**: deactivate transitions an object cannot physically
//!    have, greedily or by exact local selection
//! 3. **Track scoring**: outlier detection and feature aggregation over the
//!    feature sequences of the resulting tracks

pub mod aggregate;
pub mod calculator;
pub mod cluster;
pub mod config;
pub mod disambiguate;
pub mod distance;
pub mod error;
pub mod extract;
pub mod graph;
pub mod outlier;
pub mod resolver;
pub mod traxel;

// Re-export key types for convenience
pub use aggregate::{
    AggregatedFeature, AggregatedValue, FeatureAggregator, MaxAggregator, MeanAggregator,
    MinAggregator, OutlierBadnessAggregator, ScalarReduction, TotalDiffAggregator,
};
pub use calculator::{pairwise_series, FeatureCalculator};
pub use cluster::{ClusterEstimator, KMeans, KMeansConfig};
pub use config::{DegreeLimits, DisambiguatorKind, ExtractorKind, ResolverConfig};
pub use disambiguate::{
    ArcDisambiguator, DisambiguationReport, GreedyDisambiguator, ModelDisambiguator,
};
pub use distance::{ComDistance, Distance};
pub use error::{FeatureError, GraphError, ResolveError, TrackFeatureError};
pub use extract::{ClusterExtractor, FeatureExtractor, MergerComsExtractor, PossibleComsExtractor};
pub use graph::{ArcId, Direction, HypothesesGraph, NodeId, Property};
pub use outlier::{MvnOutlierCalculator, OutlierCalculator};
pub use resolver::{MergerResolver, NodeFailure, ResolutionReport, ResolvedMerger};
pub use traxel::{keys, FeatureArray, FeatureArrays, Traxel};
