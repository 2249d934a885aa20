//! Error types for merger resolution and track scoring.

use crate::graph::{ArcId, NodeId, Property};
use thiserror::Error;

/// Errors raised while reading or deriving traxel features.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeatureError {
    /// Expected feature key absent from a traxel
    #[error("Missing feature: {0}")]
    MissingFeature(String),

    /// Flat feature array does not fit the requested shape
    #[error("Dimension mismatch: expected {expected} values, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Fewer distinguishable points than requested clusters
    #[error("Cannot form {k} clusters from {points} distinct points")]
    TooFewPoints { k: usize, points: usize },

    /// A partition ended up without any assigned point
    #[error("Cluster {0} has no assigned points")]
    EmptyCluster(usize),

    /// Denominator of a ratio feature is zero
    #[error("Division by zero at component {0}")]
    DivisionByZero(usize),
}

impl FeatureError {
    /// Creates a missing-feature error.
    pub fn missing(name: impl Into<String>) -> Self {
        Self::MissingFeature(name.into())
    }

    /// Creates a dimension-mismatch error.
    pub fn dimension(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }
}

/// Errors raised by the hypotheses graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    /// Required property missing, or no graph supplied at all
    #[error("Invalid graph state: {0}")]
    InvalidGraphState(String),

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Unknown arc: {0}")]
    UnknownArc(ArcId),
}

impl GraphError {
    /// Creates the error reported when a property has not been registered.
    pub fn missing_property(property: Property) -> Self {
        Self::InvalidGraphState(format!(
            "hypotheses graph does not have property {}",
            property.name()
        ))
    }
}

/// Errors raised while resolving mergers or disambiguating arcs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The local selection model around a node has no valid solution
    #[error("Infeasible disambiguation at node {node}: {reason}")]
    InfeasibleDisambiguation { node: NodeId, reason: String },
}

/// Errors raised by outlier detection and feature aggregation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackFeatureError {
    #[error("Covariance matrix is singular")]
    SingularCovariance,

    #[error("Feature sequence is empty")]
    EmptyInput,

    #[error(transparent)]
    Feature(#[from] FeatureError),
}
