//! Error type of the simulation harness.

use thiserror::Error;
use unmerge_core::{FeatureError, GraphError, ResolveError, TrackFeatureError};

#[derive(Debug, Error)]
pub enum SimError {
    #[error("Feature error: {0}")]
    Feature(#[from] FeatureError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Resolution error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Track scoring error: {0}")]
    TrackFeature(#[from] TrackFeatureError),

    #[error("Invalid noise model: {0}")]
    Noise(#[from] rand_distr::NormalError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
