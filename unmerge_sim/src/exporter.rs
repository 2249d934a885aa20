//! JSON exporter for scenario runs.
//!
//! Writes ground truth, the tracker's detections and every split merger, so a run
//! can be inspected or plotted outside the harness.

use crate::error::SimError;
use crate::runner::{ScenarioMetrics, ScenarioRun};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use unmerge_core::{HypothesesGraph, NodeId};

/// Position of a ground truth object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectPosition {
    pub id: u32,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl ObjectPosition {
    pub fn new(id: u32, pos: Vector3<f64>) -> Self {
        Self {
            id,
            x: pos.x,
            y: pos.y,
            z: pos.z,
        }
    }
}

/// A node as the tracker produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub traxel_id: u32,
    pub count: u32,
    pub members: Vec<u32>,
    pub com: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameRecord {
    pub timestep: i32,
    pub ground_truth: Vec<ObjectPosition>,
    pub detections: Vec<DetectionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildRecord {
    pub traxel_id: u32,
    pub com: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergerRecord {
    pub traxel_id: u32,
    pub timestep: i32,
    pub children: Vec<ChildRecord>,
}

/// Complete export of one run.
#[derive(Debug, Clone, Serialize)]
pub struct SimExport {
    pub scenario: String,
    pub seed: u64,
    pub extractor: String,
    pub disambiguator: String,
    pub frames: Vec<FrameRecord>,
    pub mergers: Vec<MergerRecord>,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub metrics: ScenarioMetrics,
}

fn com_of(graph: &HypothesesGraph, node: NodeId) -> Result<Vec<f64>, SimError> {
    Ok(graph.traxel(node)?.com()?.to_vec())
}

impl SimExport {
    pub fn from_run(run: &ScenarioRun, extractor: &str, disambiguator: &str) -> Result<Self, SimError> {
        let graph = &run.tracked.graph;

        let mut frames: Vec<FrameRecord> = run
            .tracked
            .truth
            .iter()
            .enumerate()
            .map(|(t, truth)| FrameRecord {
                timestep: t as i32,
                ground_truth: truth.iter().map(|&(id, p)| ObjectPosition::new(id, p)).collect(),
                detections: Vec::new(),
            })
            .collect();

        // Original nodes come first in the arena, one per tracker detection.
        for (index, members) in run.tracked.members.iter().enumerate() {
            let node = NodeId(index);
            let traxel = graph.traxel(node)?;
            if let Some(frame) = frames.get_mut(traxel.timestep as usize) {
                frame.detections.push(DetectionRecord {
                    traxel_id: traxel.id,
                    count: members.len() as u32,
                    members: members.clone(),
                    com: com_of(graph, node)?,
                });
            }
        }

        let mut mergers = Vec::with_capacity(run.resolution.resolved.len());
        for resolved in &run.resolution.resolved {
            let mut children = Vec::with_capacity(resolved.children.len());
            for &child in &resolved.children {
                children.push(ChildRecord {
                    traxel_id: graph.traxel(child)?.id,
                    com: com_of(graph, child)?,
                });
            }
            mergers.push(MergerRecord {
                traxel_id: resolved.traxel_id,
                timestep: resolved.timestep,
                children,
            });
        }

        Ok(Self {
            scenario: run.result.scenario.name().to_string(),
            seed: run.result.seed,
            extractor: extractor.to_string(),
            disambiguator: disambiguator.to_string(),
            frames,
            mergers,
            passed: run.result.passed,
            failure_reason: run.result.failure_reason.clone(),
            metrics: run.result.metrics.clone(),
        })
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> Result<(), SimError> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
