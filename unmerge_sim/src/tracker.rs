//! Builds the hypotheses graph a tracker would hand over for merger resolution.
//!
//! Every detection becomes a node whose `node_active2` is its true object count,
//! so mergers are annotated exactly. Candidate arcs join detections of consecutive
//! frames that are within the link radius or share an object; an arc is active
//! when the two detections really share an object.

use crate::oracle::Detection;
use nalgebra::Vector3;
use tracing::debug;
use unmerge_core::{GraphError, HypothesesGraph, NodeId};

/// Tracking result plus the ground truth behind every original node.
#[derive(Debug, Clone)]
pub struct TrackedGraph {
    pub graph: HypothesesGraph,

    /// Ground truth members per original node, indexed by node handle
    pub members: Vec<Vec<u32>>,

    /// Ground truth positions per frame
    pub truth: Vec<Vec<(u32, Vector3<f64>)>>,
}

impl TrackedGraph {
    pub fn members_of(&self, node: NodeId) -> &[u32] {
        self.members.get(node.0).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of objects hidden in mergers, i.e. nodes resolution should create.
    pub fn expected_children(&self) -> usize {
        self.members.iter().filter(|m| m.len() >= 2).map(Vec::len).sum()
    }

    pub fn merger_count(&self) -> usize {
        self.members.iter().filter(|m| m.len() >= 2).count()
    }

    /// True position of object `id` at `timestep`.
    pub fn true_position(&self, timestep: i32, id: u32) -> Option<Vector3<f64>> {
        let frame = self.truth.get(usize::try_from(timestep).ok()?)?;
        frame.iter().find(|(object, _)| *object == id).map(|&(_, p)| p)
    }
}

pub struct GraphBuilder {
    link_radius: f64,
    graph: HypothesesGraph,
    members: Vec<Vec<u32>>,
    truth: Vec<Vec<(u32, Vector3<f64>)>>,
    previous: Vec<(NodeId, Detection)>,
}

impl GraphBuilder {
    pub fn new(link_radius: f64) -> Self {
        Self {
            link_radius,
            graph: HypothesesGraph::with_tracking_properties(),
            members: Vec::new(),
            truth: Vec::new(),
            previous: Vec::new(),
        }
    }

    /// Append the next frame. Traxel ids are 1-based within a frame.
    pub fn push_frame(
        &mut self,
        detections: Vec<Detection>,
        truth: Vec<(u32, Vector3<f64>)>,
    ) -> Result<(), GraphError> {
        let timestep = self.truth.len() as i32;
        let mut current = Vec::with_capacity(detections.len());

        for (detection, id) in detections.into_iter().zip(1u32..) {
            let node = self.graph.add_node(detection.to_traxel(id, timestep));
            self.graph.set_node_active2(node, detection.count() as u32)?;
            self.members.push(detection.members.clone());

            for (prev_node, prev) in &self.previous {
                let distance = (detection.com - prev.com).norm();
                let same_object = prev.shares_member(&detection);
                if !same_object && distance > self.link_radius {
                    continue;
                }
                let arc = self.graph.add_arc(*prev_node, node)?;
                self.graph.set_arc_active(arc, same_object)?;
                self.graph.set_arc_distance(arc, distance)?;
            }
            current.push((node, detection));
        }

        debug!(
            "Frame {}: {} detections, {} nodes, {} arcs",
            timestep,
            current.len(),
            self.graph.node_count(),
            self.graph.arc_count()
        );
        self.previous = current;
        self.truth.push(truth);
        Ok(())
    }

    pub fn finish(self) -> TrackedGraph {
        TrackedGraph {
            graph: self.graph,
            members: self.members,
            truth: self.truth,
        }
    }
}
