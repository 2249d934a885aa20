//! Hypotheses graph: object candidates per timestep and the transitions between them.
//!
//! Storage is an arena. Nodes and arcs are addressed by `NodeId` / `ArcId` handles,
//! and every tracking property lives in a typed side-table (`PropertyMap`) indexed by
//! those handles. Properties must be registered before use; reading an unregistered
//! property is an `InvalidGraphState` error, mirroring the tracker's contract that a
//! tracking stage adds the properties it produces.
//!
//! Nodes and arcs are never removed, only deactivated.

use crate::error::{GraphError, ResolveError};
use crate::traxel::{FeatureArray, FeatureArrays, Traxel};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

// ============================================================================
// HANDLES
// ============================================================================

/// Handle of a node in a `HypothesesGraph`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// Handle of an arc in a `HypothesesGraph`. Handles grow with creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArcId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for ArcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{}", self.0)
    }
}

/// Arena index of a handle.
pub trait Handle: Copy {
    fn index(self) -> usize;
}

impl Handle for NodeId {
    #[inline]
    fn index(self) -> usize {
        self.0
    }
}

impl Handle for ArcId {
    #[inline]
    fn index(self) -> usize {
        self.0
    }
}

// ============================================================================
// PROPERTY MAPS
// ============================================================================

/// Side-table keyed by an arena handle.
///
/// Entries never written read as the map's default value, so the table does not need
/// to be resized when nodes or arcs are added.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyMap<K, V> {
    values: Vec<V>,
    default: V,
    _key: PhantomData<K>,
}

impl<K: Handle, V: Clone> PropertyMap<K, V> {
    pub fn new(default: V) -> Self {
        Self {
            values: Vec::new(),
            default,
            _key: PhantomData,
        }
    }

    #[inline]
    pub fn get(&self, key: K) -> &V {
        self.values.get(key.index()).unwrap_or(&self.default)
    }

    pub fn get_mut(&mut self, key: K) -> &mut V {
        let index = key.index();
        if index >= self.values.len() {
            self.values.resize(index + 1, self.default.clone());
        }
        &mut self.values[index]
    }

    pub fn set(&mut self, key: K, value: V) {
        *self.get_mut(key) = value;
    }
}

/// Tracking properties a graph may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    /// Object count per node: 0 inactive, 1 single object, >= 2 merger
    NodeActive2,
    ArcActive,
    ArcDistance,
    /// Traxel id of the merger a node was split from
    NodeOriginatedFrom,
    /// Traxel ids of the nodes a merger was split into
    MergerResolvedTo,
}

impl Property {
    pub fn name(&self) -> &'static str {
        match self {
            Property::NodeActive2 => "node_active2",
            Property::ArcActive => "arc_active",
            Property::ArcDistance => "arc_distance",
            Property::NodeOriginatedFrom => "node_originated_from",
            Property::MergerResolvedTo => "merger_resolved_to",
        }
    }
}

fn require<T>(map: &Option<T>, property: Property) -> Result<&T, GraphError> {
    map.as_ref().ok_or_else(|| GraphError::missing_property(property))
}

fn require_mut<T>(map: &mut Option<T>, property: Property) -> Result<&mut T, GraphError> {
    map.as_mut().ok_or_else(|| GraphError::missing_property(property))
}

// ============================================================================
// GRAPH
// ============================================================================

/// Endpoints of an arc. Arcs always point forward in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArcData {
    pub source: NodeId,
    pub target: NodeId,
}

/// Direction of an arc relative to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HypothesesGraph {
    traxels: Vec<Traxel>,
    arcs: Vec<ArcData>,
    in_arcs: Vec<Vec<ArcId>>,
    out_arcs: Vec<Vec<ArcId>>,

    node_active2: Option<PropertyMap<NodeId, u32>>,
    arc_active: Option<PropertyMap<ArcId, bool>>,
    arc_distance: Option<PropertyMap<ArcId, f64>>,
    node_originated_from: Option<PropertyMap<NodeId, Vec<u32>>>,
    merger_resolved_to: Option<PropertyMap<NodeId, Vec<u32>>>,
}

impl HypothesesGraph {
    /// Create an empty graph without any tracking property.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty graph carrying the properties a tracking run produces
    /// (`node_active2`, `arc_active`, `arc_distance`).
    pub fn with_tracking_properties() -> Self {
        let mut graph = Self::new();
        graph.add_property(Property::NodeActive2);
        graph.add_property(Property::ArcActive);
        graph.add_property(Property::ArcDistance);
        graph
    }

    pub fn has_property(&self, property: Property) -> bool {
        match property {
            Property::NodeActive2 => self.node_active2.is_some(),
            Property::ArcActive => self.arc_active.is_some(),
            Property::ArcDistance => self.arc_distance.is_some(),
            Property::NodeOriginatedFrom => self.node_originated_from.is_some(),
            Property::MergerResolvedTo => self.merger_resolved_to.is_some(),
        }
    }

    /// Register a property. Existing values are kept if it is already present.
    pub fn add_property(&mut self, property: Property) {
        match property {
            Property::NodeActive2 => {
                self.node_active2.get_or_insert_with(|| PropertyMap::new(0));
            }
            Property::ArcActive => {
                self.arc_active.get_or_insert_with(|| PropertyMap::new(false));
            }
            Property::ArcDistance => {
                self.arc_distance.get_or_insert_with(|| PropertyMap::new(0.0));
            }
            Property::NodeOriginatedFrom => {
                self.node_originated_from
                    .get_or_insert_with(|| PropertyMap::new(Vec::new()));
            }
            Property::MergerResolvedTo => {
                self.merger_resolved_to
                    .get_or_insert_with(|| PropertyMap::new(Vec::new()));
            }
        }
    }

    // ========================================================================
    // STRUCTURE
    // ========================================================================

    pub fn add_node(&mut self, traxel: Traxel) -> NodeId {
        let id = NodeId(self.traxels.len());
        self.traxels.push(traxel);
        self.in_arcs.push(Vec::new());
        self.out_arcs.push(Vec::new());
        id
    }

    pub fn add_arc(&mut self, source: NodeId, target: NodeId) -> Result<ArcId, GraphError> {
        self.check_node(source)?;
        self.check_node(target)?;

        let id = ArcId(self.arcs.len());
        self.arcs.push(ArcData { source, target });
        self.out_arcs[source.0].push(id);
        self.in_arcs[target.0].push(id);
        Ok(id)
    }

    pub fn node_count(&self) -> usize {
        self.traxels.len()
    }

    pub fn arc_count(&self) -> usize {
        self.arcs.len()
    }

    /// All node handles in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> {
        (0..self.traxels.len()).map(NodeId)
    }

    /// All arc handles in creation order.
    pub fn arcs(&self) -> impl Iterator<Item = ArcId> {
        (0..self.arcs.len()).map(ArcId)
    }

    fn check_node(&self, node: NodeId) -> Result<(), GraphError> {
        if node.0 < self.traxels.len() {
            Ok(())
        } else {
            Err(GraphError::UnknownNode(node))
        }
    }

    pub fn traxel(&self, node: NodeId) -> Result<&Traxel, GraphError> {
        self.traxels.get(node.0).ok_or(GraphError::UnknownNode(node))
    }

    pub fn arc(&self, arc: ArcId) -> Result<ArcData, GraphError> {
        self.arcs.get(arc.0).copied().ok_or(GraphError::UnknownArc(arc))
    }

    /// All incoming arcs of a node, active or not.
    pub fn in_arcs(&self, node: NodeId) -> Result<&[ArcId], GraphError> {
        self.in_arcs
            .get(node.0)
            .map(Vec::as_slice)
            .ok_or(GraphError::UnknownNode(node))
    }

    /// All outgoing arcs of a node, active or not.
    pub fn out_arcs(&self, node: NodeId) -> Result<&[ArcId], GraphError> {
        self.out_arcs
            .get(node.0)
            .map(Vec::as_slice)
            .ok_or(GraphError::UnknownNode(node))
    }

    /// Largest traxel id among the nodes of a timestep.
    pub fn max_traxel_id(&self, timestep: i32) -> Option<u32> {
        self.traxels
            .iter()
            .filter(|t| t.timestep == timestep)
            .map(|t| t.id)
            .max()
    }

    // ========================================================================
    // PROPERTIES
    // ========================================================================

    pub fn node_active2(&self, node: NodeId) -> Result<u32, GraphError> {
        self.check_node(node)?;
        Ok(*require(&self.node_active2, Property::NodeActive2)?.get(node))
    }

    pub fn set_node_active2(&mut self, node: NodeId, count: u32) -> Result<(), GraphError> {
        self.check_node(node)?;
        require_mut(&mut self.node_active2, Property::NodeActive2)?.set(node, count);
        Ok(())
    }

    #[inline]
    pub fn is_node_active(&self, node: NodeId) -> Result<bool, GraphError> {
        Ok(self.node_active2(node)? > 0)
    }

    pub fn arc_active(&self, arc: ArcId) -> Result<bool, GraphError> {
        self.arc(arc)?;
        Ok(*require(&self.arc_active, Property::ArcActive)?.get(arc))
    }

    pub fn set_arc_active(&mut self, arc: ArcId, active: bool) -> Result<(), GraphError> {
        self.arc(arc)?;
        require_mut(&mut self.arc_active, Property::ArcActive)?.set(arc, active);
        Ok(())
    }

    pub fn arc_distance(&self, arc: ArcId) -> Result<f64, GraphError> {
        self.arc(arc)?;
        Ok(*require(&self.arc_distance, Property::ArcDistance)?.get(arc))
    }

    pub fn set_arc_distance(&mut self, arc: ArcId, distance: f64) -> Result<(), GraphError> {
        self.arc(arc)?;
        require_mut(&mut self.arc_distance, Property::ArcDistance)?.set(arc, distance);
        Ok(())
    }

    pub fn originated_from(&self, node: NodeId) -> Result<&[u32], GraphError> {
        self.check_node(node)?;
        Ok(require(&self.node_originated_from, Property::NodeOriginatedFrom)?
            .get(node)
            .as_slice())
    }

    /// Record the merger a node was split from. A node has at most one such record,
    /// so this replaces any previous value.
    pub fn set_originated_from(&mut self, node: NodeId, parent_id: u32) -> Result<(), GraphError> {
        self.check_node(node)?;
        require_mut(&mut self.node_originated_from, Property::NodeOriginatedFrom)?
            .set(node, vec![parent_id]);
        Ok(())
    }

    pub fn resolved_to(&self, node: NodeId) -> Result<&[u32], GraphError> {
        self.check_node(node)?;
        Ok(require(&self.merger_resolved_to, Property::MergerResolvedTo)?
            .get(node)
            .as_slice())
    }

    pub fn push_resolved_to(&mut self, node: NodeId, child_id: u32) -> Result<(), GraphError> {
        self.check_node(node)?;
        require_mut(&mut self.merger_resolved_to, Property::MergerResolvedTo)?
            .get_mut(node)
            .push(child_id);
        Ok(())
    }

    /// Active arcs of a node in one direction, in creation order.
    pub fn active_arcs(&self, node: NodeId, direction: Direction) -> Result<Vec<ArcId>, GraphError> {
        let arcs = match direction {
            Direction::Incoming => self.in_arcs(node)?,
            Direction::Outgoing => self.out_arcs(node)?,
        };
        let active = require(&self.arc_active, Property::ArcActive)?;
        Ok(arcs.iter().copied().filter(|&a| *active.get(a)).collect())
    }

    pub fn active_in_arcs(&self, node: NodeId) -> Result<Vec<ArcId>, GraphError> {
        self.active_arcs(node, Direction::Incoming)
    }

    pub fn active_out_arcs(&self, node: NodeId) -> Result<Vec<ArcId>, GraphError> {
        self.active_arcs(node, Direction::Outgoing)
    }

    // ========================================================================
    // INVARIANTS
    // ========================================================================

    /// Check the structural invariants over every node and arc:
    /// no active arc touches an inactive node, and no node carries more than one
    /// originated-from record.
    pub fn check_consistency(&self) -> Result<(), GraphError> {
        for arc in self.arcs() {
            if !self.arc_active(arc)? {
                continue;
            }
            let ArcData { source, target } = self.arc(arc)?;
            for endpoint in [source, target] {
                if !self.is_node_active(endpoint)? {
                    return Err(GraphError::InvalidGraphState(format!(
                        "active arc {} references inactive node {}",
                        arc, endpoint
                    )));
                }
            }
        }

        if let Some(origins) = &self.node_originated_from {
            for node in self.nodes() {
                if origins.get(node).len() > 1 {
                    return Err(GraphError::InvalidGraphState(format!(
                        "node {} has {} originated-from records",
                        node,
                        origins.get(node).len()
                    )));
                }
            }
        }

        Ok(())
    }

    // ========================================================================
    // TRACKS
    // ========================================================================

    /// Follow a track forward from `start` along active arcs for as long as each
    /// node has exactly one active outgoing arc.
    pub fn follow_track(&self, start: NodeId) -> Result<Vec<NodeId>, GraphError> {
        let mut track = vec![start];
        let mut current = start;
        loop {
            let outgoing = self.active_out_arcs(current)?;
            if outgoing.len() != 1 {
                break;
            }
            let next = self.arc(outgoing[0])?.target;
            if !self.is_node_active(next)? {
                break;
            }
            track.push(next);
            current = next;
        }
        Ok(track)
    }

    /// Collect one named feature per node of a track.
    pub fn track_feature_series(
        &self,
        track: &[NodeId],
        feature: &str,
    ) -> Result<FeatureArrays, ResolveError> {
        track
            .iter()
            .map(|&node| -> Result<FeatureArray, ResolveError> {
                Ok(self.traxel(node)?.require_feature(feature)?.to_vec())
            })
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
