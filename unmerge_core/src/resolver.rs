//! Merger resolution on a hypotheses graph.
//!
//! A merger node carries `node_active2 >= 2`: the tracker decided that several
//! objects hide behind one measurement. Resolving it means:
//! 1. Extracting one traxel per object from the merged traxel
//! 2. Adding an active node per extracted traxel
//! 3. Re-attaching every active transition of the merger to its nearest new node
//! 4. Deactivating the merger and its original transitions
//! 5. Recording provenance in both directions
//!
//! Each merger is resolved on its own. A failure (missing feature, bad distance)
//! is recorded for that node and leaves the graph untouched; the remaining mergers
//! are still attempted.

use crate::distance::Distance;
use crate::error::{FeatureError, GraphError, ResolveError};
use crate::extract::FeatureExtractor;
use crate::graph::{ArcId, Direction, HypothesesGraph, NodeId, Property};
use crate::traxel::Traxel;
use tracing::{debug, info, warn};

// ============================================================================
// REPORT
// ============================================================================

/// A merger that was split successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMerger {
    pub node: NodeId,
    pub traxel_id: u32,
    pub timestep: i32,

    /// New nodes, in traxel id order
    pub children: Vec<NodeId>,

    /// Arcs added to connect the new nodes
    pub new_arcs: Vec<ArcId>,
}

/// A merger that could not be resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeFailure {
    pub node: NodeId,
    pub traxel_id: u32,
    pub timestep: i32,
    pub error: ResolveError,
}

/// Outcome of a resolution pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionReport {
    pub resolved: Vec<ResolvedMerger>,
    pub failures: Vec<NodeFailure>,
}

impl ResolutionReport {
    /// True if every merger was resolved.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn children_created(&self) -> usize {
        self.resolved.iter().map(|r| r.children.len()).sum()
    }
}

/// Re-attachment of one original transition, computed before any mutation.
#[derive(Debug, Clone, Copy)]
struct Relink {
    original: ArcId,
    direction: Direction,
    endpoint: NodeId,
    child: usize,
    distance: f64,
}

// ============================================================================
// RESOLVER
// ============================================================================

/// Splits merger nodes of a graph it holds exclusively for the whole pass.
pub struct MergerResolver<'g> {
    graph: &'g mut HypothesesGraph,
}

impl<'g> MergerResolver<'g> {
    /// Validate the graph and register the provenance properties.
    ///
    /// Fails with `InvalidGraphState` before touching the graph if
    /// `node_active2`, `arc_active` or `arc_distance` is missing.
    pub fn new(graph: &'g mut HypothesesGraph) -> Result<Self, GraphError> {
        for property in [Property::NodeActive2, Property::ArcActive, Property::ArcDistance] {
            if !graph.has_property(property) {
                return Err(GraphError::missing_property(property));
            }
        }
        graph.add_property(Property::MergerResolvedTo);
        graph.add_property(Property::NodeOriginatedFrom);
        Ok(Self { graph })
    }

    /// Like `new`, for callers that may not have a graph at hand.
    pub fn from_option(graph: Option<&'g mut HypothesesGraph>) -> Result<Self, GraphError> {
        let graph = graph.ok_or_else(|| {
            GraphError::InvalidGraphState("hypotheses graph is absent".to_string())
        })?;
        Self::new(graph)
    }

    pub fn graph(&self) -> &HypothesesGraph {
        &*self.graph
    }

    /// Resolve every merger present when the pass starts, in (timestep, node) order.
    ///
    /// Only graph-level failures abort the pass; per-node failures end up in the
    /// report.
    pub fn resolve_mergers(
        &mut self,
        extractor: &dyn FeatureExtractor,
        distance: &dyn Distance,
    ) -> Result<ResolutionReport, ResolveError> {
        let mergers = self.collect_mergers()?;
        let mut report = ResolutionReport::default();

        for (node, n_mergers) in mergers {
            match self.refine_node(node, n_mergers, extractor, distance) {
                Ok(resolved) => {
                    debug!(
                        "Resolved merger {} (traxel {} at t={}) into {} nodes",
                        node,
                        resolved.traxel_id,
                        resolved.timestep,
                        resolved.children.len()
                    );
                    report.resolved.push(resolved);
                }
                Err(error) => {
                    let traxel = self.graph.traxel(node)?;
                    warn!(
                        "Failed to resolve merger {} (traxel {} at t={}): {}",
                        node, traxel.id, traxel.timestep, error
                    );
                    report.failures.push(NodeFailure {
                        node,
                        traxel_id: traxel.id,
                        timestep: traxel.timestep,
                        error,
                    });
                }
            }
        }

        info!(
            "Merger resolution: {} resolved, {} failed, {} nodes created",
            report.resolved.len(),
            report.failures.len(),
            report.children_created()
        );
        Ok(report)
    }

    fn collect_mergers(&self) -> Result<Vec<(NodeId, usize)>, GraphError> {
        let mut mergers = Vec::new();
        for node in self.graph.nodes() {
            let count = self.graph.node_active2(node)?;
            if count >= 2 {
                mergers.push((self.graph.traxel(node)?.timestep, node, count as usize));
            }
        }
        mergers.sort_by_key(|&(timestep, node, _)| (timestep, node));
        Ok(mergers.into_iter().map(|(_, node, count)| (node, count)).collect())
    }

    /// Split one merger. Everything fallible runs before the first mutation.
    fn refine_node(
        &mut self,
        node: NodeId,
        n_mergers: usize,
        extractor: &dyn FeatureExtractor,
        distance: &dyn Distance,
    ) -> Result<ResolvedMerger, ResolveError> {
        let parent = self.graph.traxel(node)?.clone();
        let max_id = self.graph.max_traxel_id(parent.timestep).unwrap_or(parent.id);

        let children = extractor.extract(&parent, n_mergers, max_id)?;
        if children.len() != n_mergers {
            return Err(FeatureError::dimension(n_mergers, children.len()).into());
        }

        let mut relinks = Vec::new();
        for direction in [Direction::Incoming, Direction::Outgoing] {
            for arc in self.graph.active_arcs(node, direction)? {
                let data = self.graph.arc(arc)?;
                let endpoint = match direction {
                    Direction::Incoming => data.source,
                    Direction::Outgoing => data.target,
                };
                let other = self.graph.traxel(endpoint)?;
                let (child, d) = nearest_child(distance, other, &children, direction)?;
                relinks.push(Relink {
                    original: arc,
                    direction,
                    endpoint,
                    child,
                    distance: d,
                });
            }
        }

        // Commit.
        let mut child_nodes = Vec::with_capacity(children.len());
        for child in children {
            let child_id = child.id;
            let child_node = self.graph.add_node(child);
            self.graph.set_node_active2(child_node, 1)?;
            self.graph.set_originated_from(child_node, parent.id)?;
            self.graph.push_resolved_to(node, child_id)?;
            child_nodes.push(child_node);
        }

        let mut new_arcs = Vec::with_capacity(relinks.len());
        for relink in &relinks {
            let child_node = child_nodes[relink.child];
            let arc = match relink.direction {
                Direction::Incoming => self.graph.add_arc(relink.endpoint, child_node)?,
                Direction::Outgoing => self.graph.add_arc(child_node, relink.endpoint)?,
            };
            self.graph.set_arc_active(arc, true)?;
            self.graph.set_arc_distance(arc, relink.distance)?;
            new_arcs.push(arc);
        }

        for relink in &relinks {
            self.graph.set_arc_active(relink.original, false)?;
        }
        self.graph.set_node_active2(node, 0)?;

        Ok(ResolvedMerger {
            node,
            traxel_id: parent.id,
            timestep: parent.timestep,
            children: child_nodes,
            new_arcs,
        })
    }
}

/// Index and distance of the child closest to `other`. Ties go to the child with
/// the lowest traxel id.
fn nearest_child(
    distance: &dyn Distance,
    other: &Traxel,
    children: &[Traxel],
    direction: Direction,
) -> Result<(usize, f64), ResolveError> {
    let mut best: Option<(usize, f64)> = None;
    for (index, child) in children.iter().enumerate() {
        let d = match direction {
            Direction::Incoming => distance.distance(other, child)?,
            Direction::Outgoing => distance.distance(child, other)?,
        };
        let better = match best {
            None => true,
            Some((b, bd)) => d < bd || (d == bd && child.id < children[b].id),
        };
        if better {
            best = Some((index, d));
        }
    }
    best.ok_or_else(|| FeatureError::dimension(1, 0).into())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::ComDistance;
    use crate::extract::{MergerComsExtractor, PossibleComsExtractor};
    use crate::traxel::keys;

    fn single(graph: &mut HypothesesGraph, id: u32, t: i32, com: [f64; 3]) -> NodeId {
        let n = graph.add_node(Traxel::new(id, t).with_feature(keys::COM, com.to_vec()));
        graph.set_node_active2(n, 1).unwrap();
        n
    }

    fn link(graph: &mut HypothesesGraph, from: NodeId, to: NodeId) -> ArcId {
        let a = graph.add_arc(from, to).unwrap();
        graph.set_arc_active(a, true).unwrap();
        graph.set_arc_distance(a, 1.0).unwrap();
        a
    }

    /// Two objects at t=0 merge into one node at t=1 and separate again at t=2.
    ///
    /// ```text
    ///  t=0        t=1         t=2
    ///  A(1) ──┐           ┌── D(1)
    ///         ├──► M(2) ──┤
    ///  B(2) ──┘           └── E(2)
    /// ```
    fn crossing() -> (HypothesesGraph, [NodeId; 5]) {
        let mut graph = HypothesesGraph::with_tracking_properties();
        let a = single(&mut graph, 1, 0, [0.0, 0.0, 0.0]);
        let b = single(&mut graph, 2, 0, [0.0, 10.0, 0.0]);
        let m = graph.add_node(
            Traxel::new(5, 1)
                .with_feature(keys::COM, vec![1.0, 5.0, 0.0])
                .with_feature(keys::MERGER_COMS, vec![1.0, 9.0, 0.0, 1.0, 1.0, 0.0])
                .with_feature(
                    keys::POSSIBLE_COMS,
                    vec![1.0, 5.0, 0.0, 1.0, 1.0, 0.0, 1.0, 9.0, 0.0],
                ),
        );
        graph.set_node_active2(m, 2).unwrap();
        let d = single(&mut graph, 1, 2, [2.0, 0.0, 0.0]);
        let e = single(&mut graph, 2, 2, [2.0, 10.0, 0.0]);
        link(&mut graph, a, m);
        link(&mut graph, b, m);
        link(&mut graph, m, d);
        link(&mut graph, m, e);
        (graph, [a, b, m, d, e])
    }

    #[test]
    fn test_constructor_requires_properties() {
        let mut bare = HypothesesGraph::new();
        assert!(matches!(
            MergerResolver::new(&mut bare),
            Err(GraphError::InvalidGraphState(_))
        ));
        // Validation happens before any property is added.
        assert!(!bare.has_property(Property::MergerResolvedTo));

        bare.add_property(Property::NodeActive2);
        bare.add_property(Property::ArcActive);
        assert_eq!(
            MergerResolver::new(&mut bare).err(),
            Some(GraphError::missing_property(Property::ArcDistance))
        );
    }

    #[test]
    fn test_constructor_rejects_absent_graph() {
        assert!(matches!(
            MergerResolver::from_option(None),
            Err(GraphError::InvalidGraphState(_))
        ));
    }

    #[test]
    fn test_constructor_adds_provenance_properties() {
        let mut graph = HypothesesGraph::with_tracking_properties();
        MergerResolver::new(&mut graph).unwrap();
        assert!(graph.has_property(Property::MergerResolvedTo));
        assert!(graph.has_property(Property::NodeOriginatedFrom));
    }

    #[test]
    fn test_resolve_crossing_relinks_to_nearest_children() {
        let (mut graph, [a, b, m, d, e]) = crossing();
        let report = {
            let mut resolver = MergerResolver::new(&mut graph).unwrap();
            resolver
                .resolve_mergers(&MergerComsExtractor::default(), &ComDistance)
                .unwrap()
        };

        assert!(report.is_complete());
        assert_eq!(report.resolved.len(), 1);
        let resolved = &report.resolved[0];
        assert_eq!(resolved.children.len(), 2);

        // Ids are allocated above the largest id at t=1.
        let upper = resolved.children[0];
        let lower = resolved.children[1];
        assert_eq!(graph.traxel(upper).unwrap().id, 6);
        assert_eq!(graph.traxel(lower).unwrap().id, 7);
        assert_eq!(graph.traxel(upper).unwrap().com().unwrap(), &[1.0, 9.0, 0.0]);

        // Merger and its original arcs are gone.
        assert_eq!(graph.node_active2(m), Ok(0));
        for &arc in graph.in_arcs(m).unwrap().iter().chain(graph.out_arcs(m).unwrap()) {
            assert_eq!(graph.arc_active(arc), Ok(false));
        }

        // A (y=0) joins the lower child, B (y=10) the upper one; same going forward.
        let target_of = |from: NodeId| {
            let out = graph.active_out_arcs(from).unwrap();
            assert_eq!(out.len(), 1);
            graph.arc(out[0]).unwrap().target
        };
        assert_eq!(target_of(a), lower);
        assert_eq!(target_of(b), upper);
        assert_eq!(target_of(lower), d);
        assert_eq!(target_of(upper), e);

        let arc = graph.active_out_arcs(a).unwrap()[0];
        assert!((graph.arc_distance(arc).unwrap() - 2.0f64.sqrt()).abs() < 1e-12);

        assert!(graph.check_consistency().is_ok());
    }

    #[test]
    fn test_provenance_is_bidirectional() {
        let (mut graph, [_, _, m, _, _]) = crossing();
        let report = MergerResolver::new(&mut graph)
            .unwrap()
            .resolve_mergers(&PossibleComsExtractor::default(), &ComDistance)
            .unwrap();

        let children = &report.resolved[0].children;
        let mut child_ids: Vec<u32> = children
            .iter()
            .map(|&c| graph.traxel(c).unwrap().id)
            .collect();
        for &child in children {
            assert_eq!(graph.originated_from(child).unwrap(), &[5]);
            assert_eq!(graph.node_active2(child), Ok(1));
        }

        let mut resolved_to = graph.resolved_to(m).unwrap().to_vec();
        resolved_to.sort_unstable();
        child_ids.sort_unstable();
        assert_eq!(resolved_to, child_ids);
    }

    #[test]
    fn test_failure_leaves_node_untouched_and_continues() {
        let (mut graph, [_, _, m, _, _]) = crossing();

        // A second merger at t=2 without the needed feature.
        let bad = graph.add_node(Traxel::new(9, 2).with_feature(keys::COM, vec![5.0, 5.0, 0.0]));
        graph.set_node_active2(bad, 3).unwrap();
        let before_nodes = graph.node_count();

        let report = MergerResolver::new(&mut graph)
            .unwrap()
            .resolve_mergers(&MergerComsExtractor::default(), &ComDistance)
            .unwrap();

        assert_eq!(report.resolved.len(), 1);
        assert_eq!(report.resolved[0].node, m);
        assert_eq!(report.failures.len(), 1);
        let failure = &report.failures[0];
        assert_eq!(failure.node, bad);
        assert_eq!(failure.traxel_id, 9);
        assert_eq!(failure.timestep, 2);
        assert_eq!(
            failure.error,
            ResolveError::Feature(FeatureError::missing(keys::MERGER_COMS))
        );

        assert_eq!(graph.node_active2(bad), Ok(3));
        assert_eq!(graph.node_count(), before_nodes + 2);
        assert!(graph.check_consistency().is_ok());
    }

    #[test]
    fn test_distance_failure_leaves_node_untouched() {
        let (mut graph, [_, _, m, _, _]) = crossing();

        // A merger at t=0 whose successor has no center of mass.
        let bad = graph.add_node(
            Traxel::new(8, 0)
                .with_feature(keys::COM, vec![20.0, 0.0, 0.0])
                .with_feature(keys::MERGER_COMS, vec![20.0, 1.0, 0.0, 20.0, -1.0, 0.0]),
        );
        graph.set_node_active2(bad, 2).unwrap();
        let blank = graph.add_node(Traxel::new(9, 1));
        graph.set_node_active2(blank, 1).unwrap();
        let bad_arc = link(&mut graph, bad, blank);
        let before_nodes = graph.node_count();
        let before_arcs = graph.arc_count();

        let report = MergerResolver::new(&mut graph)
            .unwrap()
            .resolve_mergers(&MergerComsExtractor::default(), &ComDistance)
            .unwrap();

        assert_eq!(report.failures.len(), 1);
        let failure = &report.failures[0];
        assert_eq!(failure.node, bad);
        assert_eq!(failure.traxel_id, 8);
        assert_eq!(failure.timestep, 0);
        assert_eq!(
            failure.error,
            ResolveError::Feature(FeatureError::missing(keys::COM))
        );

        assert_eq!(graph.node_active2(bad), Ok(2));
        assert_eq!(graph.arc_active(bad_arc), Ok(true));
        assert!(graph.resolved_to(bad).unwrap().is_empty());

        // Only the crossing merger was split: two children, four new arcs.
        assert_eq!(report.resolved.len(), 1);
        assert_eq!(report.resolved[0].node, m);
        assert_eq!(graph.node_count(), before_nodes + 2);
        assert_eq!(graph.arc_count(), before_arcs + 4);
    }

    #[test]
    fn test_tie_goes_to_lowest_child_id() {
        let mut graph = HypothesesGraph::with_tracking_properties();
        let a = single(&mut graph, 1, 0, [0.0, 0.0, 0.0]);
        let m = graph.add_node(
            Traxel::new(1, 1)
                .with_feature(keys::COM, vec![0.0, 0.0, 0.0])
                .with_feature(keys::MERGER_COMS, vec![0.0, 1.0, 0.0, 0.0, -1.0, 0.0]),
        );
        graph.set_node_active2(m, 2).unwrap();
        link(&mut graph, a, m);

        let report = MergerResolver::new(&mut graph)
            .unwrap()
            .resolve_mergers(&MergerComsExtractor::default(), &ComDistance)
            .unwrap();

        let first = report.resolved[0].children[0];
        let out = graph.active_out_arcs(a).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(graph.arc(out[0]).unwrap().target, first);
    }

    #[test]
    fn test_chained_mergers_resolve_in_time_order() {
        // The same two objects stay merged for two frames.
        let mut graph = HypothesesGraph::with_tracking_properties();
        let a = single(&mut graph, 1, 0, [0.0, 0.0, 0.0]);
        let b = single(&mut graph, 2, 0, [0.0, 4.0, 0.0]);
        let mut mergers = Vec::new();
        for t in 1..=2 {
            let m = graph.add_node(
                Traxel::new(1, t)
                    .with_feature(keys::COM, vec![0.0, 2.0, 0.0])
                    .with_feature(keys::MERGER_COMS, vec![0.0, 0.0, 0.0, 0.0, 4.0, 0.0]),
            );
            graph.set_node_active2(m, 2).unwrap();
            mergers.push(m);
        }
        link(&mut graph, a, mergers[0]);
        link(&mut graph, b, mergers[0]);
        link(&mut graph, mergers[0], mergers[1]);

        let report = MergerResolver::new(&mut graph)
            .unwrap()
            .resolve_mergers(&MergerComsExtractor::default(), &ComDistance)
            .unwrap();

        assert_eq!(report.resolved.len(), 2);
        assert_eq!(report.resolved[0].node, mergers[0]);
        assert_eq!(report.resolved[1].node, mergers[1]);
        assert!(graph.check_consistency().is_ok());

        // Every active arc now connects active single-object nodes.
        for arc in graph.arcs() {
            if graph.arc_active(arc).unwrap() {
                let data = graph.arc(arc).unwrap();
                assert_eq!(graph.node_active2(data.source), Ok(1));
                assert_eq!(graph.node_active2(data.target), Ok(1));
            }
        }
    }
}
