//! Arc disambiguation.
//!
//! After tracking (and after merger resolution) a node may keep more active
//! transitions than an object can physically have: two predecessors for a single
//! cell, or three successors. The disambiguators deactivate the excess arcs.
//! Nodes and arcs are never removed; a node within its limits is never touched.

use crate::config::DegreeLimits;
use crate::error::ResolveError;
use crate::graph::{ArcId, Direction, HypothesesGraph, NodeId};
use crate::resolver::NodeFailure;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Outcome of a disambiguation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisambiguationReport {
    /// Arcs deactivated, in the order they were switched off
    pub deactivated: Vec<ArcId>,
    pub failures: Vec<NodeFailure>,
}

pub trait ArcDisambiguator {
    fn name(&self) -> &'static str;

    /// Deactivate excess arcs in place.
    ///
    /// Only graph-level errors (missing properties) abort the pass. A node whose
    /// ambiguity cannot be resolved is reported and left untouched.
    fn resolve(&self, graph: &mut HypothesesGraph) -> Result<DisambiguationReport, ResolveError>;
}

fn limit(limits: &DegreeLimits, direction: Direction) -> usize {
    match direction {
        Direction::Incoming => limits.max_incoming,
        Direction::Outgoing => limits.max_outgoing,
    }
}

fn is_ambiguous(
    graph: &HypothesesGraph,
    node: NodeId,
    limits: &DegreeLimits,
) -> Result<bool, ResolveError> {
    if !graph.is_node_active(node)? {
        return Ok(false);
    }
    Ok(graph.active_in_arcs(node)?.len() > limits.max_incoming
        || graph.active_out_arcs(node)?.len() > limits.max_outgoing)
}

fn failure(graph: &HypothesesGraph, node: NodeId, error: ResolveError) -> Result<NodeFailure, ResolveError> {
    let traxel = graph.traxel(node)?;
    Ok(NodeFailure {
        node,
        traxel_id: traxel.id,
        timestep: traxel.timestep,
        error,
    })
}

// ============================================================================
// GREEDY
// ============================================================================

/// Drop the longest arcs until every node is within its limits.
#[derive(Debug, Clone, Default)]
pub struct GreedyDisambiguator {
    pub limits: DegreeLimits,
}

impl GreedyDisambiguator {
    pub fn new(limits: DegreeLimits) -> Self {
        Self { limits }
    }
}

impl ArcDisambiguator for GreedyDisambiguator {
    fn name(&self) -> &'static str {
        "greedy"
    }

    fn resolve(&self, graph: &mut HypothesesGraph) -> Result<DisambiguationReport, ResolveError> {
        let mut report = DisambiguationReport::default();
        let nodes: Vec<NodeId> = graph.nodes().collect();

        for node in nodes {
            if !graph.is_node_active(node)? {
                continue;
            }
            for direction in [Direction::Incoming, Direction::Outgoing] {
                let allowed = limit(&self.limits, direction);
                let mut active = graph.active_arcs(node, direction)?;

                while active.len() > allowed {
                    // Longest arc first; among equals the newest one goes.
                    let mut worst = 0;
                    let mut worst_distance = graph.arc_distance(active[0])?;
                    for (i, &arc) in active.iter().enumerate().skip(1) {
                        let d = graph.arc_distance(arc)?;
                        if d > worst_distance || (d == worst_distance && arc > active[worst]) {
                            worst = i;
                            worst_distance = d;
                        }
                    }
                    let arc = active.remove(worst);
                    graph.set_arc_active(arc, false)?;
                    debug!("Greedy: deactivated {} at {} (distance {:.3})", arc, node, worst_distance);
                    report.deactivated.push(arc);
                }
            }
        }

        info!("Greedy disambiguation deactivated {} arcs", report.deactivated.len());
        Ok(report)
    }
}

// ============================================================================
// MODEL
// ============================================================================

/// Exact local selection around each ambiguous node.
///
/// Every active arc touching the node becomes a keep/drop variable. An assignment
/// is feasible if
/// - the node stays within its degree limits,
/// - every neighbour stays within its limits, counting its other active arcs as fixed,
/// - every neighbour whose only active predecessors are in the model keeps one,
/// - the node keeps a predecessor if it had one.
///
/// Among feasible assignments the one keeping the most arcs wins, then the one with
/// the lowest summed distance, then the one keeping older arcs.
#[derive(Debug, Clone)]
pub struct ModelDisambiguator {
    pub limits: DegreeLimits,

    /// Largest number of arcs enumerated around one node
    pub max_model_arcs: usize,
}

impl Default for ModelDisambiguator {
    fn default() -> Self {
        Self::new(DegreeLimits::default(), 16)
    }
}

/// Degree bound on one side of one neighbour, over a subset of model arcs.
#[derive(Debug, Clone, Copy, Default)]
struct DegreeConstraint {
    members: u64,
    fixed: usize,
    limit: usize,
    keep_one: bool,
}

impl DegreeConstraint {
    fn satisfied(&self, mask: u64) -> bool {
        let kept = (mask & self.members).count_ones() as usize;
        self.fixed + kept <= self.limit && (!self.keep_one || kept > 0)
    }
}

#[derive(Debug, Clone, Copy)]
struct ModelArc {
    arc: ArcId,
    direction: Direction,
    neighbour: NodeId,
    distance: f64,
}

impl ModelDisambiguator {
    pub fn new(limits: DegreeLimits, max_model_arcs: usize) -> Self {
        Self {
            limits,
            max_model_arcs,
        }
    }

    /// Arcs to deactivate around `node`.
    fn solve(&self, graph: &HypothesesGraph, node: NodeId) -> Result<Vec<ArcId>, ResolveError> {
        let mut arcs = Vec::new();
        for direction in [Direction::Incoming, Direction::Outgoing] {
            for arc in graph.active_arcs(node, direction)? {
                let data = graph.arc(arc)?;
                let neighbour = match direction {
                    Direction::Incoming => data.source,
                    Direction::Outgoing => data.target,
                };
                arcs.push(ModelArc {
                    arc,
                    direction,
                    neighbour,
                    distance: graph.arc_distance(arc)?,
                });
            }
        }
        // Oldest first.
        arcs.sort_by_key(|a| a.arc);

        let m = arcs.len();
        if m > self.max_model_arcs || m >= u64::BITS as usize {
            return Err(ResolveError::InfeasibleDisambiguation {
                node,
                reason: format!(
                    "{} incident arcs exceed the model limit of {}",
                    m, self.max_model_arcs
                ),
            });
        }

        let constraints = self.constraints(graph, node, &arcs)?;

        let mut best: Option<(u32, f64, u64, u64)> = None;
        for mask in 0..(1u64 << m) {
            if !constraints.iter().all(|c| c.satisfied(mask)) {
                continue;
            }
            let kept = mask.count_ones();
            let mut distance = 0.0;
            let mut age = 0u64;
            for (i, a) in arcs.iter().enumerate() {
                if mask & (1 << i) != 0 {
                    distance += a.distance;
                    age |= 1 << (m - 1 - i);
                }
            }
            let better = match best {
                None => true,
                Some((bk, bd, ba, _)) => {
                    kept > bk || (kept == bk && (distance < bd || (distance == bd && age > ba)))
                }
            };
            if better {
                best = Some((kept, distance, age, mask));
            }
        }

        let (_, _, _, mask) = best.ok_or_else(|| ResolveError::InfeasibleDisambiguation {
            node,
            reason: "no arc selection satisfies the degree and continuity constraints".to_string(),
        })?;

        Ok(arcs
            .iter()
            .enumerate()
            .filter(|&(i, _)| mask & (1 << i) == 0)
            .map(|(_, a)| a.arc)
            .collect())
    }

    fn constraints(
        &self,
        graph: &HypothesesGraph,
        node: NodeId,
        arcs: &[ModelArc],
    ) -> Result<Vec<DegreeConstraint>, ResolveError> {
        let mut own_in = 0u64;
        let mut own_out = 0u64;
        // Keyed by the neighbour and the side of the neighbour the arc lands on.
        let mut neighbours: BTreeMap<(NodeId, bool), u64> = BTreeMap::new();
        for (i, a) in arcs.iter().enumerate() {
            let bit = 1u64 << i;
            match a.direction {
                Direction::Incoming => {
                    own_in |= bit;
                    *neighbours.entry((a.neighbour, false)).or_default() |= bit;
                }
                Direction::Outgoing => {
                    own_out |= bit;
                    *neighbours.entry((a.neighbour, true)).or_default() |= bit;
                }
            }
        }

        let mut constraints = vec![
            DegreeConstraint {
                members: own_in,
                fixed: 0,
                limit: self.limits.max_incoming,
                keep_one: own_in != 0,
            },
            DegreeConstraint {
                members: own_out,
                fixed: 0,
                limit: self.limits.max_outgoing,
                keep_one: false,
            },
        ];

        // A neighbour over its own limit will be trimmed when its turn comes, so at
        // most `limit` of its outside arcs count as fixed.
        for ((neighbour, is_target), members) in neighbours {
            let in_model = members.count_ones() as usize;
            let constraint = if is_target {
                let outside = graph.active_in_arcs(neighbour)?.len().saturating_sub(in_model);
                DegreeConstraint {
                    members,
                    fixed: outside.min(self.limits.max_incoming),
                    limit: self.limits.max_incoming,
                    keep_one: outside == 0,
                }
            } else {
                let outside = graph.active_out_arcs(neighbour)?.len().saturating_sub(in_model);
                DegreeConstraint {
                    members,
                    fixed: outside.min(self.limits.max_outgoing),
                    limit: self.limits.max_outgoing,
                    keep_one: false,
                }
            };
            constraints.push(constraint);
        }
        Ok(constraints)
    }
}

impl ArcDisambiguator for ModelDisambiguator {
    fn name(&self) -> &'static str {
        "model"
    }

    fn resolve(&self, graph: &mut HypothesesGraph) -> Result<DisambiguationReport, ResolveError> {
        let mut report = DisambiguationReport::default();
        let nodes: Vec<NodeId> = graph.nodes().collect();

        for node in nodes {
            if !is_ambiguous(graph, node, &self.limits)? {
                continue;
            }
            match self.solve(graph, node) {
                Ok(dropped) => {
                    for arc in dropped {
                        graph.set_arc_active(arc, false)?;
                        report.deactivated.push(arc);
                    }
                }
                Err(error @ ResolveError::InfeasibleDisambiguation { .. }) => {
                    warn!("Model disambiguation failed at {}: {}", node, error);
                    report.failures.push(failure(graph, node, error)?);
                }
                Err(error) => return Err(error),
            }
        }

        info!(
            "Model disambiguation deactivated {} arcs, {} nodes infeasible",
            report.deactivated.len(),
            report.failures.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traxel::Traxel;

    fn node(graph: &mut HypothesesGraph, id: u32, t: i32) -> NodeId {
        let n = graph.add_node(Traxel::new(id, t));
        graph.set_node_active2(n, 1).unwrap();
        n
    }

    fn link(graph: &mut HypothesesGraph, from: NodeId, to: NodeId, distance: f64) -> ArcId {
        let a = graph.add_arc(from, to).unwrap();
        graph.set_arc_active(a, true).unwrap();
        graph.set_arc_distance(a, distance).unwrap();
        a
    }

    fn active(graph: &HypothesesGraph, arc: ArcId) -> bool {
        graph.arc_active(arc).unwrap()
    }

    #[test]
    fn test_greedy_drops_longest_arc() {
        let mut graph = HypothesesGraph::with_tracking_properties();
        let p = node(&mut graph, 1, 0);
        let a = node(&mut graph, 1, 1);
        let b = node(&mut graph, 2, 1);
        let c = node(&mut graph, 3, 1);
        let pa = link(&mut graph, p, a, 1.0);
        let pb = link(&mut graph, p, b, 5.0);
        let pc = link(&mut graph, p, c, 3.0);

        let report = GreedyDisambiguator::default().resolve(&mut graph).unwrap();

        assert_eq!(report.deactivated, vec![pb]);
        assert!(active(&graph, pa));
        assert!(!active(&graph, pb));
        assert!(active(&graph, pc));
    }

    #[test]
    fn test_greedy_tie_drops_newest_arc() {
        let mut graph = HypothesesGraph::with_tracking_properties();
        let a = node(&mut graph, 1, 0);
        let b = node(&mut graph, 2, 0);
        let c = node(&mut graph, 1, 1);
        let older = link(&mut graph, a, c, 2.0);
        let newer = link(&mut graph, b, c, 2.0);

        let report = GreedyDisambiguator::default().resolve(&mut graph).unwrap();

        assert_eq!(report.deactivated, vec![newer]);
        assert!(active(&graph, older));
    }

    #[test]
    fn test_greedy_skips_inactive_nodes() {
        let mut graph = HypothesesGraph::with_tracking_properties();
        let a = node(&mut graph, 1, 0);
        let b = node(&mut graph, 2, 0);
        let c = graph.add_node(Traxel::new(1, 1));
        graph.set_node_active2(c, 0).unwrap();
        link(&mut graph, a, c, 1.0);
        link(&mut graph, b, c, 2.0);

        let report = GreedyDisambiguator::default().resolve(&mut graph).unwrap();
        assert!(report.deactivated.is_empty());
    }

    #[test]
    fn test_model_keeps_track_continuity() {
        // p has three successors with room for two. Only `a` has no other
        // predecessor, so it must stay even though its arc is the longest.
        let limits = DegreeLimits {
            max_incoming: 2,
            max_outgoing: 2,
        };
        let mut graph = HypothesesGraph::with_tracking_properties();
        let p = node(&mut graph, 1, 0);
        let q = node(&mut graph, 2, 0);
        let a = node(&mut graph, 1, 1);
        let b = node(&mut graph, 2, 1);
        let c = node(&mut graph, 3, 1);
        let pa = link(&mut graph, p, a, 9.0);
        let pb = link(&mut graph, p, b, 1.0);
        let pc = link(&mut graph, p, c, 2.0);
        link(&mut graph, q, b, 1.0);
        link(&mut graph, q, c, 1.0);

        let mut greedy_graph = graph.clone();
        GreedyDisambiguator::new(limits).resolve(&mut greedy_graph).unwrap();
        assert!(!active(&greedy_graph, pa));

        let report = ModelDisambiguator::new(limits, 16).resolve(&mut graph).unwrap();
        assert!(report.failures.is_empty());
        assert_eq!(report.deactivated, vec![pc]);
        assert!(active(&graph, pa));
        assert!(active(&graph, pb));
    }

    #[test]
    fn test_model_prefers_short_then_old_arcs() {
        let mut graph = HypothesesGraph::with_tracking_properties();
        let a = node(&mut graph, 1, 0);
        let b = node(&mut graph, 2, 0);
        let c = node(&mut graph, 3, 0);
        let x = node(&mut graph, 1, 1);
        link(&mut graph, a, x, 4.0);
        let short = link(&mut graph, b, x, 1.0);
        link(&mut graph, c, x, 4.0);

        ModelDisambiguator::default().resolve(&mut graph).unwrap();
        assert_eq!(graph.active_in_arcs(x).unwrap(), vec![short]);

        // Equal distances: the oldest arc survives.
        let mut graph = HypothesesGraph::with_tracking_properties();
        let a = node(&mut graph, 1, 0);
        let b = node(&mut graph, 2, 0);
        let x = node(&mut graph, 1, 1);
        let old = link(&mut graph, a, x, 2.0);
        link(&mut graph, b, x, 2.0);

        ModelDisambiguator::default().resolve(&mut graph).unwrap();
        assert_eq!(graph.active_in_arcs(x).unwrap(), vec![old]);
    }

    #[test]
    fn test_model_infeasible_leaves_node_untouched() {
        // Out-limit 1, but both successors depend on p as their only predecessor.
        let limits = DegreeLimits {
            max_incoming: 1,
            max_outgoing: 1,
        };
        let mut graph = HypothesesGraph::with_tracking_properties();
        let p = node(&mut graph, 7, 0);
        let a = node(&mut graph, 1, 1);
        let b = node(&mut graph, 2, 1);
        link(&mut graph, p, a, 1.0);
        link(&mut graph, p, b, 1.0);
        let before = graph.clone();

        let report = ModelDisambiguator::new(limits, 16).resolve(&mut graph).unwrap();

        assert!(report.deactivated.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].node, p);
        assert_eq!(report.failures[0].traxel_id, 7);
        assert!(matches!(
            report.failures[0].error,
            ResolveError::InfeasibleDisambiguation { node, .. } if node == p
        ));
        assert_eq!(graph, before);
    }

    #[test]
    fn test_model_handles_over_limit_neighbour() {
        // x is visited before its predecessor a, which itself has four successors.
        let limits = DegreeLimits {
            max_incoming: 2,
            max_outgoing: 2,
        };
        let mut graph = HypothesesGraph::with_tracking_properties();
        let x = node(&mut graph, 1, 1);
        let a = node(&mut graph, 1, 0);
        let b = node(&mut graph, 2, 0);
        let c = node(&mut graph, 3, 0);
        let d = node(&mut graph, 4, 0);
        let y = node(&mut graph, 2, 1);
        let z = node(&mut graph, 3, 1);
        let w = node(&mut graph, 4, 1);
        let ax = link(&mut graph, a, x, 1.0);
        let bx = link(&mut graph, b, x, 1.0);
        let cx = link(&mut graph, c, x, 1.0);
        let ay = link(&mut graph, a, y, 1.0);
        let az = link(&mut graph, a, z, 2.0);
        let aw = link(&mut graph, a, w, 1.0);
        link(&mut graph, d, y, 1.0);
        link(&mut graph, d, z, 1.0);

        let report = ModelDisambiguator::new(limits, 16).resolve(&mut graph).unwrap();

        assert!(report.failures.is_empty(), "{:?}", report.failures);
        assert_eq!(report.deactivated, vec![ax, az]);
        assert_eq!(graph.active_in_arcs(x).unwrap(), vec![bx, cx]);
        assert_eq!(graph.active_out_arcs(a).unwrap(), vec![ay, aw]);
    }

    #[test]
    fn test_model_over_cap_is_reported() {
        let mut graph = HypothesesGraph::with_tracking_properties();
        let x = node(&mut graph, 1, 1);
        for id in 1..=3 {
            let src = node(&mut graph, id, 0);
            link(&mut graph, src, x, 1.0);
        }

        let report = ModelDisambiguator::new(DegreeLimits::default(), 2)
            .resolve(&mut graph)
            .unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(graph.active_in_arcs(x).unwrap().len(), 3);
    }

    #[test]
    fn test_consistent_graph_is_a_no_op() {
        let mut graph = HypothesesGraph::with_tracking_properties();
        let a = node(&mut graph, 1, 0);
        let b = node(&mut graph, 1, 1);
        let c = node(&mut graph, 2, 1);
        let d = node(&mut graph, 1, 2);
        link(&mut graph, a, b, 1.0);
        link(&mut graph, a, c, 2.0);
        link(&mut graph, b, d, 1.0);
        let before = graph.clone();

        let disambiguators: [Box<dyn ArcDisambiguator>; 2] = [
            Box::new(GreedyDisambiguator::default()),
            Box::new(ModelDisambiguator::default()),
        ];
        for disambiguator in &disambiguators {
            let report = disambiguator.resolve(&mut graph).unwrap();
            assert_eq!(report, DisambiguationReport::default(), "{}", disambiguator.name());
            assert_eq!(graph, before);
        }
    }

    #[test]
    fn test_second_pass_is_a_no_op() {
        let mut graph = HypothesesGraph::with_tracking_properties();
        let a = node(&mut graph, 1, 0);
        let b = node(&mut graph, 2, 0);
        let c = node(&mut graph, 1, 1);
        link(&mut graph, a, c, 1.0);
        link(&mut graph, b, c, 3.0);

        let model = ModelDisambiguator::default();
        model.resolve(&mut graph).unwrap();
        let once = graph.clone();
        let report = model.resolve(&mut graph).unwrap();

        assert!(report.deactivated.is_empty());
        assert_eq!(graph, once);
    }
}
