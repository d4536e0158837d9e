//! Edge validation against a working graph
//!
//! Candidates are checked in input order with strict precedence, and each
//! accepted arc is added to the working graph immediately so that the whole
//! batch is cycle-safe, not just each edge in isolation:
//!
//! 1. bad edge: an endpoint is not a known vertex
//! 2. duplicate: the arc already exists (persisted or accepted this pass)
//! 3. cycle: the target can already reach the source
//!
//! Cheap structural checks run before the O(V+E) reachability check, and a
//! malformed edge is never reported as a cycle.

use crate::graph::{BusinessKey, CandidateEdge};
use crate::topology::{self, Adjacency};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};

/// Why a candidate edge was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// An endpoint is not a known vertex
    BadEdge,
    /// The arc is already present
    Duplicate,
    /// Accepting the arc would close a cycle
    Cycle,
    /// Both endpoints collapsed onto the same concept during resolution
    SelfLoop,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadEdge => write!(f, "bad_edge"),
            Self::Duplicate => write!(f, "duplicate"),
            Self::Cycle => write!(f, "cycle"),
            Self::SelfLoop => write!(f, "self_loop"),
        }
    }
}

/// Count of skipped edges by reason
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SkipTally {
    pub bad_edge: usize,
    pub duplicate: usize,
    pub cycle: usize,
    pub self_loop: usize,
}

impl SkipTally {
    pub fn record(&mut self, reason: RejectionReason) {
        match reason {
            RejectionReason::BadEdge => self.bad_edge += 1,
            RejectionReason::Duplicate => self.duplicate += 1,
            RejectionReason::Cycle => self.cycle += 1,
            RejectionReason::SelfLoop => self.self_loop += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.bad_edge + self.duplicate + self.cycle + self.self_loop
    }
}

/// A candidate edge that was turned down
#[derive(Debug, Clone)]
pub struct RejectedEdge {
    /// Position in the input
    pub index: usize,
    pub edge: CandidateEdge,
    pub reason: RejectionReason,
}

/// In-memory directed graph mutated by a validation pass
///
/// Holds every known vertex, including isolated ones, and every arc known
/// so far.
#[derive(Debug, Clone, Default)]
pub struct WorkingGraph {
    vertices: HashSet<String>,
    arcs: HashSet<(String, String)>,
    adjacency: Adjacency,
}

impl WorkingGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a vertex set and the existing arcs. Arcs are added as-is,
    /// even if they reference unknown vertices.
    pub fn from_parts<V, A, S>(vertices: V, arcs: A) -> Self
    where
        V: IntoIterator<Item = S>,
        A: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let mut graph = Self::new();
        for vertex in vertices {
            graph.add_vertex(vertex);
        }
        for (from, to) in arcs {
            graph.add_arc(from, to);
        }
        graph
    }

    pub fn add_vertex(&mut self, key: impl Into<String>) {
        self.vertices.insert(key.into());
    }

    /// Add an arc; returns false if it was already present.
    pub fn add_arc(&mut self, from: impl Into<String>, to: impl Into<String>) -> bool {
        let from = from.into();
        let to = to.into();
        if !self.arcs.insert((from.clone(), to.clone())) {
            return false;
        }
        self.adjacency.entry(from).or_default().push(to);
        true
    }

    pub fn contains_vertex(&self, key: &str) -> bool {
        self.vertices.contains(key)
    }

    pub fn contains_arc(&self, from: &str, to: &str) -> bool {
        // HashSet<(String, String)> cannot be probed with (&str, &str)
        self.adjacency
            .get(from)
            .is_some_and(|targets| targets.iter().any(|t| t == to))
    }

    pub fn vertices(&self) -> &HashSet<String> {
        &self.vertices
    }

    pub fn adjacency(&self) -> &Adjacency {
        &self.adjacency
    }

    /// Classify a candidate arc without mutating the graph.
    pub fn check(&self, from: &BusinessKey, to: &BusinessKey) -> Option<RejectionReason> {
        let (from, to) = (from.as_str(), to.as_str());
        if !self.contains_vertex(from) || !self.contains_vertex(to) {
            return Some(RejectionReason::BadEdge);
        }
        if self.contains_arc(from, to) {
            return Some(RejectionReason::Duplicate);
        }
        if topology::would_create_cycle(&self.adjacency, from, to) {
            return Some(RejectionReason::Cycle);
        }
        None
    }
}

/// Result of a validation pass
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    /// Accepted edges, in input order
    pub accepted: Vec<CandidateEdge>,
    pub rejected: Vec<RejectedEdge>,
    pub tally: SkipTally,
}

/// Filters candidate edges against a working graph
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeValidator;

impl EdgeValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate `candidates` in order, adding accepted arcs to `working`.
    pub fn validate(&self, working: &mut WorkingGraph, candidates: &[CandidateEdge]) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();

        for (index, candidate) in candidates.iter().enumerate() {
            let (from, to) = candidate.relation.arc();
            match working.check(from, to) {
                Some(reason) => {
                    debug!(index, from = %from, to = %to, %reason, "edge rejected");
                    outcome.tally.record(reason);
                    outcome.rejected.push(RejectedEdge {
                        index,
                        edge: candidate.clone(),
                        reason,
                    });
                }
                None => {
                    working.add_arc(from.as_str(), to.as_str());
                    outcome.accepted.push(candidate.clone());
                }
            }
        }

        info!(
            candidates = candidates.len(),
            accepted = outcome.accepted.len(),
            bad_edge = outcome.tally.bad_edge,
            duplicate = outcome.tally.duplicate,
            cycle = outcome.tally.cycle,
            "edge validation complete"
        );

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Relation;

    fn prereq(from: &str, to: &str) -> CandidateEdge {
        CandidateEdge::new(Relation::prerequisite(from, to))
    }

    fn arcs(edges: &[CandidateEdge]) -> Vec<(String, String)> {
        edges
            .iter()
            .map(|e| {
                let (f, t) = e.relation.arc();
                (f.to_string(), t.to_string())
            })
            .collect()
    }

    #[test]
    fn duplicate_then_cycle_then_accept() {
        let mut working = WorkingGraph::from_parts(["A", "B", "C", "D"], [("C", "A")]);
        let candidates = vec![prereq("C", "A"), prereq("A", "C"), prereq("A", "D")];

        let outcome = EdgeValidator::new().validate(&mut working, &candidates);

        assert_eq!(arcs(&outcome.accepted), vec![("A".to_string(), "D".to_string())]);
        assert_eq!(outcome.tally.duplicate, 1);
        assert_eq!(outcome.tally.cycle, 1);
        assert_eq!(outcome.tally.bad_edge, 0);
        assert_eq!(outcome.rejected[0].index, 0);
        assert_eq!(outcome.rejected[0].reason, RejectionReason::Duplicate);
        assert_eq!(outcome.rejected[1].reason, RejectionReason::Cycle);
    }

    #[test]
    fn unknown_endpoint_beats_cycle() {
        // "Z" is unknown; even though Z -> A could never be checked for a
        // cycle, it must be tallied as a bad edge.
        let mut working = WorkingGraph::from_parts(["A", "B"], [("A", "B")]);
        let outcome = EdgeValidator::new().validate(&mut working, &[prereq("B", "Z"), prereq("Z", "A")]);

        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.tally.bad_edge, 2);
        assert_eq!(outcome.tally.cycle, 0);
    }

    #[test]
    fn accepted_edges_are_visible_to_later_candidates() {
        let mut working = WorkingGraph::from_parts(["A", "B", "C"], Vec::<(&str, &str)>::new());
        let candidates = vec![prereq("A", "B"), prereq("B", "C"), prereq("C", "A"), prereq("A", "B")];

        let outcome = EdgeValidator::new().validate(&mut working, &candidates);

        assert_eq!(outcome.accepted.len(), 2);
        assert_eq!(outcome.tally.cycle, 1);
        assert_eq!(outcome.tally.duplicate, 1);
        assert!(working.contains_arc("A", "B"));
        assert!(working.contains_arc("B", "C"));
        assert!(!working.contains_arc("C", "A"));
    }

    #[test]
    fn self_loop_on_known_vertex_is_a_cycle() {
        let mut working = WorkingGraph::from_parts(["A"], Vec::<(&str, &str)>::new());
        let outcome = EdgeValidator::new().validate(&mut working, &[prereq("A", "A")]);
        assert_eq!(outcome.tally.cycle, 1);
    }

    #[test]
    fn isolated_vertices_are_valid_endpoints() {
        let mut working = WorkingGraph::from_parts(["lonely", "other"], Vec::<(&str, &str)>::new());
        let outcome = EdgeValidator::new().validate(&mut working, &[prereq("lonely", "other")]);
        assert_eq!(outcome.accepted.len(), 1);
    }

    #[test]
    fn hierarchy_is_checked_as_parent_to_child() {
        let mut working = WorkingGraph::from_parts(["calc", "limits"], [("limits", "calc")]);
        let outcome = EdgeValidator::new().validate(
            &mut working,
            &[CandidateEdge::new(Relation::hierarchy("calc", "limits"))],
        );
        assert_eq!(outcome.tally.cycle, 1);
    }

    #[test]
    fn accepted_batch_stays_acyclic() {
        let keys = ["a", "b", "c", "d", "e"];
        let mut working = WorkingGraph::from_parts(keys, Vec::<(&str, &str)>::new());
        let mut candidates = Vec::new();
        for from in keys {
            for to in keys {
                candidates.push(prereq(from, to));
            }
        }

        EdgeValidator::new().validate(&mut working, &candidates);

        assert!(topology::compute_levels(working.vertices(), working.adjacency()).is_ok());
    }

    #[test]
    fn tally_total_sums_reasons() {
        let mut tally = SkipTally::default();
        tally.record(RejectionReason::BadEdge);
        tally.record(RejectionReason::Cycle);
        tally.record(RejectionReason::SelfLoop);
        assert_eq!(tally.total(), 3);
    }
}
