//! Merger for combining candidate graphs
//!
//! Pure, in-memory, business-key space: no database identities involved.

use crate::graph::{BusinessKey, CandidateEdge, CandidateGraph, CandidateNode, RelationKind};
use std::collections::{HashMap, HashSet};

/// Identity of an edge for deduplication: relation kind plus ordered
/// endpoints (parent/child for hierarchy, from/to for prerequisite).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EdgeSignature {
    pub kind: RelationKind,
    pub first: BusinessKey,
    pub second: BusinessKey,
}

impl EdgeSignature {
    pub fn of(edge: &CandidateEdge) -> Self {
        let (first, second) = edge.relation.arc();
        Self {
            kind: edge.relation.kind(),
            first: first.clone(),
            second: second.clone(),
        }
    }
}

/// Merges N candidate graphs into one
///
/// - Nodes are keyed by business key. When a key appears in more than one
///   source, the copy with the longer description wins; ties keep the
///   first seen.
/// - Edges are keyed by [`EdgeSignature`]; the first occurrence wins.
///
/// Output order is first-seen order for both nodes and edges.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphMerger;

impl GraphMerger {
    pub fn new() -> Self {
        Self
    }

    /// Merge `graphs` in order.
    pub fn merge<'a, I>(&self, graphs: I) -> CandidateGraph
    where
        I: IntoIterator<Item = &'a CandidateGraph>,
    {
        let mut order: Vec<BusinessKey> = Vec::new();
        let mut nodes: HashMap<BusinessKey, CandidateNode> = HashMap::new();
        let mut seen_edges: HashSet<EdgeSignature> = HashSet::new();
        let mut edges: Vec<CandidateEdge> = Vec::new();

        for graph in graphs {
            for node in &graph.nodes {
                match nodes.get_mut(&node.key) {
                    Some(existing) => {
                        if node.description_len() > existing.description_len() {
                            *existing = node.clone();
                        }
                    }
                    None => {
                        order.push(node.key.clone());
                        nodes.insert(node.key.clone(), node.clone());
                    }
                }
            }

            for edge in &graph.edges {
                if seen_edges.insert(EdgeSignature::of(edge)) {
                    edges.push(edge.clone());
                }
            }
        }

        let nodes = order
            .into_iter()
            .filter_map(|key| nodes.remove(&key))
            .collect();

        CandidateGraph { nodes, edges }
    }
}
