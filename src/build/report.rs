//! Build and validation reports

use crate::graph::{GraphId, Node};
use crate::validate::SkipTally;
use serde::Serialize;

/// Summary of a successful build
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildReport {
    pub graph_id: GraphId,
    /// Nodes actually written by this build
    pub nodes_created: usize,
    /// Edges actually written by this build
    pub prerequisites_created: usize,
    pub prerequisites_skipped: SkipTally,
    /// Candidates folded into another concept by entity resolution
    pub duplicates_resolved: usize,
    pub chunks_total: usize,
    pub chunks_failed: usize,
    /// Nodes in the graph after the build
    pub total_nodes: usize,
    /// Highest topological level after the build, if the graph has nodes
    pub max_level: Option<usize>,
}

/// Counts describing a persisted graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub max_level: Option<usize>,
    pub orphan_count: usize,
    pub nodes_with_embeddings: usize,
}

/// Health of a persisted graph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphValidation {
    /// No structural errors and no cycle
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub stats: GraphStats,
}

/// Outcome of a re-embedding pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReembedReport {
    /// Nodes looked at
    pub examined: usize,
    pub reembedded: usize,
    /// Stale nodes with nothing to embed
    pub skipped_empty: usize,
}

/// A persisted node with its cached topology, as listed by level
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeveledNode {
    pub key: String,
    pub display_name: String,
    pub level: Option<usize>,
    pub dependents_count: Option<usize>,
}

impl From<&Node> for LeveledNode {
    fn from(node: &Node) -> Self {
        Self {
            key: node.key.as_str().to_string(),
            display_name: node.display_name.clone(),
            level: node.topology.map(|t| t.level),
            dependents_count: node.topology.map(|t| t.dependents_count),
        }
    }
}
