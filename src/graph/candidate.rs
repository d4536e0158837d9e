//! Candidate graphs: extraction batches in business-key space
//!
//! A candidate graph is what an extractor produces for one chunk, and what
//! the merger combines. It never reaches the store as-is.

use super::edge::{Edge, Relation};
use super::ids::BusinessKey;
use super::node::Node;
use serde::{Deserialize, Serialize};

/// A concept proposed by an extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateNode {
    pub key: BusinessKey,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CandidateNode {
    /// Build a candidate whose key is derived from `name`
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            key: BusinessKey::from_name(&name),
            name,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Description length in characters, 0 when absent
    pub fn description_len(&self) -> usize {
        self.description.as_deref().map_or(0, |d| d.chars().count())
    }
}

impl From<&Node> for CandidateNode {
    fn from(node: &Node) -> Self {
        Self {
            key: node.key.clone(),
            name: node.display_name.clone(),
            description: node.description.clone(),
        }
    }
}

/// A relation proposed by an extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEdge {
    pub relation: Relation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f32>,
}

impl CandidateEdge {
    pub fn new(relation: Relation) -> Self {
        Self {
            relation,
            weight: None,
        }
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = Some(weight);
        self
    }
}

impl From<&Edge> for CandidateEdge {
    fn from(edge: &Edge) -> Self {
        Self {
            relation: edge.relation(),
            weight: edge.weight,
        }
    }
}

/// An in-memory candidate graph (e.g. one extraction batch, or a snapshot
/// of persisted nodes/edges converted for merging)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateGraph {
    #[serde(default)]
    pub nodes: Vec<CandidateNode>,
    #[serde(default)]
    pub edges: Vec<CandidateEdge>,
}

impl CandidateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, node: CandidateNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_edge(mut self, edge: CandidateEdge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Convert persisted nodes/edges into merge-friendly shape
    pub fn from_persisted(nodes: &[Node], edges: &[Edge]) -> Self {
        Self {
            nodes: nodes.iter().map(CandidateNode::from).collect(),
            edges: edges.iter().map(CandidateEdge::from).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}
