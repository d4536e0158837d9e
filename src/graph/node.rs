//! Concept node representation

use super::ids::BusinessKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cached topology of a node, derived from the prerequisite edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    /// 0 when the node has no prerequisites, else 1 + max level of its prerequisites
    pub level: usize,
    /// Number of outgoing prerequisite edges
    pub dependents_count: usize,
}

/// A persisted concept in a prerequisite graph
///
/// Nodes are append-only: the build pipeline never edits or deletes them.
/// Only the embedding (re-embedding pass) and the cached topology
/// (recompute step) are ever rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Business key, unique within a graph
    pub key: BusinessKey,
    /// Human-readable name
    pub display_name: String,
    /// Optional free-text description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Embedding of the node fingerprint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Model that produced `embedding`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model_version: Option<String>,
    /// When the node was created
    pub created_at: DateTime<Utc>,
    /// Cached topology, absent until the first recompute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<Topology>,
}

impl Node {
    /// Create a new node without embedding or topology
    pub fn new(key: BusinessKey, display_name: impl Into<String>) -> Self {
        Self {
            key,
            display_name: display_name.into(),
            description: None,
            embedding: None,
            embedding_model_version: None,
            created_at: Utc::now(),
            topology: None,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach an embedding produced by `model_version`
    pub fn with_embedding(mut self, embedding: Vec<f32>, model_version: impl Into<String>) -> Self {
        self.embedding = Some(embedding);
        self.embedding_model_version = Some(model_version.into());
        self
    }

    /// Description length in characters, 0 when absent
    pub fn description_len(&self) -> usize {
        self.description.as_deref().map_or(0, |d| d.chars().count())
    }
}

/// Derived topology written back for one node after a recompute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyLevel {
    pub key: BusinessKey,
    pub level: usize,
    pub dependents_count: usize,
}

/// A persisted embedding, as read for cross-batch deduplication
#[derive(Debug, Clone)]
pub struct StoredEmbedding {
    pub key: BusinessKey,
    pub embedding: Vec<f32>,
    pub model_version: Option<String>,
}
