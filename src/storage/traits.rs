//! Storage trait definitions

use crate::graph::{Edge, GraphId, Node, StoredEmbedding, TopologyLevel};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParse(String),

    #[error("Corrupt row for '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Everything persisted for one graph
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    /// Nodes in insertion order
    pub nodes: Vec<Node>,
    /// Edges in insertion order
    pub edges: Vec<Edge>,
}

impl GraphSnapshot {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// Rows actually written by [`GraphStore::insert_batch`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub nodes_inserted: usize,
    pub edges_inserted: usize,
}

/// Trait for graph storage backends
///
/// Implementations must be thread-safe (Send + Sync) to support
/// concurrent access from multiple threads.
pub trait GraphStore: Send + Sync {
    // === Graph Operations ===

    /// List all graph IDs. A graph exists once a batch has been inserted
    /// into it.
    fn list_graphs(&self) -> StorageResult<Vec<GraphId>>;

    /// Load every node and edge of a graph. A missing graph loads as empty.
    fn load_graph(&self, graph_id: &GraphId) -> StorageResult<GraphSnapshot>;

    /// Load the embeddings of every node that has one
    fn load_embeddings(&self, graph_id: &GraphId) -> StorageResult<Vec<StoredEmbedding>>;

    // === Writes ===

    /// Insert nodes, then edges, in a single transaction, registering the
    /// graph first if it is new.
    ///
    /// A node whose key already exists, or an edge whose `(from, to)` pair
    /// already exists, is silently skipped. Any other failure rolls back the
    /// whole batch.
    fn insert_batch(&self, graph_id: &GraphId, nodes: &[Node], edges: &[Edge]) -> StorageResult<InsertOutcome>;

    /// Overwrite the cached topology of the given nodes, in one transaction
    fn write_topology(&self, graph_id: &GraphId, levels: &[TopologyLevel]) -> StorageResult<()>;

    /// Overwrite embeddings and their model versions; returns rows updated
    fn update_embeddings(&self, graph_id: &GraphId, embeddings: &[StoredEmbedding]) -> StorageResult<usize>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: GraphStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
