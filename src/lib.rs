//! prereq-graph: Incremental Prerequisite Knowledge-Graph Engine
//!
//! Turns documents into a persisted, cycle-free graph of concepts and their
//! prerequisite relations, and keeps that graph consistent as more
//! documents arrive.
//!
//! # Core Concepts
//!
//! - **Candidate graphs**: extraction batches keyed by business keys
//!   (normalized concept names), merged before anything is persisted
//! - **Entity resolution**: embedding similarity folds near-duplicate
//!   concepts into one, within a batch and against the persisted graph
//! - **Edge validation**: every accepted edge keeps the graph acyclic;
//!   rejected edges are tallied, never persisted
//! - **Topology**: each node's level (longest prerequisite chain) and
//!   dependents count, recomputed after every build
//!
//! # Example
//!
//! ```no_run
//! use prereq_graph::{
//!     BuildConfig, CommandExtractor, CommandExtractorConfig, GraphBuildCoordinator, GraphId,
//!     OpenStore, SqliteStore,
//! };
//! # use prereq_graph::{EmbeddingError, EmbeddingProvider};
//! # struct MyEmbedder;
//! # #[async_trait::async_trait]
//! # impl EmbeddingProvider for MyEmbedder {
//! #     fn model_version(&self) -> &str { "v1" }
//! #     async fn embed(&self, _: &str) -> Result<Vec<f32>, EmbeddingError> { Ok(vec![1.0]) }
//! # }
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(SqliteStore::open("graphs.db")?);
//! let extractor = CommandExtractor::new(CommandExtractorConfig::default());
//! let coordinator =
//!     GraphBuildCoordinator::new(store, Arc::new(extractor), Arc::new(MyEmbedder), BuildConfig::default());
//!
//! let report = coordinator
//!     .build_from_document(&GraphId::from("calculus"), "Limits come before derivatives.", true, None)
//!     .await?;
//! println!("{} new concepts", report.nodes_created);
//! # Ok(())
//! # }
//! ```

pub mod build;
pub mod extract;
mod graph;
pub mod merge;
pub mod resolve;
pub mod retry;
pub mod storage;
pub mod topology;
pub mod validate;

pub use build::{
    BuildConfig, BuildError, BuildFailure, BuildReport, BuildStage, CancellationToken, ConfigError,
    GraphBuildCoordinator, GraphLocks, GraphStats, GraphValidation, LeveledNode, ReembedReport,
};
pub use extract::{CommandExtractor, CommandExtractorConfig, DocumentChunk, ExtractionError, Extractor};
pub use graph::{
    BusinessKey, CandidateEdge, CandidateGraph, CandidateNode, Edge, GraphId, Node, Relation, RelationKind,
    StoredEmbedding, Topology, TopologyLevel,
};
pub use merge::GraphMerger;
#[cfg(feature = "embeddings")]
pub use resolve::FastEmbedEmbedder;
pub use resolve::{
    CanonicalPolicy, EmbeddingError, EmbeddingProvider, EntityResolver, MatchScope, Resolution, ResolverConfig,
    SimilarityDecision,
};
pub use retry::RetryPolicy;
pub use storage::{GraphSnapshot, GraphStore, InsertOutcome, OpenStore, SqliteStore, StorageError, StorageResult};
pub use topology::TopologyError;
pub use validate::{EdgeValidator, RejectionReason, SkipTally, WorkingGraph};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
