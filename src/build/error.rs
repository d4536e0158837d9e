//! Build errors, tagged with the stage that failed

use crate::graph::GraphId;
use crate::resolve::ResolveError;
use crate::storage::StorageError;
use crate::topology::TopologyError;
use serde::Serialize;
use thiserror::Error;

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStage {
    LoadExisting,
    Extract,
    Merge,
    Resolve,
    Preflight,
    Persist,
    RecomputeTopology,
    Report,
}

impl BuildStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStage::LoadExisting => "load_existing",
            BuildStage::Extract => "extract",
            BuildStage::Merge => "merge",
            BuildStage::Resolve => "resolve",
            BuildStage::Preflight => "preflight",
            BuildStage::Persist => "persist",
            BuildStage::RecomputeTopology => "recompute_topology",
            BuildStage::Report => "report",
        }
    }
}

impl std::fmt::Display for BuildStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What went wrong
#[derive(Debug, Error)]
pub enum BuildFailure {
    /// Every chunk failed (or there were no chunks)
    #[error("extraction failed for all {chunks} chunk(s){}", suffix(.last_error))]
    Extraction { chunks: usize, last_error: Option<String> },

    #[error("entity resolution failed: {0}")]
    Resolution(#[from] ResolveError),

    #[error("storage error: {0}")]
    Persistence(#[from] StorageError),

    /// The persisted graph broke an invariant the pipeline maintains
    #[error("graph invariant violated: {0}")]
    InvariantViolation(#[from] TopologyError),

    #[error("build cancelled")]
    Cancelled,

    #[error("background task failed: {0}")]
    Task(String),
}

fn suffix(detail: &Option<String>) -> String {
    detail.as_ref().map(|d| format!(": {}", d)).unwrap_or_default()
}

/// A hard build failure, carrying the graph and the stage it happened in
#[derive(Debug, Error)]
#[error("build of graph '{graph_id}' failed at {stage}: {failure}")]
pub struct BuildError {
    pub graph_id: GraphId,
    pub stage: BuildStage,
    #[source]
    pub failure: BuildFailure,
}

impl BuildError {
    pub fn new(graph_id: &GraphId, stage: BuildStage, failure: impl Into<BuildFailure>) -> Self {
        Self {
            graph_id: graph_id.clone(),
            stage,
            failure: failure.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.failure, BuildFailure::Cancelled)
    }
}
