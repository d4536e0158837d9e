//! Cancelling a build in flight
//!
//! The coordinator checks the token at every stage boundary up to the start
//! of persist. After that the batch commits or rolls back as a whole and a
//! cancel is no longer observed.

use super::error::{BuildError, BuildFailure, BuildStage};
use crate::graph::GraphId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Handle shared between the caller and a running build.
///
/// Clones observe the same flag, so the caller keeps one and passes another
/// to [`GraphBuildCoordinator::build_from_document_with_cancel`](super::GraphBuildCoordinator::build_from_document_with_cancel).
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    requested: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the build to stop at its next stage boundary.
    pub fn cancel(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Fail with [`BuildFailure::Cancelled`] tagged with `stage` if a cancel
    /// was requested.
    pub(crate) fn check(&self, graph_id: &GraphId, stage: BuildStage) -> Result<(), BuildError> {
        if self.is_cancelled() {
            info!(graph_id = %graph_id, stage = %stage, "build cancelled");
            return Err(BuildError::new(graph_id, stage, BuildFailure::Cancelled));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_passes_until_cancelled() {
        let graph = GraphId::from("g");
        let token = CancellationToken::new();
        assert!(token.check(&graph, BuildStage::Extract).is_ok());

        token.clone().cancel();
        let err = token.check(&graph, BuildStage::Persist).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.stage, BuildStage::Persist);
        assert_eq!(err.graph_id, graph);
    }
}
