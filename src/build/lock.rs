//! Per-graph write serialization within one process

use crate::graph::GraphId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per graph id, created on first use.
///
/// Only covers builds sharing this `GraphLocks` (in practice, one
/// coordinator). Writers in other processes are not serialized.
#[derive(Debug, Default)]
pub struct GraphLocks {
    locks: DashMap<GraphId, Arc<Mutex<()>>>,
}

impl GraphLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `graph_id`.
    pub async fn acquire(&self, graph_id: &GraphId) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the shard lock is released before awaiting
        let lock = self
            .locks
            .entry(graph_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Number of graphs that have been locked at least once
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
