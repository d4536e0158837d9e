//! Graph build coordinator
//!
//! Runs the build pipeline for one document against one graph:
//!
//! ```text
//! load existing -> extract -> merge -> resolve -> preflight -> persist -> recompute topology -> report
//! ```
//!
//! Nothing is written before persist. Persist is a single store
//! transaction, so a failed build leaves the graph as it was. Topology is
//! recomputed from a full reload after every successful persist.

use super::cancel::CancellationToken;
use super::config::BuildConfig;
use super::error::{BuildError, BuildFailure, BuildStage};
use super::lock::GraphLocks;
use super::report::{BuildReport, GraphStats, GraphValidation, LeveledNode, ReembedReport};
use crate::extract::{chunk_text, DocumentChunk, Extractor};
use crate::graph::{
    BusinessKey, CandidateEdge, CandidateGraph, CandidateNode, Edge, GraphId, Node, StoredEmbedding,
    TopologyLevel,
};
use crate::merge::GraphMerger;
use crate::resolve::{EmbeddingProvider, EntityResolver, Resolution};
use crate::storage::{GraphSnapshot, GraphStore, StorageResult};
use crate::topology::{self, Adjacency, TopologyResult};
use crate::validate::{EdgeValidator, RejectionReason, SkipTally, WorkingGraph};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Map an error into a [`BuildError`] tagged with `stage`.
fn at<'a, E: Into<BuildFailure>>(graph_id: &'a GraphId, stage: BuildStage) -> impl FnOnce(E) -> BuildError + 'a {
    move |e| BuildError::new(graph_id, stage, e)
}

/// Vertex set and adjacency of a persisted graph
fn structure(snapshot: &GraphSnapshot) -> (HashSet<String>, Adjacency) {
    let nodes = snapshot.nodes.iter().map(|n| n.key.as_str().to_string()).collect();
    let adj = topology::adjacency_from_arcs(snapshot.edges.iter().map(|e| (e.from.as_str(), e.to.as_str())));
    (nodes, adj)
}

/// Levels and out-degrees for every node of a persisted graph
fn derive_topology(snapshot: &GraphSnapshot) -> TopologyResult<Vec<TopologyLevel>> {
    let (nodes, adj) = structure(snapshot);
    let levels = topology::compute_levels(&nodes, &adj)?;
    let out_degree = topology::compute_out_degree(&nodes, &adj);

    Ok(snapshot
        .nodes
        .iter()
        .map(|node| TopologyLevel {
            key: node.key.clone(),
            level: levels.get(node.key.as_str()).copied().unwrap_or(0),
            dependents_count: out_degree.get(node.key.as_str()).copied().unwrap_or(0),
        })
        .collect())
}

/// What the pipeline intends to write, before preflight
struct PendingBatch {
    nodes: Vec<Node>,
    edges: Vec<CandidateEdge>,
    duplicates_resolved: usize,
    self_loops: usize,
}

/// Orchestrates document builds and graph maintenance
///
/// All collaborators are injected; the coordinator holds no global state.
pub struct GraphBuildCoordinator {
    store: Arc<dyn GraphStore>,
    extractor: Arc<dyn Extractor>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: BuildConfig,
    locks: Arc<GraphLocks>,
    merger: GraphMerger,
    validator: EdgeValidator,
}

impl GraphBuildCoordinator {
    pub fn new(
        store: Arc<dyn GraphStore>,
        extractor: Arc<dyn Extractor>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: BuildConfig,
    ) -> Self {
        Self {
            store,
            extractor,
            embedder,
            config,
            locks: Arc::new(GraphLocks::new()),
            merger: GraphMerger::new(),
            validator: EdgeValidator::new(),
        }
    }

    /// Share per-graph locks with other coordinators over the same store
    pub fn with_locks(mut self, locks: Arc<GraphLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    fn resolver(&self) -> EntityResolver {
        EntityResolver::new(Arc::clone(&self.embedder), self.config.resolver_config())
    }

    // === Build ===

    /// Build `text` into `graph_id`.
    ///
    /// With `incremental`, the persisted graph takes part in merging and new
    /// concepts are deduplicated against it by similarity. Without it, the
    /// document is extracted on its own; the persisted graph still guards
    /// edge validation.
    pub async fn build_from_document(
        &self,
        graph_id: &GraphId,
        text: &str,
        incremental: bool,
        guidance: Option<&str>,
    ) -> Result<BuildReport, BuildError> {
        self.build_from_document_with_cancel(graph_id, text, incremental, guidance, &CancellationToken::new())
            .await
    }

    /// [`build_from_document`](Self::build_from_document), checking `token`
    /// between stages up to the start of persist.
    pub async fn build_from_document_with_cancel(
        &self,
        graph_id: &GraphId,
        text: &str,
        incremental: bool,
        guidance: Option<&str>,
        token: &CancellationToken,
    ) -> Result<BuildReport, BuildError> {
        info!(graph_id = %graph_id, incremental, chars = text.len(), "build started");

        // 1. Load existing
        token.check(graph_id, BuildStage::LoadExisting)?;
        let existing = if incremental {
            self.store
                .load_graph(graph_id)
                .map_err(at(graph_id, BuildStage::LoadExisting))?
        } else {
            GraphSnapshot::default()
        };
        debug!(graph_id = %graph_id, nodes = existing.nodes.len(), edges = existing.edges.len(), "loaded existing graph");

        // 2. Extract
        token.check(graph_id, BuildStage::Extract)?;
        let chunks = chunk_text(text, self.config.chunk_size, self.config.chunk_overlap);
        let chunks_total = chunks.len();
        let (extracted, chunks_failed) = self.extract_chunks(graph_id, chunks, guidance).await?;

        // 3. Merge
        token.check(graph_id, BuildStage::Merge)?;
        let merged = if incremental {
            // Persisted edges are not merged: preflight sees all of them and
            // tallies an extracted restatement as a duplicate
            let persisted = CandidateGraph::from_persisted(&existing.nodes, &[]);
            self.merger.merge(std::iter::once(&persisted).chain(extracted.iter()))
        } else {
            self.merger.merge(extracted.iter())
        };

        // 4. Resolve
        token.check(graph_id, BuildStage::Resolve)?;
        let pending = self.resolve(graph_id, &existing, merged, incremental).await?;

        // 5. Preflight
        token.check(graph_id, BuildStage::Preflight)?;
        let guard = if self.config.serialize_builds {
            Some(self.locks.acquire(graph_id).await)
        } else {
            None
        };
        let current = self
            .store
            .load_graph(graph_id)
            .map_err(at(graph_id, BuildStage::Preflight))?;
        let (edges, mut skipped) = self.preflight(&current, &pending);
        for _ in 0..pending.self_loops {
            skipped.record(RejectionReason::SelfLoop);
        }

        // 6. Persist
        token.check(graph_id, BuildStage::Persist)?;
        let outcome = self
            .store
            .insert_batch(graph_id, &pending.nodes, &edges)
            .map_err(at(graph_id, BuildStage::Persist))?;
        drop(guard);

        // 7. Recompute topology
        let (total_nodes, max_level) = self.recompute_topology(graph_id)?;

        // 8. Report
        let report = BuildReport {
            graph_id: graph_id.clone(),
            nodes_created: outcome.nodes_inserted,
            prerequisites_created: outcome.edges_inserted,
            prerequisites_skipped: skipped,
            duplicates_resolved: pending.duplicates_resolved,
            chunks_total,
            chunks_failed,
            total_nodes,
            max_level,
        };
        info!(
            graph_id = %graph_id,
            nodes_created = report.nodes_created,
            prerequisites_created = report.prerequisites_created,
            prerequisites_skipped = report.prerequisites_skipped.total(),
            duplicates_resolved = report.duplicates_resolved,
            chunks_failed = report.chunks_failed,
            total_nodes = report.total_nodes,
            "build complete"
        );
        Ok(report)
    }

    /// Extract every chunk with bounded concurrency. Failed chunks are
    /// skipped; the build fails only if no chunk succeeds.
    async fn extract_chunks(
        &self,
        graph_id: &GraphId,
        chunks: Vec<DocumentChunk>,
        guidance: Option<&str>,
    ) -> Result<(Vec<CandidateGraph>, usize), BuildError> {
        if chunks.is_empty() {
            warn!(graph_id = %graph_id, "document produced no chunks");
            return Err(BuildError::new(
                graph_id,
                BuildStage::Extract,
                BuildFailure::Extraction {
                    chunks: 0,
                    last_error: Some("document is empty".to_string()),
                },
            ));
        }

        let total = chunks.len();
        let semaphore = Arc::new(Semaphore::new(self.config.extract_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for chunk in chunks {
            let semaphore = Arc::clone(&semaphore);
            let extractor = Arc::clone(&self.extractor);
            let retry = self.config.extractor_retry.clone();
            let guidance = guidance.map(str::to_string);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = retry
                    .run("extract", || {
                        let extractor = Arc::clone(&extractor);
                        let chunk = chunk.clone();
                        let guidance = guidance.clone();
                        async move { extractor.extract(&chunk, guidance.as_deref()).await }
                    })
                    .await;
                (chunk.index, result)
            });
        }

        let mut slots: Vec<Option<CandidateGraph>> = vec![None; total];
        let mut failed = 0;
        let mut last_error = None;
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = joined.map_err(|e| {
                BuildError::new(graph_id, BuildStage::Extract, BuildFailure::Task(e.to_string()))
            })?;
            match result {
                Ok(graph) => {
                    debug!(graph_id = %graph_id, chunk = index, nodes = graph.nodes.len(), edges = graph.edges.len(), "chunk extracted");
                    slots[index] = Some(graph);
                }
                Err(e) => {
                    warn!(graph_id = %graph_id, chunk = index, error = %e, "chunk extraction failed, skipping");
                    failed += 1;
                    last_error = Some(e.to_string());
                }
            }
        }

        if failed == total {
            return Err(BuildError::new(
                graph_id,
                BuildStage::Extract,
                BuildFailure::Extraction {
                    chunks: total,
                    last_error,
                },
            ));
        }

        // Chunk order, not completion order
        Ok((slots.into_iter().flatten().collect(), failed))
    }

    /// Decide which nodes and edges to write. Runs entity resolution when
    /// the build is incremental and resolution is enabled.
    async fn resolve(
        &self,
        graph_id: &GraphId,
        existing: &GraphSnapshot,
        merged: CandidateGraph,
        incremental: bool,
    ) -> Result<PendingBatch, BuildError> {
        let persisted: HashSet<&BusinessKey> = existing.nodes.iter().map(|n| &n.key).collect();
        let CandidateGraph { nodes, edges } = merged;
        let fresh: Vec<CandidateNode> = nodes
            .into_iter()
            .filter(|n| !n.key.is_empty() && !persisted.contains(&n.key))
            .collect();

        let (nodes, resolution) = if incremental && self.config.entity_resolution_enabled {
            let stored = self
                .store
                .load_embeddings(graph_id)
                .map_err(at(graph_id, BuildStage::Resolve))?;
            let resolution = self
                .resolver()
                .resolve(fresh.clone(), &stored)
                .await
                .map_err(at(graph_id, BuildStage::Resolve))?;
            let model_version = self.embedder.model_version().to_string();

            let mut nodes: Vec<Node> = resolution
                .accepted
                .iter()
                .map(|c| to_node(&c.node).with_embedding(c.embedding.clone(), model_version.clone()))
                .collect();
            // Nothing to embed, nothing to compare; keep them as they are
            let skipped: HashSet<&BusinessKey> = resolution.skipped_empty.iter().collect();
            nodes.extend(fresh.iter().filter(|n| skipped.contains(&n.key)).map(to_node));
            (nodes, resolution)
        } else {
            (fresh.iter().map(to_node).collect(), Resolution::default())
        };

        let mut self_loops = 0;
        let mut remapped = Vec::with_capacity(edges.len());
        for edge in edges {
            let relation = edge.relation.map_endpoints(|k| resolution.resolve_key(k).clone());
            if relation.is_self_loop() {
                debug!(graph_id = %graph_id, relation = ?edge.relation, "edge collapsed into a self-loop");
                self_loops += 1;
                continue;
            }
            remapped.push(CandidateEdge {
                relation,
                weight: edge.weight,
            });
        }

        Ok(PendingBatch {
            nodes,
            edges: remapped,
            duplicates_resolved: resolution.duplicate_count(),
            self_loops,
        })
    }

    /// Validate pending edges against the current persisted graph plus the
    /// pending nodes. An edge restating a persisted arc is a duplicate.
    fn preflight(&self, current: &GraphSnapshot, pending: &PendingBatch) -> (Vec<Edge>, SkipTally) {
        let vertices = current
            .nodes
            .iter()
            .map(|n| n.key.as_str())
            .chain(pending.nodes.iter().map(|n| n.key.as_str()));
        let arcs = current.edges.iter().map(|e| (e.from.as_str(), e.to.as_str()));
        let mut working = WorkingGraph::from_parts(vertices, arcs);

        let outcome = self.validator.validate(&mut working, &pending.edges);
        let edges = outcome
            .accepted
            .iter()
            .map(|e| Edge::from_relation(&e.relation, e.weight))
            .collect();
        (edges, outcome.tally)
    }

    /// Reload the graph and rewrite every node's cached topology.
    fn recompute_topology(&self, graph_id: &GraphId) -> Result<(usize, Option<usize>), BuildError> {
        let stage = BuildStage::RecomputeTopology;
        let snapshot = self.store.load_graph(graph_id).map_err(at(graph_id, stage))?;
        let levels = derive_topology(&snapshot).map_err(|e| {
            warn!(graph_id = %graph_id, error = %e, "persisted graph is not acyclic");
            BuildError::new(graph_id, stage, e)
        })?;
        self.store
            .write_topology(graph_id, &levels)
            .map_err(at(graph_id, stage))?;

        let max_level = levels.iter().map(|l| l.level).max();
        debug!(graph_id = %graph_id, nodes = levels.len(), ?max_level, "topology recomputed");
        Ok((levels.len(), max_level))
    }

    // === Maintenance and queries ===

    /// Check a persisted graph for structural errors, orphans and stale
    /// cached topology.
    pub fn validate_graph(&self, graph_id: &GraphId) -> StorageResult<GraphValidation> {
        let snapshot = self.store.load_graph(graph_id)?;
        let (nodes, adj) = structure(&snapshot);

        let dag = topology::validate_dag(&nodes, &adj);
        let mut warnings = Vec::new();

        let mut orphans: Vec<String> = topology::find_orphans(&nodes, &adj).into_iter().collect();
        orphans.sort_unstable();
        for orphan in &orphans {
            warnings.push(format!("orphan node '{}'", orphan));
        }

        let levels = topology::compute_levels(&nodes, &adj).ok();
        let out_degree = topology::compute_out_degree(&nodes, &adj);
        for node in &snapshot.nodes {
            let key = node.key.as_str();
            match (node.topology, &levels) {
                (None, _) => warnings.push(format!("node '{}' has no cached topology", key)),
                (Some(cached), Some(levels)) => {
                    let level = levels.get(key).copied().unwrap_or(0);
                    let dependents = out_degree.get(key).copied().unwrap_or(0);
                    if cached.level != level || cached.dependents_count != dependents {
                        warnings.push(format!(
                            "node '{}' has stale topology (cached level {} / {} dependents, actual {} / {})",
                            key, cached.level, cached.dependents_count, level, dependents
                        ));
                    }
                }
                (Some(_), None) => {}
            }
        }

        let stats = GraphStats {
            node_count: snapshot.nodes.len(),
            edge_count: snapshot.edges.len(),
            max_level: levels.as_ref().and_then(|l| l.values().copied().max()),
            orphan_count: orphans.len(),
            nodes_with_embeddings: snapshot.nodes.iter().filter(|n| n.embedding.is_some()).count(),
        };

        Ok(GraphValidation {
            is_valid: dag.ok,
            errors: dag.errors,
            warnings,
            stats,
        })
    }

    /// Would adding `from -> to` close a cycle in the persisted graph?
    pub fn detect_cycle(&self, graph_id: &GraphId, from: &BusinessKey, to: &BusinessKey) -> StorageResult<bool> {
        let snapshot = self.store.load_graph(graph_id)?;
        let (_, adj) = structure(&snapshot);
        Ok(topology::would_create_cycle(&adj, from.as_str(), to.as_str()))
    }

    /// Persisted nodes with their cached topology, by level then key.
    /// Nodes without a cached topology sort last.
    pub fn graph_levels(&self, graph_id: &GraphId) -> StorageResult<Vec<LeveledNode>> {
        let snapshot = self.store.load_graph(graph_id)?;
        let mut leveled: Vec<LeveledNode> = snapshot.nodes.iter().map(LeveledNode::from).collect();
        leveled.sort_by(|a, b| {
            (a.level.unwrap_or(usize::MAX), &a.key).cmp(&(b.level.unwrap_or(usize::MAX), &b.key))
        });
        Ok(leveled)
    }

    /// Re-embed every node whose embedding was not produced by the current
    /// provider model, and write the new embeddings back.
    pub async fn reembed_graph(&self, graph_id: &GraphId) -> Result<ReembedReport, BuildError> {
        let snapshot = self
            .store
            .load_graph(graph_id)
            .map_err(at(graph_id, BuildStage::LoadExisting))?;
        let model_version = self.embedder.model_version().to_string();

        let stale: Vec<CandidateNode> = snapshot
            .nodes
            .iter()
            .filter(|n| n.embedding.is_none() || n.embedding_model_version.as_deref() != Some(model_version.as_str()))
            .map(CandidateNode::from)
            .collect();

        let embedded = self
            .resolver()
            .embed_each(&stale)
            .await
            .map_err(at(graph_id, BuildStage::Resolve))?;

        let mut report = ReembedReport {
            examined: snapshot.nodes.len(),
            ..ReembedReport::default()
        };
        let mut updates = Vec::new();
        for (node, embedding) in stale.iter().zip(embedded) {
            match embedding {
                Some(embedding) => updates.push(StoredEmbedding {
                    key: node.key.clone(),
                    embedding,
                    model_version: Some(model_version.clone()),
                }),
                None => report.skipped_empty += 1,
            }
        }

        report.reembedded = self
            .store
            .update_embeddings(graph_id, &updates)
            .map_err(at(graph_id, BuildStage::Persist))?;

        info!(
            graph_id = %graph_id,
            examined = report.examined,
            reembedded = report.reembedded,
            model_version = %model_version,
            "re-embedding complete"
        );
        Ok(report)
    }
}

fn to_node(candidate: &CandidateNode) -> Node {
    let node = Node::new(candidate.key.clone(), candidate.name.clone());
    match &candidate.description {
        Some(description) => node.with_description(description.clone()),
        None => node,
    }
}
