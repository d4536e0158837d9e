//! Common test utilities for pipeline integration tests
//!
//! Deterministic stand-ins for the slow collaborators: extractors that read
//! a tiny line markup or replay a script, an embedder derived from concept
//! names, and a store wrapper that can be told to fail.

#![allow(dead_code)]

use async_trait::async_trait;
use prereq_graph::{
    BuildConfig, BusinessKey, CancellationToken, CandidateEdge, CandidateGraph, CandidateNode, DocumentChunk, Edge,
    EmbeddingError, EmbeddingProvider, ExtractionError, Extractor, GraphBuildCoordinator, GraphId, GraphSnapshot,
    GraphStore, InsertOutcome, Node, OpenStore, Relation, RetryPolicy, SqliteStore, StorageError, StorageResult,
    StoredEmbedding, TopologyLevel,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ========================================================================
// Extractors
// ========================================================================

/// Parse the line markup used by test documents:
///
/// - `Limits -> Derivatives` prerequisite
/// - `Calculus > Limits` hierarchy (parent > child)
/// - `Limits: what a function approaches` concept with description
/// - `Limits` bare concept
///
/// Every name mentioned in a relation is also a concept.
pub fn parse_markup(text: &str) -> CandidateGraph {
    let mut graph = CandidateGraph::new();
    let mut push_concept = |graph: &mut CandidateGraph, name: &str, description: Option<&str>| {
        let mut node = CandidateNode::named(name.trim());
        if node.key.is_empty() {
            return;
        }
        if let Some(d) = description {
            node = node.with_description(d.trim());
        }
        graph.nodes.push(node);
    };

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some((from, to)) = line.split_once("->") {
            push_concept(&mut graph, from, None);
            push_concept(&mut graph, to, None);
            graph.edges.push(CandidateEdge::new(Relation::prerequisite(
                BusinessKey::from_name(from),
                BusinessKey::from_name(to),
            )));
        } else if let Some((parent, child)) = line.split_once('>') {
            push_concept(&mut graph, parent, None);
            push_concept(&mut graph, child, None);
            graph.edges.push(CandidateEdge::new(Relation::hierarchy(
                BusinessKey::from_name(parent),
                BusinessKey::from_name(child),
            )));
        } else if let Some((name, description)) = line.split_once(':') {
            push_concept(&mut graph, name, Some(description));
        } else {
            push_concept(&mut graph, line, None);
        }
    }
    graph
}

/// Extractor that reads [`parse_markup`] from each chunk
#[derive(Default)]
pub struct MarkupExtractor {
    pub calls: AtomicUsize,
    pub guidance_seen: Mutex<Vec<Option<String>>>,
}

impl MarkupExtractor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Extractor for MarkupExtractor {
    async fn extract(
        &self,
        chunk: &DocumentChunk,
        guidance: Option<&str>,
    ) -> Result<CandidateGraph, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.guidance_seen
            .lock()
            .unwrap()
            .push(guidance.map(str::to_string));
        Ok(parse_markup(&chunk.text))
    }
}

/// What a scripted extractor does for one chunk index
#[derive(Clone)]
pub enum Script {
    Reply(CandidateGraph),
    Fail,
    /// Fail this many times, then reply
    Flaky(usize, CandidateGraph),
}

/// Extractor that replays a script by chunk index
pub struct ScriptedExtractor {
    script: HashMap<usize, Script>,
    attempts: Mutex<HashMap<usize, usize>>,
    /// Cancelled on the first call, if set
    cancel_on_call: Option<CancellationToken>,
}

impl ScriptedExtractor {
    pub fn new(script: Vec<Script>) -> Self {
        Self {
            script: script.into_iter().enumerate().collect(),
            attempts: Mutex::new(HashMap::new()),
            cancel_on_call: None,
        }
    }

    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_on_call = Some(token);
        self
    }

    pub fn attempts(&self, index: usize) -> usize {
        self.attempts.lock().unwrap().get(&index).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(
        &self,
        chunk: &DocumentChunk,
        _guidance: Option<&str>,
    ) -> Result<CandidateGraph, ExtractionError> {
        if let Some(token) = &self.cancel_on_call {
            token.cancel();
        }
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(chunk.index).or_insert(0);
            *count += 1;
            *count
        };
        match self.script.get(&chunk.index) {
            Some(Script::Reply(graph)) => Ok(graph.clone()),
            Some(Script::Flaky(failures, graph)) if attempt > *failures => Ok(graph.clone()),
            Some(Script::Flaky(..)) | Some(Script::Fail) => {
                Err(ExtractionError::Unavailable(format!("scripted failure on chunk {}", chunk.index)))
            }
            None => Ok(CandidateGraph::new()),
        }
    }
}

/// A document the chunker splits into exactly `n` chunks when
/// `chunk_size` is 100 and `chunk_overlap` is 0.
pub fn document_of_chunks(n: usize) -> String {
    (0..n).map(|_| "x".repeat(99)).collect::<Vec<_>>().join(" ")
}

// ========================================================================
// Embedder
// ========================================================================

/// Deterministic embedder: each concept name maps to a pseudo-random unit
/// direction in 64 dimensions. Different names are close to orthogonal;
/// aliased names share a vector.
pub struct NameEmbedder {
    version: String,
    aliases: HashMap<String, String>,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl NameEmbedder {
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            aliases: HashMap::new(),
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    /// Embed `name` exactly like `canonical`
    pub fn with_alias(mut self, name: &str, canonical: &str) -> Self {
        self.aliases
            .insert(BusinessKey::from_name(name).to_string(), BusinessKey::from_name(canonical).to_string());
        self
    }

    pub fn vector_for(&self, name: &str) -> Vec<f32> {
        let key = BusinessKey::from_name(name).to_string();
        let key = self.aliases.get(&key).cloned().unwrap_or(key);
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let mut rng = StdRng::seed_from_u64(hasher.finish());
        (0..64).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
    }
}

#[async_trait]
impl EmbeddingProvider for NameEmbedder {
    fn model_version(&self) -> &str {
        &self.version
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(EmbeddingError::Unavailable("embedder switched off".to_string()));
        }
        // The fingerprint's first line is the concept name
        let name = text.lines().next().unwrap_or_default();
        Ok(self.vector_for(name))
    }
}

// ========================================================================
// Store
// ========================================================================

/// SQLite store whose writes can be made to fail on demand, and whose reads
/// can be made to show a cycle once a batch has been inserted
pub struct FlakyStore {
    inner: SqliteStore,
    pub fail_inserts: AtomicBool,
    pub cycle_after_insert: AtomicBool,
    pub inserts: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteStore::open_in_memory().unwrap(),
            fail_inserts: AtomicBool::new(false),
            cycle_after_insert: AtomicBool::new(false),
            inserts: AtomicUsize::new(0),
        }
    }
}

impl GraphStore for FlakyStore {
    fn list_graphs(&self) -> StorageResult<Vec<GraphId>> {
        self.inner.list_graphs()
    }

    fn load_graph(&self, graph_id: &GraphId) -> StorageResult<GraphSnapshot> {
        let mut snapshot = self.inner.load_graph(graph_id)?;
        if self.cycle_after_insert.load(Ordering::SeqCst) && self.inserts.load(Ordering::SeqCst) > 0 {
            // Reverse the first edge, as a concurrent writer could have
            let back = snapshot
                .edges
                .first()
                .map(|e| Edge::from_relation(&Relation::prerequisite(e.to.clone(), e.from.clone()), None));
            snapshot.edges.extend(back);
        }
        Ok(snapshot)
    }

    fn load_embeddings(&self, graph_id: &GraphId) -> StorageResult<Vec<StoredEmbedding>> {
        self.inner.load_embeddings(graph_id)
    }

    fn insert_batch(&self, graph_id: &GraphId, nodes: &[Node], edges: &[Edge]) -> StorageResult<InsertOutcome> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.inner.insert_batch(graph_id, nodes, edges)
    }

    fn write_topology(&self, graph_id: &GraphId, levels: &[TopologyLevel]) -> StorageResult<()> {
        self.inner.write_topology(graph_id, levels)
    }

    fn update_embeddings(&self, graph_id: &GraphId, embeddings: &[StoredEmbedding]) -> StorageResult<usize> {
        self.inner.update_embeddings(graph_id, embeddings)
    }
}

// ========================================================================
// Wiring
// ========================================================================

/// Default config with retries that never sleep
pub fn fast_config() -> BuildConfig {
    BuildConfig::default()
        .with_extractor_retry(RetryPolicy::new(3, 0, 0))
        .with_embedder_retry(RetryPolicy::new(2, 0, 0))
}

pub fn memory_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open_in_memory().unwrap())
}

pub fn coordinator(
    store: Arc<dyn GraphStore>,
    extractor: Arc<dyn Extractor>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: BuildConfig,
) -> GraphBuildCoordinator {
    GraphBuildCoordinator::new(store, extractor, embedder, config)
}

/// Persisted `(from, to)` arcs, sorted
pub fn arcs(store: &dyn GraphStore, graph_id: &GraphId) -> Vec<(String, String)> {
    let mut arcs: Vec<(String, String)> = store
        .load_graph(graph_id)
        .unwrap()
        .edges
        .iter()
        .map(|e| (e.from.to_string(), e.to.to_string()))
        .collect();
    arcs.sort();
    arcs
}

/// Persisted node keys, sorted
pub fn keys(store: &dyn GraphStore, graph_id: &GraphId) -> Vec<String> {
    let mut keys: Vec<String> = store
        .load_graph(graph_id)
        .unwrap()
        .nodes
        .iter()
        .map(|n| n.key.to_string())
        .collect();
    keys.sort();
    keys
}

pub fn pair(from: &str, to: &str) -> (String, String) {
    (from.to_string(), to.to_string())
}
