//! Entity resolution: similarity-based deduplication of candidate concepts
//!
//! Each candidate is embedded from its fingerprint (name, blank line,
//! trimmed description). Deduplication then runs in two passes:
//!
//! 1. **In-batch** (streaming, order dependent): the first candidate is
//!    canonical; every later candidate is compared against all canonicals
//!    seen so far and dropped as a duplicate of the best match when the
//!    similarity reaches the threshold. Which copy survives is decided by
//!    [`CanonicalPolicy`].
//! 2. **Cross-batch** (optional): surviving canonicals are compared against
//!    the graph's persisted embeddings; a match drops the candidate. The
//!    existing node's content is left untouched.
//!
//! Embedding calls run with bounded concurrency, each under the resolver's
//! retry policy. Exhausting the retry budget for any candidate fails the
//! whole resolve call.

mod embedder;
mod similarity;

pub use embedder::{EmbeddingError, EmbeddingProvider};
#[cfg(feature = "embeddings")]
pub use embedder::FastEmbedEmbedder;
pub use similarity::{best_match, cosine_similarity};

use crate::graph::{BusinessKey, CandidateNode, StoredEmbedding};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Errors from entity resolution
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("embedding candidate #{index} ('{key}') failed: {source}")]
    Embedding {
        index: usize,
        key: BusinessKey,
        #[source]
        source: EmbeddingError,
    },
    #[error("embedding task failed: {0}")]
    Task(String),
}

/// Which candidate survives when two in-batch candidates are duplicates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalPolicy {
    /// The first-seen candidate stays canonical
    #[default]
    FirstSeen,
    /// A duplicate with a strictly longer description replaces the canonical
    RichestContent,
}

/// Resolver tuning
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Minimum cosine similarity for two concepts to count as the same
    pub similarity_threshold: f32,
    /// Compare against the graph's persisted embeddings
    pub cross_batch: bool,
    /// Skip cross-batch comparison when fewer embeddings are persisted
    pub min_existing_embeddings: usize,
    pub canonical_policy: CanonicalPolicy,
    /// Maximum simultaneous embedding calls
    pub embed_concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            cross_batch: true,
            min_existing_embeddings: 1,
            canonical_policy: CanonicalPolicy::FirstSeen,
            embed_concurrency: 8,
            retry: RetryPolicy::default(),
        }
    }
}

/// Where a duplicate was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchScope {
    InBatch,
    Existing,
}

/// A candidate judged to duplicate another concept
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityDecision {
    /// Key that was dropped
    pub candidate: BusinessKey,
    /// Key that survives
    pub matched: BusinessKey,
    pub score: f32,
    pub scope: MatchScope,
}

/// A candidate that survived resolution, with its embedding
#[derive(Debug, Clone)]
pub struct ResolvedCandidate {
    pub node: CandidateNode,
    pub embedding: Vec<f32>,
}

/// Outcome of a resolve call
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Genuinely new candidates, in input order of their canonical slot
    pub accepted: Vec<ResolvedCandidate>,
    pub decisions: Vec<SimilarityDecision>,
    pub in_batch_duplicates: usize,
    pub cross_batch_duplicates: usize,
    /// Candidates with an empty fingerprint; never embedded
    pub skipped_empty: Vec<BusinessKey>,
    /// Dropped key -> surviving key
    pub key_remap: HashMap<BusinessKey, BusinessKey>,
}

impl Resolution {
    pub fn duplicate_count(&self) -> usize {
        self.in_batch_duplicates + self.cross_batch_duplicates
    }

    /// Follow the remap to the key that survives for `key`.
    pub fn resolve_key<'a>(&'a self, key: &'a BusinessKey) -> &'a BusinessKey {
        let mut current = key;
        // Chains are short; the bound guards against a malformed map.
        for _ in 0..=self.key_remap.len() {
            match self.key_remap.get(current) {
                Some(next) if next != current => current = next,
                _ => break,
            }
        }
        current
    }

    /// Point `dropped` at `survivor`, redirecting earlier entries that
    /// pointed at `dropped`.
    fn remap(&mut self, dropped: &BusinessKey, survivor: &BusinessKey) {
        if dropped == survivor {
            return;
        }
        for target in self.key_remap.values_mut() {
            if target == dropped {
                *target = survivor.clone();
            }
        }
        self.key_remap.insert(dropped.clone(), survivor.clone());
    }
}

/// Text embedded for a candidate: name, blank line, trimmed description.
pub fn fingerprint(node: &CandidateNode) -> String {
    let name = node.name.trim();
    let description = node.description.as_deref().map(str::trim).unwrap_or("");
    if description.is_empty() {
        name.to_string()
    } else {
        format!("{}\n\n{}", name, description).trim().to_string()
    }
}

/// Similarity-based deduplicator over an injected embedding provider
pub struct EntityResolver {
    provider: Arc<dyn EmbeddingProvider>,
    config: ResolverConfig,
}

impl EntityResolver {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: ResolverConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn model_version(&self) -> &str {
        self.provider.model_version()
    }

    /// Deduplicate `candidates` among themselves and against `existing`.
    pub async fn resolve(
        &self,
        candidates: Vec<CandidateNode>,
        existing: &[StoredEmbedding],
    ) -> Result<Resolution, ResolveError> {
        let mut resolution = Resolution::default();
        if candidates.is_empty() {
            return Ok(resolution);
        }

        let mut embeddable: Vec<(CandidateNode, String)> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let text = fingerprint(&candidate);
            if text.is_empty() {
                debug!(key = %candidate.key, "skipping candidate with empty fingerprint");
                resolution.skipped_empty.push(candidate.key);
            } else {
                embeddable.push((candidate, text));
            }
        }

        let texts: Vec<String> = embeddable.iter().map(|(_, t)| t.clone()).collect();
        let keys: Vec<BusinessKey> = embeddable.iter().map(|(c, _)| c.key.clone()).collect();
        let embeddings = self.embed_all(&texts, &keys).await?;

        let threshold = self.config.similarity_threshold;

        // Pass 1: in-batch, streaming, first candidate always canonical
        let mut canonicals: Vec<ResolvedCandidate> = Vec::new();
        for ((node, _), embedding) in embeddable.into_iter().zip(embeddings) {
            let best = best_match(&embedding, canonicals.iter().map(|c| c.embedding.as_slice()));
            match best {
                Some((slot, score)) if score >= threshold => {
                    resolution.in_batch_duplicates += 1;
                    let replace = self.config.canonical_policy == CanonicalPolicy::RichestContent
                        && node.description_len() > canonicals[slot].node.description_len();

                    let (dropped, survivor) = if replace {
                        let previous = std::mem::replace(
                            &mut canonicals[slot],
                            ResolvedCandidate { node, embedding },
                        );
                        (previous.node.key, canonicals[slot].node.key.clone())
                    } else {
                        (node.key, canonicals[slot].node.key.clone())
                    };

                    debug!(dropped = %dropped, survivor = %survivor, score, "in-batch duplicate");
                    resolution.remap(&dropped, &survivor);
                    resolution.decisions.push(SimilarityDecision {
                        candidate: dropped,
                        matched: survivor,
                        score,
                        scope: MatchScope::InBatch,
                    });
                }
                _ => canonicals.push(ResolvedCandidate { node, embedding }),
            }
        }

        // Pass 2: cross-batch against persisted embeddings
        let compare_existing = self.config.cross_batch
            && !existing.is_empty()
            && existing.len() >= self.config.min_existing_embeddings;

        if compare_existing {
            for candidate in canonicals {
                let best = best_match(&candidate.embedding, existing.iter().map(|e| e.embedding.as_slice()));
                match best {
                    Some((slot, score)) if score >= threshold => {
                        resolution.cross_batch_duplicates += 1;
                        let matched = existing[slot].key.clone();
                        debug!(dropped = %candidate.node.key, existing = %matched, score, "duplicate of persisted concept");
                        resolution.remap(&candidate.node.key, &matched);
                        resolution.decisions.push(SimilarityDecision {
                            candidate: candidate.node.key,
                            matched,
                            score,
                            scope: MatchScope::Existing,
                        });
                    }
                    _ => resolution.accepted.push(candidate),
                }
            }
        } else {
            resolution.accepted = canonicals;
        }

        info!(
            accepted = resolution.accepted.len(),
            in_batch_duplicates = resolution.in_batch_duplicates,
            cross_batch_duplicates = resolution.cross_batch_duplicates,
            skipped_empty = resolution.skipped_empty.len(),
            compared_existing = compare_existing,
            "entity resolution complete"
        );

        Ok(resolution)
    }

    /// Embed each node's fingerprint under the retry policy.
    ///
    /// The result is aligned with `nodes`; entries with an empty fingerprint
    /// are `None` and never reach the provider.
    pub async fn embed_each(&self, nodes: &[CandidateNode]) -> Result<Vec<Option<Vec<f32>>>, ResolveError> {
        let mut slots = Vec::with_capacity(nodes.len());
        let mut texts = Vec::new();
        let mut keys = Vec::new();
        for node in nodes {
            let text = fingerprint(node);
            if text.is_empty() {
                slots.push(false);
            } else {
                slots.push(true);
                texts.push(text);
                keys.push(node.key.clone());
            }
        }

        let mut embeddings = self.embed_all(&texts, &keys).await?.into_iter();
        Ok(slots
            .into_iter()
            .map(|embedded| if embedded { embeddings.next() } else { None })
            .collect())
    }

    /// Embed every text with bounded concurrency, preserving input order.
    async fn embed_all(&self, texts: &[String], keys: &[BusinessKey]) -> Result<Vec<Vec<f32>>, ResolveError> {
        let semaphore = Arc::new(Semaphore::new(self.config.embed_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, text) in texts.iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let provider = Arc::clone(&self.provider);
            let retry = self.config.retry.clone();
            let text = text.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = retry
                    .run("embed", || {
                        let provider = Arc::clone(&provider);
                        let text = text.clone();
                        async move { provider.embed(&text).await }
                    })
                    .await;
                (index, result)
            });
        }

        let mut slots: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = joined.map_err(|e| ResolveError::Task(e.to_string()))?;
            match result {
                Ok(vector) => slots[index] = Some(vector),
                Err(source) => {
                    // Dropping the JoinSet aborts the remaining calls
                    return Err(ResolveError::Embedding {
                        index,
                        key: keys[index].clone(),
                        source,
                    });
                }
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| ResolveError::Task(format!("no embedding produced for #{}", index)))
            })
            .collect()
    }
}
