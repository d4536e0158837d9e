//! Build configuration
//!
//! Every knob the pipeline reads lives on [`BuildConfig`], passed explicitly
//! into the coordinator. Files are YAML; absent fields take their defaults.

use crate::resolve::{CanonicalPolicy, ResolverConfig};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors from loading or validating a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Configuration for a graph build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Cosine similarity at or above which two concepts are the same (0..=1)
    pub similarity_threshold: f32,
    /// Maximum characters per extraction chunk
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks
    pub chunk_overlap: usize,
    pub extractor_retry: RetryPolicy,
    pub embedder_retry: RetryPolicy,
    /// Run entity resolution on incremental builds
    pub entity_resolution_enabled: bool,
    /// Deduplicate against the graph's persisted embeddings
    pub cross_batch_dedup: bool,
    /// Skip cross-batch deduplication below this many persisted embeddings
    pub min_existing_embeddings: usize,
    pub canonical_policy: CanonicalPolicy,
    pub extract_concurrency: usize,
    pub embed_concurrency: usize,
    /// Serialize preflight and persist of concurrent builds on one graph
    pub serialize_builds: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            chunk_size: 4000,
            chunk_overlap: 200,
            extractor_retry: RetryPolicy::default(),
            embedder_retry: RetryPolicy::default(),
            entity_resolution_enabled: true,
            cross_batch_dedup: true,
            min_existing_embeddings: 1,
            canonical_policy: CanonicalPolicy::FirstSeen,
            extract_concurrency: 4,
            embed_concurrency: 8,
            serialize_builds: true,
        }
    }
}

impl BuildConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a YAML config file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Parse and validate YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes as unit, not as a map
        let config: Self = if text.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(text)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::Invalid {
                field: "similarity_threshold",
                reason: format!("{} is outside 0..=1", self.similarity_threshold),
            });
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid {
                field: "chunk_size",
                reason: "must be positive".to_string(),
            });
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::Invalid {
                field: "chunk_overlap",
                reason: format!("{} must be smaller than chunk_size {}", self.chunk_overlap, self.chunk_size),
            });
        }
        for (field, policy) in [
            ("extractor_retry", &self.extractor_retry),
            ("embedder_retry", &self.embedder_retry),
        ] {
            if policy.max_attempts == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "max_attempts must be at least 1".to_string(),
                });
            }
        }
        for (field, value) in [
            ("extract_concurrency", self.extract_concurrency),
            ("embed_concurrency", self.embed_concurrency),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_chunking(mut self, size: usize, overlap: usize) -> Self {
        self.chunk_size = size;
        self.chunk_overlap = overlap;
        self
    }

    pub fn with_extractor_retry(mut self, policy: RetryPolicy) -> Self {
        self.extractor_retry = policy;
        self
    }

    pub fn with_embedder_retry(mut self, policy: RetryPolicy) -> Self {
        self.embedder_retry = policy;
        self
    }

    pub fn with_entity_resolution(mut self, enabled: bool) -> Self {
        self.entity_resolution_enabled = enabled;
        self
    }

    pub fn with_cross_batch_dedup(mut self, enabled: bool) -> Self {
        self.cross_batch_dedup = enabled;
        self
    }

    pub fn with_canonical_policy(mut self, policy: CanonicalPolicy) -> Self {
        self.canonical_policy = policy;
        self
    }

    pub fn with_concurrency(mut self, extract: usize, embed: usize) -> Self {
        self.extract_concurrency = extract;
        self.embed_concurrency = embed;
        self
    }

    pub fn with_serialize_builds(mut self, enabled: bool) -> Self {
        self.serialize_builds = enabled;
        self
    }

    /// Resolver settings derived from this config
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            similarity_threshold: self.similarity_threshold,
            cross_batch: self.cross_batch_dedup,
            min_existing_embeddings: self.min_existing_embeddings,
            canonical_policy: self.canonical_policy,
            embed_concurrency: self.embed_concurrency,
            retry: self.embedder_retry.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = BuildConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.similarity_threshold, 0.85);
        assert_eq!(config.extractor_retry.max_attempts, 3);
        assert!(config.serialize_builds);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = r#"
similarity_threshold: 0.9
canonical_policy: richest_content
embedder_retry:
  max_attempts: 5
"#;
        let config = BuildConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.similarity_threshold, 0.9);
        assert_eq!(config.canonical_policy, CanonicalPolicy::RichestContent);
        assert_eq!(config.embedder_retry.max_attempts, 5);
        assert_eq!(config.embedder_retry.initial_backoff_ms, 500);
        assert_eq!(config.chunk_size, 4000);
    }

    #[test]
    fn empty_yaml_is_default() {
        assert_eq!(BuildConfig::from_yaml_str("").unwrap(), BuildConfig::default());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let err = BuildConfig::from_yaml_str("similarity_threshold: 1.5").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "similarity_threshold", .. }));
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk() {
        let config = BuildConfig::default().with_chunking(100, 100);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "chunk_overlap", .. })
        ));
    }

    #[test]
    fn rejects_zero_concurrency() {
        let config = BuildConfig::default().with_concurrency(0, 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_policy() {
        assert!(matches!(
            BuildConfig::from_yaml_str("canonical_policy: loudest"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.yaml");
        std::fs::write(&path, "chunk_size: 1000\nchunk_overlap: 50\n").unwrap();

        let config = BuildConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 50);
    }

    #[test]
    fn resolver_config_mirrors_build_config() {
        let config = BuildConfig::default()
            .with_similarity_threshold(0.7)
            .with_cross_batch_dedup(false);
        let resolver = config.resolver_config();
        assert_eq!(resolver.similarity_threshold, 0.7);
        assert!(!resolver.cross_batch);
        assert_eq!(resolver.embed_concurrency, 8);
    }
}
