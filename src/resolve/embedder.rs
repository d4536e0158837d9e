//! Embedding provider contract
//!
//! Uses a trait-based embedding backend so production code can use
//! fastembed-rs while tests use deterministic mock embedders.

use async_trait::async_trait;
use thiserror::Error;

/// Error type for embedding operations.
#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    /// The embedding model returned no results
    #[error("embedding returned no results")]
    EmptyResult,
    /// Model loading or inference failed
    #[error("embedding model error: {0}")]
    ModelError(String),
    /// The provider could not be reached
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
}

/// Trait for embedding text into fixed-length vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Tag stored alongside every embedding this provider produces.
    fn model_version(&self) -> &str;

    /// Embed one text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

// ---------------------------------------------------------------------------
// FastEmbedEmbedder: production embedder behind `embeddings` feature
// ---------------------------------------------------------------------------

#[cfg(feature = "embeddings")]
mod fastembed_impl {
    use super::{EmbeddingError, EmbeddingProvider};
    use async_trait::async_trait;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::{Arc, Mutex};

    /// Production embedder backed by fastembed (ONNX Runtime).
    ///
    /// `TextEmbedding::embed` needs `&mut self` and is CPU-bound, so the
    /// model sits behind a mutex and inference runs on the blocking pool.
    pub struct FastEmbedEmbedder {
        model: Arc<Mutex<TextEmbedding>>,
        model_version: String,
    }

    impl FastEmbedEmbedder {
        /// Create a new FastEmbedEmbedder with a specific model.
        pub fn new(model: EmbeddingModel, model_version: impl Into<String>) -> Result<Self, EmbeddingError> {
            let options = InitOptions::new(model).with_show_download_progress(false);
            let embedding = TextEmbedding::try_new(options)
                .map_err(|e| EmbeddingError::ModelError(e.to_string()))?;
            Ok(Self {
                model: Arc::new(Mutex::new(embedding)),
                model_version: model_version.into(),
            })
        }

        /// Create a new FastEmbedEmbedder with the default model (nomic-embed-text-v1.5).
        pub fn default_model() -> Result<Self, EmbeddingError> {
            Self::new(EmbeddingModel::NomicEmbedTextV15, "nomic-embed-text-v1.5")
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FastEmbedEmbedder {
        fn model_version(&self) -> &str {
            &self.model_version
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let model = Arc::clone(&self.model);
            let text = text.to_string();
            let mut embeddings = tokio::task::spawn_blocking(move || {
                let mut model = model
                    .lock()
                    .map_err(|_| EmbeddingError::ModelError("model mutex poisoned".to_string()))?;
                model
                    .embed(vec![text], None)
                    .map_err(|e| EmbeddingError::ModelError(e.to_string()))
            })
            .await
            .map_err(|e| EmbeddingError::ModelError(e.to_string()))??;

            embeddings.pop().ok_or(EmbeddingError::EmptyResult)
        }
    }
}

#[cfg(feature = "embeddings")]
pub use fastembed_impl::FastEmbedEmbedder;

#[cfg(all(test, feature = "embeddings"))]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // requires model download
    async fn fastembed_default_model_embeds_text() {
        let embedder = FastEmbedEmbedder::default_model().expect("model should load");
        let vector = embedder.embed("hello world").await.expect("should embed");
        assert!(!vector.is_empty(), "embedding vector should not be empty");
    }
}
