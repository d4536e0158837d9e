//! Concept extraction: chunking and the extractor contract
//!
//! Text understanding happens outside this crate. An [`Extractor`] turns one
//! document chunk into a candidate graph; the coordinator fans chunks out
//! with bounded concurrency and merges the results.

mod chunk;
mod command;

pub use chunk::{chunk_text, DocumentChunk};
pub use command::{parse_response, CommandExtractor, CommandExtractorConfig};

use crate::graph::CandidateGraph;
use async_trait::async_trait;
use thiserror::Error;

/// Errors from a single extraction call
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("extractor unavailable: {0}")]
    Unavailable(String),
    #[error("extractor timed out after {seconds}s")]
    Timeout { seconds: u64 },
    #[error("extractor exited with status {status:?}: {stderr}")]
    CommandFailed { status: Option<i32>, stderr: String },
    #[error("could not parse extractor output: {0}")]
    Parse(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Produces a candidate graph from a document chunk
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract concepts and relations from `chunk`.
    ///
    /// `guidance` is free text steering the extraction (e.g. the subject
    /// area), passed through unchanged.
    async fn extract(
        &self,
        chunk: &DocumentChunk,
        guidance: Option<&str>,
    ) -> Result<CandidateGraph, ExtractionError>;
}
