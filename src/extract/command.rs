//! Extractor backed by an external command
//!
//! One process per chunk. The request is written to stdin as a single JSON
//! object and stdin is closed; the command answers on stdout with a JSON
//! object of the form
//!
//! ```json
//! {"concepts": [{"name": "Limits", "description": "..."}],
//!  "relations": [{"kind": "prerequisite", "from": "Limits", "to": "Derivatives"},
//!                {"kind": "hierarchy", "parent": "Calculus", "child": "Limits"}]}
//! ```
//!
//! Endpoint names are normalized into business keys. The answer may be
//! wrapped in a fenced code block or surrounded by prose.

use super::{DocumentChunk, ExtractionError, Extractor};
use crate::graph::{BusinessKey, CandidateEdge, CandidateGraph, CandidateNode, Relation};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Configuration for [`CommandExtractor`]
#[derive(Debug, Clone)]
pub struct CommandExtractorConfig {
    /// Executable to run
    pub program: String,
    pub args: Vec<String>,
    /// Working directory for the command
    pub working_dir: Option<PathBuf>,
    /// Timeout per chunk in seconds
    pub timeout_seconds: u64,
}

impl Default for CommandExtractorConfig {
    fn default() -> Self {
        Self {
            program: "extract-concepts".to_string(),
            args: Vec::new(),
            working_dir: None,
            timeout_seconds: 120,
        }
    }
}

impl CommandExtractorConfig {
    /// Parse a shell-like command line (whitespace separated, no quoting).
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
            ..Self::default()
        })
    }
}

#[derive(Debug, Serialize)]
struct ExtractionRequest<'a> {
    chunk_index: usize,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    guidance: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ExtractedConcept {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExtractionResponse {
    #[serde(default)]
    concepts: Vec<ExtractedConcept>,
    #[serde(default)]
    relations: Vec<Relation>,
}

/// Runs an external command for each chunk
pub struct CommandExtractor {
    config: CommandExtractorConfig,
}

impl CommandExtractor {
    pub fn new(config: CommandExtractorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CommandExtractorConfig {
        &self.config
    }

    async fn run(&self, request: &str) -> Result<String, ExtractionError> {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            ExtractionError::Unavailable(format!("failed to start '{}': {}", self.config.program, e))
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExtractionError::Unavailable("no stdin available".to_string()))?;
        stdin.write_all(request.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        drop(stdin);

        let timeout_duration = Duration::from_secs(self.config.timeout_seconds);
        let output = match timeout(timeout_duration, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ExtractionError::Timeout {
                    seconds: self.config.timeout_seconds,
                })
            }
        };

        if !output.status.success() {
            return Err(ExtractionError::CommandFailed {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Extractor for CommandExtractor {
    async fn extract(
        &self,
        chunk: &DocumentChunk,
        guidance: Option<&str>,
    ) -> Result<CandidateGraph, ExtractionError> {
        let request = serde_json::to_string(&ExtractionRequest {
            chunk_index: chunk.index,
            text: &chunk.text,
            guidance,
        })
        .map_err(|e| ExtractionError::Parse(e.to_string()))?;

        let stdout = self.run(&request).await?;
        parse_response(&stdout)
    }
}

/// Turn an extractor's raw answer into a candidate graph.
pub fn parse_response(text: &str) -> Result<CandidateGraph, ExtractionError> {
    let value = extract_json(text)
        .ok_or_else(|| ExtractionError::Parse("no JSON object in extractor output".to_string()))?;
    let response: ExtractionResponse =
        serde_json::from_value(value).map_err(|e| ExtractionError::Parse(e.to_string()))?;

    let mut graph = CandidateGraph::new();
    for concept in response.concepts {
        let mut node = CandidateNode::named(concept.name.trim());
        if node.key.is_empty() {
            debug!(name = %concept.name, "dropping concept with empty key");
            continue;
        }
        if let Some(description) = concept.description.filter(|d| !d.trim().is_empty()) {
            node = node.with_description(description.trim());
        }
        graph.nodes.push(node);
    }

    for relation in response.relations {
        let relation = relation.map_endpoints(|name| BusinessKey::from_name(name.as_str()));
        let (from, to) = relation.arc();
        if from.is_empty() || to.is_empty() {
            debug!(?relation, "dropping relation with empty endpoint");
            continue;
        }
        graph.edges.push(CandidateEdge::new(relation));
    }

    Ok(graph)
}

/// Extract a JSON object from text that may contain a fenced block or prose.
fn extract_json(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();

    if let Ok(v) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if v.is_object() {
            return Some(v);
        }
    }

    let fenced = if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        after.find("```").map(|end| &after[..end])
    } else if let Some(start) = trimmed.find("```\n") {
        let after = &trimmed[start + 4..];
        after.find("```").map(|end| &after[..end])
    } else {
        None
    };

    if let Some(block) = fenced {
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(block.trim()) {
            if v.is_object() {
                return Some(v);
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(v) = serde_json::from_str::<serde_json::Value>(&trimmed[start..=end]) {
                if v.is_object() {
                    return Some(v);
                }
            }
        }
    }

    None
}
