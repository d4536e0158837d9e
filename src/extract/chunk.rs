//! Document chunking

use serde::Serialize;

/// A slice of the source document handed to one extractor call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentChunk {
    /// Position of this chunk in the document, 0-based
    pub index: usize,
    pub text: String,
}

/// Split `text` into chunks of at most `size` characters, each starting
/// `overlap` characters before the previous one ended.
///
/// Chunk ends prefer the last whitespace in the back half of the window so
/// words are not cut. Whitespace-only text yields no chunks.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<DocumentChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let size = size.max(1);
    let overlap = overlap.min(size / 2);

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let hard_end = (start + size).min(chars.len());
        let end = if hard_end < chars.len() {
            let floor = start + size / 2;
            (floor..hard_end)
                .rev()
                .find(|&i| chars[i].is_whitespace())
                .map(|i| i + 1)
                .unwrap_or(hard_end)
        } else {
            hard_end
        };

        let piece: String = chars[start..end].iter().collect();
        if !piece.trim().is_empty() {
            chunks.push(DocumentChunk {
                index: chunks.len(),
                text: piece,
            });
        }

        if end >= chars.len() {
            break;
        }
        // Always make progress, even with a large overlap
        start = end.saturating_sub(overlap).max(start + 1);
    }

    chunks
}
