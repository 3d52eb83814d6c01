//! Prompt context rendering.

use crate::types::{ScoredChunk, meta};

/// Substituted for the context block when retrieval found nothing.
pub const NO_CONTEXT_MARKER: &str = "No relevant context found in the document collection.";

/// Render ranked chunks into a numbered, source-attributed block.
///
/// Output depends only on the chunk list, so formatting the same list twice
/// yields identical text.
pub fn format_context(chunks: &[ScoredChunk]) -> String {
    if chunks.is_empty() {
        return NO_CONTEXT_MARKER.to_string();
    }

    chunks
        .iter()
        .enumerate()
        .map(|(i, hit)| {
            let n = i + 1;
            let chunk = &hit.chunk;
            let source = chunk
                .meta(meta::SOURCE)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Document {n}"));
            format!(
                "\n[DOCUMENT {n}]\nSource: {source}\nType: {}\nContent-Type: {}\nPage/Section: {}\nContent:\n{}\n---",
                chunk.meta(meta::KIND).unwrap_or("Unknown"),
                chunk.meta(meta::CONTENT_TYPE).unwrap_or("unknown"),
                chunk.meta(meta::PAGE).unwrap_or("N/A"),
                chunk.content,
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
