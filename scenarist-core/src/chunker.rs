//! Document chunking.
//!
//! Splits extracted text into overlapping windows no longer than the
//! configured size (measured in characters). The recursive splitter tries
//! paragraph, line, sentence and word boundaries in turn and falls back to
//! fixed-size windows for text with no usable separator.

use serde::{Deserialize, Serialize};

/// One unit of extracted text with its page or section number (1-based).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSegment {
    pub text: String,
    pub page: usize,
}

impl TextSegment {
    pub fn new(text: impl Into<String>, page: usize) -> Self {
        Self {
            text: text.into(),
            page,
        }
    }
}

/// A chunk of document text with its position in the source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPiece {
    pub text: String,
    pub page: usize,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

/// Overlapping window splitter.
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
    separators: Vec<String>,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(1000, 200)
    }
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size - 1),
            separators: vec!["\n\n".into(), "\n".into(), ". ".into(), " ".into()],
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Chunk every segment of one document, numbering pieces in document order.
    pub fn chunk_segments(&self, segments: &[TextSegment]) -> Vec<ChunkPiece> {
        let mut pieces: Vec<ChunkPiece> = segments
            .iter()
            .flat_map(|segment| {
                self.chunk_text(&segment.text)
                    .into_iter()
                    .map(move |text| (text, segment.page))
            })
            .enumerate()
            .map(|(chunk_index, (text, page))| ChunkPiece {
                text,
                page,
                chunk_index,
                total_chunks: 0,
            })
            .collect();

        let total = pieces.len();
        for piece in &mut pieces {
            piece.total_chunks = total;
        }
        pieces
    }

    /// Split a single text into ordered chunks. Empty input yields no chunks.
    pub fn chunk_text(&self, text: &str) -> Vec<String> {
        split_recursive(text, &self.separators, self.chunk_size, self.overlap)
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Last `n` characters of `s`, respecting char boundaries.
fn tail(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let len = char_len(s);
    if len <= n {
        return s;
    }
    match s.char_indices().nth(len - n) {
        Some((idx, _)) => &s[idx..],
        None => "",
    }
}

fn split_recursive(text: &str, separators: &[String], size: usize, overlap: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    if char_len(text) <= size {
        return vec![text.trim().to_string()];
    }

    let Some(pos) = separators.iter().position(|sep| text.contains(sep.as_str())) else {
        return split_fixed(text, size, overlap);
    };
    let sep = separators[pos].as_str();
    let finer = &separators[pos + 1..];

    let mut chunks = Vec::new();
    let mut current = String::new();

    for part in text.split(sep) {
        if char_len(part) > size {
            push_trimmed(&mut chunks, &current);
            current.clear();
            chunks.extend(split_recursive(part, finer, size, overlap));
            continue;
        }

        if !current.is_empty() && char_len(&current) + char_len(sep) + char_len(part) > size {
            push_trimmed(&mut chunks, &current);
            let carried = tail(&current, overlap).to_string();
            current = if char_len(&carried) + char_len(sep) + char_len(part) <= size {
                carried
            } else {
                String::new()
            };
        }

        if !current.is_empty() {
            current.push_str(sep);
        }
        current.push_str(part);
    }
    push_trimmed(&mut chunks, &current);
    chunks
}

fn push_trimmed(chunks: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn split_fixed(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = size - overlap.min(size - 1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + size).min(chars.len());
        let window: String = chars[start..end].iter().collect();
        push_trimmed(&mut chunks, &window);
        if end >= chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_yields_nothing() {
        let chunker = Chunker::default();
        assert!(chunker.chunk_text("").is_empty());
        assert!(chunker.chunk_text("  \n\n ").is_empty());
        assert!(chunker.chunk_segments(&[]).is_empty());
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        let chunker = Chunker::default();
        let text = "The login page must accept an eight character minimum password.";
        assert_eq!(chunker.chunk_text(text), vec![text.to_string()]);
    }

    #[test]
    fn test_chunks_respect_size() {
        let chunker = Chunker::new(50, 10);
        let text = "alpha beta gamma delta epsilon. ".repeat(20);
        let chunks = chunker.chunk_text(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 50, "chunk too long: {chunk:?}");
        }
    }

    #[test]
    fn test_fixed_fallback_overlaps() {
        let chunker = Chunker::new(10, 3);
        let chunks = chunker.chunk_text("abcdefghijklmnopqrstuvwxyz");
        assert_eq!(chunks[0], "abcdefghij");
        assert_eq!(chunks[1], "hijklmnopq");
        assert!(chunks.last().unwrap().ends_with('z'));
    }

    #[test]
    fn test_overlap_carries_tail_between_chunks() {
        let chunker = Chunker::new(20, 8);
        let chunks = chunker.chunk_text("one two three four five six seven eight nine ten");
        assert!(chunks.len() > 1);
        let last_word_of_first = chunks[0].split_whitespace().last().unwrap();
        assert!(chunks[1].contains(last_word_of_first));
    }

    #[test]
    fn test_multibyte_text_does_not_panic() {
        let chunker = Chunker::new(8, 3);
        let chunks = chunker.chunk_text("überprüfung größe äöü ß naïve café résumé");
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 8);
        }
    }

    #[test]
    fn test_segments_numbered_in_order() {
        let chunker = Chunker::new(30, 0);
        let segments = vec![
            TextSegment::new("First page has some words on it here.", 1),
            TextSegment::new("", 2),
            TextSegment::new("Third page.", 3),
        ];
        let pieces = chunker.chunk_segments(&segments);
        assert!(pieces.len() >= 3);
        for (i, piece) in pieces.iter().enumerate() {
            assert_eq!(piece.chunk_index, i);
            assert_eq!(piece.total_chunks, pieces.len());
        }
        assert_eq!(pieces.first().unwrap().page, 1);
        assert_eq!(pieces.last().unwrap().page, 3);
        assert_eq!(pieces.last().unwrap().text, "Third page.");
    }

    #[test]
    fn test_overlap_clamped_below_size() {
        let chunker = Chunker::new(5, 50);
        assert_eq!(chunker.overlap(), 4);
        assert!(!chunker.chunk_text("abcdefghijkl").is_empty());
    }
}
