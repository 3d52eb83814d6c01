//! Context-utilization check for generated text.
//!
//! Extracts distinctive vocabulary from the retrieved chunks (three-word
//! phrases and long words, each tagged with its source) and measures how much
//! of it reappears verbatim, case-insensitively, in the generated output.
//! A failing verdict is advisory only.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::ScoredChunk;

const STOP_WORDS: [&str; 7] = ["should", "would", "could", "their", "there", "these", "those"];

static DOC_REFERENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\[(?:Doc|DOCUMENT) ").ok());

/// Outcome of a context-usage check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passed: bool,
    /// Fraction of key content found in the output.
    pub coverage_ratio: f64,
    /// Fraction of distinct input sources with at least one match.
    pub source_coverage: f64,
    pub has_doc_refs: bool,
    pub matched: usize,
    pub total: usize,
    pub message: String,
}

/// Compares generated text against the chunks it was supposed to draw on.
#[derive(Debug, Clone)]
pub struct ContextValidator {
    min_coverage: f64,
}

impl Default for ContextValidator {
    fn default() -> Self {
        Self { min_coverage: 0.05 }
    }
}

impl ContextValidator {
    pub fn new(min_coverage: f64) -> Self {
        Self { min_coverage }
    }

    pub fn validate(&self, generated: &str, chunks: &[ScoredChunk]) -> ValidationReport {
        if chunks.is_empty() {
            return ValidationReport {
                passed: false,
                coverage_ratio: 0.0,
                source_coverage: 0.0,
                has_doc_refs: has_doc_refs(generated),
                matched: 0,
                total: 0,
                message: "No context documents were provided for validation".into(),
            };
        }

        let key_content = extract_key_content(chunks);
        let haystack = generated.to_lowercase();

        let mut matched = 0;
        let mut matched_sources = BTreeSet::new();
        for (item, source) in &key_content {
            if haystack.contains(&item.to_lowercase()) {
                matched += 1;
                matched_sources.insert(source.as_str());
            }
        }

        let total = key_content.len().max(1);
        let coverage_ratio = matched as f64 / total as f64;
        let distinct_sources: BTreeSet<&str> = chunks
            .iter()
            .map(|hit| hit.chunk.source().unwrap_or("Unknown"))
            .collect();
        let source_coverage = matched_sources.len() as f64 / distinct_sources.len() as f64;
        let has_doc_refs = has_doc_refs(generated);

        if coverage_ratio < self.min_coverage && !has_doc_refs {
            return ValidationReport {
                passed: false,
                coverage_ratio,
                source_coverage,
                has_doc_refs,
                matched,
                total: key_content.len(),
                message: format!(
                    "Generated scenario has low context coverage ({})",
                    percent(coverage_ratio)
                ),
            };
        }

        ValidationReport {
            passed: true,
            coverage_ratio,
            source_coverage,
            has_doc_refs,
            matched,
            total: key_content.len(),
            message: format!(
                "Context integration validated:\n- Content coverage: {}\n- Source coverage: {}\n- Document references: {}",
                percent(coverage_ratio),
                percent(source_coverage),
                if has_doc_refs { "Present" } else { "Missing" }
            ),
        }
    }
}

/// Phrases and long words from every chunk, paired with the chunk's source.
fn extract_key_content(chunks: &[ScoredChunk]) -> BTreeSet<(String, String)> {
    let mut key_content = BTreeSet::new();
    for hit in chunks {
        let source = hit.chunk.source().unwrap_or("Unknown");
        let content = hit.chunk.content.replace('\n', " ");

        for sentence in content.split('.').map(str::trim).filter(|s| !s.is_empty()) {
            let words: Vec<&str> = sentence.split_whitespace().collect();

            for window in words.windows(3) {
                let phrase = window.join(" ");
                if phrase.chars().count() > 10 {
                    key_content.insert((phrase, source.to_string()));
                }
            }

            for word in &words {
                if word.chars().count() > 5 && !STOP_WORDS.contains(&word.to_lowercase().as_str()) {
                    key_content.insert((word.to_string(), source.to_string()));
                }
            }
        }
    }
    key_content
}

fn has_doc_refs(text: &str) -> bool {
    match DOC_REFERENCE.as_ref() {
        Some(re) => re.is_match(text),
        None => text.contains("[Doc ") || text.contains("[DOCUMENT "),
    }
}

fn percent(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}
