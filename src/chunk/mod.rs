//! Chunking strategies for splitting documents ahead of indexing.
//!
//! Every strategy implements [`ChunkingStrategy`] and is interchangeable
//! behind the trait. Construction is validated; chunking itself is
//! deterministic and synchronous.
//!
//! | Strategy | Boundary | Best for |
//! |----------|----------|----------|
//! | [`FixedSizeChunking`] | character windows | logs, flat text |
//! | [`SentenceAwareChunking`] | sentence ends | prose |
//! | [`MarkdownAwareChunking`] | headers, paragraphs | structured docs |
//! | [`SemanticChunking`] | topic shifts (embeddings) | long varied text |
//!
//! # Guarantees
//!
//! For any strategy and any document:
//!
//! - Empty content produces an empty chunk list.
//! - Chunks are returned in increasing index order with offsets inside
//!   the content, always on UTF-8 char boundaries.
//! - Concatenating chunk slices in index order (dropping overlap)
//!   covers the entire content.
//! - No chunk is smaller than the strategy's minimum, except the final
//!   chunk of a document.

pub mod fixed;
pub mod markdown;
pub mod semantic;
pub mod sentence;

pub use fixed::FixedSizeChunking;
pub use markdown::MarkdownAwareChunking;
pub use semantic::SemanticChunking;
pub use sentence::SentenceAwareChunking;

use std::collections::HashMap;

use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::models::{Document, DocumentChunk};

/// A document chunking strategy.
///
/// Strategies are immutable after construction and safe to share
/// across threads. [`estimate_quality`](ChunkingStrategy::estimate_quality)
/// and [`is_suitable_for`](ChunkingStrategy::is_suitable_for) feed the
/// factory's automatic selection; they inspect the document without
/// chunking it.
pub trait ChunkingStrategy: Send + Sync {
    /// Split the document into chunks.
    fn chunk(&self, document: &Document) -> Result<Vec<DocumentChunk>>;

    /// Nominal chunk size in characters.
    fn chunk_size(&self) -> usize;

    /// Overlap between consecutive chunks in characters.
    fn overlap_size(&self) -> usize;

    /// Stable machine-readable name, recorded on every chunk.
    fn name(&self) -> &'static str;

    /// One-line human-readable description.
    fn description(&self) -> String;

    /// Smallest chunk this strategy aims to emit (final chunks may be
    /// smaller).
    fn min_chunk_size(&self) -> usize {
        std::cmp::max(50, self.chunk_size() / 10)
    }

    /// Largest chunk this strategy aims to emit (atomic units such as
    /// code fences may exceed it).
    fn max_chunk_size(&self) -> usize {
        self.chunk_size() * 2
    }

    /// Predict chunking quality for this document in `[0.0, 1.0]`
    /// without chunking it.
    fn estimate_quality(&self, _document: &Document) -> f64 {
        0.5
    }

    /// Whether this strategy is a reasonable fit for the document.
    fn is_suitable_for(&self, _document: &Document) -> bool {
        true
    }
}

/// A byte range into a document's content, on char boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn len(&self) -> usize {
        self.end - self.start
    }
}

/// Build a [`DocumentChunk`] for `document.content[start..end]`.
///
/// Computes the SHA-256 content hash and, when `preserve_metadata` is
/// set, copies the parent document's metadata (plus its title under
/// `document_title`) onto the chunk.
pub(crate) fn make_chunk(
    document: &Document,
    index: usize,
    start: usize,
    end: usize,
    strategy: &'static str,
    quality: Option<f64>,
    preserve_metadata: bool,
) -> DocumentChunk {
    let text = &document.content[start..end];
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let mut metadata = if preserve_metadata {
        document.metadata.clone()
    } else {
        HashMap::new()
    };
    if preserve_metadata {
        if let Some(title) = &document.title {
            metadata
                .entry("document_title".to_string())
                .or_insert_with(|| title.clone());
        }
    }

    DocumentChunk {
        id: format!("{}_chunk_{}", document.id, index),
        document_id: document.id.clone(),
        content: text.to_string(),
        index,
        start_offset: start,
        end_offset: end,
        strategy: strategy.to_string(),
        quality_score: quality,
        metadata,
        hash,
    }
}

/// Advance `count` chars from byte offset `from`, returning the
/// resulting byte offset (clamped to the end of the string).
pub(crate) fn advance_chars(s: &str, from: usize, count: usize) -> usize {
    s[from..]
        .char_indices()
        .nth(count)
        .map(|(i, _)| from + i)
        .unwrap_or(s.len())
}

/// Ratio of non-whitespace chars, in `[0.0, 1.0]`.
pub(crate) fn text_density(text: &str) -> f64 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    let non_ws = text.chars().filter(|c| !c.is_whitespace()).count();
    non_ws as f64 / total as f64
}

/// Lines that carry markdown or code structure rather than prose.
pub(crate) fn is_structured_line(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with('#')
        || t.starts_with("```")
        || t.starts_with('|')
        || t.starts_with("- ")
        || t.starts_with("* ")
        || t.starts_with("+ ")
        || t.starts_with("> ")
}

/// Words that end with a period without ending a sentence.
const ABBREVIATIONS: &[&str] = &[
    "dr", "mr", "mrs", "ms", "prof", "sr", "jr", "st", "vs", "etc", "e.g", "i.e", "inc", "ltd",
    "co", "corp", "fig", "al", "no", "vol", "approx",
];

fn is_abbreviation(before: &str) -> bool {
    let word = before
        .rsplit(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or("");
    let word = word
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '.')
        .trim_end_matches('.');
    if word.is_empty() {
        return false;
    }
    let lower = word.to_lowercase();
    ABBREVIATIONS.contains(&lower.as_str())
}

/// Split text into sentence spans.
///
/// A sentence ends at a run of `.`, `!`, or `?` (plus any closing
/// quotes or brackets) followed by whitespace and a char that plausibly
/// starts a new sentence. Common abbreviations (`Dr.`, `e.g.`) do not
/// end a sentence. Spans exclude inter-sentence whitespace; text
/// without a trailing terminator still yields a final span, so any
/// non-blank text produces at least one sentence.
pub(crate) fn split_sentences(content: &str) -> Vec<Span> {
    let chars: Vec<(usize, char)> = content.char_indices().collect();
    let mut spans = Vec::new();
    let mut start = 0usize;
    let mut k = 0usize;

    while k < chars.len() {
        let (i, c) = chars[k];
        if !matches!(c, '.' | '!' | '?') {
            k += 1;
            continue;
        }

        // absorb the terminator run plus closing quotes/brackets
        let mut j = k + 1;
        while j < chars.len() && matches!(chars[j].1, '.' | '!' | '?' | '"' | '\'' | ')' | ']') {
            j += 1;
        }
        let end = if j < chars.len() {
            chars[j].0
        } else {
            content.len()
        };

        let abbreviated = c == '.' && is_abbreviation(&content[start..i]);

        let mut m = j;
        let mut saw_ws = false;
        while m < chars.len() && chars[m].1.is_whitespace() {
            saw_ws = true;
            m += 1;
        }
        let starts_new = m >= chars.len()
            || (saw_ws && {
                let next = chars[m].1;
                next.is_uppercase()
                    || next.is_numeric()
                    || matches!(next, '"' | '\'' | '#' | '-' | '*' | '`' | '(' | '[')
            });

        if !abbreviated && starts_new && end > start {
            spans.push(Span { start, end });
            start = if m < chars.len() {
                chars[m].0
            } else {
                content.len()
            };
            k = m;
        } else {
            k = j;
        }
    }

    if start < content.len() && !content[start..].trim().is_empty() {
        spans.push(Span {
            start,
            end: content.len(),
        });
    }

    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts<'a>(content: &'a str, spans: &[Span]) -> Vec<&'a str> {
        spans.iter().map(|s| &content[s.start..s.end]).collect()
    }

    #[test]
    fn test_split_basic_sentences() {
        let content = "First sentence. Second one! Is this the third? Yes.";
        let spans = split_sentences(content);
        assert_eq!(
            texts(content, &spans),
            vec![
                "First sentence.",
                "Second one!",
                "Is this the third?",
                "Yes."
            ]
        );
    }

    #[test]
    fn test_split_respects_abbreviations() {
        let content = "Dr. Smith runs the lab. He arrived at 9.";
        let spans = split_sentences(content);
        assert_eq!(
            texts(content, &spans),
            vec!["Dr. Smith runs the lab.", "He arrived at 9."]
        );
    }

    #[test]
    fn test_split_handles_eg() {
        let content = "Some values, e.g. three of them, are odd. Others are even.";
        let spans = split_sentences(content);
        assert_eq!(spans.len(), 2);
    }

    #[test]
    fn test_lowercase_continuation_does_not_split() {
        let content = "The value is approx. fifty units in total.";
        let spans = split_sentences(content);
        assert_eq!(spans.len(), 1);
    }

    #[test]
    fn test_trailing_text_without_terminator() {
        let content = "Complete sentence. trailing fragment without end";
        let spans = split_sentences(content);
        // the fragment starts lowercase, so the terminator does not split
        assert_eq!(spans.len(), 1);

        let content2 = "Complete sentence. Trailing fragment without end";
        let spans2 = split_sentences(content2);
        assert_eq!(spans2.len(), 2);
        assert_eq!(spans2[1].end, content2.len());
    }

    #[test]
    fn test_empty_and_blank_input() {
        assert!(split_sentences("").is_empty());
        assert!(split_sentences("   \n\t ").is_empty());
    }

    #[test]
    fn test_spans_are_ordered_and_in_bounds() {
        let content = "Alpha beta. Gamma delta! Epsilon? Zeta eta theta.";
        let spans = split_sentences(content);
        let mut prev_end = 0;
        for span in &spans {
            assert!(span.start >= prev_end);
            assert!(span.end <= content.len());
            assert!(span.start < span.end);
            assert!(content.is_char_boundary(span.start));
            assert!(content.is_char_boundary(span.end));
            prev_end = span.end;
        }
    }

    #[test]
    fn test_split_multibyte_text() {
        let content = "Köln ist schön. München auch. Zürich sowieso.";
        let spans = split_sentences(content);
        assert_eq!(spans.len(), 3);
        for span in &spans {
            assert!(content.is_char_boundary(span.start));
            assert!(content.is_char_boundary(span.end));
        }
    }

    #[test]
    fn test_text_density() {
        assert_eq!(text_density(""), 0.0);
        assert_eq!(text_density("abcd"), 1.0);
        assert!((text_density("ab  ") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_advance_chars_multibyte() {
        let s = "aéb";
        assert_eq!(advance_chars(s, 0, 1), 1);
        assert_eq!(advance_chars(s, 0, 2), 3); // é is two bytes
        assert_eq!(advance_chars(s, 0, 10), s.len());
    }
}
