//! Sentence-aware chunking.
//!
//! Packs whole sentences into chunks of `target × (1 ± tolerance)`
//! chars, never splitting inside a sentence. Overlap is sentence
//! aligned: a new chunk re-includes the trailing sentences of the
//! previous one up to the configured overlap. Text with no sentence
//! boundaries at all falls back to fixed-size windows.

use anyhow::{bail, Result};
use tracing::debug;

use crate::config::ChunkingConfig;
use crate::models::{Document, DocumentChunk};

use super::{
    make_chunk, split_sentences, text_density, ChunkingStrategy, FixedSizeChunking, Span,
};

pub struct SentenceAwareChunking {
    target_size: usize,
    overlap: usize,
    size_tolerance: f64,
    preserve_metadata: bool,
}

impl SentenceAwareChunking {
    pub fn new(target_size: usize, overlap: usize, size_tolerance: f64) -> Result<Self> {
        if target_size == 0 {
            bail!("sentence-aware chunking requires a positive target_size");
        }
        if overlap >= target_size {
            bail!(
                "sentence-aware overlap ({overlap}) must be smaller than target_size ({target_size})"
            );
        }
        if !(0.0..=1.0).contains(&size_tolerance) {
            bail!("sentence-aware size_tolerance must be in [0.0, 1.0]");
        }
        Ok(Self {
            target_size,
            overlap,
            size_tolerance,
            preserve_metadata: true,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        let mut strategy = Self::new(
            config.target_chunk_size,
            config.overlap_size,
            config.sentence.size_tolerance,
        )?;
        strategy.preserve_metadata = config.preserve_metadata;
        Ok(strategy)
    }

    fn max_group_size(&self) -> usize {
        (self.target_size as f64 * (1.0 + self.size_tolerance)) as usize
    }

    fn min_group_size(&self) -> usize {
        (self.target_size as f64 * (1.0 - self.size_tolerance)) as usize
    }

    /// Group sentences into chunk byte ranges.
    ///
    /// A group flushes once it reaches the target size, or earlier when
    /// the next sentence would push it past `target × (1 + tolerance)`
    /// and it already holds `target × (1 - tolerance)` chars. Ranges
    /// start where the previous range ended (or earlier, when overlap
    /// backs up to a sentence boundary), so the ranges cover the whole
    /// content.
    fn group_ranges(&self, content: &str, sentences: &[Span]) -> Vec<(usize, usize)> {
        let max_size = self.max_group_size().max(1);
        let min_size = self.min_group_size();

        let mut ranges: Vec<(usize, usize)> = Vec::new();
        let mut slice_start = 0usize;
        let mut lo = 0usize; // first sentence of the current group
        let mut acc = 0usize; // accumulated sentence chars
        let mut fresh = false; // any sentence added since the last flush
        let mut i = 0usize;

        while i < sentences.len() {
            let sentence = sentences[i];
            let should_flush =
                acc >= self.target_size || (acc + sentence.len() > max_size && acc >= min_size);

            if acc > 0 && should_flush {
                let end = sentences[i - 1].end;
                ranges.push((slice_start, end));
                fresh = false;

                // sentence-aligned overlap: carry trailing sentences back
                // into the next group when they still leave room
                let mut carry_from = i;
                if self.overlap > 0 {
                    let overlap_from = end.saturating_sub(self.overlap);
                    let mut k = i;
                    while k > lo && sentences[k - 1].start >= overlap_from {
                        k -= 1;
                    }
                    let carried: usize = sentences[k..i].iter().map(Span::len).sum();
                    if carried < self.target_size && carried + sentence.len() <= max_size {
                        carry_from = k;
                    }
                }

                lo = carry_from;
                if carry_from < i {
                    slice_start = sentences[carry_from].start;
                    acc = sentences[carry_from..i].iter().map(Span::len).sum();
                } else {
                    slice_start = end;
                    acc = 0;
                }
                continue;
            }

            acc += sentence.len();
            fresh = true;
            i += 1;
        }

        if fresh || ranges.is_empty() {
            ranges.push((slice_start, content.len()));
        } else if let Some(last) = ranges.last_mut() {
            // trailing whitespace only: extend the final range instead
            // of emitting a crumb
            last.1 = content.len();
        }

        ranges
    }

    fn chunk_quality(&self, text: &str) -> f64 {
        let chars = text.chars().count() as f64;
        let size_fit =
            (1.0 - (chars - self.target_size as f64).abs() / self.target_size as f64).clamp(0.0, 1.0);
        let complete = text
            .trim_end()
            .chars()
            .next_back()
            .map(|c| matches!(c, '.' | '!' | '?' | '"' | '\'' | ')' | ']'))
            .unwrap_or(false);
        let completeness = if complete { 1.0 } else { 0.8 };
        0.5 * size_fit + 0.3 * completeness + 0.2 * text_density(text)
    }
}

impl ChunkingStrategy for SentenceAwareChunking {
    fn chunk(&self, document: &Document) -> Result<Vec<DocumentChunk>> {
        let content = &document.content;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        if !content.contains(['.', '!', '?']) {
            debug!(
                document_id = %document.id,
                "no sentence boundaries found, using fixed-size windows"
            );
            return FixedSizeChunking::new(self.target_size, self.overlap)?
                .with_preserve_metadata(self.preserve_metadata)
                .chunk(document);
        }

        let sentences = split_sentences(content);
        let ranges = self.group_ranges(content, &sentences);

        Ok(ranges
            .into_iter()
            .enumerate()
            .map(|(index, (start, end))| {
                let quality = self.chunk_quality(&content[start..end]);
                make_chunk(
                    document,
                    index,
                    start,
                    end,
                    self.name(),
                    Some(quality),
                    self.preserve_metadata,
                )
            })
            .collect())
    }

    fn chunk_size(&self) -> usize {
        self.target_size
    }

    fn overlap_size(&self) -> usize {
        self.overlap
    }

    fn name(&self) -> &'static str {
        "sentence_aware"
    }

    fn description(&self) -> String {
        format!(
            "Sentence-aligned chunks of {} chars (±{:.0}%)",
            self.target_size,
            self.size_tolerance * 100.0
        )
    }

    /// Structure (sentence density) dominates; the length term peaks
    /// near an average sentence length of ~100 chars.
    fn estimate_quality(&self, document: &Document) -> f64 {
        let content = &document.content;
        if content.trim().is_empty() {
            return 0.0;
        }
        if !content.contains(['.', '!', '?']) {
            return 0.2;
        }
        let sentences = split_sentences(content);
        if sentences.is_empty() {
            return 0.2;
        }
        let count = sentences.len() as f64;
        let chars = content.chars().count() as f64;
        let per_thousand = count / chars * 1000.0;
        let structure = (per_thousand / 5.0).min(1.0);
        let avg_len = chars / count;
        let length_fit = (1.0 - (avg_len - 100.0).abs() / 200.0).max(0.0);
        (structure * 0.6 + length_fit * 0.4).clamp(0.0, 1.0)
    }

    fn is_suitable_for(&self, document: &Document) -> bool {
        let content = &document.content;
        if content.trim().is_empty() {
            return false;
        }
        let sentences = split_sentences(content);
        if sentences.len() < 3 {
            return false;
        }
        let avg = content.chars().count() / sentences.len();
        (20..=500).contains(&avg)
    }
}
