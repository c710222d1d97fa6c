//! Fixed-size sliding-window chunking.
//!
//! The baseline strategy: character windows of `chunk_size`, stepping
//! by `chunk_size - overlap`. Ignores structure entirely, which makes
//! it the fallback of last resort — it always succeeds on any input.

use anyhow::{bail, Result};

use crate::config::ChunkingConfig;
use crate::models::{Document, DocumentChunk};

use super::{advance_chars, make_chunk, text_density, ChunkingStrategy};

pub struct FixedSizeChunking {
    chunk_size: usize,
    overlap: usize,
    preserve_metadata: bool,
}

impl FixedSizeChunking {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            bail!("fixed-size chunking requires a positive chunk_size");
        }
        if overlap >= chunk_size {
            bail!(
                "fixed-size overlap ({overlap}) must be smaller than chunk_size ({chunk_size})"
            );
        }
        Ok(Self {
            chunk_size,
            overlap,
            preserve_metadata: true,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Ok(Self::new(config.target_chunk_size, config.overlap_size)?
            .with_preserve_metadata(config.preserve_metadata))
    }

    pub(crate) fn with_preserve_metadata(mut self, preserve: bool) -> Self {
        self.preserve_metadata = preserve;
        self
    }

    fn chunk_quality(&self, text: &str, at_document_end: bool) -> f64 {
        let chunk_chars = text.chars().count();
        let length_ratio = (chunk_chars as f64 / self.chunk_size as f64).min(1.0);
        let clean_break = at_document_end
            || text
                .chars()
                .next_back()
                .map(|c| c.is_whitespace() || c.is_ascii_punctuation())
                .unwrap_or(false);
        let completeness = if clean_break { 1.0 } else { 0.7 };
        0.3 + 0.4 * length_ratio + 0.3 * completeness
    }
}

impl ChunkingStrategy for FixedSizeChunking {
    fn chunk(&self, document: &Document) -> Result<Vec<DocumentChunk>> {
        let content = &document.content;
        if content.is_empty() {
            return Ok(Vec::new());
        }

        let step = self.chunk_size - self.overlap;
        let mut chunks = Vec::new();
        let mut pos = 0usize;
        let mut index = 0usize;

        while pos < content.len() {
            let end = advance_chars(content, pos, self.chunk_size);
            let quality = self.chunk_quality(&content[pos..end], end == content.len());
            chunks.push(make_chunk(
                document,
                index,
                pos,
                end,
                self.name(),
                Some(quality),
                self.preserve_metadata,
            ));
            index += 1;
            if end >= content.len() {
                break;
            }
            pos = advance_chars(content, pos, step);
        }

        Ok(chunks)
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn overlap_size(&self) -> usize {
        self.overlap
    }

    fn name(&self) -> &'static str {
        "fixed_size"
    }

    fn description(&self) -> String {
        format!(
            "Fixed windows of {} chars with {} chars overlap",
            self.chunk_size, self.overlap
        )
    }

    fn estimate_quality(&self, document: &Document) -> f64 {
        let content = &document.content;
        if content.is_empty() {
            return 0.0;
        }
        let chars = content.chars().count() as f64;
        let size_ratio = (chars / self.chunk_size as f64).min(1.0);
        let density = text_density(content);
        let overlap_efficiency = 1.0 - self.overlap as f64 / self.chunk_size as f64;
        size_ratio * 0.4 + density * 0.4 + overlap_efficiency * 0.2
    }

    /// Fixed windows only pay off when the document spans several of
    /// them.
    fn is_suitable_for(&self, document: &Document) -> bool {
        document.content.chars().count() >= self.chunk_size * 2
    }
}
