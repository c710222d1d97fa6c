//! Chunking configuration: sizes, thresholds, strategy selection, and
//! per-document-type overrides.
//!
//! Configuration is plain data supplied by the host application (it
//! derives `Deserialize` so it can be embedded in an application config
//! file). Invariants are enforced by [`ChunkingConfig::validate`], which
//! the factory calls before constructing any strategy — constructors
//! never panic on bad input.

use std::collections::HashMap;
use std::fmt;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::DocumentType;

/// The chunking strategy families, in canonical evaluation order.
///
/// The order of [`StrategyKind::ALL`] doubles as the tie-break order
/// during automatic selection: earlier kinds win equal quality scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    FixedSize,
    SentenceAware,
    MarkdownAware,
    Semantic,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::FixedSize,
        StrategyKind::SentenceAware,
        StrategyKind::MarkdownAware,
        StrategyKind::Semantic,
    ];
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyKind::FixedSize => "fixed_size",
            StrategyKind::SentenceAware => "sentence_aware",
            StrategyKind::MarkdownAware => "markdown_aware",
            StrategyKind::Semantic => "semantic",
        };
        f.write_str(s)
    }
}

fn default_primary_strategy() -> StrategyKind {
    StrategyKind::SentenceAware
}

fn default_fallback_strategy() -> StrategyKind {
    StrategyKind::FixedSize
}

fn default_true() -> bool {
    true
}

fn default_target_chunk_size() -> usize {
    1000
}

fn default_min_chunk_size() -> usize {
    200
}

fn default_max_chunk_size() -> usize {
    2000
}

fn default_overlap_size() -> usize {
    200
}

fn default_min_quality_threshold() -> f64 {
    0.3
}

fn default_preferred_quality_threshold() -> f64 {
    0.7
}

fn default_size_tolerance() -> f64 {
    0.3
}

fn default_similarity_threshold() -> f64 {
    0.75
}

fn default_sliding_window() -> usize {
    3
}

fn default_max_header_level() -> usize {
    3
}

/// Tuning for [`SentenceAwareChunking`](crate::chunk::SentenceAwareChunking).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceAwareConfig {
    /// Allowed deviation around the target size: chunks land in
    /// `target × (1 ± tolerance)`.
    #[serde(default = "default_size_tolerance")]
    pub size_tolerance: f64,
}

impl Default for SentenceAwareConfig {
    fn default() -> Self {
        Self {
            size_tolerance: default_size_tolerance(),
        }
    }
}

impl SentenceAwareConfig {
    /// Tight packing close to the target size.
    pub fn strict() -> Self {
        Self {
            size_tolerance: 0.1,
        }
    }

    /// Loose packing, fewer mid-thought cuts.
    pub fn flexible() -> Self {
        Self {
            size_tolerance: 0.5,
        }
    }
}

/// Tuning for [`SemanticChunking`](crate::chunk::SemanticChunking).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticConfig {
    /// Minimum mean cosine similarity for a sentence to join the
    /// current group.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Number of trailing group members the candidate is compared
    /// against.
    #[serde(default = "default_sliding_window")]
    pub sliding_window: usize,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            sliding_window: default_sliding_window(),
        }
    }
}

impl SemanticConfig {
    /// Smaller, tightly coherent groups.
    pub fn precise() -> Self {
        Self {
            similarity_threshold: 0.85,
            sliding_window: 2,
        }
    }

    /// Larger groups that tolerate topic drift.
    pub fn flexible() -> Self {
        Self {
            similarity_threshold: 0.65,
            sliding_window: 4,
        }
    }
}

/// Tuning for [`MarkdownAwareChunking`](crate::chunk::MarkdownAwareChunking).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkdownConfig {
    /// Keep fenced code blocks intact, even when oversize.
    #[serde(default = "default_true")]
    pub preserve_code_blocks: bool,
    /// Split at headers; when off, the document is treated as one
    /// section and split on paragraph boundaries only.
    #[serde(default = "default_true")]
    pub respect_headers: bool,
    /// Headers deeper than this level do not start a new section.
    #[serde(default = "default_max_header_level")]
    pub max_header_level: usize,
    #[serde(default = "default_true")]
    pub preserve_tables: bool,
    #[serde(default = "default_true")]
    pub preserve_lists: bool,
}

impl Default for MarkdownConfig {
    fn default() -> Self {
        Self {
            preserve_code_blocks: true,
            respect_headers: true,
            max_header_level: default_max_header_level(),
            preserve_tables: true,
            preserve_lists: true,
        }
    }
}

impl MarkdownConfig {
    /// Split only at top-level structure (h1/h2).
    pub fn header_focused() -> Self {
        Self {
            max_header_level: 2,
            ..Self::default()
        }
    }

    /// Treat headers as plain text but keep code blocks whole, for
    /// code-heavy documents with decorative headings.
    pub fn code_preserving() -> Self {
        Self {
            respect_headers: false,
            max_header_level: 4,
            ..Self::default()
        }
    }
}

/// Top-level chunking configuration.
///
/// Size invariants: `0 < min_chunk_size < target_chunk_size <
/// max_chunk_size` and `overlap_size < target_chunk_size`. Quality
/// thresholds live in `[0.0, 1.0]` with `min <= preferred`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Strategy used when auto-selection is off, and the starting
    /// point when it is on.
    #[serde(default = "default_primary_strategy")]
    pub primary_strategy: StrategyKind,
    /// Strategy used when quality falls below the thresholds.
    #[serde(default = "default_fallback_strategy")]
    pub fallback_strategy: StrategyKind,
    /// Evaluate all strategies against the document and pick the best.
    #[serde(default = "default_true")]
    pub auto_select: bool,
    #[serde(default = "default_target_chunk_size")]
    pub target_chunk_size: usize,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_overlap_size")]
    pub overlap_size: usize,
    /// Candidates scoring below this are passed over during selection.
    #[serde(default = "default_min_quality_threshold")]
    pub min_quality_threshold: f64,
    /// Below this, the fallback strategy is considered as a better
    /// alternative.
    #[serde(default = "default_preferred_quality_threshold")]
    pub preferred_quality_threshold: f64,
    /// Allow falling back to `fallback_strategy` on poor quality.
    #[serde(default = "default_true")]
    pub quality_fallback: bool,
    /// Copy parent document metadata onto each chunk.
    #[serde(default = "default_true")]
    pub preserve_metadata: bool,
    #[serde(default)]
    pub sentence: SentenceAwareConfig,
    #[serde(default)]
    pub markdown: MarkdownConfig,
    #[serde(default)]
    pub semantic: SemanticConfig,
    /// Resolve [`ChunkingConfig::config_for`] through `type_overrides`.
    #[serde(default)]
    pub use_type_overrides: bool,
    /// Full replacement configs keyed by document type.
    #[serde(default)]
    pub type_overrides: HashMap<DocumentType, ChunkingConfig>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            primary_strategy: default_primary_strategy(),
            fallback_strategy: default_fallback_strategy(),
            auto_select: true,
            target_chunk_size: default_target_chunk_size(),
            min_chunk_size: default_min_chunk_size(),
            max_chunk_size: default_max_chunk_size(),
            overlap_size: default_overlap_size(),
            min_quality_threshold: default_min_quality_threshold(),
            preferred_quality_threshold: default_preferred_quality_threshold(),
            quality_fallback: true,
            preserve_metadata: true,
            sentence: SentenceAwareConfig::default(),
            markdown: MarkdownConfig::default(),
            semantic: SemanticConfig::default(),
            use_type_overrides: false,
            type_overrides: HashMap::new(),
        }
    }
}

impl ChunkingConfig {
    /// Preset for API references, manuals, and other structured docs:
    /// markdown-first with smaller sections.
    pub fn technical_docs() -> Self {
        Self {
            primary_strategy: StrategyKind::MarkdownAware,
            target_chunk_size: 800,
            min_chunk_size: 150,
            max_chunk_size: 1600,
            overlap_size: 100,
            ..Self::default()
        }
    }

    /// Preset for prose-heavy content: larger sentence-aligned chunks
    /// with a loose size tolerance.
    pub fn narrative() -> Self {
        Self {
            primary_strategy: StrategyKind::SentenceAware,
            target_chunk_size: 1200,
            min_chunk_size: 300,
            max_chunk_size: 2400,
            overlap_size: 150,
            sentence: SentenceAwareConfig::flexible(),
            ..Self::default()
        }
    }

    /// Preset for bulk ingestion where throughput beats boundary
    /// quality: fixed windows, no per-document evaluation.
    pub fn high_volume() -> Self {
        Self {
            primary_strategy: StrategyKind::FixedSize,
            auto_select: false,
            quality_fallback: false,
            target_chunk_size: 1500,
            min_chunk_size: 200,
            max_chunk_size: 3000,
            overlap_size: 0,
            ..Self::default()
        }
    }

    /// Register a per-type override and enable override resolution.
    pub fn with_type_override(mut self, doc_type: DocumentType, config: ChunkingConfig) -> Self {
        self.use_type_overrides = true;
        self.type_overrides.insert(doc_type, config);
        self
    }

    /// Resolve the effective config for a document type.
    pub fn config_for(&self, doc_type: DocumentType) -> &ChunkingConfig {
        if self.use_type_overrides {
            if let Some(config) = self.type_overrides.get(&doc_type) {
                return config;
            }
        }
        self
    }

    /// Check every invariant, with a descriptive error on the first
    /// violation. Per-type overrides are validated recursively.
    pub fn validate(&self) -> Result<()> {
        if self.target_chunk_size == 0 {
            bail!("chunking.target_chunk_size must be positive");
        }
        if self.min_chunk_size == 0 || self.min_chunk_size >= self.target_chunk_size {
            bail!(
                "chunking.min_chunk_size must be in (0, target_chunk_size), got {}",
                self.min_chunk_size
            );
        }
        if self.max_chunk_size <= self.target_chunk_size {
            bail!(
                "chunking.max_chunk_size ({}) must exceed target_chunk_size ({})",
                self.max_chunk_size,
                self.target_chunk_size
            );
        }
        if self.overlap_size >= self.target_chunk_size {
            bail!(
                "chunking.overlap_size ({}) must be smaller than target_chunk_size ({})",
                self.overlap_size,
                self.target_chunk_size
            );
        }
        if !(0.0..=1.0).contains(&self.min_quality_threshold) {
            bail!("chunking.min_quality_threshold must be in [0.0, 1.0]");
        }
        if !(0.0..=1.0).contains(&self.preferred_quality_threshold) {
            bail!("chunking.preferred_quality_threshold must be in [0.0, 1.0]");
        }
        if self.min_quality_threshold > self.preferred_quality_threshold {
            bail!(
                "chunking.min_quality_threshold ({}) must not exceed preferred_quality_threshold ({})",
                self.min_quality_threshold,
                self.preferred_quality_threshold
            );
        }
        if !(0.0..=1.0).contains(&self.sentence.size_tolerance) {
            bail!("chunking.sentence.size_tolerance must be in [0.0, 1.0]");
        }
        if !(0.0..=1.0).contains(&self.semantic.similarity_threshold) {
            bail!("chunking.semantic.similarity_threshold must be in [0.0, 1.0]");
        }
        if self.semantic.sliding_window == 0 {
            bail!("chunking.semantic.sliding_window must be at least 1");
        }
        if !(1..=6).contains(&self.markdown.max_header_level) {
            bail!("chunking.markdown.max_header_level must be in [1, 6]");
        }
        for (doc_type, config) in &self.type_overrides {
            config
                .validate()
                .with_context(|| format!("invalid chunking override for {doc_type}"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(ChunkingConfig::default().validate().is_ok());
    }

    #[test]
    fn test_presets_validate() {
        assert!(ChunkingConfig::technical_docs().validate().is_ok());
        assert!(ChunkingConfig::narrative().validate().is_ok());
        assert!(ChunkingConfig::high_volume().validate().is_ok());
    }

    #[test]
    fn test_min_must_be_below_target() {
        let config = ChunkingConfig {
            min_chunk_size: 1000,
            target_chunk_size: 1000,
            ..ChunkingConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_chunk_size"));
    }

    #[test]
    fn test_max_must_exceed_target() {
        let config = ChunkingConfig {
            max_chunk_size: 800,
            ..ChunkingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overlap_must_be_below_target() {
        let config = ChunkingConfig {
            overlap_size: 1000,
            ..ChunkingConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("overlap_size"));
    }

    #[test]
    fn test_thresholds_must_be_in_unit_interval() {
        let config = ChunkingConfig {
            min_quality_threshold: 1.1,
            ..ChunkingConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ChunkingConfig {
            preferred_quality_threshold: -0.2,
            min_quality_threshold: 0.0,
            ..ChunkingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_min_threshold_must_not_exceed_preferred() {
        let config = ChunkingConfig {
            min_quality_threshold: 0.8,
            preferred_quality_threshold: 0.5,
            ..ChunkingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let bad = ChunkingConfig {
            target_chunk_size: 0,
            ..ChunkingConfig::default()
        };
        let config = ChunkingConfig::default().with_type_override(DocumentType::Markdown, bad);
        let err = config.validate().unwrap_err();
        assert!(format!("{err:#}").contains("markdown"));
    }

    #[test]
    fn test_config_for_resolves_overrides() {
        let override_config = ChunkingConfig {
            target_chunk_size: 500,
            min_chunk_size: 100,
            max_chunk_size: 1000,
            overlap_size: 0,
            ..ChunkingConfig::default()
        };
        let config =
            ChunkingConfig::default().with_type_override(DocumentType::SourceCode, override_config);

        assert_eq!(
            config.config_for(DocumentType::SourceCode).target_chunk_size,
            500
        );
        assert_eq!(config.config_for(DocumentType::Text).target_chunk_size, 1000);
    }

    #[test]
    fn test_overrides_ignored_when_disabled() {
        let mut config = ChunkingConfig::default().with_type_override(
            DocumentType::Sql,
            ChunkingConfig {
                target_chunk_size: 400,
                min_chunk_size: 100,
                max_chunk_size: 800,
                overlap_size: 0,
                ..ChunkingConfig::default()
            },
        );
        config.use_type_overrides = false;
        assert_eq!(config.config_for(DocumentType::Sql).target_chunk_size, 1000);
    }
}
