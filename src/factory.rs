//! Strategy construction and automatic selection.
//!
//! [`create_strategy`] builds the configured primary strategy;
//! [`create_optimal_strategy`] evaluates every strategy family against
//! a concrete document and picks the best fit; [`create_with_fallback`]
//! wraps selection in [`AdaptiveChunking`], which re-chunks with the
//! fallback strategy when realized quality comes in below the minimum
//! threshold.
//!
//! Semantic chunking needs an [`EmbeddingProvider`]; all entry points
//! take one as an explicit `Option` and simply skip the semantic family
//! when none is supplied.

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{debug, warn};

use crate::chunk::{
    ChunkingStrategy, FixedSizeChunking, MarkdownAwareChunking, SemanticChunking,
    SentenceAwareChunking,
};
use crate::config::{ChunkingConfig, StrategyKind};
use crate::embedding::EmbeddingProvider;
use crate::models::{Document, DocumentChunk};

/// One strategy family's evaluation against a document.
pub struct StrategyRecommendation {
    pub kind: StrategyKind,
    /// Suitability-weighted quality estimate; 0.0 when the strategy
    /// could not be constructed.
    pub expected_quality: f64,
    /// `None` when construction failed (e.g. semantic without an
    /// embedding provider).
    pub strategy: Option<Box<dyn ChunkingStrategy>>,
}

fn build(
    kind: StrategyKind,
    config: &ChunkingConfig,
    embedder: Option<&Arc<dyn EmbeddingProvider>>,
) -> Result<Box<dyn ChunkingStrategy>> {
    Ok(match kind {
        StrategyKind::FixedSize => Box::new(FixedSizeChunking::from_config(config)?),
        StrategyKind::SentenceAware => Box::new(SentenceAwareChunking::from_config(config)?),
        StrategyKind::MarkdownAware => Box::new(MarkdownAwareChunking::from_config(config)?),
        StrategyKind::Semantic => match embedder {
            Some(embedder) => Box::new(SemanticChunking::from_config(config, Arc::clone(embedder))?),
            None => bail!("an embedding provider is required for semantic chunking"),
        },
    })
}

/// Build the configured primary strategy, ignoring the document.
pub fn create_strategy(
    config: &ChunkingConfig,
    embedder: Option<&Arc<dyn EmbeddingProvider>>,
) -> Result<Box<dyn ChunkingStrategy>> {
    config.validate()?;
    build(config.primary_strategy, config, embedder)
}

/// Evaluate every strategy family against `document`, best first.
///
/// Each candidate's score is its quality estimate, halved when the
/// strategy reports itself unsuitable for the document. Candidates that
/// fail to construct score 0.0 and carry no strategy. Equal scores keep
/// the canonical [`StrategyKind::ALL`] order.
pub fn recommendations(
    document: &Document,
    config: &ChunkingConfig,
    embedder: Option<&Arc<dyn EmbeddingProvider>>,
) -> Vec<StrategyRecommendation> {
    let mut out: Vec<StrategyRecommendation> = StrategyKind::ALL
        .iter()
        .map(|&kind| match build(kind, config, embedder) {
            Ok(strategy) => {
                let mut quality = strategy.estimate_quality(document);
                if !strategy.is_suitable_for(document) {
                    quality *= 0.5;
                }
                StrategyRecommendation {
                    kind,
                    expected_quality: quality,
                    strategy: Some(strategy),
                }
            }
            Err(err) => {
                warn!(strategy = %kind, error = %err, "strategy unavailable for selection");
                StrategyRecommendation {
                    kind,
                    expected_quality: 0.0,
                    strategy: None,
                }
            }
        })
        .collect();
    // stable sort: ties fall back to canonical order
    out.sort_by(|a, b| b.expected_quality.total_cmp(&a.expected_quality));
    out
}

/// Pick the best strategy for `document`.
///
/// With auto-selection off this is just the primary strategy. With it
/// on, the highest-scoring constructible candidate wins, preferring
/// ones at or above `min_quality_threshold`; when the winner still sits
/// below `preferred_quality_threshold` and quality fallback is enabled,
/// the fallback strategy is kept instead if its estimate beats the
/// winner's weighted selection score.
pub fn create_optimal_strategy(
    document: &Document,
    config: &ChunkingConfig,
    embedder: Option<&Arc<dyn EmbeddingProvider>>,
) -> Result<Box<dyn ChunkingStrategy>> {
    config.validate()?;
    let config = config.config_for(document.doc_type);

    if !config.auto_select {
        return build(config.primary_strategy, config, embedder);
    }

    let ranked = recommendations(document, config, embedder);

    let mut chosen: Option<StrategyRecommendation> = None;
    for candidate in ranked {
        if candidate.strategy.is_none() {
            continue;
        }
        if candidate.expected_quality >= config.min_quality_threshold {
            chosen = Some(candidate);
            break;
        }
        // remember the best constructible candidate in case none
        // clears the minimum
        if chosen.is_none() {
            chosen = Some(candidate);
        }
    }

    let chosen = match chosen {
        Some(c) => c,
        None => bail!("no chunking strategy could be constructed"),
    };
    let (kind, quality, strategy) = match chosen.strategy {
        Some(strategy) => (chosen.kind, chosen.expected_quality, strategy),
        None => bail!("no chunking strategy could be constructed"),
    };

    if quality < config.preferred_quality_threshold
        && config.quality_fallback
        && kind != config.fallback_strategy
    {
        if let Ok(fallback) = build(config.fallback_strategy, config, embedder) {
            // compare against the suitability-weighted selection score:
            // a winner that was down-weighted as unsuitable should lose
            // to a fallback with a better raw estimate
            let fallback_quality = fallback.estimate_quality(document);
            if fallback_quality > quality {
                debug!(
                    selected = %config.fallback_strategy,
                    over = %kind,
                    "quality fallback outscored the selected strategy"
                );
                return Ok(fallback);
            }
        }
    }

    debug!(selected = %kind, expected_quality = quality, "strategy selected");
    Ok(strategy)
}

/// Build an [`AdaptiveChunking`] wrapper around this configuration.
pub fn create_with_fallback(
    config: ChunkingConfig,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
) -> Result<AdaptiveChunking> {
    config.validate()?;
    Ok(AdaptiveChunking { config, embedder })
}

/// Self-correcting strategy wrapper.
///
/// Chunks each document with the optimal strategy for it, then checks
/// the realized average chunk quality: when it lands below the
/// configured minimum threshold, or the primary attempt fails outright,
/// the document is re-chunked with the fallback strategy. Fallback
/// errors are the only errors that escape.
pub struct AdaptiveChunking {
    config: ChunkingConfig,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl AdaptiveChunking {
    fn fallback_chunks(&self, document: &Document) -> Result<Vec<DocumentChunk>> {
        let config = self.config.config_for(document.doc_type);
        build(config.fallback_strategy, config, self.embedder.as_ref())?.chunk(document)
    }

    fn average_quality(chunks: &[DocumentChunk]) -> Option<f64> {
        if chunks.is_empty() {
            return None;
        }
        let total: f64 = chunks
            .iter()
            .map(|c| c.quality_score.unwrap_or(0.5))
            .sum();
        Some(total / chunks.len() as f64)
    }
}

impl ChunkingStrategy for AdaptiveChunking {
    fn chunk(&self, document: &Document) -> Result<Vec<DocumentChunk>> {
        let primary =
            match create_optimal_strategy(document, &self.config, self.embedder.as_ref()) {
                Ok(strategy) => strategy,
                Err(err) => {
                    warn!(
                        document_id = %document.id,
                        error = %err,
                        "strategy selection failed, chunking with fallback"
                    );
                    return self.fallback_chunks(document);
                }
            };

        let chunks = match primary.chunk(document) {
            Ok(chunks) => chunks,
            Err(err) => {
                warn!(
                    document_id = %document.id,
                    strategy = primary.name(),
                    error = %err,
                    "chunking failed, retrying with fallback"
                );
                return self.fallback_chunks(document);
            }
        };

        let threshold = self
            .config
            .config_for(document.doc_type)
            .min_quality_threshold;
        if let Some(avg) = Self::average_quality(&chunks) {
            if avg < threshold {
                warn!(
                    document_id = %document.id,
                    strategy = primary.name(),
                    average_quality = avg,
                    threshold,
                    "realized quality below minimum, re-chunking with fallback"
                );
                return self.fallback_chunks(document);
            }
        }
        Ok(chunks)
    }

    fn chunk_size(&self) -> usize {
        self.config.target_chunk_size
    }

    fn overlap_size(&self) -> usize {
        self.config.overlap_size
    }

    fn name(&self) -> &'static str {
        "adaptive"
    }

    fn description(&self) -> String {
        format!(
            "Optimal strategy per document with {} fallback",
            self.config.fallback_strategy
        )
    }

    fn estimate_quality(&self, document: &Document) -> f64 {
        match create_optimal_strategy(document, &self.config, self.embedder.as_ref()) {
            Ok(strategy) => strategy.estimate_quality(document),
            Err(_) => 0.5,
        }
    }
}
