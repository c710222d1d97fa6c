//! Embedding-driven semantic chunking.
//!
//! Embeds each sentence and grows a group while the candidate stays
//! similar (mean cosine against the trailing `sliding_window` members)
//! and the group fits under the maximum size. Undersized groups merge
//! into the previous chunk. Requires an [`EmbeddingProvider`]; when
//! embedding fails mid-document the strategy logs a warning and falls
//! back to fixed-size windows rather than erroring.

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::warn;

use crate::config::{ChunkingConfig, SemanticConfig};
use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::models::{Document, DocumentChunk};

use super::{
    is_structured_line, make_chunk, split_sentences, text_density, ChunkingStrategy,
    FixedSizeChunking,
};

pub struct SemanticChunking {
    embedder: Arc<dyn EmbeddingProvider>,
    min_size: usize,
    max_size: usize,
    similarity_threshold: f64,
    sliding_window: usize,
    preserve_metadata: bool,
}

impl SemanticChunking {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        min_size: usize,
        max_size: usize,
        options: SemanticConfig,
    ) -> Result<Self> {
        if min_size == 0 || min_size >= max_size {
            bail!("semantic chunking requires 0 < min_size < max_size");
        }
        if !(0.0..=1.0).contains(&options.similarity_threshold) {
            bail!("semantic similarity_threshold must be in [0.0, 1.0]");
        }
        if options.sliding_window == 0 {
            bail!("semantic sliding_window must be at least 1");
        }
        Ok(Self {
            embedder,
            min_size,
            max_size,
            similarity_threshold: options.similarity_threshold,
            sliding_window: options.sliding_window,
            preserve_metadata: true,
        })
    }

    pub fn from_config(
        config: &ChunkingConfig,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let mut strategy = Self::new(
            embedder,
            config.min_chunk_size,
            config.max_chunk_size,
            config.semantic.clone(),
        )?;
        strategy.preserve_metadata = config.preserve_metadata;
        Ok(strategy)
    }

    /// Mean cosine similarity of the candidate against the trailing
    /// window of the current group.
    fn group_similarity(&self, embeddings: &[Vec<f32>], group: &[usize], candidate: usize) -> f64 {
        let mut total = 0.0f64;
        let mut n = 0usize;
        for &member in group.iter().rev().take(self.sliding_window) {
            total += cosine_similarity(&embeddings[member], &embeddings[candidate]) as f64;
            n += 1;
        }
        if n == 0 {
            1.0
        } else {
            total / n as f64
        }
    }

    /// Mean similarity between consecutive members; 1.0 for singletons.
    fn group_coherence(&self, embeddings: &[Vec<f32>], group: &[usize]) -> f64 {
        if group.len() < 2 {
            return 1.0;
        }
        let mut total = 0.0f64;
        for pair in group.windows(2) {
            total += cosine_similarity(&embeddings[pair[0]], &embeddings[pair[1]]) as f64;
        }
        (total / (group.len() - 1) as f64).clamp(0.0, 1.0)
    }

    fn chunk_quality(&self, text: &str, coherence: f64) -> f64 {
        let target = (self.min_size + self.max_size) as f64 / 2.0;
        let chars = text.chars().count() as f64;
        let size_fit = (1.0 - (chars - target).abs() / target).clamp(0.0, 1.0);
        0.5 * coherence + 0.3 * size_fit + 0.2 * text_density(text)
    }

    fn fallback_fixed(&self, document: &Document) -> Result<Vec<DocumentChunk>> {
        FixedSizeChunking::new(self.chunk_size(), 0)?
            .with_preserve_metadata(self.preserve_metadata)
            .chunk(document)
    }
}

impl ChunkingStrategy for SemanticChunking {
    fn chunk(&self, document: &Document) -> Result<Vec<DocumentChunk>> {
        let content = &document.content;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let sentences = split_sentences(content);
        if sentences.is_empty() {
            return Ok(Vec::new());
        }

        let mut embeddings: Vec<Vec<f32>> = Vec::with_capacity(sentences.len());
        for span in &sentences {
            match self.embedder.embed(&content[span.start..span.end]) {
                Ok(vector) => embeddings.push(vector),
                Err(err) => {
                    warn!(
                        document_id = %document.id,
                        model = self.embedder.model_name(),
                        error = %err,
                        "sentence embedding failed, falling back to fixed-size windows"
                    );
                    return self.fallback_fixed(document);
                }
            }
        }

        // (start, end, coherence) per chunk; ranges tile the content
        let mut bounds: Vec<(usize, usize, f64)> = Vec::new();
        let mut group: Vec<usize> = vec![0];
        let mut group_len = sentences[0].len();
        let mut slice_start = 0usize;

        for i in 1..sentences.len() {
            let similarity = self.group_similarity(&embeddings, &group, i);
            if similarity >= self.similarity_threshold
                && group_len + sentences[i].len() <= self.max_size
            {
                group.push(i);
                group_len += sentences[i].len();
            } else {
                // group holds consecutive indices ending at i - 1
                let end = sentences[i - 1].end;
                let coherence = self.group_coherence(&embeddings, &group);
                push_bound(&mut bounds, self.min_size, slice_start, end, group_len, coherence);
                slice_start = end;
                group.clear();
                group.push(i);
                group_len = sentences[i].len();
            }
        }
        let coherence = self.group_coherence(&embeddings, &group);
        push_bound(
            &mut bounds,
            self.min_size,
            slice_start,
            content.len(),
            group_len,
            coherence,
        );

        Ok(bounds
            .into_iter()
            .enumerate()
            .map(|(index, (start, end, coherence))| {
                let quality = self.chunk_quality(&content[start..end], coherence);
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
        (self.min_size + self.max_size) / 2
    }

    fn overlap_size(&self) -> usize {
        0
    }

    fn min_chunk_size(&self) -> usize {
        self.min_size
    }

    fn max_chunk_size(&self) -> usize {
        self.max_size
    }

    fn name(&self) -> &'static str {
        "semantic"
    }

    fn description(&self) -> String {
        format!(
            "Embedding-grouped chunks ({} dims, similarity >= {:.2}, window {})",
            self.embedder.dims(),
            self.similarity_threshold,
            self.sliding_window
        )
    }

    fn estimate_quality(&self, document: &Document) -> f64 {
        let content = &document.content;
        if content.trim().is_empty() {
            return 0.0;
        }
        let chars = content.chars().count() as f64;
        let length_score = (chars / 5000.0).min(1.0);

        let sentences = split_sentences(content).len() as f64;
        let per_thousand = sentences / chars * 1000.0;
        let sentence_density = (per_thousand / 5.0).min(1.0);

        let words: Vec<String> = content
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        let vocabulary = if words.is_empty() {
            0.0
        } else {
            let unique: std::collections::HashSet<&String> = words.iter().collect();
            unique.len() as f64 / words.len() as f64
        };

        // the final 0.3 reflects that a provider is always present here
        length_score * 0.3 + sentence_density * 0.2 + vocabulary * 0.2 + 0.3
    }

    /// Needs enough prose to group: long, sentence-rich, and not
    /// dominated by markup or code structure.
    fn is_suitable_for(&self, document: &Document) -> bool {
        let content = &document.content;
        if content.chars().count() < 1000 {
            return false;
        }
        if split_sentences(content).len() < 10 {
            return false;
        }
        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.is_empty() {
            return false;
        }
        let structured = lines.iter().filter(|l| is_structured_line(l)).count();
        (structured as f64 / lines.len() as f64) <= 0.3
    }
}

/// Append a chunk bound; an undersized group merges into the previous
/// chunk instead of standing alone.
fn push_bound(
    bounds: &mut Vec<(usize, usize, f64)>,
    min_size: usize,
    start: usize,
    end: usize,
    len: usize,
    coherence: f64,
) {
    if len < min_size {
        if let Some((prev_start, _, prev_coherence)) = bounds.pop() {
            bounds.push((prev_start, end, (prev_coherence + coherence) / 2.0));
            return;
        }
    }
    bounds.push((start, end, coherence));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentType;

    fn doc(content: &str) -> Document {
        Document::new(content, DocumentType::Text).with_id("doc1")
    }

    /// Deterministic embedder projecting text onto three topic axes.
    struct TopicEmbedder;

    impl EmbeddingProvider for TopicEmbedder {
        fn model_name(&self) -> &str {
            "topic-test"
        }

        fn dims(&self) -> usize {
            3
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let lower = text.to_lowercase();
            let axis = |term: &str| lower.matches(term).count() as f32 + 0.01;
            Ok(vec![axis("compiler"), axis("ocean"), axis("violin")])
        }
    }

    struct FailingEmbedder;

    impl EmbeddingProvider for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing-test"
        }

        fn dims(&self) -> usize {
            3
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            bail!("embedding backend unavailable")
        }
    }

    fn strategy_with(embedder: Arc<dyn EmbeddingProvider>) -> SemanticChunking {
        SemanticChunking::new(embedder, 20, 2000, SemanticConfig::default()).unwrap()
    }

    fn two_topic_text() -> String {
        let compilers = "The compiler lowers the code. The compiler checks every type. The compiler emits warnings early. "
            .repeat(2);
        let oceans = "The ocean swells at dusk. The ocean hides deep trenches. The ocean drives the weather. "
            .repeat(2);
        format!("{compilers}{oceans}")
    }

    #[test]
    fn test_empty_content_yields_no_chunks() {
        let strategy = strategy_with(Arc::new(TopicEmbedder));
        assert!(strategy.chunk(&doc("")).unwrap().is_empty());
    }

    #[test]
    fn test_groups_split_at_topic_shift() {
        let content = two_topic_text();
        let strategy = strategy_with(Arc::new(TopicEmbedder));
        let chunks = strategy.chunk(&doc(&content)).unwrap();

        assert_eq!(chunks.len(), 2, "expected one chunk per topic");
        assert!(chunks[0].content.contains("compiler"));
        assert!(!chunks[0].content.contains("ocean"));
        assert!(chunks[1].content.contains("ocean"));
    }

    #[test]
    fn test_coverage_without_gaps() {
        let content = two_topic_text();
        let strategy = strategy_with(Arc::new(TopicEmbedder));
        let chunks = strategy.chunk(&doc(&content)).unwrap();

        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks.last().unwrap().end_offset, content.len());
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start_offset, pair[0].end_offset);
        }
    }

    #[test]
    fn test_single_topic_stays_in_one_chunk() {
        let content =
            "The compiler parses input. The compiler builds an AST. The compiler checks types. The compiler emits code.";
        let strategy = strategy_with(Arc::new(TopicEmbedder));
        let chunks = strategy.chunk(&doc(content)).unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_max_size_bounds_groups() {
        let content = "The compiler does compiler things with the compiler. ".repeat(40);
        let strategy =
            SemanticChunking::new(Arc::new(TopicEmbedder), 20, 200, SemanticConfig::default())
                .unwrap();
        let chunks = strategy.chunk(&doc(&content)).unwrap();
        assert!(chunks.len() > 1);
        for c in &chunks[..chunks.len() - 1] {
            assert!(c.len() <= 200 + 60, "group exceeded max size: {}", c.len());
        }
    }

    #[test]
    fn test_undersized_groups_merge_into_previous() {
        // a lone off-topic sentence shorter than min_size
        let content = format!(
            "{} Violin strings hum. {}",
            "The compiler optimizes loops. The compiler inlines calls.",
            "The compiler removes dead code. The compiler schedules passes."
        );
        let strategy =
            SemanticChunking::new(Arc::new(TopicEmbedder), 40, 2000, SemanticConfig::default())
                .unwrap();
        let chunks = strategy.chunk(&doc(&content)).unwrap();
        for c in &chunks[..chunks.len().saturating_sub(1)] {
            assert!(c.len() >= 40, "non-final chunk below min size: {}", c.len());
        }
    }

    #[test]
    fn test_embedding_failure_falls_back_to_fixed() {
        let content = two_topic_text();
        let strategy = strategy_with(Arc::new(FailingEmbedder));
        let chunks = strategy.chunk(&doc(&content)).unwrap();
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.strategy == "fixed_size"));
    }

    #[test]
    fn test_deterministic_output() {
        let content = two_topic_text();
        let strategy = strategy_with(Arc::new(TopicEmbedder));
        assert_eq!(
            strategy.chunk(&doc(&content)).unwrap(),
            strategy.chunk(&doc(&content)).unwrap()
        );
    }

    #[test]
    fn test_construction_validation() {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(TopicEmbedder);
        assert!(
            SemanticChunking::new(embedder.clone(), 0, 100, SemanticConfig::default()).is_err()
        );
        assert!(
            SemanticChunking::new(embedder.clone(), 100, 100, SemanticConfig::default()).is_err()
        );
        let bad = SemanticConfig {
            similarity_threshold: 1.5,
            ..SemanticConfig::default()
        };
        assert!(SemanticChunking::new(embedder, 20, 100, bad).is_err());
    }

    #[test]
    fn test_suitability_rules() {
        let strategy = strategy_with(Arc::new(TopicEmbedder));

        // short documents are unsuitable
        assert!(!strategy.is_suitable_for(&doc("Tiny. Text. Here.")));

        // long sentence-rich prose is suitable
        let prose = "A reasonably long sentence about various topics appears here. ".repeat(30);
        assert!(strategy.is_suitable_for(&doc(&prose)));

        // heavily structured text is not
        let structured = "# Heading\n- item one\n- item two\n| a | b |\n".repeat(40);
        assert!(!strategy.is_suitable_for(&doc(&structured)));
    }

    #[test]
    fn test_estimate_quality_in_range() {
        let strategy = strategy_with(Arc::new(TopicEmbedder));
        assert_eq!(strategy.estimate_quality(&doc("")), 0.0);
        let q = strategy.estimate_quality(&doc(&two_topic_text()));
        assert!((0.0..=1.0).contains(&q));
        assert!(q >= 0.3, "provider presence should floor the estimate");
    }
}
