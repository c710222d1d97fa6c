//! RAG orchestration: retrieve, assemble contexts, generate an answer.
//!
//! [`RagService`] ties the store, the retrieval engine, and an optional
//! [`AnswerGenerator`] together behind a single `query` call. The call
//! never returns an error: retrieval failures become a response whose
//! answer carries the error text, and generator failures fall back to a
//! deterministic summary of the retrieved documents. Timings for the
//! retrieval and generation phases are measured and reported on every
//! response.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::models::{Document, RagContext, RagResponse, RetrievalOptions, ScoredDocument};
use crate::retrieval::RetrievalEngine;
use crate::store::VectorStore;

/// Characters of document content quoted per excerpt in the summary
/// answer.
const EXCERPT_CHARS: usize = 200;

/// Produces an answer from a query and its retrieved contexts.
///
/// Implementations typically wrap an LLM; the service treats failures
/// as recoverable and falls back to a generated summary.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, query: &str, contexts: &[RagContext]) -> Result<String>;
}

/// End-to-end query service over a [`VectorStore`].
pub struct RagService {
    store: Arc<dyn VectorStore>,
    engine: RetrievalEngine,
    generator: Option<Box<dyn AnswerGenerator>>,
}

impl RagService {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        let engine = RetrievalEngine::new(Arc::clone(&store));
        Self {
            store,
            engine,
            generator: None,
        }
    }

    pub fn with_generator(mut self, generator: Box<dyn AnswerGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_engine(mut self, engine: RetrievalEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Answer a query with default retrieval options.
    pub async fn query(&self, query: &str) -> RagResponse {
        self.query_with_options(query, &RetrievalOptions::default())
            .await
    }

    /// Answer a query.
    ///
    /// Never returns an error: any failure is folded into the response
    /// so callers always get timings and an answer string.
    pub async fn query_with_options(
        &self,
        query: &str,
        options: &RetrievalOptions,
    ) -> RagResponse {
        let started = Instant::now();

        let retrieval_started = Instant::now();
        let retrieved = match self.engine.retrieve(query, options).await {
            Ok(results) => results,
            Err(err) => {
                error!(query, error = %err, "retrieval failed");
                return RagResponse {
                    query: query.to_string(),
                    answer: format!("Error processing query: {err}"),
                    contexts: Vec::new(),
                    total_ms: started.elapsed().as_millis(),
                    retrieval_ms: retrieval_started.elapsed().as_millis(),
                    generation_ms: 0,
                    documents_retrieved: 0,
                    confidence: 0.0,
                };
            }
        };
        let retrieval_ms = retrieval_started.elapsed().as_millis();

        let documents_retrieved = retrieved.len();
        let confidence = if retrieved.is_empty() {
            0.0
        } else {
            retrieved.iter().map(|r| r.score).sum::<f64>() / retrieved.len() as f64
        };
        let contexts = build_contexts(retrieved);

        let generation_started = Instant::now();
        let answer = self.generate_answer(query, &contexts).await;
        let generation_ms = generation_started.elapsed().as_millis();

        info!(
            query,
            documents_retrieved,
            retrieval_ms = retrieval_ms as u64,
            generation_ms = generation_ms as u64,
            "query answered"
        );

        RagResponse {
            query: query.to_string(),
            answer,
            contexts,
            total_ms: started.elapsed().as_millis(),
            retrieval_ms,
            generation_ms,
            documents_retrieved,
            confidence,
        }
    }

    async fn generate_answer(&self, query: &str, contexts: &[RagContext]) -> String {
        if contexts.is_empty() {
            return "No relevant documents found for your query.".to_string();
        }
        if let Some(generator) = &self.generator {
            match generator.generate(query, contexts).await {
                Ok(answer) => return answer,
                Err(err) => {
                    warn!(query, error = %err, "answer generation failed, using summary");
                }
            }
        }
        summary_answer(contexts)
    }

    /// Index a document so it becomes retrievable.
    pub async fn index_document(&self, document: Document) -> Result<()> {
        self.store.index_document(document).await
    }

    /// Index a batch of documents.
    pub async fn index_documents(&self, documents: Vec<Document>) -> Result<()> {
        self.store.index_documents(documents).await
    }

    pub async fn document_count(&self) -> Result<usize> {
        self.store.document_count().await
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }
}

fn build_contexts(retrieved: Vec<ScoredDocument>) -> Vec<RagContext> {
    retrieved
        .into_iter()
        .map(|scored| {
            let chunk = scored
                .snippet
                .clone()
                .unwrap_or_else(|| scored.document.content.clone());
            let reason = format!("relevance score: {:.3}", scored.score);
            RagContext {
                scored,
                chunk,
                chunk_index: 0,
                reason,
            }
        })
        .collect()
}

/// Deterministic fallback answer: a numbered digest of the retrieved
/// documents with short excerpts.
fn summary_answer(contexts: &[RagContext]) -> String {
    let mut answer = format!("Found {} relevant document(s):\n\n", contexts.len());
    for (i, context) in contexts.iter().enumerate() {
        let document = context.document();
        answer.push_str(&format!(
            "{}. {}\n",
            i + 1,
            document.title.as_deref().unwrap_or("Untitled")
        ));
        answer.push_str(&format!("   Type: {}\n", document.doc_type));
        if let Some(path) = &document.source_path {
            answer.push_str(&format!("   Source: {path}\n"));
        }
        answer.push_str(&format!(
            "   Relevance: {:.1}%\n",
            context.score() * 100.0
        ));
        let excerpt: String = context.chunk.chars().take(EXCERPT_CHARS).collect();
        if context.chunk.chars().count() > EXCERPT_CHARS {
            answer.push_str(&format!("   Excerpt: {excerpt}...\n"));
        } else {
            answer.push_str(&format!("   Excerpt: {excerpt}\n"));
        }
        answer.push('\n');
    }
    answer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentType;
    use crate::store::InMemoryVectorStore;

    fn doc(id: &str, title: &str, content: &str) -> Document {
        Document::new(content, DocumentType::Text)
            .with_id(id)
            .with_title(title)
            .with_source_path(format!("docs/{id}.md"))
    }

    struct EchoGenerator;

    #[async_trait]
    impl AnswerGenerator for EchoGenerator {
        async fn generate(&self, query: &str, contexts: &[RagContext]) -> Result<String> {
            Ok(format!("answer to '{query}' from {} contexts", contexts.len()))
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl AnswerGenerator for FailingGenerator {
        async fn generate(&self, _query: &str, _contexts: &[RagContext]) -> Result<String> {
            anyhow::bail!("model unavailable")
        }
    }

    /// Store whose search always errors.
    struct BrokenStore;

    #[async_trait]
    impl VectorStore for BrokenStore {
        async fn index_document(&self, _document: Document) -> Result<()> {
            Ok(())
        }

        async fn search(
            &self,
            _query: &str,
            _options: &RetrievalOptions,
        ) -> Result<Vec<ScoredDocument>> {
            anyhow::bail!("backend offline")
        }

        async fn delete_document(&self, _id: &str) -> Result<bool> {
            Ok(false)
        }

        async fn document_count(&self) -> Result<usize> {
            Ok(0)
        }

        async fn clear(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_summary_answer_format() {
        let store = Arc::new(InMemoryVectorStore::new());
        let service = RagService::new(store);
        service
            .index_document(doc("a", "Billing overview", "how billing works"))
            .await
            .unwrap();

        let response = service.query("billing").await;
        assert!(response.answer.starts_with("Found 1 relevant document(s):"));
        assert!(response.answer.contains("1. Billing overview"));
        assert!(response.answer.contains("Type: text"));
        assert!(response.answer.contains("Source: docs/a.md"));
        // score 1.0 boosted by the single-term title match
        assert!(response.answer.contains("Relevance: 110.0%"));
        assert!(response.answer.contains("Excerpt: how billing works"));
        assert_eq!(response.documents_retrieved, 1);
    }

    #[tokio::test]
    async fn test_long_excerpts_are_truncated() {
        let store = Arc::new(InMemoryVectorStore::new());
        let service = RagService::new(store);
        let long = "needle ".repeat(100);
        service
            .index_document(doc("a", "Long doc", &long))
            .await
            .unwrap();

        let response = service.query("needle").await;
        let excerpt_line = response
            .answer
            .lines()
            .find(|l| l.trim_start().starts_with("Excerpt:"))
            .unwrap();
        assert!(excerpt_line.ends_with("..."));
        // "Excerpt: " prefix + 200 chars + "..."
        let quoted = excerpt_line.trim_start().trim_start_matches("Excerpt: ");
        assert_eq!(quoted.chars().count(), EXCERPT_CHARS + 3);
    }

    #[tokio::test]
    async fn test_no_results_answer() {
        let store = Arc::new(InMemoryVectorStore::new());
        let service = RagService::new(store);
        let response = service.query("anything").await;
        assert_eq!(response.answer, "No relevant documents found for your query.");
        assert_eq!(response.confidence, 0.0);
        assert_eq!(response.documents_retrieved, 0);
    }

    #[tokio::test]
    async fn test_confidence_is_mean_context_score() {
        let store = Arc::new(InMemoryVectorStore::new());
        let service = RagService::new(store);
        service
            .index_document(doc("a", "", "alpha beta"))
            .await
            .unwrap();
        service
            .index_document(doc("b", "", "alpha only"))
            .await
            .unwrap();

        let response = service.query("alpha beta").await;
        assert_eq!(response.documents_retrieved, 2);
        assert!((response.confidence - 0.75).abs() < 1e-9);
        for context in &response.contexts {
            assert!(context.reason.starts_with("relevance score: "));
        }
    }

    #[tokio::test]
    async fn test_retrieval_errors_become_error_answers() {
        let service = RagService::new(Arc::new(BrokenStore));
        let response = service.query("anything").await;
        assert!(response
            .answer
            .starts_with("Error processing query: backend offline"));
        assert_eq!(response.confidence, 0.0);
        assert!(response.contexts.is_empty());
    }

    #[tokio::test]
    async fn test_generator_is_used_when_present() {
        let store = Arc::new(InMemoryVectorStore::new());
        let service = RagService::new(store).with_generator(Box::new(EchoGenerator));
        service
            .index_document(doc("a", "Title", "searchable content"))
            .await
            .unwrap();

        let response = service.query("searchable").await;
        assert_eq!(response.answer, "answer to 'searchable' from 1 contexts");
    }

    #[tokio::test]
    async fn test_generator_failure_falls_back_to_summary() {
        let store = Arc::new(InMemoryVectorStore::new());
        let service = RagService::new(store).with_generator(Box::new(FailingGenerator));
        service
            .index_document(doc("a", "Title", "searchable content"))
            .await
            .unwrap();

        let response = service.query("searchable").await;
        assert!(response.answer.starts_with("Found 1 relevant document(s):"));
    }

    #[tokio::test]
    async fn test_timings_are_reported() {
        let store = Arc::new(InMemoryVectorStore::new());
        let service = RagService::new(store);
        service
            .index_document(doc("a", "Title", "content"))
            .await
            .unwrap();
        let response = service.query("content").await;
        assert!(response.total_ms >= response.retrieval_ms);
    }
}
