//! In-memory [`VectorStore`] implementation for testing and small
//! corpora.
//!
//! Documents live in a `Vec` behind `std::sync::RwLock`; search is a
//! brute-force term scan over title and content. Scores are the
//! fraction of query terms present in the document, so they land in
//! `[0.0, 1.0]` like the similarity scores of a real vector backend.

use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Document, RetrievalOptions, ScoredDocument};

use super::VectorStore;

const SNIPPET_CHARS: usize = 240;

/// In-memory store for testing and small corpora.
pub struct InMemoryVectorStore {
    docs: RwLock<Vec<Document>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_filters(document: &Document, options: &RetrievalOptions) -> bool {
    if !options.doc_types.is_empty() && !options.doc_types.contains(&document.doc_type) {
        return false;
    }
    options
        .filters
        .iter()
        .all(|(key, value)| document.metadata.get(key) == Some(value))
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn index_document(&self, document: Document) -> Result<()> {
        let mut docs = self.docs.write().unwrap();
        docs.retain(|d| d.id != document.id);
        docs.push(document);
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        options: &RetrievalOptions,
    ) -> Result<Vec<ScoredDocument>> {
        let query_lower = query.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let docs = self.docs.read().unwrap();
        let mut results: Vec<ScoredDocument> = docs
            .iter()
            .filter(|d| matches_filters(d, options))
            .filter_map(|d| {
                let mut haystack = d.title.clone().unwrap_or_default().to_lowercase();
                haystack.push(' ');
                haystack.push_str(&d.content.to_lowercase());

                let matched = terms.iter().filter(|t| haystack.contains(*t)).count();
                let score = matched as f64 / terms.len() as f64;
                if matched == 0 || score < options.min_score {
                    return None;
                }
                let snippet = options
                    .include_snippets
                    .then(|| d.content.chars().take(SNIPPET_CHARS).collect::<String>());
                Some(ScoredDocument {
                    document: d.clone(),
                    score,
                    rank: 0,
                    snippet,
                })
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.document.id.cmp(&b.document.id))
        });
        results.truncate(options.max_results);
        Ok(results)
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut docs = self.docs.write().unwrap();
        let before = docs.len();
        docs.retain(|d| d.id != id);
        Ok(docs.len() < before)
    }

    async fn document_count(&self) -> Result<usize> {
        Ok(self.docs.read().unwrap().len())
    }

    async fn clear(&self) -> Result<()> {
        self.docs.write().unwrap().clear();
        Ok(())
    }
}
