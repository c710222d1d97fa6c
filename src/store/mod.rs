//! Storage abstraction for the retrieval pipeline.
//!
//! The [`VectorStore`] trait defines the document storage and search
//! operations the retrieval engine and RAG service are built on,
//! enabling pluggable backends (in-memory, SQL, external vector
//! databases).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

pub use memory::InMemoryVectorStore;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Document, RetrievalOptions, ScoredDocument};

/// Abstract document storage backend.
///
/// All operations are async (via `async-trait`); in-memory
/// implementations return immediately-ready futures.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`index_document`](VectorStore::index_document) | Insert or replace a document |
/// | [`index_documents`](VectorStore::index_documents) | Bulk insert or replace |
/// | [`search`](VectorStore::search) | Score stored documents against a query |
/// | [`delete_document`](VectorStore::delete_document) | Remove a document by ID |
/// | [`document_count`](VectorStore::document_count) | Number of stored documents |
/// | [`clear`](VectorStore::clear) | Drop everything |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert a document, replacing any existing document with the
    /// same ID.
    async fn index_document(&self, document: Document) -> Result<()>;

    /// Insert a batch of documents.
    async fn index_documents(&self, documents: Vec<Document>) -> Result<()> {
        for document in documents {
            self.index_document(document).await?;
        }
        Ok(())
    }

    /// Score stored documents against `query`, best first.
    ///
    /// Results respect the options' type and metadata filters, the
    /// minimum score, and `max_results`. Returned ranks are
    /// backend-local; the retrieval engine assigns final ranks.
    async fn search(&self, query: &str, options: &RetrievalOptions)
        -> Result<Vec<ScoredDocument>>;

    /// Remove a document by ID. Returns whether it existed.
    async fn delete_document(&self, id: &str) -> Result<bool>;

    /// Number of stored documents.
    async fn document_count(&self) -> Result<usize>;

    /// Remove all stored documents.
    async fn clear(&self) -> Result<()>;
}
