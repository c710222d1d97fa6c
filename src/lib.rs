//! # ragpipe
//!
//! Document chunking, retrieval, and RAG orchestration: pluggable
//! chunking strategies with quality-driven automatic selection, a
//! deterministic retrieval engine (query expansion, dedup, title
//! reranking, diversity filtering), and a query service that folds
//! every failure into a well-formed response.
//!
//! Storage, embedding, and answer generation are trait seams
//! ([`VectorStore`], [`embedding::EmbeddingProvider`],
//! [`service::AnswerGenerator`]); an in-memory store ships for tests
//! and small corpora.

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod factory;
pub mod models;
pub mod retrieval;
pub mod service;
pub mod store;

pub use chunk::ChunkingStrategy;
pub use config::{ChunkingConfig, StrategyKind};
pub use models::{
    Document, DocumentChunk, DocumentType, RagResponse, RetrievalOptions, ScoredDocument,
};
pub use retrieval::RetrievalEngine;
pub use service::RagService;
pub use store::VectorStore;
