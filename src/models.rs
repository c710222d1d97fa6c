//! Data model for documents, chunks, and retrieval results.
//!
//! [`Document`] is the unit of indexing, [`DocumentChunk`] the unit of
//! embedding and storage, [`ScoredDocument`] the unit of retrieval, and
//! [`RagResponse`] the unit returned to callers of the orchestration
//! service. All types are plain data; behavior lives in the strategy,
//! retrieval, and service modules.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Broad category of an indexed document.
///
/// Drives per-type chunking overrides and retrieval type filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    SourceCode,
    Sql,
    Markdown,
    Text,
    Other,
    #[default]
    Unknown,
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DocumentType::SourceCode => "source_code",
            DocumentType::Sql => "sql",
            DocumentType::Markdown => "markdown",
            DocumentType::Text => "text",
            DocumentType::Other => "other",
            DocumentType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// An indexed document: content plus descriptive metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier. Generated (UUID v4) by [`Document::new`],
    /// or supplied by the caller via [`Document::with_id`].
    pub id: String,
    /// Full text content.
    pub content: String,
    pub doc_type: DocumentType,
    /// Free-form string metadata (e.g. `package`, `author`).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub title: Option<String>,
    pub source_path: Option<String>,
    pub indexed_at: DateTime<Utc>,
}

impl Document {
    pub fn new(content: impl Into<String>, doc_type: DocumentType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            doc_type,
            metadata: HashMap::new(),
            title: None,
            source_path: None,
            indexed_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_source_path(mut self, path: impl Into<String>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// A contiguous slice of a [`Document`], produced by a chunking strategy.
///
/// Offsets are byte positions into the parent content, always on UTF-8
/// char boundaries, with `start_offset < end_offset <= content.len()`.
/// Chunk ids are deterministic: `{document_id}_chunk_{index}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub document_id: String,
    pub content: String,
    /// 0-based position within the parent document's chunk sequence.
    pub index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    /// Name of the strategy that produced this chunk.
    pub strategy: String,
    /// Per-chunk quality estimate in `[0.0, 1.0]`, when the strategy
    /// computes one.
    pub quality_score: Option<f64>,
    /// Metadata inherited from the parent document, plus strategy
    /// additions such as `section_title`.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Hex SHA-256 of the chunk text, for staleness detection in
    /// downstream embedding pipelines.
    pub hash: String,
}

impl DocumentChunk {
    /// Chunk length in bytes (equals `end_offset - start_offset`).
    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Char-truncated preview with a trailing ellipsis when cut.
    pub fn preview(&self, max_chars: usize) -> String {
        if self.content.chars().count() <= max_chars {
            return self.content.clone();
        }
        let cut: String = self.content.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}

/// Retrieval backend mode hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Keyword,
    Semantic,
    #[default]
    Hybrid,
}

/// Per-query retrieval parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalOptions {
    pub max_results: usize,
    /// Results scoring below this are dropped by the backend.
    pub min_score: f64,
    /// Restrict to these document types; empty means all.
    #[serde(default)]
    pub doc_types: HashSet<DocumentType>,
    /// Exact-match metadata filters, all of which must hold.
    #[serde(default)]
    pub filters: HashMap<String, String>,
    pub include_snippets: bool,
    pub mode: SearchMode,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            max_results: 10,
            min_score: 0.0,
            doc_types: HashSet::new(),
            filters: HashMap::new(),
            include_snippets: true,
            mode: SearchMode::Hybrid,
        }
    }
}

impl RetrievalOptions {
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn with_doc_type(mut self, doc_type: DocumentType) -> Self {
        self.doc_types.insert(doc_type);
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_snippets(mut self, include: bool) -> Self {
        self.include_snippets = include;
        self
    }
}

/// A retrieval hit: document, relevance score, and 1-based rank.
///
/// `score` is on the backend's scale and may be boosted during
/// reranking; `rank` is assigned once, after the final ordering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f64,
    pub rank: usize,
    pub snippet: Option<String>,
}

/// One piece of supporting evidence attached to a [`RagResponse`].
#[derive(Debug, Clone, Serialize)]
pub struct RagContext {
    pub scored: ScoredDocument,
    /// Excerpt presented to the answer generator: the retrieval snippet
    /// when available, otherwise the full document content.
    pub chunk: String,
    pub chunk_index: usize,
    /// Human-readable justification for including this context.
    pub reason: String,
}

impl RagContext {
    pub fn document(&self) -> &Document {
        &self.scored.document
    }

    pub fn score(&self) -> f64 {
        self.scored.score
    }
}

/// Final response from the orchestration service.
#[derive(Debug, Clone, Serialize)]
pub struct RagResponse {
    pub query: String,
    pub answer: String,
    pub contexts: Vec<RagContext>,
    pub total_ms: u128,
    pub retrieval_ms: u128,
    pub generation_ms: u128,
    pub documents_retrieved: usize,
    /// Mean score of the returned contexts; `0.0` when none.
    pub confidence: f64,
}
