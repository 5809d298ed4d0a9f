//! Search Module
//!
//! The unified search index both retrieval paths run against:
//! - lexical search via SQLite FTS5 with query sanitization and bm25()
//!   column weights
//! - approximate k-NN via HNSW (USearch) over document embeddings
//! - score fusion of the two result lists plus recency/decision reranking

mod document;
mod fusion;
mod index;
mod keyword;
#[cfg(feature = "vector-search")]
mod vector;

pub use document::{DocType, SearchDoc};
pub use fusion::{cosine_similarity, linear_combination, rerank, RankedHit, RECENCY_HORIZON_MS};
pub use index::{SearchFilter, SearchIndex, MAX_HITS};
pub use keyword::sanitize_fts5_query;
#[cfg(feature = "vector-search")]
pub use vector::{VectorIndex, VectorIndexConfig};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Search index error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("vector index error: {0}")]
    Vector(String),
    #[error("corrupt document: {0}")]
    Corrupt(String),
    #[error("initialization error: {0}")]
    Init(String),
}

/// Search result type
pub type Result<T> = std::result::Result<T, SearchError>;
