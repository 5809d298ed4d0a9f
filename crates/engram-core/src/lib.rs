//! # Engram Core
//!
//! Personal knowledge engine: capture short text thoughts, enrich and
//! index them asynchronously, answer natural-language questions grounded
//! strictly in the captured material with citations, hold envelope-
//! encrypted multi-turn conversations, and render a clustered 2-D theme
//! graph.
//!
//! The pipeline:
//!
//! - **Capture** persists the raw artifact, writes a queryable metadata
//!   row, and enqueues an index job - returning as soon as durability is
//!   guaranteed, before any model work.
//! - **Indexer** drains the queue, computes embeddings, produces
//!   LLM-assisted enrichments with deterministic fallbacks, links related
//!   thoughts, and publishes unified documents to the search index.
//! - **Retrieval** runs hybrid lexical (FTS5/BM25) + semantic (HNSW k-NN)
//!   search with score fusion and recency/decision reranking.
//! - **Synthesis** produces a short cited answer or abstains.
//! - **Conversations** are ordered, per-message envelope-encrypted, and
//!   re-indexed behind a debounce.
//! - **Theme graph** clusters embeddings with k-means++, labels clusters,
//!   lays nodes out in 2-D, and serves from a cache invalidated by age or
//!   data change.
//!
//! External collaborators (object store, metadata store, queue, model
//! backends, cipher) are constructor-injected capability structs; see
//! [`Engine`].
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use engram_core::{Engine, EnvelopeCipher, InMemoryIndexQueue};
//! use std::sync::Arc;
//!
//! let engine = Engine::open(
//!     data_dir,
//!     Arc::new(InMemoryIndexQueue::default()),
//!     chat_backend,
//!     embedding_backend,
//!     EnvelopeCipher::from_hex(&master_key)?,
//! )?;
//!
//! let receipt = engine.capture("user-1", &request).await?;
//! let answer = engine.ask("user-1", &ask).await?;
//! ```

// ============================================================================
// MODULES
// ============================================================================

pub mod answer;
pub mod capture;
pub mod convo;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod export;
pub mod graph;
pub mod indexer;
pub mod llm;
pub mod model;
pub mod queue;
pub mod retrieval;
pub mod search;
pub mod store;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use answer::{SynthesizedAnswer, Synthesizer, ABSTENTION_ANSWER};
pub use convo::{
    ConversationList, ConversationPage, ConversationService, SendOptions, SendOutcome,
};
pub use crypto::{CryptoError, EnvelopeCipher, MessageAad};
pub use engine::{
    AskRequest, AskResponse, CaptureReceipt, ConversationHit, Engine, Health, ListThoughts,
    ThoughtPage, MAX_LIST_LIMIT,
};
pub use error::{EngineError, Result};
pub use export::{ExportBundle, ExportedConversation};
pub use graph::{GraphBuilder, DEFAULT_MIN_SIMILARITY};
pub use indexer::Indexer;
pub use llm::{
    ChatModel, ChatRequest, Embedder, HttpLlmClient, HttpLlmConfig, LlmError,
    EMBEDDING_DIMENSIONS,
};
pub use model::{
    CaptureContext, CaptureRequest, Category, Citation, Conversation, ConversationStatus,
    DecryptedMessage, GraphEdge, GraphMeta, GraphNode, IndexJob, Intent, Message, MessageRole,
    Theme, ThemeGraph, Thought, ThoughtKind,
};
pub use queue::{IndexQueue, InMemoryIndexQueue, QueueError, QueueMessage};
pub use retrieval::{RetrievalEngine, RetrievalOutput, RetrievalQuery};
pub use search::{DocType, RankedHit, SearchDoc, SearchFilter, SearchIndex};
pub use store::{FsObjectStore, MetadataStore, Record, StoreError};

// ============================================================================
// VERSION / TIME
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Current wall clock, milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
