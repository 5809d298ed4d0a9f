//! LLM and embedding capabilities
//!
//! The synthesizer, indexer, and graph builder depend only on the
//! [`ChatModel`] and [`Embedder`] traits; the process entry point decides
//! which backend to inject. The bundled backend is an OpenAI-compatible
//! HTTP client.

mod http;

pub use http::{HttpLlmClient, HttpLlmConfig};

use async_trait::async_trait;

/// Embedding dimensions produced by the configured model.
pub const EMBEDDING_DIMENSIONS: usize = 1024;

/// Max characters of text fed to the embedder; longer inputs are truncated.
pub const MAX_EMBED_CHARS: usize = 8192;

// ============================================================================
// ERRORS
// ============================================================================

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// REQUEST/RESPONSE
// ============================================================================

/// A single chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ChatRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens: 300,
            temperature: 0.3,
        }
    }

    pub fn with_budget(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }
}

// ============================================================================
// TRAITS
// ============================================================================

/// Chat completion capability.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Complete a request, returning the assistant text.
    async fn complete(&self, req: ChatRequest) -> Result<String, LlmError>;
}

/// Text embedding capability.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Dimensionality of produced vectors.
    fn dimensions(&self) -> usize;

    /// Embed one text. Implementations truncate to [`MAX_EMBED_CHARS`].
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}

/// Truncate text to the embedder input budget on a char boundary.
pub fn truncate_for_embedding(text: &str) -> &str {
    if text.len() <= MAX_EMBED_CHARS {
        return text;
    }
    let mut end = MAX_EMBED_CHARS;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

// ============================================================================
// TESTS
// ============================================================================
