//! Mock model backends
//!
//! The embedder hashes words into a fixed-dimension bag-of-words vector,
//! so texts that share vocabulary really are cosine-similar - retrieval
//! and clustering behave meaningfully without a network. The chat mock
//! answers each prompt family with a plausible fixed reply.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use engram_core::{ChatModel, ChatRequest, Embedder, LlmError, EMBEDDING_DIMENSIONS};

// ============================================================================
// EMBEDDER
// ============================================================================

/// Deterministic bag-of-words embedder.
#[derive(Default)]
pub struct MockEmbedder {
    calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let mut vector = vec![0.0_f32; EMBEDDING_DIMENSIONS];
        for word in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if word.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            let idx = (hasher.finish() as usize) % EMBEDDING_DIMENSIONS;
            vector[idx] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        } else {
            vector[0] = 1.0;
        }
        Ok(vector)
    }
}

/// An embedder that always errors (lexical-fallback and degraded paths).
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
        Err(LlmError::Unavailable("mock embedder down".into()))
    }
}

// ============================================================================
// CHAT
// ============================================================================

/// Prompt-family-aware chat mock.
pub struct MockChat {
    /// Reply for answer-synthesis prompts.
    pub answer: String,
}

impl Default for MockChat {
    fn default() -> Self {
        Self {
            answer: "Based on your notes [1].".to_string(),
        }
    }
}

impl MockChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_answer(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
        }
    }
}

#[async_trait]
impl ChatModel for MockChat {
    async fn complete(&self, req: ChatRequest) -> Result<String, LlmError> {
        if req.system.contains("classify") {
            return Ok(
                "```json\n{\"tags\": [\"mock-tag\", \"testing\", \"notes\"], \
                 \"category\": \"engineering\", \"intent\": \"note\", \
                 \"entities\": [\"Engram\"]}\n```"
                    .to_string(),
            );
        }
        if req.system.contains("name a cluster") {
            return Ok(
                "{\"label\": \"Mock Theme\", \"description\": \"Thoughts grouped for tests.\"}"
                    .to_string(),
            );
        }
        if req.system.contains("summarize") {
            return Ok("A short mock summary.".to_string());
        }
        Ok(self.answer.clone())
    }
}

/// A chat backend that always errors (fallback paths).
pub struct FailingChat;

#[async_trait]
impl ChatModel for FailingChat {
    async fn complete(&self, _req: ChatRequest) -> Result<String, LlmError> {
        Err(LlmError::Unavailable("mock chat down".into()))
    }
}
