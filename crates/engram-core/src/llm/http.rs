//! OpenAI-compatible HTTP backend
//!
//! One client implements both capabilities: `/v1/chat/completions` for
//! [`ChatModel`] and `/v1/embeddings` for [`Embedder`]. Rate limiting (429)
//! is surfaced as [`LlmError::RateLimited`] with the server's retry hint.

use async_trait::async_trait;
use serde::Deserialize;

use super::{truncate_for_embedding, ChatModel, ChatRequest, Embedder, LlmError};

/// Backend configuration, normally sourced from the environment.
#[derive(Debug, Clone)]
pub struct HttpLlmConfig {
    /// Base URL without trailing slash, e.g. `https://api.openai.com`.
    pub base_url: String,
    pub api_key: String,
    pub chat_model: String,
    pub embed_model: String,
    /// Dimensionality the embedding model produces.
    pub dimensions: usize,
}

/// reqwest-based client for both chat and embedding calls.
pub struct HttpLlmClient {
    client: reqwest::Client,
    config: HttpLlmConfig,
}

impl HttpLlmClient {
    pub fn new(config: HttpLlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, LlmError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status.as_u16() == 429 {
            let retry_after_ms = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(LlmError::RateLimited { retry_after_ms });
        }
        let message = resp.text().await.unwrap_or_default();
        Err(LlmError::Api {
            status: status.as_u16(),
            message: message.chars().take(500).collect(),
        })
    }
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

// ============================================================================
// TRAIT IMPLS
// ============================================================================

#[async_trait]
impl ChatModel for HttpLlmClient {
    async fn complete(&self, req: ChatRequest) -> Result<String, LlmError> {
        let body = serde_json::json!({
            "model": self.config.chat_model,
            "max_tokens": req.max_tokens,
            "temperature": req.temperature,
            "messages": [
                {"role": "system", "content": req.system},
                {"role": "user", "content": req.user},
            ],
        });

        let resp = self
            .client
            .post(self.url("/v1/chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;

        let parsed: ChatCompletionResponse = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| LlmError::Parse("empty completion".to_string()))
    }
}

#[async_trait]
impl Embedder for HttpLlmClient {
    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let input = truncate_for_embedding(text);
        let body = serde_json::json!({
            "model": self.config.embed_model,
            "input": input,
        });

        let resp = self
            .client
            .post(self.url("/v1/embeddings"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;

        let parsed: EmbeddingResponse = resp.json().await?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| LlmError::Parse("empty embedding response".to_string()))?;

        if vector.len() != self.config.dimensions {
            return Err(LlmError::Parse(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.config.dimensions,
                vector.len()
            )));
        }
        Ok(vector)
    }
}
