//! Conversations and messages
//!
//! A conversation owns an ordered set of messages. Message bodies are
//! persisted only as envelope-encrypted ciphertext; decryption requires the
//! exact `{conversationId, messageId, userId}` AAD triple.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// STATUS
// ============================================================================

/// Conversation lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    #[default]
    Active,
    Archived,
    /// Terminal; the record is tombstoned and messages are removed.
    Deleted,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Archived => "archived",
            ConversationStatus::Deleted => "deleted",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(ConversationStatus::Active),
            "archived" => Some(ConversationStatus::Archived),
            "deleted" => Some(ConversationStatus::Deleted),
            _ => None,
        }
    }
}

// ============================================================================
// CONVERSATION
// ============================================================================

/// A user-scoped chat session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Opaque id, always prefixed `conv_`
    pub id: String,
    pub user: String,
    pub title: String,
    pub status: ConversationStatus,
    /// Count of live messages; maintained via atomic increments only.
    pub message_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
    /// Last successful conversation-index run (debounce marker).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<i64>,
}

impl Conversation {
    /// Generate a fresh conversation id.
    pub fn new_id() -> String {
        format!("conv_{}", uuid::Uuid::new_v4())
    }

    /// Default title for a conversation created at `epoch_ms`.
    pub fn default_title(epoch_ms: i64) -> String {
        let date = Utc
            .timestamp_millis_opt(epoch_ms)
            .single()
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        format!("Conversation {date}")
    }
}

// ============================================================================
// MESSAGES
// ============================================================================

/// Message author role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// A citation emitted by the synthesizer, attached to assistant messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    /// Cited thought id
    pub id: String,
    pub created_at: i64,
    /// Summary or truncated text of the cited thought
    pub preview: String,
    /// Normalized relevance, 0.0 - 1.0, rounded to 3 decimals
    pub score: f64,
    pub kind: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A stored message. The body is ciphertext; plaintext never persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Opaque id, always prefixed `msg_`
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    /// Base64 envelope ciphertext
    pub body: String,
    pub created_at: i64,
    /// Assistant-only: citations backing the answer
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
    /// Assistant-only: top-ranked retrieval ids at synthesis time
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub searched_thought_ids: Vec<String>,
    /// Assistant-only: synthesis confidence, 0.0 - 1.0
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl Message {
    /// Generate a fresh message id.
    pub fn new_id() -> String {
        format!("msg_{}", uuid::Uuid::new_v4())
    }
}

/// A message with its body decrypted for the caller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptedMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: i64,
    pub citations: Vec<Citation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            ConversationStatus::Active,
            ConversationStatus::Archived,
            ConversationStatus::Deleted,
        ] {
            assert_eq!(ConversationStatus::parse_name(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_default_title_contains_date() {
        // 2026-03-01T00:00:00Z
        let title = Conversation::default_title(1_772_323_200_000);
        assert!(title.starts_with("Conversation 2026-03-01"), "{title}");
    }

    #[test]
    fn test_id_prefixes() {
        assert!(Conversation::new_id().starts_with("conv_"));
        assert!(Message::new_id().starts_with("msg_"));
    }
}
