//! Data Model
//!
//! The persistent entities (thoughts, conversations, messages, theme
//! graphs) plus the ephemeral capture/index messages that move between
//! components.

mod conversation;
mod graph;
mod thought;

pub use conversation::{
    Citation, Conversation, ConversationStatus, DecryptedMessage, Message, MessageRole,
};
pub use graph::{GraphEdge, GraphMeta, GraphNode, Theme, ThemeGraph};
pub use thought::{
    is_valid_tag, CaptureContext, CaptureRequest, Category, Intent, Thought, ThoughtKind,
    MAX_TAGS, MAX_TEXT_LEN,
};

use serde::{Deserialize, Serialize};

// ============================================================================
// INDEX JOBS
// ============================================================================

/// A unit of asynchronous indexing work.
///
/// Serialized onto the index queue; the variant tag mirrors the wire schema
/// (`type: "conversation"` marks conversation jobs, thought jobs are the
/// untagged default).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IndexJob {
    /// Index (or re-index) a single thought from its raw blob.
    #[serde(rename = "thought")]
    Thought {
        #[serde(rename = "thoughtId")]
        thought_id: String,
        user: String,
        /// Raw object store key written by the capture path.
        #[serde(rename = "s3Key")]
        raw_key: String,
        #[serde(rename = "createdAt")]
        created_at: i64,
    },
    /// Re-index a conversation transcript.
    #[serde(rename = "conversation")]
    Conversation {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        user: String,
    },
}

impl IndexJob {
    /// The id of the entity this job targets.
    pub fn target_id(&self) -> &str {
        match self {
            IndexJob::Thought { thought_id, .. } => thought_id,
            IndexJob::Conversation {
                conversation_id, ..
            } => conversation_id,
        }
    }

    /// The owning user.
    pub fn user(&self) -> &str {
        match self {
            IndexJob::Thought { user, .. } => user,
            IndexJob::Conversation { user, .. } => user,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
