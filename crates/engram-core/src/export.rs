//! Incremental export sync
//!
//! `since`-based export of thoughts and conversations (decrypted), plus
//! the ids of anything deleted at or after `since`. The returned
//! `syncTimestamp` is echoed back as the next `since`; `since = 0` is a
//! full export. Never partial: any store error fails the whole call.

use serde::Serialize;

use crate::crypto::{EnvelopeCipher, MessageAad};
use crate::error::Result;
use crate::model::{
    Conversation, ConversationStatus, DecryptedMessage, Message, Thought,
};
use crate::now_ms;
use crate::store::{keys, MetadataStore};

/// Row scan bound per entity class.
const SCAN_LIMIT: usize = 100_000;

/// A conversation with its decrypted messages.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedConversation {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub messages: Vec<DecryptedMessage>,
}

/// The full export payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub thoughts: Vec<Thought>,
    pub conversations: Vec<ExportedConversation>,
    /// Ids (thoughts and conversations) deleted at or after `since`
    pub deleted: Vec<String>,
    /// Echo as the next `since`
    pub sync_timestamp: i64,
}

/// Build an export for `user` of everything created/updated at or after
/// `since` (epoch ms).
pub fn export(
    store: &MetadataStore,
    cipher: &EnvelopeCipher,
    user: &str,
    since: i64,
) -> Result<ExportBundle> {
    let sync_timestamp = now_ms();
    let pk = keys::user_pk(user);
    let mut deleted = Vec::new();

    // Thoughts
    let mut thoughts = Vec::new();
    let page = store.query_prefix(&pk, keys::THOUGHT_SK_PREFIX, true, SCAN_LIMIT, None)?;
    for record in &page.records {
        let thought: Thought = record.parse()?;
        if let Some(deleted_at) = thought.deleted_at {
            if deleted_at >= since {
                deleted.push(thought.id.clone());
            }
            continue;
        }
        let updated = thought.indexed_at.unwrap_or(thought.created_at);
        if thought.created_at >= since || updated >= since {
            thoughts.push(thought);
        }
    }

    // Conversations with decrypted messages
    let mut conversations = Vec::new();
    let page = store.query_prefix(&pk, keys::CONVERSATION_SK_PREFIX, false, SCAN_LIMIT, None)?;
    for record in &page.records {
        let conv: Conversation = record.parse()?;
        if conv.status == ConversationStatus::Deleted {
            let deleted_at = record
                .body
                .get("deletedAt")
                .and_then(|v| v.as_i64())
                .unwrap_or(conv.updated_at);
            if deleted_at >= since {
                deleted.push(conv.id.clone());
            }
            continue;
        }
        if conv.created_at < since && conv.updated_at < since {
            continue;
        }

        let messages_page = store.query_prefix(
            &keys::conversation_pk(&conv.id),
            keys::MESSAGE_SK_PREFIX,
            false,
            SCAN_LIMIT,
            None,
        )?;
        let mut messages = Vec::with_capacity(messages_page.records.len());
        for msg_record in &messages_page.records {
            let message: Message = msg_record.parse()?;
            let aad = MessageAad {
                conversation_id: &conv.id,
                message_id: &message.id,
                user_id: user,
            };
            let content = match cipher.decrypt(&message.body, &aad) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(
                        message_id = %message.id,
                        error = %e,
                        "message decryption failed during export"
                    );
                    "[message could not be decrypted]".to_string()
                }
            };
            messages.push(DecryptedMessage {
                id: message.id,
                role: message.role,
                content,
                created_at: message.created_at,
                citations: message.citations,
                confidence: message.confidence,
            });
        }
        conversations.push(ExportedConversation {
            conversation: conv,
            messages,
        });
    }

    Ok(ExportBundle {
        thoughts,
        conversations,
        deleted,
        sync_timestamp,
    })
}
