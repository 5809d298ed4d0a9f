//! Conversation state machine
//!
//! Ordered, encrypted, multi-turn dialogs. Message bodies are envelope
//! ciphertext bound to `{conversationId, messageId, userId}`; plaintext
//! exists only in flight. SendMessage reuses retrieval and synthesis, and
//! triggers a debounced conversation re-index.
//!
//! Counter updates go through the store's atomic increment - never
//! read-modify-write - so concurrent senders serialize correctly.

use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::answer::Synthesizer;
use crate::crypto::{EnvelopeCipher, MessageAad};
use crate::error::{EngineError, Result};
use crate::model::{
    Conversation, ConversationStatus, DecryptedMessage, Message, MessageRole,
};
use crate::now_ms;
use crate::queue::IndexQueue;
use crate::retrieval::{RetrievalEngine, RetrievalQuery};
use crate::store::{keys, MetadataStore, PutOutcome, Record};

/// Default number of prior messages included in conversational synthesis.
pub const DEFAULT_INCLUDE_HISTORY: usize = 10;

/// Default page size for message reads.
pub const DEFAULT_MESSAGE_PAGE: usize = 50;

/// Re-index is skipped when the last index ran within this window.
const REINDEX_DEBOUNCE_MS: i64 = 10_000;

/// Bounded fan-out for batch decryption.
const DECRYPT_FANOUT: usize = 10;

// ============================================================================
// REQUEST/RESPONSE TYPES
// ============================================================================

/// SendMessage parameters beyond the content itself.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub from_epoch: Option<i64>,
    pub tags: Vec<String>,
    pub include_history: Option<usize>,
}

/// The pair of messages produced by one send.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub user_message: DecryptedMessage,
    pub assistant_message: DecryptedMessage,
}

/// One page of a conversation read.
#[derive(Debug)]
pub struct ConversationPage {
    pub conversation: Conversation,
    pub messages: Vec<DecryptedMessage>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// One page of a conversation listing.
#[derive(Debug)]
pub struct ConversationList {
    pub conversations: Vec<Conversation>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

// ============================================================================
// SERVICE
// ============================================================================

/// Conversation operations over the metadata store.
pub struct ConversationService {
    store: Arc<MetadataStore>,
    cipher: EnvelopeCipher,
    retrieval: Arc<RetrievalEngine>,
    synthesizer: Arc<Synthesizer>,
    queue: Arc<dyn IndexQueue>,
}

impl ConversationService {
    pub fn new(
        store: Arc<MetadataStore>,
        cipher: EnvelopeCipher,
        retrieval: Arc<RetrievalEngine>,
        synthesizer: Arc<Synthesizer>,
        queue: Arc<dyn IndexQueue>,
    ) -> Self {
        Self {
            store,
            cipher,
            retrieval,
            synthesizer,
            queue,
        }
    }

    // ------------------------------------------------------------------
    // Row access
    // ------------------------------------------------------------------

    /// Load a live (non-deleted) conversation owned by `user`.
    fn load(&self, user: &str, id: &str) -> Result<Conversation> {
        let record = self
            .store
            .get(&keys::user_pk(user), &keys::conversation_sk(id))?
            .ok_or_else(|| EngineError::NotFound(format!("conversation {id}")))?;
        let conv: Conversation = record.parse()?;
        if conv.status == ConversationStatus::Deleted {
            return Err(EngineError::NotFound(format!("conversation {id}")));
        }
        Ok(conv)
    }

    fn conversation_record(conv: &Conversation) -> Result<Record> {
        let body = serde_json::to_value(conv)
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        Ok(
            Record::new(keys::user_pk(&conv.user), keys::conversation_sk(&conv.id), body)
                .with_gsi3(keys::user_pk(&conv.user), keys::updated_gsi3sk(conv.updated_at)),
        )
    }

    // ------------------------------------------------------------------
    // Create / list / get / update / delete
    // ------------------------------------------------------------------

    /// Create a conversation; when `initial_message` is present the full
    /// send flow runs synchronously and its messages are returned inline.
    pub async fn create(
        &self,
        user: &str,
        title: Option<String>,
        initial_message: Option<String>,
    ) -> Result<(Conversation, Option<SendOutcome>)> {
        let now = now_ms();
        let conv = Conversation {
            id: Conversation::new_id(),
            user: user.to_string(),
            title: title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| Conversation::default_title(now)),
            status: ConversationStatus::Active,
            message_count: 0,
            created_at: now,
            updated_at: now,
            indexed_at: None,
        };

        let record = Self::conversation_record(&conv)?;
        if self.store.put_if_absent(&record)? == PutOutcome::AlreadyExists {
            return Err(EngineError::Conflict(format!(
                "conversation {} already exists",
                conv.id
            )));
        }

        let outcome = match initial_message {
            Some(content) if !content.trim().is_empty() => Some(
                self.send_message(user, &conv.id, &content, SendOptions::default())
                    .await?,
            ),
            _ => None,
        };

        let conv = self.load(user, &conv.id)?;
        Ok((conv, outcome))
    }

    /// Paginated listing, most-recent-first by `updatedAt`.
    pub fn list(
        &self,
        user: &str,
        status: Option<ConversationStatus>,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<ConversationList> {
        let page = self
            .store
            .query_gsi3(&keys::user_pk(user), true, limit, cursor)?;

        let mut conversations = Vec::new();
        for record in &page.records {
            let conv: Conversation = record.parse()?;
            let keep = match status {
                Some(wanted) => conv.status == wanted,
                None => conv.status != ConversationStatus::Deleted,
            };
            if keep {
                conversations.push(conv);
            }
        }

        Ok(ConversationList {
            conversations,
            has_more: page.next_cursor.is_some(),
            next_cursor: page.next_cursor,
        })
    }

    /// A conversation plus one chronological page of decrypted messages.
    pub async fn get(
        &self,
        user: &str,
        id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<ConversationPage> {
        let conversation = self.load(user, id)?;
        let page = self.store.query_prefix(
            &keys::conversation_pk(id),
            keys::MESSAGE_SK_PREFIX,
            false,
            limit,
            cursor,
        )?;

        let mut messages = Vec::with_capacity(page.records.len());
        for record in &page.records {
            messages.push(record.parse::<Message>()?);
        }
        let messages = self.decrypt_batch(user, id, messages).await;

        Ok(ConversationPage {
            conversation,
            messages,
            has_more: page.next_cursor.is_some(),
            next_cursor: page.next_cursor,
        })
    }

    /// Update title and/or status. Conditional on record existence.
    pub fn update(
        &self,
        user: &str,
        id: &str,
        title: Option<String>,
        status: Option<ConversationStatus>,
    ) -> Result<()> {
        if status == Some(ConversationStatus::Deleted) {
            return Err(EngineError::Validation(
                "use delete for the deleted status".into(),
            ));
        }
        let _ = self.load(user, id)?;

        let now = now_ms();
        let mut sets = serde_json::Map::new();
        if let Some(title) = title {
            if title.trim().is_empty() {
                return Err(EngineError::Validation("title must not be empty".into()));
            }
            sets.insert("title".into(), serde_json::json!(title));
        }
        if let Some(status) = status {
            sets.insert("status".into(), serde_json::json!(status.as_str()));
        }
        if sets.is_empty() {
            return Err(EngineError::Validation("nothing to update".into()));
        }
        sets.insert("updatedAt".into(), serde_json::json!(now));

        self.store.atomic_update(
            &keys::user_pk(user),
            &keys::conversation_sk(id),
            &[],
            &sets,
            Some(&keys::updated_gsi3sk(now)),
        )?;
        Ok(())
    }

    /// Delete: batch-remove all messages, then tombstone the row.
    /// Idempotent - deleting a deleted (or absent) conversation succeeds.
    pub fn delete(&self, user: &str, id: &str) -> Result<bool> {
        let record = self
            .store
            .get(&keys::user_pk(user), &keys::conversation_sk(id))?;
        let Some(record) = record else {
            return Ok(false);
        };
        let conv: Conversation = record.parse()?;
        if conv.status == ConversationStatus::Deleted {
            return Ok(false);
        }

        // Messages first: a tombstoned row without messages beats the
        // reverse on crash.
        let page = self.store.query_prefix(
            &keys::conversation_pk(id),
            keys::MESSAGE_SK_PREFIX,
            false,
            100_000,
            None,
        )?;
        let message_keys: Vec<(String, String)> = page
            .records
            .iter()
            .map(|r| (r.pk.clone(), r.sk.clone()))
            .collect();
        self.store.batch_delete(&message_keys)?;

        let now = now_ms();
        let mut sets = serde_json::Map::new();
        sets.insert("status".into(), serde_json::json!("deleted"));
        sets.insert("deletedAt".into(), serde_json::json!(now));
        sets.insert("updatedAt".into(), serde_json::json!(now));
        sets.insert("messageCount".into(), serde_json::json!(0));
        self.store.atomic_update(
            &keys::user_pk(user),
            &keys::conversation_sk(id),
            &[],
            &sets,
            Some(&keys::updated_gsi3sk(now)),
        )?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // SendMessage
    // ------------------------------------------------------------------

    /// The send protocol: persist the encrypted user message, retrieve,
    /// synthesize with history, persist the encrypted assistant message,
    /// bump counters atomically, and enqueue a debounced re-index.
    pub async fn send_message(
        &self,
        user: &str,
        conversation_id: &str,
        content: &str,
        options: SendOptions,
    ) -> Result<SendOutcome> {
        if content.trim().is_empty() {
            return Err(EngineError::Validation("message content is empty".into()));
        }
        let conv = self.load(user, conversation_id)?;
        let include_history = options
            .include_history
            .unwrap_or(DEFAULT_INCLUDE_HISTORY)
            .max(1);

        // 1. Prior history, most-recent-first read, reversed to chronological
        let history_page = self.store.query_prefix(
            &keys::conversation_pk(conversation_id),
            keys::MESSAGE_SK_PREFIX,
            true,
            include_history,
            None,
        )?;
        let mut history_messages = Vec::with_capacity(history_page.records.len());
        for record in &history_page.records {
            history_messages.push(record.parse::<Message>()?);
        }
        let mut history = self
            .decrypt_batch(user, conversation_id, history_messages)
            .await;
        history.reverse();

        // 2. Persist the encrypted user message. Creation instants are
        //    kept strictly increasing within a conversation so the sort
        //    key preserves total order even for rapid sends.
        let latest_at = history_page
            .records
            .first()
            .and_then(|r| r.parse::<Message>().ok())
            .map(|m| m.created_at)
            .unwrap_or(0);
        let user_msg_id = Message::new_id();
        let user_msg_at = now_ms().max(latest_at + 1);
        let user_ciphertext = self.cipher.encrypt(
            content,
            &MessageAad {
                conversation_id,
                message_id: &user_msg_id,
                user_id: user,
            },
        )?;
        let user_message = Message {
            id: user_msg_id.clone(),
            conversation_id: conversation_id.to_string(),
            role: MessageRole::User,
            body: user_ciphertext,
            created_at: user_msg_at,
            citations: vec![],
            searched_thought_ids: vec![],
            confidence: None,
        };
        self.put_message(&user_message)?;

        // 3. Retrieve context for the incoming content
        let mut query = RetrievalQuery::new(user, content);
        query.tags = options.tags.clone();
        query.from_epoch = options.from_epoch;
        let retrieved = self.retrieval.retrieve(&query).await;

        // 4. Conversational synthesis with decrypted history
        let history_pairs: Vec<(String, String)> = history
            .iter()
            .map(|m| (m.role.as_str().to_string(), m.content.clone()))
            .collect();
        let synthesized = self
            .synthesizer
            .synthesize(content, &retrieved.thoughts, &history_pairs)
            .await;

        // 5. Persist the encrypted assistant message (only after its
        //    content exists - a stored assistant without its user message
        //    cannot occur)
        let assistant_msg_id = Message::new_id();
        let assistant_at = now_ms().max(user_msg_at + 1);
        let assistant_ciphertext = self.cipher.encrypt(
            &synthesized.answer,
            &MessageAad {
                conversation_id,
                message_id: &assistant_msg_id,
                user_id: user,
            },
        )?;
        let assistant_message = Message {
            id: assistant_msg_id.clone(),
            conversation_id: conversation_id.to_string(),
            role: MessageRole::Assistant,
            body: assistant_ciphertext,
            created_at: assistant_at,
            citations: synthesized.citations.clone(),
            searched_thought_ids: synthesized.searched_thought_ids.clone(),
            confidence: Some(synthesized.confidence),
        };
        self.put_message(&assistant_message)?;

        // 6. Atomic counter bump + updated secondary key
        let now = now_ms();
        let mut sets = serde_json::Map::new();
        sets.insert("updatedAt".into(), serde_json::json!(now));
        self.store.atomic_update(
            &keys::user_pk(user),
            &keys::conversation_sk(conversation_id),
            &[("messageCount", 2)],
            &sets,
            Some(&keys::updated_gsi3sk(now)),
        )?;

        // 7. Debounced re-index
        let last_indexed = conv.indexed_at.unwrap_or(0);
        if now - last_indexed > REINDEX_DEBOUNCE_MS {
            let job = crate::model::IndexJob::Conversation {
                conversation_id: conversation_id.to_string(),
                user: user.to_string(),
            };
            if let Err(e) = self.queue.send(job).await {
                // Searchability lags until the next send; the data itself
                // is durable.
                tracing::warn!(conversation_id, error = %e, "conversation re-index enqueue failed");
            }
        }

        Ok(SendOutcome {
            user_message: DecryptedMessage {
                id: user_msg_id,
                role: MessageRole::User,
                content: content.to_string(),
                created_at: user_msg_at,
                citations: vec![],
                confidence: None,
            },
            assistant_message: DecryptedMessage {
                id: assistant_msg_id,
                role: MessageRole::Assistant,
                content: synthesized.answer,
                created_at: assistant_at,
                citations: synthesized.citations,
                confidence: Some(synthesized.confidence),
            },
        })
    }

    fn put_message(&self, message: &Message) -> Result<()> {
        let body = serde_json::to_value(message)
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        let record = Record::new(
            keys::conversation_pk(&message.conversation_id),
            keys::message_sk(message.created_at, &message.id),
            body,
        );
        self.store.put(&record)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Batch decryption
    // ------------------------------------------------------------------

    /// Decrypt a batch of messages with bounded fan-out, order preserved.
    /// A message that fails decryption is returned with a sentinel body
    /// rather than failing the whole read.
    async fn decrypt_batch(
        &self,
        user: &str,
        conversation_id: &str,
        messages: Vec<Message>,
    ) -> Vec<DecryptedMessage> {
        stream::iter(messages)
            .map(|message| {
                let cipher = self.cipher.clone();
                async move {
                    let aad = MessageAad {
                        conversation_id,
                        message_id: &message.id,
                        user_id: user,
                    };
                    let content = match cipher.decrypt(&message.body, &aad) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!(
                                message_id = %message.id,
                                error = %e,
                                "message decryption failed in batch read"
                            );
                            "[message could not be decrypted]".to_string()
                        }
                    };
                    DecryptedMessage {
                        id: message.id,
                        role: message.role,
                        content,
                        created_at: message.created_at,
                        citations: message.citations,
                        confidence: message.confidence,
                    }
                }
            })
            .buffered(DECRYPT_FANOUT)
            .collect()
            .await
    }
}
