//! Indexer worker
//!
//! Drains the index queue, enriches thought and conversation documents,
//! and publishes them into the search index plus the derived fields of the
//! metadata store. Holds no durable state: correctness comes from
//! idempotent upserts keyed by the thought/conversation id, so
//! re-processing a job is always safe.
//!
//! Failure handling follows the partial-batch contract: each message is
//! acked or failed individually and the queue redelivers only failures.

pub mod enrich;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::watch;

use crate::capture::RawThought;
use crate::crypto::{EnvelopeCipher, MessageAad};
use crate::error::{EngineError, Result};
use crate::llm::{truncate_for_embedding, ChatModel, ChatRequest, Embedder};
use crate::model::{Conversation, ConversationStatus, IndexJob, Message, MessageRole};
use crate::now_ms;
use crate::queue::{IndexQueue, QueueMessage};
use crate::search::{DocType, SearchDoc, SearchFilter, SearchIndex};
use crate::store::{keys, FsObjectStore, MetadataStore};

/// Messages pulled per receive call.
const BATCH_SIZE: usize = 10;

/// In-flight messages per worker.
const MAX_CONCURRENCY: usize = 10;

/// Per-message processing budget; the queue visibility timeout exceeds it.
const MESSAGE_BUDGET: Duration = Duration::from_secs(120);

/// k-NN width when looking for related thoughts.
const RELATED_KNN_K: usize = 6;

/// Related thought ids kept on the row.
const RELATED_LIMIT: usize = 5;

/// Plaintext substituted for a message that fails decryption during a
/// batch read.
const DECRYPT_SENTINEL: &str = "[message could not be decrypted]";

// ============================================================================
// INDEXER
// ============================================================================

/// The queue-draining enrichment worker.
pub struct Indexer {
    store: Arc<MetadataStore>,
    objects: Arc<FsObjectStore>,
    index: Arc<SearchIndex>,
    queue: Arc<dyn IndexQueue>,
    chat: Arc<dyn ChatModel>,
    embedder: Arc<dyn Embedder>,
    cipher: EnvelopeCipher,
}

impl Indexer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<MetadataStore>,
        objects: Arc<FsObjectStore>,
        index: Arc<SearchIndex>,
        queue: Arc<dyn IndexQueue>,
        chat: Arc<dyn ChatModel>,
        embedder: Arc<dyn Embedder>,
        cipher: EnvelopeCipher,
    ) -> Self {
        Self {
            store,
            objects,
            index,
            queue,
            chat,
            embedder,
            cipher,
        }
    }

    /// Run the worker loop until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("indexer worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                batch = self.queue.receive(BATCH_SIZE, Duration::from_secs(1)) => {
                    if !batch.is_empty() {
                        self.process_batch(batch).await;
                    }
                }
            }
        }
        tracing::info!("indexer worker stopped");
    }

    /// Process one received batch with bounded concurrency, acking and
    /// failing each message individually.
    pub async fn process_batch(&self, batch: Vec<QueueMessage>) {
        let results: Vec<(String, bool)> = stream::iter(batch)
            .map(|msg| async move {
                let outcome =
                    tokio::time::timeout(MESSAGE_BUDGET, self.process_job(&msg.job)).await;
                let ok = match outcome {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        tracing::warn!(
                            job = msg.job.target_id(),
                            attempt = msg.attempt,
                            error = %e,
                            "index job failed"
                        );
                        false
                    }
                    Err(_) => {
                        tracing::warn!(
                            job = msg.job.target_id(),
                            attempt = msg.attempt,
                            "index job timed out"
                        );
                        false
                    }
                };
                (msg.receipt, ok)
            })
            .buffer_unordered(MAX_CONCURRENCY)
            .collect()
            .await;

        let mut failed = Vec::new();
        for (receipt, ok) in results {
            if ok {
                self.queue.ack(&receipt).await;
            } else {
                failed.push(receipt);
            }
        }
        if !failed.is_empty() {
            self.queue.report_failed(&failed).await;
        }
    }

    /// Drain the queue until empty (test and shutdown helper).
    pub async fn drain(&self) {
        loop {
            let batch = self.queue.receive(BATCH_SIZE, Duration::from_millis(10)).await;
            if batch.is_empty() {
                return;
            }
            self.process_batch(batch).await;
        }
    }

    /// Dispatch a single job.
    pub async fn process_job(&self, job: &IndexJob) -> Result<()> {
        match job {
            IndexJob::Thought {
                thought_id,
                user,
                raw_key,
                created_at,
            } => {
                self.index_thought(user, thought_id, raw_key, *created_at)
                    .await
            }
            IndexJob::Conversation {
                conversation_id,
                user,
            } => self.index_conversation(user, conversation_id).await,
        }
    }

    // ------------------------------------------------------------------
    // Thought pipeline
    // ------------------------------------------------------------------

    async fn index_thought(
        &self,
        user: &str,
        thought_id: &str,
        raw_key: &str,
        created_at: i64,
    ) -> Result<()> {
        let pk = keys::user_pk(user);
        let sk = keys::thought_sk(created_at, thought_id);

        let Some(row) = self.store.get(&pk, &sk)? else {
            // Capture row missing: stale job, nothing to index
            tracing::warn!(thought_id, "skipping index job without metadata row");
            return Ok(());
        };
        if row.body.get("deletedAt").is_some_and(|v| !v.is_null()) {
            self.index.remove(thought_id)?;
            return Ok(());
        }

        let raw_bytes = self
            .objects
            .get(raw_key)?
            .ok_or_else(|| EngineError::Internal(format!("raw blob missing: {raw_key}")))?;
        let raw: RawThought = serde_json::from_slice(&raw_bytes)
            .map_err(|e| EngineError::Internal(format!("corrupt raw blob: {e}")))?;
        let thought = raw.thought;

        let embedding = self
            .embedder
            .embed(truncate_for_embedding(&thought.text))
            .await?;

        let summary = enrich::summarize(self.chat.as_ref(), &thought.text).await;
        let smart = enrich::smart_tags(self.chat.as_ref(), &thought.text, thought.kind).await;
        let unified_tags = enrich::unify_tags(&thought.tags, &smart.tags);

        // Related thoughts: same user, exclude self, cap at 5
        let filter = SearchFilter {
            user: user.to_string(),
            tags: vec![],
            from_epoch: None,
            doc_types: Some(vec![DocType::Thought]),
        };
        let related_ids: Vec<String> = self
            .index
            .knn(&embedding, RELATED_KNN_K, &filter)?
            .into_iter()
            .map(|(id, _)| id)
            .filter(|id| id != thought_id)
            .take(RELATED_LIMIT)
            .collect();

        let doc = SearchDoc {
            id: thought_id.to_string(),
            user: user.to_string(),
            doc_type: DocType::Thought,
            text: thought.text.clone(),
            summary: summary.clone(),
            tags: unified_tags,
            kind: Some(thought.kind.as_str().to_string()),
            category: Some(smart.category.as_str().to_string()),
            intent: Some(smart.intent.as_str().to_string()),
            entities: smart.entities.clone(),
            created_at_epoch: thought.created_at,
            decision_score: thought.decision_score,
            embedding,
            context: thought.context.clone(),
            title: None,
            message_count: None,
            cited_thought_ids: vec![],
            updated_at_epoch: None,
        };
        self.index.upsert(&doc)?;

        let mut fields = serde_json::Map::new();
        fields.insert("summary".into(), serde_json::json!(summary));
        fields.insert("autoTags".into(), serde_json::json!(smart.tags));
        fields.insert("category".into(), serde_json::json!(smart.category.as_str()));
        fields.insert("intent".into(), serde_json::json!(smart.intent.as_str()));
        fields.insert("entities".into(), serde_json::json!(smart.entities));
        fields.insert("relatedIds".into(), serde_json::json!(related_ids));
        fields.insert("embeddingRef".into(), serde_json::json!(thought_id));
        fields.insert("indexedAt".into(), serde_json::json!(now_ms()));
        self.store.merge_body(&pk, &sk, &fields)?;

        tracing::debug!(thought_id, "thought indexed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Conversation pipeline
    // ------------------------------------------------------------------

    async fn index_conversation(&self, user: &str, conversation_id: &str) -> Result<()> {
        let pk = keys::user_pk(user);
        let sk = keys::conversation_sk(conversation_id);

        let Some(row) = self.store.get(&pk, &sk)? else {
            tracing::warn!(conversation_id, "skipping index job for missing conversation");
            return Ok(());
        };
        let conv: Conversation = row.parse()?;
        if conv.status == ConversationStatus::Deleted {
            self.index.remove(conversation_id)?;
            return Ok(());
        }

        let page = self.store.query_prefix(
            &keys::conversation_pk(conversation_id),
            keys::MESSAGE_SK_PREFIX,
            false,
            10_000,
            None,
        )?;

        let mut transcript_lines = Vec::new();
        let mut cited_ids: BTreeSet<String> = BTreeSet::new();
        let mut first_question: Option<String> = None;
        for record in &page.records {
            let message: Message = record.parse()?;
            let aad = MessageAad {
                conversation_id,
                message_id: &message.id,
                user_id: user,
            };
            let plaintext = match self.cipher.decrypt(&message.body, &aad) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(
                        conversation_id,
                        message_id = %message.id,
                        error = %e,
                        "message decryption failed during index, substituting sentinel"
                    );
                    DECRYPT_SENTINEL.to_string()
                }
            };
            match message.role {
                MessageRole::User => {
                    if first_question.is_none() {
                        first_question = Some(plaintext.clone());
                    }
                    transcript_lines.push(format!("Q: {plaintext}"));
                }
                MessageRole::Assistant => transcript_lines.push(format!("A: {plaintext}")),
            }
            for citation in &message.citations {
                cited_ids.insert(citation.id.clone());
            }
        }
        let transcript = transcript_lines.join("\n\n");

        let embedding = self
            .embedder
            .embed(truncate_for_embedding(&transcript))
            .await?;

        let summary = self
            .conversation_summary(&conv, &transcript_lines, first_question.as_deref())
            .await;

        // Union of tags across cited thoughts
        let mut tags: Vec<String> = Vec::new();
        for id in &cited_ids {
            if let Some(doc) = self.index.get(id)? {
                for tag in doc.tags {
                    if !tags.iter().any(|t| *t == tag) {
                        tags.push(tag);
                    }
                }
            }
        }

        let doc = SearchDoc {
            id: conversation_id.to_string(),
            user: user.to_string(),
            doc_type: DocType::Conversation,
            text: transcript,
            summary,
            tags,
            kind: None,
            category: None,
            intent: None,
            entities: vec![],
            created_at_epoch: conv.created_at,
            decision_score: 0.0,
            embedding,
            context: None,
            title: Some(conv.title.clone()),
            message_count: Some(page.records.len() as i64),
            cited_thought_ids: cited_ids.into_iter().collect(),
            updated_at_epoch: Some(conv.updated_at),
        };
        self.index.upsert(&doc)?;

        let mut fields = serde_json::Map::new();
        fields.insert("indexedAt".into(), serde_json::json!(now_ms()));
        self.store.merge_body(&pk, &sk, &fields)?;

        tracing::debug!(conversation_id, "conversation indexed");
        Ok(())
    }

    async fn conversation_summary(
        &self,
        conv: &Conversation,
        transcript_lines: &[String],
        first_question: Option<&str>,
    ) -> String {
        if transcript_lines.len() <= 2 {
            let question = first_question.unwrap_or("");
            return enrich::truncate_summary(&format!("{} - {question}", conv.title), 20);
        }

        let head = transcript_lines
            .iter()
            .take(6)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        let req = ChatRequest::new(
            "You summarize a chat transcript. Reply with one sentence of at most 20 words. \
             No preamble.",
            head,
        )
        .with_budget(80, 0.2);

        match self.chat.complete(req).await {
            Ok(text) => {
                enrich::truncate_summary(text.lines().next().unwrap_or("").trim(), 20)
            }
            Err(e) => {
                tracing::debug!(error = %e, "conversation summary fallback");
                enrich::truncate_summary(
                    &format!("{} - {}", conv.title, first_question.unwrap_or("")),
                    20,
                )
            }
        }
    }
}
