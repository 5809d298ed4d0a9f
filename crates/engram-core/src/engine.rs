//! Engine composition root
//!
//! Owns the injected capability structs (stores, queue, model backends,
//! cipher) and exposes the public operations the HTTP surface calls. Every
//! successful capture, conversation mutation, and delete bumps the user's
//! `lastDataChange` marker, which invalidates the cached theme graph.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::answer::Synthesizer;
use crate::capture;
use crate::convo::{
    ConversationList, ConversationPage, ConversationService, SendOptions, SendOutcome,
};
use crate::crypto::EnvelopeCipher;
use crate::error::{EngineError, Result};
use crate::export::{self, ExportBundle};
use crate::graph::GraphBuilder;
use crate::indexer::Indexer;
use crate::llm::{ChatModel, Embedder};
use crate::model::{
    Citation, Conversation, ConversationStatus, IndexJob, Thought, ThoughtKind,
};
use crate::now_ms;
use crate::queue::IndexQueue;
use crate::retrieval::{RetrievalEngine, RetrievalQuery};
use crate::search::SearchIndex;
use crate::store::{keys, FsObjectStore, MetadataStore, PutOutcome, Record};

/// Hard cap on list page sizes.
pub const MAX_LIST_LIMIT: usize = 100;

/// Advisory row TTL: one year, in seconds.
const ROW_TTL_SECS: i64 = 365 * 24 * 60 * 60;

// ============================================================================
// REQUEST/RESPONSE TYPES
// ============================================================================

/// Capture acknowledgment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureReceipt {
    pub id: String,
    pub created_at: i64,
}

/// Thought listing parameters.
#[derive(Debug, Clone, Default)]
pub struct ListThoughts {
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub tag: Option<String>,
    pub kind: Option<ThoughtKind>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
    pub include_count: bool,
}

/// One page of thoughts.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThoughtPage {
    pub thoughts: Vec<Thought>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<usize>,
}

/// Ask parameters.
#[derive(Debug, Clone, Default)]
pub struct AskRequest {
    pub query: String,
    /// Human window like "90d" / "1y"
    pub time_window: Option<String>,
    pub tags: Vec<String>,
    pub limit: Option<usize>,
}

/// A conversation surfaced alongside an answer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationHit {
    pub id: String,
    pub title: String,
    pub summary: String,
    /// Normalized independently of citation scores
    pub score: f64,
    pub message_count: i64,
    pub updated_at: i64,
}

/// The grounded answer payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AskResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conversation_hits: Vec<ConversationHit>,
    pub confidence: f64,
    pub processing_time: u64,
}

/// Liveness payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
    pub indexed_documents: usize,
}

// ============================================================================
// ENGINE
// ============================================================================

/// The assembled knowledge engine.
pub struct Engine {
    store: Arc<MetadataStore>,
    objects: Arc<FsObjectStore>,
    index: Arc<SearchIndex>,
    queue: Arc<dyn IndexQueue>,
    chat: Arc<dyn ChatModel>,
    embedder: Arc<dyn Embedder>,
    cipher: EnvelopeCipher,
    retrieval: Arc<RetrievalEngine>,
    synthesizer: Arc<Synthesizer>,
    conversations: ConversationService,
    graph_seed: Option<u64>,
}

impl Engine {
    /// Assemble from injected capabilities.
    pub fn new(
        store: Arc<MetadataStore>,
        objects: Arc<FsObjectStore>,
        index: Arc<SearchIndex>,
        queue: Arc<dyn IndexQueue>,
        chat: Arc<dyn ChatModel>,
        embedder: Arc<dyn Embedder>,
        cipher: EnvelopeCipher,
    ) -> Self {
        let retrieval = Arc::new(RetrievalEngine::new(index.clone(), embedder.clone()));
        let synthesizer = Arc::new(Synthesizer::new(chat.clone()));
        let conversations = ConversationService::new(
            store.clone(),
            cipher.clone(),
            retrieval.clone(),
            synthesizer.clone(),
            queue.clone(),
        );
        Self {
            store,
            objects,
            index,
            queue,
            chat,
            embedder,
            cipher,
            retrieval,
            synthesizer,
            conversations,
            graph_seed: None,
        }
    }

    /// Open the stores under `data_dir` and assemble.
    pub fn open(
        data_dir: &Path,
        queue: Arc<dyn IndexQueue>,
        chat: Arc<dyn ChatModel>,
        embedder: Arc<dyn Embedder>,
        cipher: EnvelopeCipher,
    ) -> Result<Self> {
        let store = Arc::new(MetadataStore::open(&data_dir.join("engram.db"))?);
        let objects = Arc::new(FsObjectStore::open(data_dir.join("objects"))?);
        let index = Arc::new(SearchIndex::open(&data_dir.join("search.db"))?);
        Ok(Self::new(store, objects, index, queue, chat, embedder, cipher))
    }

    /// Fix the graph clustering seed (tests).
    pub fn with_graph_seed(mut self, seed: u64) -> Self {
        self.graph_seed = Some(seed);
        self
    }

    /// Construct the indexer worker sharing this engine's capabilities.
    pub fn indexer(&self) -> Indexer {
        Indexer::new(
            self.store.clone(),
            self.objects.clone(),
            self.index.clone(),
            self.queue.clone(),
            self.chat.clone(),
            self.embedder.clone(),
            self.cipher.clone(),
        )
    }

    /// The shared metadata store (export and tests).
    pub fn store(&self) -> &Arc<MetadataStore> {
        &self.store
    }

    // ------------------------------------------------------------------
    // lastDataChange
    // ------------------------------------------------------------------

    fn bump_last_data_change(&self, user: &str) {
        let record = Record::new(
            keys::user_pk(user),
            keys::META_SK,
            serde_json::json!({ "lastDataChange": now_ms() }),
        );
        if let Err(e) = self.store.put(&record) {
            tracing::warn!(user, error = %e, "lastDataChange bump failed");
        }
    }

    // ------------------------------------------------------------------
    // Thoughts
    // ------------------------------------------------------------------

    /// Capture: durable raw write, conditional metadata row, index job.
    /// Returns before any model or vector work happens.
    pub async fn capture(
        &self,
        user: &str,
        request: &crate::model::CaptureRequest,
    ) -> Result<CaptureReceipt> {
        let raw = capture::prepare(user, request, now_ms())?;
        let thought = &raw.thought;
        let raw_key = capture::raw_key(user, thought.created_at, &thought.id);

        // 1. Raw blob first: the durable source of truth
        let blob = serde_json::to_vec(&raw)
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        self.objects.put(&raw_key, &blob)?;

        // 2. Conditional metadata row; a repeat of the same id is a no-op
        let body = serde_json::to_value(thought)
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        let record = Record::new(
            keys::user_pk(user),
            keys::thought_sk(thought.created_at, &thought.id),
            body,
        )
        .with_gsi1(
            keys::kind_gsi1pk(thought.kind.as_str()),
            keys::kind_gsi1sk(thought.created_at),
        )
        .with_ttl(now_ms() / 1000 + ROW_TTL_SECS);

        if self.store.put_if_absent(&record)? == PutOutcome::AlreadyExists {
            tracing::debug!(id = %thought.id, "duplicate capture treated as success");
            return Ok(CaptureReceipt {
                id: thought.id.clone(),
                created_at: thought.created_at,
            });
        }

        // 3. Index job; without it the thought is invisible to retrieval,
        //    so an enqueue failure is an internal error.
        let job = IndexJob::Thought {
            thought_id: thought.id.clone(),
            user: user.to_string(),
            raw_key,
            created_at: thought.created_at,
        };
        self.queue
            .send(job)
            .await
            .map_err(|e| EngineError::Internal(format!("index enqueue failed: {e}")))?;

        self.bump_last_data_change(user);
        tracing::info!(id = %thought.id, kind = %thought.kind, "thought captured");
        Ok(CaptureReceipt {
            id: thought.id.clone(),
            created_at: thought.created_at,
        })
    }

    /// Newest-first listing with kind/tag/time filters.
    pub fn list_thoughts(&self, user: &str, params: &ListThoughts) -> Result<ThoughtPage> {
        let limit = params.limit.unwrap_or(50).clamp(1, MAX_LIST_LIMIT);
        let sk_from = keys::thought_sk(params.from.unwrap_or(0), "");
        let sk_to = format!("{}\u{10FFFF}", keys::thought_sk(params.to.unwrap_or(9_999_999_999_999), ""));

        // Over-scan pages so post-filters (kind, tag, deleted) still fill
        // the requested page.
        let mut thoughts = Vec::new();
        let mut cursor = params.cursor.clone();
        let mut has_more = false;
        loop {
            let page = self.store.query_range(
                &keys::user_pk(user),
                &sk_from,
                &sk_to,
                true,
                limit,
                cursor.as_deref(),
            )?;
            let page_cursor = page.next_cursor.clone();

            for record in &page.records {
                let thought: Thought = record.parse()?;
                if thought.is_deleted() {
                    continue;
                }
                if let Some(kind) = params.kind {
                    if thought.kind != kind {
                        continue;
                    }
                }
                if let Some(ref tag) = params.tag {
                    if !thought.tags.iter().any(|t| t == tag) {
                        continue;
                    }
                }
                if thoughts.len() < limit {
                    thoughts.push(thought);
                } else {
                    has_more = true;
                    break;
                }
            }

            if thoughts.len() >= limit || page_cursor.is_none() {
                has_more = has_more || page_cursor.is_some();
                cursor = if has_more {
                    thoughts.last().map(|t: &Thought| {
                        keys::thought_sk(t.created_at, &t.id)
                    })
                } else {
                    None
                };
                break;
            }
            cursor = page_cursor;
        }

        let total_count = if params.include_count {
            Some(self.store.count_prefix(&keys::user_pk(user), keys::THOUGHT_SK_PREFIX)?)
        } else {
            None
        };

        Ok(ThoughtPage {
            thoughts,
            cursor: if has_more { cursor } else { None },
            has_more,
            total_count,
        })
    }

    /// Locate a thought row by id. The search document carries the
    /// creation epoch needed to rebuild the sort key; fall back to a row
    /// scan for not-yet-indexed thoughts.
    fn find_thought(&self, user: &str, id: &str) -> Result<Thought> {
        if let Some(doc) = self.index.get(id)? {
            if doc.user == user {
                let sk = keys::thought_sk(doc.created_at_epoch, id);
                if let Some(record) = self.store.get(&keys::user_pk(user), &sk)? {
                    let thought: Thought = record.parse()?;
                    if !thought.is_deleted() {
                        return Ok(thought);
                    }
                }
            }
        }

        let suffix = format!("#{id}");
        let page = self.store.query_prefix(
            &keys::user_pk(user),
            keys::THOUGHT_SK_PREFIX,
            true,
            100_000,
            None,
        )?;
        for record in &page.records {
            if record.sk.ends_with(&suffix) {
                let thought: Thought = record.parse()?;
                if thought.is_deleted() {
                    break;
                }
                return Ok(thought);
            }
        }
        Err(EngineError::NotFound(format!("thought {id}")))
    }

    /// Indexer-derived related thoughts for one thought.
    pub fn related_thoughts(&self, user: &str, id: &str) -> Result<Vec<Thought>> {
        let thought = self.find_thought(user, id)?;
        let mut related = Vec::with_capacity(thought.related_ids.len());
        for related_id in &thought.related_ids {
            match self.find_thought(user, related_id) {
                Ok(t) => related.push(t),
                Err(EngineError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(related)
    }

    /// Soft-delete a thought and remove its search document.
    pub fn delete_thought(&self, user: &str, id: &str) -> Result<()> {
        let thought = self.find_thought(user, id)?;
        let mut fields = serde_json::Map::new();
        fields.insert("deletedAt".into(), serde_json::json!(now_ms()));
        self.store.merge_body(
            &keys::user_pk(user),
            &keys::thought_sk(thought.created_at, &thought.id),
            &fields,
        )?;
        self.index.remove(id)?;
        self.bump_last_data_change(user);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Ask
    // ------------------------------------------------------------------

    /// Ad-hoc grounded answer. Never errors on empty retrieval.
    pub async fn ask(&self, user: &str, request: &AskRequest) -> Result<AskResponse> {
        if request.query.trim().is_empty() {
            return Err(EngineError::Validation("query must not be empty".into()));
        }
        let started = std::time::Instant::now();

        let mut query = RetrievalQuery::new(user, &request.query);
        query.tags = request.tags.clone();
        query.from_epoch = request
            .time_window
            .as_deref()
            .and_then(|w| crate::retrieval::parse_time_window(w, now_ms()));
        if let Some(limit) = request.limit {
            query.thought_limit = limit.clamp(1, MAX_LIST_LIMIT);
        }

        let retrieved = self.retrieval.retrieve(&query).await;
        let synthesized = self
            .synthesizer
            .synthesize(&request.query, &retrieved.thoughts, &[])
            .await;

        let conversation_hits = normalize_conversation_hits(&retrieved.conversations);

        Ok(AskResponse {
            answer: synthesized.answer,
            citations: synthesized.citations,
            conversation_hits,
            confidence: synthesized.confidence,
            processing_time: started.elapsed().as_millis() as u64,
        })
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    pub async fn create_conversation(
        &self,
        user: &str,
        title: Option<String>,
        initial_message: Option<String>,
    ) -> Result<(Conversation, Option<SendOutcome>)> {
        let result = self.conversations.create(user, title, initial_message).await?;
        self.bump_last_data_change(user);
        Ok(result)
    }

    pub fn list_conversations(
        &self,
        user: &str,
        status: Option<ConversationStatus>,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<ConversationList> {
        self.conversations
            .list(user, status, limit.clamp(1, MAX_LIST_LIMIT), cursor)
    }

    pub async fn get_conversation(
        &self,
        user: &str,
        id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<ConversationPage> {
        self.conversations
            .get(user, id, limit.clamp(1, MAX_LIST_LIMIT), cursor)
            .await
    }

    pub fn update_conversation(
        &self,
        user: &str,
        id: &str,
        title: Option<String>,
        status: Option<ConversationStatus>,
    ) -> Result<()> {
        self.conversations.update(user, id, title, status)?;
        self.bump_last_data_change(user);
        Ok(())
    }

    pub fn delete_conversation(&self, user: &str, id: &str) -> Result<()> {
        let removed = self.conversations.delete(user, id)?;
        if removed {
            if let Err(e) = self.index.remove(id) {
                tracing::warn!(id, error = %e, "search document removal failed on delete");
            }
            self.bump_last_data_change(user);
        }
        Ok(())
    }

    pub async fn send_message(
        &self,
        user: &str,
        conversation_id: &str,
        content: &str,
        options: SendOptions,
    ) -> Result<SendOutcome> {
        let outcome = self
            .conversations
            .send_message(user, conversation_id, content, options)
            .await?;
        self.bump_last_data_change(user);
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Graph / export / health
    // ------------------------------------------------------------------

    pub async fn theme_graph(
        &self,
        user: &str,
        month: Option<&str>,
        min_similarity: Option<f64>,
    ) -> Result<crate::model::ThemeGraph> {
        let mut builder = GraphBuilder::new(
            self.store.clone(),
            self.objects.clone(),
            self.index.clone(),
            self.chat.clone(),
        );
        if let Some(seed) = self.graph_seed {
            builder = builder.with_seed(seed);
        }
        builder.build(user, month, min_similarity).await
    }

    pub fn export(&self, user: &str, since: i64) -> Result<ExportBundle> {
        export::export(&self.store, &self.cipher, user, since)
    }

    pub fn health(&self) -> Health {
        Health {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            indexed_documents: self.index.count().unwrap_or(0),
        }
    }
}

/// Min-max normalize conversation hit scores, independent of citations.
fn normalize_conversation_hits(hits: &[crate::search::RankedHit]) -> Vec<ConversationHit> {
    if hits.is_empty() {
        return vec![];
    }
    let min = hits.iter().map(|h| h.final_score).fold(f64::MAX, f64::min);
    let max = hits.iter().map(|h| h.final_score).fold(f64::MIN, f64::max);
    let range = max - min;

    hits.iter()
        .map(|hit| {
            let normalized = if range > 1e-12 {
                (hit.final_score - min) / range
            } else {
                1.0
            };
            ConversationHit {
                id: hit.doc.id.clone(),
                title: hit.doc.title.clone().unwrap_or_default(),
                summary: hit.doc.summary.clone(),
                score: (normalized * 1000.0).round() / 1000.0,
                message_count: hit.doc.message_count.unwrap_or(0),
                updated_at: hit.doc.updated_at_epoch.unwrap_or(hit.doc.created_at_epoch),
            }
        })
        .collect()
}
