//! Theme graph builder
//!
//! Groups a user's thoughts into 3-8 labeled themes, lays them out in 2-D,
//! and serves the result from a blob cache invalidated by age or by the
//! user's `lastDataChange` marker. Clustering randomness and parallel
//! labeling make rebuilds non-deterministic between cache misses; the
//! cache provides read stability.

mod kmeans;
mod layout;

pub use kmeans::{kmeans_cosine, theme_count};
pub use layout::{build_edges, cluster_center, spiral_position, MAX_DEGREE};

use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{EngineError, Result};
use crate::llm::{ChatModel, ChatRequest};
use crate::model::{GraphMeta, GraphNode, Theme, ThemeGraph};
use crate::now_ms;
use crate::search::{SearchDoc, SearchIndex, RECENCY_HORIZON_MS};
use crate::store::{keys, FsObjectStore, MetadataStore};

/// Cache lifetime.
const CACHE_TTL_MS: i64 = 60 * 60 * 1000;

/// Thoughts fetched per build.
const FETCH_LIMIT: usize = 1000;

/// Default edge similarity threshold.
pub const DEFAULT_MIN_SIMILARITY: f64 = 0.7;

/// Fixed theme palette, cycled.
const PALETTE: [&str; 8] = [
    "#4e79a7", "#f28e2b", "#e15759", "#76b7b2", "#59a14f", "#edc948", "#b07aa1", "#ff9da7",
];

/// Algorithm tag stamped into graph metadata.
const ALGORITHM: &str = "kmeans-cosine-v2";

// ============================================================================
// BUILDER
// ============================================================================

/// Cached theme graph construction.
pub struct GraphBuilder {
    store: Arc<MetadataStore>,
    objects: Arc<FsObjectStore>,
    index: Arc<SearchIndex>,
    chat: Arc<dyn ChatModel>,
    /// Fixed seed for tests; entropy-seeded when absent.
    seed: Option<u64>,
}

impl GraphBuilder {
    pub fn new(
        store: Arc<MetadataStore>,
        objects: Arc<FsObjectStore>,
        index: Arc<SearchIndex>,
        chat: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            store,
            objects,
            index,
            chat,
            seed: None,
        }
    }

    /// Inject a deterministic clustering seed (tests).
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Cache key: `graph/{user}/{month|'all'}-v2.json`.
    fn cache_key(user: &str, month: Option<&str>) -> String {
        format!("graph/{user}/{}-v2.json", month.unwrap_or("all"))
    }

    /// Build (or serve from cache) the theme graph for `user`.
    pub async fn build(
        &self,
        user: &str,
        month: Option<&str>,
        min_similarity: Option<f64>,
    ) -> Result<ThemeGraph> {
        let min_similarity = min_similarity.unwrap_or(DEFAULT_MIN_SIMILARITY);
        if !(0.0..=1.0).contains(&min_similarity) {
            return Err(EngineError::Validation(
                "minSimilarity must be in [0, 1]".into(),
            ));
        }
        let window = match month {
            Some(m) => Some(month_window(m)?),
            None => None,
        };

        let key = Self::cache_key(user, month);
        let now = now_ms();
        if let Some(cached) = self.read_cache(&key, user, now)? {
            tracing::debug!(user, key, "graph cache hit");
            return Ok(cached);
        }

        let (docs, degraded_reason) = self.fetch_thoughts(user, window)?;
        let graph = self.build_graph(docs, min_similarity, degraded_reason, now).await;

        match serde_json::to_vec(&graph) {
            Ok(bytes) => {
                if let Err(e) = self.objects.put(&key, &bytes) {
                    tracing::warn!(key, error = %e, "graph cache write failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "graph serialization for cache failed"),
        }

        Ok(graph)
    }

    /// A cached graph is valid if it is younger than one hour and newer
    /// than the user's last data change.
    fn read_cache(&self, key: &str, user: &str, now: i64) -> Result<Option<ThemeGraph>> {
        let Some(bytes) = self.objects.get(key)? else {
            return Ok(None);
        };
        let Ok(graph) = serde_json::from_slice::<ThemeGraph>(&bytes) else {
            // Unreadable cache entry is a miss
            return Ok(None);
        };

        if now - graph.metadata.generated_at >= CACHE_TTL_MS {
            return Ok(None);
        }
        let last_change = self.last_data_change(user)?;
        if graph.metadata.generated_at <= last_change {
            return Ok(None);
        }
        Ok(Some(graph))
    }

    fn last_data_change(&self, user: &str) -> Result<i64> {
        let record = self.store.get(&keys::user_pk(user), keys::META_SK)?;
        Ok(record
            .and_then(|r| r.body.get("lastDataChange").and_then(|v| v.as_i64()))
            .unwrap_or(0))
    }

    /// Fetch thoughts with embeddings; fall back to metadata rows with
    /// synthesized random embeddings when the search index is unreachable.
    fn fetch_thoughts(
        &self,
        user: &str,
        window: Option<(i64, i64)>,
    ) -> Result<(Vec<SearchDoc>, Option<String>)> {
        let (from, to) = match window {
            Some((from, to)) => (Some(from), Some(to)),
            None => (None, None),
        };

        match self.index.thoughts_with_embeddings(user, from, to, FETCH_LIMIT) {
            Ok(docs) => Ok((docs, None)),
            Err(e) => {
                tracing::warn!(error = %e, "search index unreachable, degraded graph build");
                let docs = self.fetch_from_metadata(user, from, to)?;
                Ok((
                    docs,
                    Some("search index unreachable; embeddings synthesized".to_string()),
                ))
            }
        }
    }

    fn fetch_from_metadata(
        &self,
        user: &str,
        from: Option<i64>,
        to: Option<i64>,
    ) -> Result<Vec<SearchDoc>> {
        let page = self.store.query_prefix(
            &keys::user_pk(user),
            keys::THOUGHT_SK_PREFIX,
            true,
            FETCH_LIMIT,
            None,
        )?;

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut docs = Vec::new();
        for record in &page.records {
            let thought: crate::model::Thought = match record.parse() {
                Ok(t) => t,
                Err(_) => continue,
            };
            if thought.is_deleted() {
                continue;
            }
            if from.is_some_and(|f| thought.created_at < f)
                || to.is_some_and(|t| thought.created_at > t)
            {
                continue;
            }
            // Random unit vector: topology renders, themes are noise
            let mut embedding: Vec<f32> =
                (0..crate::llm::EMBEDDING_DIMENSIONS).map(|_| rng.gen::<f32>() - 0.5).collect();
            let norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
            embedding.iter_mut().for_each(|x| *x /= norm);

            docs.push(SearchDoc {
                id: thought.id.clone(),
                user: user.to_string(),
                doc_type: crate::search::DocType::Thought,
                text: thought.text.clone(),
                summary: thought.summary.clone().unwrap_or_default(),
                tags: thought.tags.clone(),
                kind: Some(thought.kind.as_str().to_string()),
                category: None,
                intent: None,
                entities: vec![],
                created_at_epoch: thought.created_at,
                decision_score: thought.decision_score,
                embedding,
                context: None,
                title: None,
                message_count: None,
                cited_thought_ids: vec![],
                updated_at_epoch: None,
            });
        }
        Ok(docs)
    }

    async fn build_graph(
        &self,
        docs: Vec<SearchDoc>,
        min_similarity: f64,
        degraded_reason: Option<String>,
        now: i64,
    ) -> ThemeGraph {
        let n = docs.len();
        if n == 0 {
            return ThemeGraph {
                themes: vec![],
                nodes: vec![],
                edges: vec![],
                metadata: GraphMeta {
                    thought_count: 0,
                    theme_count: 0,
                    edge_count: 0,
                    generated_at: now,
                    algorithm: ALGORITHM.to_string(),
                    degraded: degraded_reason.is_some(),
                    degraded_reason,
                },
            };
        }

        let k = theme_count(n).min(n);
        let vectors: Vec<Vec<f32>> = docs.iter().map(|d| d.embedding.clone()).collect();
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let assignments = kmeans_cosine(&vectors, k, &mut rng);
        let cluster_count = if n <= k { n } else { k };

        // Labels, one LLM call per cluster, in parallel
        let labels = join_all((0..cluster_count).map(|cluster| {
            let members: Vec<&SearchDoc> = docs
                .iter()
                .zip(assignments.iter())
                .filter(|(_, &a)| a == cluster)
                .map(|(d, _)| d)
                .collect();
            self.label_cluster(members)
        }))
        .await;

        let mut themes = Vec::with_capacity(cluster_count);
        for (cluster, (label, description)) in labels.into_iter().enumerate() {
            let members: Vec<&SearchDoc> = docs
                .iter()
                .zip(assignments.iter())
                .filter(|(_, &a)| a == cluster)
                .map(|(d, _)| d)
                .collect();
            themes.push(Theme {
                id: format!("theme_{cluster}"),
                label,
                description,
                color: PALETTE[cluster % PALETTE.len()].to_string(),
                count: members.len(),
                sample_thoughts: members
                    .iter()
                    .take(3)
                    .map(|d| preview(&d.text, 60))
                    .collect(),
            });
        }

        // Layout: cluster centers on a circle, members on spirals
        let mut nodes = Vec::with_capacity(n);
        let mut member_index = vec![0usize; cluster_count];
        let cluster_sizes: Vec<usize> = (0..cluster_count)
            .map(|c| assignments.iter().filter(|&&a| a == c).count())
            .collect();
        for (doc, &cluster) in docs.iter().zip(assignments.iter()) {
            let center = cluster_center(cluster, cluster_count);
            let i = member_index[cluster];
            member_index[cluster] += 1;
            let (x, y) = spiral_position(center, i, cluster_sizes[cluster]);

            let age = (now - doc.created_at_epoch).max(0) as f64;
            nodes.push(GraphNode {
                id: doc.id.clone(),
                label: preview(&doc.text, 60),
                theme_id: format!("theme_{cluster}"),
                x,
                y,
                tags: doc.tags.clone(),
                recency: (1.0 - age / RECENCY_HORIZON_MS as f64).clamp(0.0, 1.0),
                importance: doc.decision_score,
                kind: doc.kind.clone().unwrap_or_else(|| "note".to_string()),
            });
        }

        let edges = build_edges(&docs, min_similarity);

        ThemeGraph {
            metadata: GraphMeta {
                thought_count: n,
                theme_count: themes.len(),
                edge_count: edges.len(),
                generated_at: now,
                algorithm: ALGORITHM.to_string(),
                degraded: degraded_reason.is_some(),
                degraded_reason,
            },
            themes,
            nodes,
            edges,
        }
    }

    /// Strict-JSON label request with the fixed fallback.
    async fn label_cluster(&self, members: Vec<&SearchDoc>) -> (String, String) {
        const FALLBACK: (&str, &str) = ("Miscellaneous", "Various related thoughts");

        let samples: Vec<String> = members
            .iter()
            .take(10)
            .map(|d| format!("- {}", preview(&d.text, 200)))
            .collect();
        if samples.is_empty() {
            return (FALLBACK.0.to_string(), FALLBACK.1.to_string());
        }

        let req = ChatRequest::new(
            "You name a cluster of personal notes. Reply with strict JSON only: \
             {\"label\": \"2-4 words\", \"description\": \"one sentence\"}",
            samples.join("\n"),
        )
        .with_budget(100, 0.2);

        match self.chat.complete(req).await {
            Ok(reply) => {
                let json = crate::indexer::enrich::strip_code_fences(&reply);
                #[derive(serde::Deserialize)]
                struct Label {
                    label: String,
                    description: String,
                }
                match serde_json::from_str::<Label>(json) {
                    Ok(parsed) if !parsed.label.trim().is_empty() => {
                        (parsed.label.trim().to_string(), parsed.description.trim().to_string())
                    }
                    _ => (FALLBACK.0.to_string(), FALLBACK.1.to_string()),
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "cluster labeling fell back");
                (FALLBACK.0.to_string(), FALLBACK.1.to_string())
            }
        }
    }
}

/// First `max` chars, single line.
fn preview(text: &str, max: usize) -> String {
    text.lines()
        .next()
        .unwrap_or("")
        .chars()
        .take(max)
        .collect()
}

/// `YYYY-MM` to an inclusive epoch-ms window.
fn month_window(month: &str) -> Result<(i64, i64)> {
    let parts: Vec<&str> = month.split('-').collect();
    let (year, month_num) = match parts.as_slice() {
        [y, m] => (
            y.parse::<i32>()
                .map_err(|_| EngineError::Validation(format!("invalid month: {month}")))?,
            m.parse::<u32>()
                .map_err(|_| EngineError::Validation(format!("invalid month: {month}")))?,
        ),
        _ => return Err(EngineError::Validation(format!("invalid month: {month}"))),
    };

    let start = NaiveDate::from_ymd_opt(year, month_num, 1)
        .ok_or_else(|| EngineError::Validation(format!("invalid month: {month}")))?;
    let next = if month_num == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month_num + 1, 1)
    }
    .ok_or_else(|| EngineError::Validation(format!("invalid month: {month}")))?;

    let to_ms = |d: NaiveDate| {
        d.and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis())
            .unwrap_or(0)
    };
    Ok((to_ms(start), to_ms(next) - 1))
}

// ============================================================================
// TESTS
// ============================================================================
