//! Retrieval engine
//!
//! Query preparation (inline tags, time hints, synonym expansion), one
//! query embedding, hybrid search, and score-fused reranking. A completely
//! failed search returns empty result lists, never an error - the
//! synthesizer downstream handles emptiness.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::capture::extract_inline_tags;
use crate::llm::Embedder;
use crate::now_ms;
use crate::search::{rerank, DocType, RankedHit, SearchFilter, SearchIndex};

/// Default sizes of the two interleaved result lists.
pub const DEFAULT_THOUGHT_LIMIT: usize = 25;
pub const DEFAULT_CONVERSATION_LIMIT: usize = 3;

/// Cached query embeddings.
const QUERY_CACHE_SIZE: usize = 100;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

// ============================================================================
// QUERY TYPES
// ============================================================================

/// A retrieval request. `user` is mandatory; everything else narrows.
#[derive(Debug, Clone)]
pub struct RetrievalQuery {
    pub user: String,
    pub query: String,
    /// AND across the document tag set
    pub tags: Vec<String>,
    /// Inclusive lower bound, epoch ms (already resolved from "90d" etc.)
    pub from_epoch: Option<i64>,
    pub thought_limit: usize,
    pub conversation_limit: usize,
}

impl RetrievalQuery {
    pub fn new(user: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            query: query.into(),
            tags: vec![],
            from_epoch: None,
            thought_limit: DEFAULT_THOUGHT_LIMIT,
            conversation_limit: DEFAULT_CONVERSATION_LIMIT,
        }
    }
}

/// The two interleaved result lists plus query diagnostics.
#[derive(Debug, Default)]
pub struct RetrievalOutput {
    pub thoughts: Vec<RankedHit>,
    pub conversations: Vec<RankedHit>,
    /// Human time phrase detected in the query, if any
    pub time_hint: Option<String>,
}

// ============================================================================
// QUERY PREPARATION
// ============================================================================

/// Parse a human time window like `"90d"`, `"12w"`, `"6m"`, `"1y"` into a
/// from-epoch relative to `now_ms`.
pub fn parse_time_window(window: &str, now: i64) -> Option<i64> {
    let window = window.trim().to_lowercase();
    let (digits, unit) = window.split_at(window.len().checked_sub(1)?);
    let n: i64 = digits.parse().ok()?;
    if n <= 0 {
        return None;
    }
    let days = match unit {
        "d" => n,
        "w" => n * 7,
        "m" => n * 30,
        "y" => n * 365,
        _ => return None,
    };
    Some(now - days * DAY_MS)
}

/// Detect a human time phrase. Returns the phrase and its from-epoch.
pub fn detect_time_hint(query: &str, now: i64) -> Option<(String, i64)> {
    let lower = query.to_lowercase();
    for (phrase, days) in [
        ("yesterday", 2),
        ("today", 1),
        ("this week", 7),
        ("last week", 14),
        ("last month", 30),
    ] {
        if lower.contains(phrase) {
            return Some((phrase.to_string(), now - days as i64 * DAY_MS));
        }
    }
    None
}

/// Fixed synonym expansion table.
const SYNONYMS: &[(&str, &[&str])] = &[
    ("why", &["reason", "rationale", "because", "decision", "chose"]),
    ("bug", &["error", "issue", "problem", "broken", "fix"]),
    ("how", &["method", "way", "approach", "implement"]),
    ("fix", &["solve", "repair", "resolve", "patch"]),
    ("fast", &["quick", "performance", "speed", "optimize"]),
    ("auth", &["authentication", "login", "oauth", "token"]),
];

/// Append synonyms of query words to the lexical query; the original query
/// text is retained verbatim at the front.
pub fn expand_query(query: &str) -> String {
    let lower = query.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    let mut expanded = query.to_string();
    for (word, synonyms) in SYNONYMS {
        if words.iter().any(|w| w.trim_matches(|c: char| !c.is_alphanumeric()) == *word) {
            for syn in *synonyms {
                expanded.push(' ');
                expanded.push_str(syn);
            }
        }
    }
    expanded
}

// ============================================================================
// ENGINE
// ============================================================================

/// Hybrid retrieval over the search index.
pub struct RetrievalEngine {
    index: Arc<SearchIndex>,
    embedder: Arc<dyn Embedder>,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl RetrievalEngine {
    pub fn new(index: Arc<SearchIndex>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            index,
            embedder,
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_SIZE).expect("cache size is non-zero"),
            )),
        }
    }

    /// Embed a query, serving repeats from the LRU cache.
    async fn query_embedding(&self, query: &str) -> Option<Vec<f32>> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(hit) = cache.get(query) {
                return Some(hit.clone());
            }
        }
        match self.embedder.embed(query).await {
            Ok(vector) => {
                if let Ok(mut cache) = self.query_cache.lock() {
                    cache.put(query.to_string(), vector.clone());
                }
                Some(vector)
            }
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed, lexical-only retrieval");
                None
            }
        }
    }

    /// Run a retrieval. Never errors: a failed search yields empty lists.
    pub async fn retrieve(&self, request: &RetrievalQuery) -> RetrievalOutput {
        let now = now_ms();

        // Inline #tags in the query tighten the tag filter
        let mut tags = request.tags.clone();
        for tag in extract_inline_tags(&request.query) {
            if !tags.iter().any(|t| *t == tag) {
                tags.push(tag);
            }
        }

        // Time hints apply only when the caller did not pass a window
        let hint = detect_time_hint(&request.query, now);
        let from_epoch = match (request.from_epoch, &hint) {
            (Some(from), _) => Some(from),
            (None, Some((_, from))) => Some(*from),
            (None, None) => None,
        };

        let expanded = expand_query(&request.query);
        let embedding = self.query_embedding(&request.query).await;

        let filter = SearchFilter {
            user: request.user.clone(),
            tags,
            from_epoch,
            doc_types: None,
        };

        let candidates = match self.index.hybrid(&expanded, embedding.as_deref(), &filter) {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::error!(error = %e, "hybrid search failed, returning empty results");
                return RetrievalOutput {
                    time_hint: hint.map(|(phrase, _)| phrase),
                    ..RetrievalOutput::default()
                };
            }
        };

        let ranked = rerank(candidates, now);
        let mut thoughts = Vec::new();
        let mut conversations = Vec::new();
        for hit in ranked {
            match hit.doc.doc_type {
                DocType::Thought if thoughts.len() < request.thought_limit => {
                    thoughts.push(hit)
                }
                DocType::Conversation if conversations.len() < request.conversation_limit => {
                    conversations.push(hit)
                }
                _ => {}
            }
        }

        RetrievalOutput {
            thoughts,
            conversations,
            time_hint: hint.map(|(phrase, _)| phrase),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_window() {
        let now = 1_000 * DAY_MS;
        assert_eq!(parse_time_window("90d", now), Some(now - 90 * DAY_MS));
        assert_eq!(parse_time_window("2w", now), Some(now - 14 * DAY_MS));
        assert_eq!(parse_time_window("6m", now), Some(now - 180 * DAY_MS));
        assert_eq!(parse_time_window("1y", now), Some(now - 365 * DAY_MS));
        assert_eq!(parse_time_window("0d", now), None);
        assert_eq!(parse_time_window("soon", now), None);
        assert_eq!(parse_time_window("", now), None);
    }

    #[test]
    fn test_detect_time_hint() {
        let now = 100 * DAY_MS;
        let (phrase, from) = detect_time_hint("what did I note yesterday", now).unwrap();
        assert_eq!(phrase, "yesterday");
        assert_eq!(from, now - 2 * DAY_MS);

        assert!(detect_time_hint("postgres tuning", now).is_none());
    }

    #[test]
    fn test_expand_query_appends_synonyms() {
        let expanded = expand_query("why postgres");
        assert!(expanded.starts_with("why postgres"));
        assert!(expanded.contains("rationale"));
        assert!(expanded.contains("chose"));

        // No match, no growth
        assert_eq!(expand_query("postgres tuning"), "postgres tuning");

        // Substrings do not trigger ("whys" is not "why")
        assert_eq!(expand_query("whys and wherefores"), "whys and wherefores");
    }

    #[test]
    fn test_expand_query_strips_punctuation_for_match() {
        let expanded = expand_query("why?");
        assert!(expanded.contains("rationale"));
    }
}
