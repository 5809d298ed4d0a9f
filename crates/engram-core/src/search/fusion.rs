//! Score fusion and reranking
//!
//! Lexical and semantic result lists are merged with a normalized weighted
//! sum, then reranked with recency and the capture-time decision score:
//!
//! ```text
//! final = 0.40·search + 0.15·recency + 0.05·decision
//! ```
//!
//! `recency` decays linearly from 1.0 at "now" to 0.0 at the one-year
//! horizon. Ties break newest-first, then by id.

use std::collections::HashMap;

use super::SearchDoc;

/// Recency horizon: one year in milliseconds.
pub const RECENCY_HORIZON_MS: i64 = 365 * 24 * 60 * 60 * 1000;

const WEIGHT_SEARCH: f64 = 0.40;
const WEIGHT_RECENCY: f64 = 0.15;
const WEIGHT_DECISION: f64 = 0.05;

/// A reranked search hit.
#[derive(Debug, Clone)]
pub struct RankedHit {
    pub doc: SearchDoc,
    /// Fused lexical+semantic score, normalized to [0, 1]
    pub search_score: f64,
    /// Linear recency, [0, 1]
    pub recency: f64,
    /// Final rerank score
    pub final_score: f64,
}

/// Weighted sum of max-normalized score lists.
///
/// Each list is normalized by its own maximum before weighting, so a
/// document present in both lists accumulates both contributions.
pub fn linear_combination(
    keyword_results: &[(String, f32)],
    semantic_results: &[(String, f32)],
    keyword_weight: f32,
    semantic_weight: f32,
) -> Vec<(String, f32)> {
    let mut scores: HashMap<String, f32> = HashMap::new();

    let max_keyword = keyword_results
        .iter()
        .map(|(_, s)| *s)
        .fold(f32::MIN, f32::max)
        .max(0.001);
    for (key, score) in keyword_results {
        *scores.entry(key.clone()).or_default() += (score / max_keyword) * keyword_weight;
    }

    let max_semantic = semantic_results
        .iter()
        .map(|(_, s)| *s)
        .fold(f32::MIN, f32::max)
        .max(0.001);
    for (key, score) in semantic_results {
        *scores.entry(key.clone()).or_default() += (score / max_semantic) * semantic_weight;
    }

    let mut results: Vec<(String, f32)> = scores.into_iter().collect();
    results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    results
}

/// Linear recency in [0, 1]: 1.0 at `now_ms`, 0.0 at the horizon.
pub fn recency_score(created_at_ms: i64, now_ms: i64) -> f64 {
    let age = (now_ms - created_at_ms).max(0) as f64;
    (1.0 - age / RECENCY_HORIZON_MS as f64).clamp(0.0, 1.0)
}

/// Apply the rerank formula over fused candidates and sort.
pub fn rerank(candidates: Vec<(SearchDoc, f64)>, now_ms: i64) -> Vec<RankedHit> {
    // Normalize the fused search scores to [0, 1] across this candidate set.
    let max_search = candidates
        .iter()
        .map(|(_, s)| *s)
        .fold(f64::MIN, f64::max)
        .max(1e-9);

    let mut hits: Vec<RankedHit> = candidates
        .into_iter()
        .map(|(doc, fused)| {
            let search_score = (fused / max_search).clamp(0.0, 1.0);
            let recency = recency_score(doc.created_at_epoch, now_ms);
            let final_score = WEIGHT_SEARCH * search_score
                + WEIGHT_RECENCY * recency
                + WEIGHT_DECISION * doc.decision_score.clamp(0.0, 1.0);
            RankedHit {
                doc,
                search_score,
                recency,
                final_score,
            }
        })
        .collect();

    hits.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.doc.created_at_epoch.cmp(&a.doc.created_at_epoch))
            .then_with(|| a.doc.id.cmp(&b.doc.id))
    });
    hits
}

/// Cosine similarity between two vectors.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot_product = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator > 0.0 {
        dot_product / denominator
    } else {
        0.0
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::DocType;

    fn doc(id: &str, created: i64, decision: f64) -> SearchDoc {
        SearchDoc {
            id: id.into(),
            user: "u1".into(),
            doc_type: DocType::Thought,
            text: "text".into(),
            summary: String::new(),
            tags: vec![],
            kind: None,
            category: None,
            intent: None,
            entities: vec![],
            created_at_epoch: created,
            decision_score: decision,
            embedding: vec![],
            context: None,
            title: None,
            message_count: None,
            cited_thought_ids: vec![],
            updated_at_epoch: None,
        }
    }

    #[test]
    fn test_linear_combination_rewards_presence_in_both() {
        let keyword = vec![("a".to_string(), 1.0), ("b".to_string(), 0.5)];
        let semantic = vec![("b".to_string(), 1.0), ("c".to_string(), 0.5)];

        let fused = linear_combination(&keyword, &semantic, 0.3, 0.7);
        assert_eq!(fused[0].0, "b");
    }

    #[test]
    fn test_recency_bounds() {
        let now = RECENCY_HORIZON_MS * 2;
        assert!((recency_score(now, now) - 1.0).abs() < 1e-9);
        assert!(recency_score(now - RECENCY_HORIZON_MS, now).abs() < 1e-9);
        assert!(recency_score(0, now).abs() < 1e-9); // past horizon clamps
        assert!((recency_score(now + 1000, now) - 1.0).abs() < 1e-9); // future clamps
    }

    #[test]
    fn test_rerank_weights_and_tiebreak() {
        let now = RECENCY_HORIZON_MS;
        // Same fused score: newer wins on recency, then decision bumps
        let candidates = vec![
            (doc("t_old", 0, 0.0), 1.0),
            (doc("t_new", now, 0.0), 1.0),
        ];
        let hits = rerank(candidates, now);
        assert_eq!(hits[0].doc.id, "t_new");
        assert!(hits[0].final_score > hits[1].final_score);

        // Exact tie on score: newest first, then id
        let candidates = vec![
            (doc("t_b", 100, 0.0), 1.0),
            (doc("t_a", 100, 0.0), 1.0),
        ];
        let hits = rerank(candidates, 100);
        assert_eq!(hits[0].doc.id, "t_a");
    }

    #[test]
    fn test_rerank_normalizes_search_scores() {
        let hits = rerank(vec![(doc("t_1", 0, 0.0), 12.5)], 0);
        assert!((hits[0].search_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }
}
