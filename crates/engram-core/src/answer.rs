//! Answer synthesizer
//!
//! Builds numbered snippets from the top retrieval hits, asks the chat
//! model for a short grounded answer, and maps every `[i]` reference back
//! to a citation. Abstains when the context cannot answer; degrades to an
//! extractive answer when the model fails but context exists.

use std::sync::OnceLock;

use chrono::{TimeZone, Utc};
use regex::Regex;

use crate::llm::{ChatModel, ChatRequest};
use crate::model::Citation;
use crate::search::RankedHit;

/// Context entries fed to the model.
pub const MAX_CONTEXT_SNIPPETS: usize = 6;

/// Citations require at least this final score.
const CITATION_SCORE_FLOOR: f64 = 0.3;

/// Confidence is capped here even with perfect citations.
const CONFIDENCE_CAP: f64 = 0.95;

/// Fixed abstention sentence for empty context.
pub const ABSTENTION_ANSWER: &str =
    "I couldn't find anything in your captured thoughts that answers this.";

// ============================================================================
// OUTPUT
// ============================================================================

/// A synthesized, cited answer.
#[derive(Debug, Clone)]
pub struct SynthesizedAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
    /// 0.0 - 1.0
    pub confidence: f64,
    /// Ids of the context entries, best-first (persisted on assistant
    /// messages as `searchedThoughtIds`)
    pub searched_thought_ids: Vec<String>,
}

// ============================================================================
// SYNTHESIZER
// ============================================================================

/// Grounded answer synthesis over retrieval context.
pub struct Synthesizer {
    chat: std::sync::Arc<dyn ChatModel>,
}

impl Synthesizer {
    pub fn new(chat: std::sync::Arc<dyn ChatModel>) -> Self {
        Self { chat }
    }

    /// Produce an answer for `query` over up to six thought hits, with
    /// optional prior conversation turns for conversational use.
    pub async fn synthesize(
        &self,
        query: &str,
        context: &[RankedHit],
        history: &[(String, String)],
    ) -> SynthesizedAnswer {
        let context = &context[..context.len().min(MAX_CONTEXT_SNIPPETS)];
        let searched_thought_ids: Vec<String> =
            context.iter().map(|hit| hit.doc.id.clone()).collect();

        if context.is_empty() {
            return SynthesizedAnswer {
                answer: ABSTENTION_ANSWER.to_string(),
                citations: vec![],
                confidence: 0.1,
                searched_thought_ids,
            };
        }

        let prompt = build_prompt(query, context, history);
        match self.chat.complete(prompt).await {
            Ok(text) => {
                let citations = extract_citations(&text, context);
                let confidence = confidence_for(&citations);
                let citations = normalize_scores(citations);
                SynthesizedAnswer {
                    answer: text.trim().to_string(),
                    citations,
                    confidence,
                    searched_thought_ids,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "synthesis failed, extractive fallback");
                extractive_fallback(context, searched_thought_ids)
            }
        }
    }
}

// ============================================================================
// PROMPT
// ============================================================================

/// `[i] {YYYY-MM-DD} - {summary|text[:150]}` snippet lines.
pub fn build_snippets(context: &[RankedHit]) -> String {
    context
        .iter()
        .enumerate()
        .map(|(i, hit)| {
            let date = Utc
                .timestamp_millis_opt(hit.doc.created_at_epoch)
                .single()
                .map(|t| t.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let body = if hit.doc.summary.is_empty() {
                truncate_chars(&hit.doc.text, 150)
            } else {
                hit.doc.summary.clone()
            };
            format!("[{}] {date} - {body}", i + 1)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_prompt(query: &str, context: &[RankedHit], history: &[(String, String)]) -> ChatRequest {
    let mut system = String::from(
        "You answer questions using ONLY the numbered notes provided. \
         Cite notes with their number like [1]. If the notes do not answer \
         the question, say so plainly. Keep the answer to 2-3 sentences.",
    );
    if !history.is_empty() {
        system.push_str("\n\nConversation so far:\n");
        for (role, content) in history {
            system.push_str(&format!("{role}: {content}\n"));
        }
    }

    let user = format!("Notes:\n{}\n\nQuestion: {query}", build_snippets(context));
    ChatRequest::new(system, user).with_budget(300, 0.3)
}

// ============================================================================
// CITATIONS
// ============================================================================

fn citation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d+)\]").unwrap())
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn citation_for(hit: &RankedHit) -> Citation {
    let preview = if hit.doc.summary.is_empty() {
        truncate_chars(&hit.doc.text, 200)
    } else {
        hit.doc.summary.clone()
    };
    Citation {
        id: hit.doc.id.clone(),
        created_at: hit.doc.created_at_epoch,
        preview,
        score: hit.final_score,
        kind: hit.doc.kind.clone().unwrap_or_else(|| "note".to_string()),
        tags: hit.doc.tags.clone(),
    }
}

/// Map `[i]` references in the answer back to context entries, deduped,
/// keeping only entries above the score floor.
pub fn extract_citations(answer: &str, context: &[RankedHit]) -> Vec<Citation> {
    let mut seen = Vec::new();
    let mut citations = Vec::new();
    for capture in citation_re().captures_iter(answer) {
        let Ok(number) = capture[1].parse::<usize>() else {
            continue;
        };
        if number == 0 || number > context.len() || seen.contains(&number) {
            continue;
        }
        seen.push(number);
        let hit = &context[number - 1];
        if hit.final_score >= CITATION_SCORE_FLOOR {
            citations.push(citation_for(hit));
        }
    }
    citations
}

/// Mean citation score capped at 0.95; 0.3 with no citations.
fn confidence_for(citations: &[Citation]) -> f64 {
    if citations.is_empty() {
        return 0.3;
    }
    let mean = citations.iter().map(|c| c.score).sum::<f64>() / citations.len() as f64;
    mean.min(CONFIDENCE_CAP)
}

/// Min-max normalize citation scores to [0, 1], rounded to 3 decimals.
/// With a single citation (or equal scores) the maximum maps to 1.0.
pub fn normalize_scores(mut citations: Vec<Citation>) -> Vec<Citation> {
    if citations.is_empty() {
        return citations;
    }
    let min = citations.iter().map(|c| c.score).fold(f64::MAX, f64::min);
    let max = citations.iter().map(|c| c.score).fold(f64::MIN, f64::max);
    let range = max - min;
    for citation in &mut citations {
        let normalized = if range > 1e-12 {
            (citation.score - min) / range
        } else {
            1.0
        };
        citation.score = (normalized * 1000.0).round() / 1000.0;
    }
    citations
}

fn extractive_fallback(
    context: &[RankedHit],
    searched_thought_ids: Vec<String>,
) -> SynthesizedAnswer {
    let top = &context[0];
    let quote = if top.doc.summary.is_empty() {
        truncate_chars(&top.doc.text, 200)
    } else {
        top.doc.summary.clone()
    };
    let citations = normalize_scores(vec![citation_for(top)]);
    SynthesizedAnswer {
        answer: format!("From your notes: \"{quote}\" [1]"),
        citations,
        confidence: 0.5,
        searched_thought_ids,
    }
}

// ============================================================================
// TESTS
// ============================================================================
