//! LLM-assisted enrichment with deterministic fallbacks
//!
//! Summaries and smart tags come from the chat model when it cooperates;
//! every path has a heuristic fallback so indexing never blocks on a
//! misbehaving backend. LLM output is demanded as strict JSON and code
//! fences are stripped before parsing.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::llm::{ChatModel, ChatRequest, LlmError};
use crate::model::{Category, Intent, ThoughtKind};

/// Texts below this length are summarized by truncation, not the LLM.
const SUMMARY_LLM_THRESHOLD: usize = 100;

/// Word cap for thought summaries.
const SUMMARY_MAX_WORDS: usize = 15;

// ============================================================================
// SUMMARY
// ============================================================================

/// First `max_words` words, single line.
pub fn truncate_summary(text: &str, max_words: usize) -> String {
    let mut words: Vec<&str> = text.split_whitespace().take(max_words + 1).collect();
    let truncated = words.len() > max_words;
    words.truncate(max_words);
    let mut out = words.join(" ");
    if truncated {
        out.push('…');
    }
    out
}

/// One-sentence summary (≤15 words). Short texts skip the LLM entirely.
pub async fn summarize(chat: &dyn ChatModel, text: &str) -> String {
    if text.chars().count() < SUMMARY_LLM_THRESHOLD {
        return truncate_summary(text, SUMMARY_MAX_WORDS);
    }

    let req = ChatRequest::new(
        "You summarize personal notes. Reply with one sentence of at most 15 words. \
         No preamble, no quotes.",
        text.chars().take(4000).collect::<String>(),
    )
    .with_budget(60, 0.2);

    match chat.complete(req).await {
        Ok(summary) => {
            let line = summary.lines().next().unwrap_or("").trim().to_string();
            if line.is_empty() {
                truncate_summary(text, SUMMARY_MAX_WORDS)
            } else {
                truncate_summary(&line, SUMMARY_MAX_WORDS)
            }
        }
        Err(e) => {
            tracing::debug!(error = %e, "summary fallback to truncation");
            truncate_summary(text, SUMMARY_MAX_WORDS)
        }
    }
}

// ============================================================================
// SMART TAGS
// ============================================================================

/// Indexer-derived enrichment bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct SmartTags {
    /// 3-5 lower-kebab-case tags
    pub tags: Vec<String>,
    pub category: Category,
    pub intent: Intent,
    /// Up to 3 named entities
    pub entities: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawSmartTags {
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    category: String,
    #[serde(default)]
    intent: String,
    #[serde(default)]
    entities: Vec<String>,
}

/// Strip surrounding markdown code fences from an LLM reply.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the fence line
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Normalize one tag to lower-kebab-case; `None` when nothing survives.
fn normalize_tag(tag: &str) -> Option<String> {
    let cleaned: String = tag
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() || c == '_' { '-' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    let cleaned = cleaned.trim_matches('-').to_string();
    if cleaned.is_empty() || cleaned == "none" || cleaned.len() > 50 {
        None
    } else {
        Some(cleaned)
    }
}

/// Derive smart tags via the LLM, falling back to heuristics on any failure.
pub async fn smart_tags(chat: &dyn ChatModel, text: &str, kind: ThoughtKind) -> SmartTags {
    match llm_smart_tags(chat, text).await {
        Ok(tags) => tags,
        Err(e) => {
            tracing::debug!(error = %e, "smart tags fallback to heuristics");
            heuristic_tags(text, kind)
        }
    }
}

async fn llm_smart_tags(chat: &dyn ChatModel, text: &str) -> Result<SmartTags, LlmError> {
    let system = "You classify personal notes. Reply with strict JSON only, no prose:\n\
        {\"tags\": [3-5 lower-kebab-case strings], \
        \"category\": one of [\"engineering\",\"design\",\"product\",\"personal\",\"learning\",\"decision\",\"other\"], \
        \"intent\": one of [\"note\",\"question\",\"decision\",\"todo\",\"idea\",\"bug-report\",\"feature-request\",\"rationale\"], \
        \"entities\": [at most 3 named entities]}";
    let req = ChatRequest::new(system, text.chars().take(4000).collect::<String>())
        .with_budget(200, 0.1);

    let reply = chat.complete(req).await?;
    let json = strip_code_fences(&reply);
    let raw: RawSmartTags =
        serde_json::from_str(json).map_err(|e| LlmError::Parse(e.to_string()))?;

    let mut tags: Vec<String> = raw.tags.iter().filter_map(|t| normalize_tag(t)).collect();
    tags.dedup();
    tags.truncate(5);
    if tags.is_empty() {
        return Err(LlmError::Parse("no usable tags".to_string()));
    }

    Ok(SmartTags {
        tags,
        category: Category::parse_name(&raw.category).unwrap_or_default(),
        intent: Intent::parse_name(&raw.intent).unwrap_or_default(),
        entities: raw
            .entities
            .into_iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .take(3)
            .collect(),
    })
}

// ============================================================================
// HEURISTIC FALLBACK
// ============================================================================

/// Stack-detection table: (tag, pattern).
const STACK_PATTERNS: &[(&str, &str)] = &[
    ("rust", r"(?i)\brust\b|\bcargo\b|\btokio\b"),
    ("python", r"(?i)\bpython\b|\bpip\b|\bdjango\b|\bflask\b"),
    ("javascript", r"(?i)\bjavascript\b|\bnode\.?js\b|\bnpm\b"),
    ("typescript", r"(?i)\btypescript\b|\btsconfig\b"),
    ("react", r"(?i)\breact\b|\bjsx\b"),
    ("docker", r"(?i)\bdocker\b|\bcontainer\b|dockerfile"),
    ("kubernetes", r"(?i)\bkubernetes\b|\bk8s\b|\bkubectl\b"),
    ("postgres", r"(?i)\bpostgres(?:ql)?\b|\bpsql\b"),
    ("sql", r"(?i)\bsql\b|\bselect\s+\*|\bjoin\b"),
    ("aws", r"(?i)\baws\b|\bs3\b|\blambda\b|\bdynamodb\b"),
    ("git", r"(?i)\bgit\b|\bmerge\b|\brebase\b|\bpull request\b"),
    ("api", r"(?i)\bapi\b|\bendpoint\b|\bhttp\b|\brest\b"),
];

fn stack_res() -> &'static [(String, Regex)] {
    static RES: OnceLock<Vec<(String, Regex)>> = OnceLock::new();
    RES.get_or_init(|| {
        STACK_PATTERNS
            .iter()
            .map(|(tag, p)| (tag.to_string(), Regex::new(p).unwrap()))
            .collect()
    })
}

/// Deterministic enrichment used when the LLM path fails.
pub fn heuristic_tags(text: &str, kind: ThoughtKind) -> SmartTags {
    let lower = text.to_lowercase();

    let mut tags: Vec<String> = stack_res()
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(tag, _)| tag.clone())
        .take(5)
        .collect();
    if tags.is_empty() {
        tags.push(kind.as_str().to_string());
    }

    let intent = if lower.contains("!todo") {
        Intent::Todo
    } else if text.trim_end().ends_with('?')
        || lower.starts_with("how ")
        || lower.starts_with("what ")
        || lower.starts_with("why ")
    {
        Intent::Question
    } else if lower.contains("!decision") || lower.contains("decided") || lower.contains("chose") {
        Intent::Decision
    } else if lower.contains("bug") || lower.contains("broken") || lower.contains("crash") {
        Intent::BugReport
    } else if lower.contains("feature") || lower.contains("add support") {
        Intent::FeatureRequest
    } else if lower.contains("!rationale") || lower.contains("because") {
        Intent::Rationale
    } else if lower.contains("idea") || lower.contains("what if") {
        Intent::Idea
    } else {
        Intent::Note
    };

    let category = if tags.iter().any(|t| t != "api" && stack_res().iter().any(|(s, _)| s == t)) {
        Category::Engineering
    } else if matches!(intent, Intent::Decision | Intent::Rationale) {
        Category::Decision
    } else if lower.contains("design") || lower.contains("ux") || lower.contains("layout") {
        Category::Design
    } else if lower.contains("learn") || lower.contains("til ") || lower.starts_with("til") {
        Category::Learning
    } else {
        Category::Other
    };

    SmartTags {
        tags,
        category,
        intent,
        entities: vec![],
    }
}

/// Merge user tags with smart tags: dedupe, drop the `"none"` sentinel.
pub fn unify_tags(user_tags: &[String], smart: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in user_tags.iter().chain(smart.iter()) {
        if tag == "none" {
            continue;
        }
        if !out.iter().any(|t| t == tag) {
            out.push(tag.clone());
        }
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================
