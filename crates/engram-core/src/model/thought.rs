//! Thought - the captured user artifact
//!
//! Immutable-by-default: the capture path writes the base fields, the
//! indexer alone writes the derived enrichments, and soft deletion is the
//! only mutation afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on user + inline tags per thought.
pub const MAX_TAGS: usize = 20;

/// Upper bound on thought body length in characters.
pub const MAX_TEXT_LEN: usize = 50_000;

// ============================================================================
// CLOSED ENUMS
// ============================================================================

/// Kind of a captured thought
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThoughtKind {
    #[default]
    Note,
    Code,
    Link,
    Todo,
    Decision,
    Rationale,
}

impl ThoughtKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThoughtKind::Note => "note",
            ThoughtKind::Code => "code",
            ThoughtKind::Link => "link",
            ThoughtKind::Todo => "todo",
            ThoughtKind::Decision => "decision",
            ThoughtKind::Rationale => "rationale",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "note" => Some(ThoughtKind::Note),
            "code" => Some(ThoughtKind::Code),
            "link" => Some(ThoughtKind::Link),
            "todo" => Some(ThoughtKind::Todo),
            "decision" => Some(ThoughtKind::Decision),
            "rationale" => Some(ThoughtKind::Rationale),
            _ => None,
        }
    }
}

impl std::fmt::Display for ThoughtKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Indexer-assigned category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Engineering,
    Design,
    Product,
    Personal,
    Learning,
    Decision,
    #[default]
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Engineering => "engineering",
            Category::Design => "design",
            Category::Product => "product",
            Category::Personal => "personal",
            Category::Learning => "learning",
            Category::Decision => "decision",
            Category::Other => "other",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "engineering" => Some(Category::Engineering),
            "design" => Some(Category::Design),
            "product" => Some(Category::Product),
            "personal" => Some(Category::Personal),
            "learning" => Some(Category::Learning),
            "decision" => Some(Category::Decision),
            "other" => Some(Category::Other),
            _ => None,
        }
    }
}

/// Indexer-assigned intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Intent {
    #[default]
    Note,
    Question,
    Decision,
    Todo,
    Idea,
    BugReport,
    FeatureRequest,
    Rationale,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Note => "note",
            Intent::Question => "question",
            Intent::Decision => "decision",
            Intent::Todo => "todo",
            Intent::Idea => "idea",
            Intent::BugReport => "bug-report",
            Intent::FeatureRequest => "feature-request",
            Intent::Rationale => "rationale",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "note" => Some(Intent::Note),
            "question" => Some(Intent::Question),
            "decision" => Some(Intent::Decision),
            "todo" => Some(Intent::Todo),
            "idea" => Some(Intent::Idea),
            "bug-report" => Some(Intent::BugReport),
            "feature-request" => Some(Intent::FeatureRequest),
            "rationale" => Some(Intent::Rationale),
            _ => None,
        }
    }
}

// ============================================================================
// CAPTURE CONTEXT
// ============================================================================

/// Optional capture-time context (active app, repo, file).
///
/// Every field is explicitly optional; an absent field is distinct from an
/// empty string and is omitted from serialized output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl CaptureContext {
    pub fn is_empty(&self) -> bool {
        self.app.is_none()
            && self.window_title.is_none()
            && self.repository.is_none()
            && self.branch.is_none()
            && self.file.is_none()
    }
}

// ============================================================================
// THOUGHT
// ============================================================================

/// A captured thought with base fields and indexer-written enrichments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thought {
    /// Opaque id, always prefixed `t_`
    pub id: String,
    /// Owning user
    pub user: String,
    /// Creation instant, ms since epoch
    pub created_at: i64,
    /// Creation instant, ISO-8601
    pub created_at_iso: String,
    /// Body text (post-redaction)
    pub text: String,
    pub kind: ThoughtKind,
    /// User-declared plus inline `#tag` tags
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<CaptureContext>,
    /// Whether redaction changed the text
    #[serde(default)]
    pub contains_sensitive: bool,
    /// Capture-time decision heuristic, 0.0 - 1.0
    #[serde(default)]
    pub decision_score: f64,

    // ========== Derived (written only by the indexer) ==========
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auto_tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_ids: Vec<String>,
    /// Search-index document id once embedded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<i64>,

    // ========== Soft deletion ==========
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
}

impl Thought {
    /// Generate a fresh thought id.
    pub fn new_id() -> String {
        format!("t_{}", uuid::Uuid::new_v4())
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Creation instant as a chrono timestamp.
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.created_at)
    }
}

/// Validate a single tag slug.
pub fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag.len() <= 50
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

// ============================================================================
// CAPTURE REQUEST
// ============================================================================

/// Input for capturing a thought.
///
/// Uses `deny_unknown_fields` to prevent field injection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CaptureRequest {
    pub text: String,
    /// Kind override; auto-detected from the text when absent.
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ThoughtKind>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<CaptureContext>,
    /// Idempotency id; a repeated id is a no-op at the metadata store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Client-supplied creation instant (ms); defaults to server time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

// ============================================================================
// TESTS
// ============================================================================
