//! Unified search document schema
//!
//! One document shape covers both thoughts and conversations; the
//! `doc_type` discriminator separates the two result lists at query time.
//! Field names are snake_case on the wire - part of the index contract.

use serde::{Deserialize, Serialize};

use crate::model::CaptureContext;

/// Document discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    #[default]
    Thought,
    Conversation,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Thought => "thought",
            DocType::Conversation => "conversation",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "thought" => Some(DocType::Thought),
            "conversation" => Some(DocType::Conversation),
            _ => None,
        }
    }
}

/// A document in the search index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchDoc {
    pub id: String,
    pub user: String,
    #[serde(default, rename = "docType")]
    pub doc_type: DocType,
    pub text: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<String>,
    pub created_at_epoch: i64,
    #[serde(default)]
    pub decision_score: f64,
    pub embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<CaptureContext>,

    // ========== Conversation documents only ==========
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, rename = "messageCount", skip_serializing_if = "Option::is_none")]
    pub message_count: Option<i64>,
    #[serde(default, rename = "citedThoughtIds", skip_serializing_if = "Vec::is_empty")]
    pub cited_thought_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at_epoch: Option<i64>,
}

impl SearchDoc {
    /// Space-joined tags, the form indexed by the FTS table.
    pub fn tags_text(&self) -> String {
        self.tags.join(" ")
    }
}
