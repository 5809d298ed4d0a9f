//! Theme graph entities
//!
//! The cached output of the theme graph builder: labeled clusters, laid-out
//! nodes, similarity edges, and generation metadata.

use serde::{Deserialize, Serialize};

/// A labeled cluster of thoughts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Theme {
    pub id: String,
    /// 2-4 word LLM label (or the fallback label)
    pub label: String,
    /// One-sentence description
    pub description: String,
    /// Hex color assigned from the fixed palette
    pub color: String,
    /// Number of member thoughts
    pub count: usize,
    /// Up to a handful of member previews
    #[serde(default)]
    pub sample_thoughts: Vec<String>,
}

/// A positioned thought node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    /// 60-char text preview
    pub label: String,
    pub theme_id: String,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    /// 1.0 at "now", 0.0 at one year old
    pub recency: f64,
    /// Mirrors the thought's decision score
    pub importance: f64,
    pub kind: String,
}

/// A similarity edge between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub similarity: f64,
}

/// Generation metadata attached to a graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMeta {
    pub thought_count: usize,
    pub theme_count: usize,
    pub edge_count: usize,
    /// Generation instant, ms since epoch
    pub generated_at: i64,
    /// Algorithm tag (bumped when clustering/layout changes)
    pub algorithm: String,
    /// True when embeddings were synthesized because the search index was
    /// unreachable; themes are low-quality in that mode.
    #[serde(default)]
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
}

/// A complete cached theme graph for one `{user, window}` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeGraph {
    pub themes: Vec<Theme>,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub metadata: GraphMeta,
}
