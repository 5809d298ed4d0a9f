//! Theme graph scenarios: K rule, degree cap, caching, degraded mode.

use std::collections::{HashMap, HashSet};

use engram_core::CaptureRequest;
use engram_e2e_tests::harness::TestEngine;

/// Capture `n` thoughts across a few vocabulary pools so clustering has
/// real structure.
async fn seed_thoughts(h: &TestEngine, user: &str, n: usize) {
    let pools = [
        "postgres database index vacuum analyze query planner",
        "rust borrow checker lifetimes ownership traits",
        "kubernetes pods deployment rollout ingress",
        "design typography spacing color contrast layout",
    ];
    for i in 0..n {
        let pool = pools[i % pools.len()];
        h.engine
            .capture(
                user,
                &CaptureRequest {
                    text: format!("{pool} note number {i}"),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }
    h.drain().await;
}

#[tokio::test]
async fn graph_with_forty_thoughts_has_three_themes() {
    let h = TestEngine::new();
    seed_thoughts(&h, "u1", 40).await;

    let graph = h.engine.theme_graph("u1", None, None).await.unwrap();

    // K = min(6, max(3, floor(sqrt(40/5)))) = 3
    assert_eq!(graph.themes.len(), 3);
    assert_eq!(graph.nodes.len(), 40);
    assert_eq!(graph.metadata.thought_count, 40);
    assert!(!graph.metadata.degraded);

    // Every node's theme exists
    let theme_ids: HashSet<&str> = graph.themes.iter().map(|t| t.id.as_str()).collect();
    for node in &graph.nodes {
        assert!(theme_ids.contains(node.theme_id.as_str()));
        assert!(node.recency >= 0.0 && node.recency <= 1.0);
    }

    // Every edge at or above the default threshold
    for edge in &graph.edges {
        assert!(edge.similarity >= 0.7);
    }

    // Degree cap: no node touches more than five edges
    let mut degrees: HashMap<&str, usize> = HashMap::new();
    for edge in &graph.edges {
        *degrees.entry(edge.source.as_str()).or_insert(0) += 1;
        *degrees.entry(edge.target.as_str()).or_insert(0) += 1;
    }
    for (_, degree) in degrees {
        assert!(degree <= 5);
    }

    // Themes carry labels from the (mock) model
    for theme in &graph.themes {
        assert!(!theme.label.is_empty());
        assert!(!theme.color.is_empty());
    }
}

#[tokio::test]
async fn graph_degenerate_one_theme_per_thought() {
    let h = TestEngine::new();
    seed_thoughts(&h, "u1", 2).await;

    let graph = h.engine.theme_graph("u1", None, None).await.unwrap();
    assert_eq!(graph.themes.len(), 2);
    assert_eq!(graph.nodes.len(), 2);
}

#[tokio::test]
async fn graph_cache_hit_until_data_changes() {
    let h = TestEngine::new();
    seed_thoughts(&h, "u1", 10).await;

    // Let the clock tick past the last capture so the build is strictly
    // newer than lastDataChange
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let first = h.engine.theme_graph("u1", None, None).await.unwrap();
    let second = h.engine.theme_graph("u1", None, None).await.unwrap();
    assert_eq!(
        first.metadata.generated_at, second.metadata.generated_at,
        "second read must be served from cache"
    );

    // A new capture bumps lastDataChange and invalidates the cache
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    h.capture_indexed("u1", "fresh thought about postgres").await;
    let third = h.engine.theme_graph("u1", None, None).await.unwrap();
    assert!(third.metadata.generated_at > first.metadata.generated_at);
    assert_eq!(third.metadata.thought_count, 11);
}

#[tokio::test]
async fn graph_min_similarity_is_validated() {
    let h = TestEngine::new();
    let err = h
        .engine
        .theme_graph("u1", None, Some(1.5))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[tokio::test]
async fn graph_empty_user_yields_empty_graph() {
    let h = TestEngine::new();
    let graph = h.engine.theme_graph("nobody", None, None).await.unwrap();
    assert!(graph.themes.is_empty());
    assert!(graph.nodes.is_empty());
    assert!(graph.edges.is_empty());
    assert_eq!(graph.metadata.thought_count, 0);
}

#[tokio::test]
async fn graph_month_filter_limits_nodes() {
    let h = TestEngine::new();

    // One thought pinned into March 2026, one now
    h.engine
        .capture(
            "u1",
            &CaptureRequest {
                text: "march-only postgres note".to_string(),
                created_at: Some(1_772_400_000_000), // 2026-03-01T21:20:00Z
                ..Default::default()
            },
        )
        .await
        .unwrap();
    h.capture_indexed("u1", "present-day note").await;

    let graph = h
        .engine
        .theme_graph("u1", Some("2026-03"), None)
        .await
        .unwrap();
    assert_eq!(graph.nodes.len(), 1);
    assert!(graph.nodes[0].label.contains("march-only"));
}
