//! Capture → list scenarios: auto-typing, redaction, idempotence.

use engram_core::{CaptureRequest, ListThoughts, ThoughtKind};
use engram_e2e_tests::harness::TestEngine;

#[tokio::test]
async fn capture_auto_types_code_and_lists_by_type() {
    let h = TestEngine::new();

    let receipt = h
        .engine
        .capture(
            "u1",
            &CaptureRequest {
                text: "```js\nconsole.log(1)\n```".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(receipt.id.starts_with("t_"));
    h.drain().await;

    let page = h
        .engine
        .list_thoughts(
            "u1",
            &ListThoughts {
                kind: Some(ThoughtKind::Code),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(page.thoughts.len(), 1);
    assert_eq!(page.thoughts[0].id, receipt.id);
    assert_eq!(page.thoughts[0].kind, ThoughtKind::Code);
}

#[tokio::test]
async fn capture_redacts_api_keys() {
    let h = TestEngine::new();

    let text = format!("key sk-{}", "A".repeat(48));
    h.engine
        .capture(
            "u1",
            &CaptureRequest {
                text,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let page = h
        .engine
        .list_thoughts("u1", &ListThoughts::default())
        .unwrap();
    assert_eq!(page.thoughts.len(), 1);
    assert!(page.thoughts[0].text.contains("[REDACTED]"));
    assert!(!page.thoughts[0].text.contains("sk-AAAA"));
    assert!(page.thoughts[0].contains_sensitive);
}

#[tokio::test]
async fn capture_is_idempotent_per_id() {
    let h = TestEngine::new();

    let first = CaptureRequest {
        text: "original text".to_string(),
        id: Some("t_fixed".to_string()),
        created_at: Some(1_700_000_000_000),
        ..Default::default()
    };
    let r1 = h.engine.capture("u1", &first).await.unwrap();
    assert_eq!(h.queue.depth(), 1);

    // Same id again, different body: equivalent response, row unchanged,
    // no second queued job
    let second = CaptureRequest {
        text: "attempted overwrite".to_string(),
        id: Some("t_fixed".to_string()),
        created_at: Some(1_700_000_000_000),
        ..Default::default()
    };
    let r2 = h.engine.capture("u1", &second).await.unwrap();
    assert_eq!(r1.id, r2.id);
    assert_eq!(r1.created_at, r2.created_at);
    assert_eq!(h.queue.depth(), 1);

    let page = h
        .engine
        .list_thoughts("u1", &ListThoughts::default())
        .unwrap();
    assert_eq!(page.thoughts.len(), 1);
    assert_eq!(page.thoughts[0].text, "original text");
}

#[tokio::test]
async fn capture_merges_inline_and_user_tags() {
    let h = TestEngine::new();

    h.engine
        .capture(
            "u1",
            &CaptureRequest {
                text: "studying #rust borrow checker".to_string(),
                tags: vec!["learning".to_string(), "rust".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let page = h
        .engine
        .list_thoughts(
            "u1",
            &ListThoughts {
                tag: Some("rust".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(page.thoughts.len(), 1);
    let tags = &page.thoughts[0].tags;
    assert!(tags.contains(&"rust".to_string()));
    assert!(tags.contains(&"learning".to_string()));
    assert_eq!(tags.iter().filter(|t| *t == "rust").count(), 1);
}

#[tokio::test]
async fn capture_rejects_invalid_input() {
    let h = TestEngine::new();

    let empty = h
        .engine
        .capture("u1", &CaptureRequest::default())
        .await
        .unwrap_err();
    assert_eq!(empty.kind(), "validation");

    let bad_tag = h
        .engine
        .capture(
            "u1",
            &CaptureRequest {
                text: "x".to_string(),
                tags: vec!["no spaces allowed".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(bad_tag.kind(), "validation");
}

#[tokio::test]
async fn deleted_thought_leaves_every_read_path() {
    let h = TestEngine::new();
    let id = h.capture_indexed("u1", "ephemeral postgres note").await;

    h.engine.delete_thought("u1", &id).unwrap();

    let page = h
        .engine
        .list_thoughts("u1", &ListThoughts::default())
        .unwrap();
    assert!(page.thoughts.is_empty());

    let ask = h
        .engine
        .ask(
            "u1",
            &engram_core::AskRequest {
                query: "postgres".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(ask.citations.is_empty());
}
