//! Export sync contract and indexer idempotence/enrichment.

use engram_core::{CaptureRequest, IndexJob, IndexQueue, ListThoughts};
use engram_e2e_tests::harness::TestEngine;

#[tokio::test]
async fn export_full_and_incremental() {
    let h = TestEngine::new();

    let kept = h.capture_indexed("u1", "thought that stays").await;
    let removed = h.capture_indexed("u1", "thought that goes").await;
    h.engine.delete_thought("u1", &removed).unwrap();

    let (conv, _) = h
        .engine
        .create_conversation("u1", Some("exported".into()), Some("hello".into()))
        .await
        .unwrap();

    // Full export
    let bundle = h.engine.export("u1", 0).unwrap();
    assert_eq!(bundle.thoughts.len(), 1);
    assert_eq!(bundle.thoughts[0].id, kept);
    assert!(bundle.deleted.contains(&removed));
    assert_eq!(bundle.conversations.len(), 1);
    assert_eq!(bundle.conversations[0].conversation.id, conv.id);
    // Messages arrive decrypted
    assert_eq!(bundle.conversations[0].messages[0].content, "hello");
    assert!(bundle.sync_timestamp > 0);

    // Echoing syncTimestamp back yields an empty delta
    let delta = h.engine.export("u1", bundle.sync_timestamp + 1).unwrap();
    assert!(delta.thoughts.is_empty());
    assert!(delta.conversations.is_empty());
    assert!(delta.deleted.is_empty());

    // New activity reappears in the next delta
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    h.capture_indexed("u1", "later thought").await;
    let delta = h.engine.export("u1", bundle.sync_timestamp + 1).unwrap();
    assert_eq!(delta.thoughts.len(), 1);
}

#[tokio::test]
async fn export_is_user_scoped() {
    let h = TestEngine::new();
    h.capture_indexed("u1", "mine").await;
    h.capture_indexed("u2", "theirs").await;

    let bundle = h.engine.export("u1", 0).unwrap();
    assert_eq!(bundle.thoughts.len(), 1);
    assert_eq!(bundle.thoughts[0].text, "mine");
}

#[tokio::test]
async fn indexer_writes_derived_fields() {
    let h = TestEngine::new();
    let id = h
        .capture_indexed("u1", "long postgres tuning discussion that goes on and on about vacuum costs and autovacuum workers and the planner")
        .await;

    let page = h
        .engine
        .list_thoughts("u1", &ListThoughts::default())
        .unwrap();
    let thought = page.thoughts.iter().find(|t| t.id == id).unwrap();

    assert!(thought.indexed_at.is_some());
    assert!(thought.summary.is_some());
    assert!(!thought.auto_tags.is_empty());
    assert!(thought.category.is_some());
    assert!(thought.intent.is_some());
    assert_eq!(thought.embedding_ref.as_deref(), Some(id.as_str()));
}

#[tokio::test]
async fn indexer_links_related_thoughts() {
    let h = TestEngine::new();

    let first = h.capture_indexed("u1", "postgres vacuum tuning for big tables").await;
    let second = h.capture_indexed("u1", "postgres vacuum thresholds and autovacuum").await;

    // Re-index the first so it can see the second
    h.queue
        .send(IndexJob::Thought {
            thought_id: first.clone(),
            user: "u1".into(),
            raw_key: raw_key_for(&h, "u1", &first),
            created_at: created_at_for(&h, "u1", &first),
        })
        .await
        .unwrap();
    h.drain().await;

    let related = h.engine.related_thoughts("u1", &first).unwrap();
    assert!(related.iter().any(|t| t.id == second));
    // Never related to itself
    assert!(related.iter().all(|t| t.id != first));
}

#[tokio::test]
async fn indexer_is_idempotent() {
    let h = TestEngine::new();
    let id = h.capture_indexed("u1", "idempotent postgres note").await;

    let raw_key = raw_key_for(&h, "u1", &id);
    let created_at = created_at_for(&h, "u1", &id);

    // Process the same job twice more
    for _ in 0..2 {
        h.queue
            .send(IndexJob::Thought {
                thought_id: id.clone(),
                user: "u1".into(),
                raw_key: raw_key.clone(),
                created_at,
            })
            .await
            .unwrap();
        h.drain().await;
    }

    let page = h
        .engine
        .list_thoughts("u1", &ListThoughts::default())
        .unwrap();
    assert_eq!(page.thoughts.len(), 1);

    // Still exactly one search document and one result
    let ask = h
        .engine
        .ask(
            "u1",
            &engram_core::AskRequest {
                query: "idempotent postgres".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(ask.citations.len() <= 1);
}

#[tokio::test]
async fn conversation_index_makes_history_searchable() {
    let h = TestEngine::with_answer("About postgres [1].");
    h.capture_indexed("u1", "postgres connection pooling notes").await;

    let (conv, _) = h
        .engine
        .create_conversation(
            "u1",
            Some("postgres chat".into()),
            Some("tell me about postgres pooling".into()),
        )
        .await
        .unwrap();
    h.drain().await;

    // The conversation document now exists under its own id
    let response = h
        .engine
        .ask(
            "u1",
            &engram_core::AskRequest {
                query: "postgres pooling".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(response
        .conversation_hits
        .iter()
        .any(|hit| hit.id == conv.id));
    // Conversation scores normalized independently
    if !response.conversation_hits.is_empty() {
        let max = response
            .conversation_hits
            .iter()
            .map(|hit| hit.score)
            .fold(f64::MIN, f64::max);
        assert_eq!(max, 1.0);
    }
}

// ----------------------------------------------------------------------
// helpers
// ----------------------------------------------------------------------

fn created_at_for(h: &TestEngine, user: &str, id: &str) -> i64 {
    let page = h
        .engine
        .list_thoughts(user, &ListThoughts::default())
        .unwrap();
    page.thoughts
        .iter()
        .find(|t| t.id == id)
        .map(|t| t.created_at)
        .expect("thought present")
}

fn raw_key_for(h: &TestEngine, user: &str, id: &str) -> String {
    let created_at = created_at_for(h, user, id);
    let date = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(created_at)
        .unwrap()
        .format("%Y-%m-%d");
    format!("thoughts/{user}/{date}/{id}.json")
}
