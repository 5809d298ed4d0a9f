//! Conversation scenarios: round-trip, ordering, monotonicity, delete
//! cascade.

use engram_core::{ConversationStatus, MessageRole, SendOptions};
use engram_e2e_tests::harness::TestEngine;

#[tokio::test]
async fn conversation_round_trip() {
    let h = TestEngine::with_answer("Hello back [1], or just hello.");

    let (conv, initial) = h
        .engine
        .create_conversation("u1", None, Some("Hello".to_string()))
        .await
        .unwrap();
    assert!(conv.id.starts_with("conv_"));
    assert!(initial.is_some());

    h.engine
        .send_message(
            "u1",
            &conv.id,
            "what was my first message?",
            SendOptions::default(),
        )
        .await
        .unwrap();

    let page = h
        .engine
        .get_conversation("u1", &conv.id, 50, None)
        .await
        .unwrap();

    // Two user + two assistant messages, strictly ordered
    assert_eq!(page.messages.len(), 4);
    let roles: Vec<MessageRole> = page.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::User,
            MessageRole::Assistant
        ]
    );
    for pair in page.messages.windows(2) {
        assert!(pair[0].created_at < pair[1].created_at);
    }

    // Plaintexts legible
    assert_eq!(page.messages[0].content, "Hello");
    assert_eq!(page.messages[2].content, "what was my first message?");
    assert!(!page.messages[1].content.is_empty());

    // Assistant messages carry citations (possibly empty) and confidence
    for msg in page.messages.iter().filter(|m| m.role == MessageRole::Assistant) {
        assert!(msg.confidence.is_some());
    }

    // messageCount matches live messages
    assert_eq!(page.conversation.message_count, 4);
}

#[tokio::test]
async fn conversation_updated_at_is_monotonic() {
    let h = TestEngine::new();

    let (conv, _) = h
        .engine
        .create_conversation("u1", Some("t".to_string()), None)
        .await
        .unwrap();
    let mut last = conv.updated_at;

    for text in ["one", "two", "three"] {
        h.engine
            .send_message("u1", &conv.id, text, SendOptions::default())
            .await
            .unwrap();
        let page = h
            .engine
            .get_conversation("u1", &conv.id, 50, None)
            .await
            .unwrap();
        assert!(page.conversation.updated_at >= last);
        last = page.conversation.updated_at;
        assert_eq!(
            page.conversation.message_count as usize,
            page.messages.len()
        );
    }
}

#[tokio::test]
async fn conversation_list_is_most_recent_first() {
    let h = TestEngine::new();

    let (first, _) = h
        .engine
        .create_conversation("u1", Some("first".into()), None)
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let (second, _) = h
        .engine
        .create_conversation("u1", Some("second".into()), None)
        .await
        .unwrap();

    let list = h.engine.list_conversations("u1", None, 10, None).unwrap();
    let ids: Vec<&str> = list.conversations.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec![second.id.as_str(), first.id.as_str()]);

    // Sending into the older conversation moves it to the front
    h.engine
        .send_message("u1", &first.id, "bump", SendOptions::default())
        .await
        .unwrap();
    let list = h.engine.list_conversations("u1", None, 10, None).unwrap();
    assert_eq!(list.conversations[0].id, first.id);
}

#[tokio::test]
async fn conversation_archive_and_unarchive() {
    let h = TestEngine::new();
    let (conv, _) = h
        .engine
        .create_conversation("u1", Some("to archive".into()), None)
        .await
        .unwrap();

    h.engine
        .update_conversation("u1", &conv.id, None, Some(ConversationStatus::Archived))
        .unwrap();

    let archived = h
        .engine
        .list_conversations("u1", Some(ConversationStatus::Archived), 10, None)
        .unwrap();
    assert_eq!(archived.conversations.len(), 1);

    h.engine
        .update_conversation("u1", &conv.id, None, Some(ConversationStatus::Active))
        .unwrap();
    let archived = h
        .engine
        .list_conversations("u1", Some(ConversationStatus::Archived), 10, None)
        .unwrap();
    assert!(archived.conversations.is_empty());
}

#[tokio::test]
async fn delete_cascades_to_messages_and_export() {
    let h = TestEngine::new();

    let (conv, _) = h
        .engine
        .create_conversation("u1", None, Some("first".to_string()))
        .await
        .unwrap();
    h.engine
        .send_message("u1", &conv.id, "second", SendOptions::default())
        .await
        .unwrap();

    h.engine.delete_conversation("u1", &conv.id).unwrap();

    // Subsequent reads 404
    let err = h
        .engine
        .get_conversation("u1", &conv.id, 50, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not-found");

    // Idempotent delete
    h.engine.delete_conversation("u1", &conv.id).unwrap();

    // Export lists the id as deleted and carries none of its messages
    let bundle = h.engine.export("u1", 0).unwrap();
    assert!(bundle.deleted.contains(&conv.id));
    assert!(bundle.conversations.is_empty());
}

#[tokio::test]
async fn send_message_to_missing_conversation_is_not_found() {
    let h = TestEngine::new();
    let err = h
        .engine
        .send_message("u1", "conv_missing", "hi", SendOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not-found");
}

#[tokio::test]
async fn cross_user_access_is_not_found() {
    let h = TestEngine::new();
    let (conv, _) = h
        .engine
        .create_conversation("owner", Some("mine".into()), None)
        .await
        .unwrap();

    let err = h
        .engine
        .get_conversation("other", &conv.id, 50, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not-found");
}

#[tokio::test]
async fn debounced_reindex_skips_rapid_sends() {
    let h = TestEngine::new();
    let (conv, _) = h
        .engine
        .create_conversation("u1", Some("debounce".into()), None)
        .await
        .unwrap();

    // First send enqueues a conversation index job (indexedAt unset)
    h.engine
        .send_message("u1", &conv.id, "first", SendOptions::default())
        .await
        .unwrap();
    h.drain().await;

    // An immediate second send lands inside the debounce window
    h.engine
        .send_message("u1", &conv.id, "second", SendOptions::default())
        .await
        .unwrap();
    assert_eq!(h.queue.depth(), 0);
}
