//! Ask scenarios: abstention, citations, filters, score normalization.

use std::collections::HashSet;

use engram_core::{AskRequest, CaptureRequest, ABSTENTION_ANSWER};
use engram_e2e_tests::harness::TestEngine;
use engram_e2e_tests::mocks::MockEmbedder;
use std::sync::Arc;

#[tokio::test]
async fn ask_abstains_with_no_matching_data() {
    let h = TestEngine::new();

    let response = h
        .engine
        .ask(
            "u1",
            &AskRequest {
                query: "nonexistent_term_xyz123".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(response.citations.is_empty());
    assert!(response.confidence <= 0.3);
    assert_eq!(response.answer, ABSTENTION_ANSWER);
}

#[tokio::test]
async fn ask_cites_captured_thoughts() {
    let h = TestEngine::with_answer("Tune shared_buffers [1], see also [2].");

    let mut captured = HashSet::new();
    for text in [
        "PostgreSQL configuration: shared_buffers sizing",
        "PostgreSQL configuration for the analytics database",
        "PostgreSQL configuration checklist before deploys",
    ] {
        captured.insert(h.capture_indexed("u1", text).await);
    }

    let response = h
        .engine
        .ask(
            "u1",
            &AskRequest {
                query: "PostgreSQL database".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(!response.citations.is_empty());
    for citation in &response.citations {
        assert!(captured.contains(&citation.id), "foreign citation {}", citation.id);
        assert!(citation.score >= 0.0 && citation.score <= 1.0);
    }
    // Max normalized score is 1.0 when citations exist
    let max = response
        .citations
        .iter()
        .map(|c| c.score)
        .fold(f64::MIN, f64::max);
    assert_eq!(max, 1.0);
    // Rounded to 3 decimals
    for citation in &response.citations {
        let scaled = citation.score * 1000.0;
        assert!((scaled - scaled.round()).abs() < 1e-9);
    }
}

#[tokio::test]
async fn ask_never_cites_other_users() {
    let h = TestEngine::with_answer("All about rust [1].");
    h.capture_indexed("intruder", "rust ownership rules").await;
    let own = h.capture_indexed("u1", "rust lifetimes refresher").await;

    let response = h
        .engine
        .ask(
            "u1",
            &AskRequest {
                query: "rust".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    for citation in &response.citations {
        assert_eq!(citation.id, own);
    }
}

#[tokio::test]
async fn ask_respects_tag_filter() {
    let h = TestEngine::with_answer("Notes say [1].");

    h.engine
        .capture(
            "u1",
            &CaptureRequest {
                text: "deploy pipeline notes".to_string(),
                tags: vec!["work".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();
    h.engine
        .capture(
            "u1",
            &CaptureRequest {
                text: "deploy the garden sprinkler".to_string(),
                tags: vec!["home".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();
    h.drain().await;

    let response = h
        .engine
        .ask(
            "u1",
            &AskRequest {
                query: "deploy".to_string(),
                tags: vec!["home".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

    for citation in &response.citations {
        assert!(citation.tags.contains(&"home".to_string()));
    }
}

#[tokio::test]
async fn ask_extractive_fallback_when_chat_dies_after_indexing() {
    // Index with a working chat, then swap in a failing chat for ask by
    // building a second engine over the same backends is overkill here -
    // instead exercise the path where retrieval succeeds and synthesis
    // fails: the harness chat only fails for answer prompts.
    struct AnswerOnlyFailingChat;

    #[async_trait::async_trait]
    impl engram_core::ChatModel for AnswerOnlyFailingChat {
        async fn complete(
            &self,
            req: engram_core::ChatRequest,
        ) -> Result<String, engram_core::LlmError> {
            if req.system.contains("classify") {
                return Ok("{\"tags\":[\"db\"],\"category\":\"engineering\",\"intent\":\"note\",\"entities\":[]}".into());
            }
            if req.system.contains("summarize") {
                return Ok("Summary.".into());
            }
            Err(engram_core::LlmError::Unavailable("answers down".into()))
        }
    }

    let h = TestEngine::with_backends(
        Arc::new(AnswerOnlyFailingChat),
        Arc::new(MockEmbedder::new()),
    );
    h.capture_indexed("u1", "postgres vacuum schedule decision").await;

    let response = h
        .engine
        .ask(
            "u1",
            &AskRequest {
                query: "postgres vacuum".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(response.citations.len(), 1);
    assert!((response.confidence - 0.5).abs() < 1e-9);
    assert!(response.answer.contains("From your notes"));
}

#[tokio::test]
async fn ask_lexical_fallback_when_query_embedding_fails() {
    // Embedder succeeds while indexing, then dies: retrieval degrades to
    // BM25-only and still finds the thought.
    struct FlakyEmbedder {
        inner: MockEmbedder,
        budget: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl engram_core::Embedder for FlakyEmbedder {
        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>, engram_core::LlmError> {
            if self
                .budget
                .fetch_update(
                    std::sync::atomic::Ordering::SeqCst,
                    std::sync::atomic::Ordering::SeqCst,
                    |n| n.checked_sub(1),
                )
                .is_err()
            {
                return Err(engram_core::LlmError::Unavailable("spent".into()));
            }
            self.inner.embed(text).await
        }
    }

    let h = TestEngine::with_backends(
        Arc::new(engram_e2e_tests::mocks::MockChat::with_answer("Lexical hit [1].")),
        Arc::new(FlakyEmbedder {
            inner: MockEmbedder::new(),
            budget: std::sync::atomic::AtomicUsize::new(1),
        }),
    );
    h.capture_indexed("u1", "kubernetes upgrade checklist").await;

    let response = h
        .engine
        .ask(
            "u1",
            &AskRequest {
                query: "kubernetes checklist".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(response.citations.len(), 1);
}
