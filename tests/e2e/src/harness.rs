//! Engine harness
//!
//! Builds a complete engine on a temp data directory with the mock
//! backends and a fixed graph seed, plus helpers that drive the capture →
//! index → ask loop synchronously.

use std::sync::Arc;

use engram_core::{
    CaptureRequest, Engine, EnvelopeCipher, ChatModel, Embedder, Indexer,
    InMemoryIndexQueue,
};
use tempfile::TempDir;

use crate::mocks::{MockChat, MockEmbedder};

/// A fully wired engine over a temp directory.
pub struct TestEngine {
    pub engine: Arc<Engine>,
    pub indexer: Indexer,
    pub queue: Arc<InMemoryIndexQueue>,
    _dir: TempDir,
}

impl TestEngine {
    /// Default harness: mock chat + mock embedder.
    pub fn new() -> Self {
        Self::with_backends(Arc::new(MockChat::new()), Arc::new(MockEmbedder::new()))
    }

    /// Harness with a custom answer reply.
    pub fn with_answer(answer: &str) -> Self {
        Self::with_backends(
            Arc::new(MockChat::with_answer(answer)),
            Arc::new(MockEmbedder::new()),
        )
    }

    /// Harness over explicit backends.
    pub fn with_backends(chat: Arc<dyn ChatModel>, embedder: Arc<dyn Embedder>) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let queue = Arc::new(InMemoryIndexQueue::default());
        let engine = Engine::open(
            dir.path(),
            queue.clone(),
            chat,
            embedder,
            EnvelopeCipher::ephemeral(),
        )
        .expect("engine init")
        .with_graph_seed(42);
        let engine = Arc::new(engine);
        let indexer = engine.indexer();
        Self {
            engine,
            indexer,
            queue,
            _dir: dir,
        }
    }

    /// Run queued index jobs to completion.
    pub async fn drain(&self) {
        self.indexer.drain().await;
    }

    /// Capture a thought and wait for it to be indexed.
    pub async fn capture_indexed(&self, user: &str, text: &str) -> String {
        let receipt = self
            .engine
            .capture(
                user,
                &CaptureRequest {
                    text: text.to_string(),
                    ..Default::default()
                },
            )
            .await
            .expect("capture");
        self.drain().await;
        receipt.id
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}
