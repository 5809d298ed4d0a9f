//! Engram server
//!
//! Binds the HTTP surface, assembles the engine from configuration, and
//! runs the indexer worker pool alongside the listener.

mod auth;
mod error;
mod routes;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use rand::RngCore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use engram_core::{
    Engine, EnvelopeCipher, HttpLlmClient, HttpLlmConfig, InMemoryIndexQueue,
    EMBEDDING_DIMENSIONS,
};

use crate::state::AppState;

/// Indexer workers sharing the queue.
const WORKER_COUNT: usize = 2;

#[derive(Debug, Parser)]
#[command(name = "engram-server", version, about = "Personal knowledge engine")]
struct Args {
    /// Data directory for stores and caches
    #[arg(long, env = "ENGRAM_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Listen address
    #[arg(long, env = "ENGRAM_LISTEN", default_value = "127.0.0.1:8787")]
    listen: String,

    /// Hex-encoded 32-byte master key for message encryption
    #[arg(long, env = "ENGRAM_MASTER_KEY", hide_env_values = true)]
    master_key: Option<String>,

    /// Comma-separated key:user pairs
    #[arg(long, env = "ENGRAM_API_KEYS", hide_env_values = true, default_value = "")]
    api_keys: String,

    /// OpenAI-compatible backend base URL
    #[arg(long, env = "ENGRAM_LLM_BASE_URL", default_value = "https://api.openai.com")]
    llm_base_url: String,

    /// Backend API key
    #[arg(long, env = "ENGRAM_LLM_API_KEY", hide_env_values = true, default_value = "")]
    llm_api_key: String,

    /// Chat model name
    #[arg(long, env = "ENGRAM_CHAT_MODEL", default_value = "gpt-4o-mini")]
    chat_model: String,

    /// Embedding model name
    #[arg(long, env = "ENGRAM_EMBED_MODEL", default_value = "text-embedding-3-large")]
    embed_model: String,
}

fn resolve_data_dir(arg: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = arg {
        return dir;
    }
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".engram"),
        Err(_) => PathBuf::from(".engram"),
    }
}

fn build_cipher(master_key: Option<&str>) -> anyhow::Result<EnvelopeCipher> {
    match master_key {
        Some(hex_key) if !hex_key.is_empty() => {
            EnvelopeCipher::from_hex(hex_key).context("invalid ENGRAM_MASTER_KEY")
        }
        _ => {
            let mut key = [0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut key);
            warn!(
                "no ENGRAM_MASTER_KEY set; using an ephemeral key - stored messages will be \
                 unreadable after restart (set ENGRAM_MASTER_KEY={} to persist)",
                hex::encode(key)
            );
            Ok(EnvelopeCipher::new(&key).expect("generated key has the right length"))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let data_dir = resolve_data_dir(args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    info!(data_dir = %data_dir.display(), "starting engram-server");

    let cipher = build_cipher(args.master_key.as_deref())?;
    let api_keys = auth::parse_api_keys(&args.api_keys);
    if api_keys.is_empty() {
        warn!("no api keys configured (ENGRAM_API_KEYS); every request will be rejected");
    }

    let llm = Arc::new(HttpLlmClient::new(HttpLlmConfig {
        base_url: args.llm_base_url,
        api_key: args.llm_api_key,
        chat_model: args.chat_model,
        embed_model: args.embed_model,
        dimensions: EMBEDDING_DIMENSIONS,
    }));

    let queue = Arc::new(InMemoryIndexQueue::default());
    let engine = Arc::new(
        Engine::open(&data_dir, queue, llm.clone(), llm, cipher)
            .context("engine initialization failed")?,
    );

    // Indexer worker pool with a shutdown signal
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut workers = Vec::with_capacity(WORKER_COUNT);
    for _ in 0..WORKER_COUNT {
        let indexer = Arc::new(engine.indexer());
        workers.push(tokio::spawn(indexer.run(shutdown_rx.clone())));
    }

    let state = AppState {
        engine,
        api_keys: Arc::new(api_keys),
    };
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    info!(listen = %args.listen, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    for worker in workers {
        let _ = worker.await;
    }
    Ok(())
}
