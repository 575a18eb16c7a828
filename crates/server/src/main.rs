//! Service entrypoint
//!
//! Wires the OpenAI-compatible backend, the in-memory vector store (fed
//! from an optional JSONL corpus export) and the pipeline, then serves
//! the HTTP API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use recipe_chat_agent::{Pipeline, PipelineDeps};
use recipe_chat_config::Settings;
use recipe_chat_llm::{OpenAiBackend, OpenAiConfig};
use recipe_chat_rag::{HashEmbedder, InMemoryVectorStore, LexicalScorer};
use recipe_chat_server::{corpus, create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Arc::new(Settings::from_env());
    settings.validate().context("invalid settings")?;

    let backend = Arc::new(
        OpenAiBackend::new(OpenAiConfig::from_env()).context("LLM backend init failed")?,
    );

    // Embeddings: the API backend when a key is configured, else the
    // deterministic hash embedder so local runs work end to end.
    let has_api_key = std::env::var("OPENAI_API_KEY").is_ok();
    let embedder: Arc<dyn recipe_chat_core::EmbeddingProvider> = if has_api_key {
        backend.clone()
    } else {
        tracing::warn!("OPENAI_API_KEY not set, using hash embeddings");
        Arc::new(HashEmbedder::new(256))
    };

    let store = Arc::new(InMemoryVectorStore::new(Arc::clone(&embedder)));
    let corpus_path = std::env::var("CORPUS_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| settings.vector_dir.join("corpus.jsonl"));
    let corpus_size = if corpus_path.exists() {
        corpus::load_jsonl(&store, &corpus_path).await?
    } else {
        tracing::warn!(path = %corpus_path.display(), "no corpus file, starting empty");
        0
    };

    let pipeline = Arc::new(Pipeline::new(PipelineDeps {
        settings: Arc::clone(&settings),
        store,
        embedder,
        llm: backend.clone(),
        moderation: Some(backend.clone()),
        reranker: Some(Arc::new(LexicalScorer)),
    }));

    let state = AppState {
        pipeline,
        settings: Arc::clone(&settings),
        corpus_size,
    };
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("bind {}", settings.bind_addr))?;
    tracing::info!(addr = %settings.bind_addr, docs = corpus_size, "recipe chat server listening");

    axum::serve(listener, router).await.context("server error")?;
    Ok(())
}
