//! SyaKi Assistant - university RAG chat API
//!
//! Answers student questions from the campus knowledge base, the student's
//! own academic record and the curriculum, over HTTP and a WhatsApp bridge.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod conversation;
mod core;
mod providers;
mod routes;

use crate::config::{Config, PromptSet};
use crate::core::{ChatEngine, Collaborators, FileCurriculum, SessionStore, SqliteRecordStore};
use crate::providers::{OllamaEmbedder, PineconeIndex, Provider, UnconfiguredIndex, VectorIndex};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub chat_engine: Arc<ChatEngine>,
    /// Name of the configured language model backend
    pub provider: &'static str,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "syaki_assistant=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let assistant = config.load_assistant()?;

    let prompts = match &assistant.prompts.path {
        Some(path) => PromptSet::load(path).await?,
        None => PromptSet::default(),
    };

    let provider = Provider::from_config(&assistant.llm)?;
    let provider_name = provider.name();
    tracing::info!(
        provider = provider_name,
        model = %assistant.llm.model,
        "language model configured"
    );

    let retrieval = &assistant.retrieval;
    let embedder = OllamaEmbedder::new(
        retrieval.embedding_endpoint.clone(),
        retrieval.embedding_model.clone(),
    )?;
    let index: Arc<dyn VectorIndex> = match (&retrieval.index_host, retrieval.api_key()) {
        (Some(host), Some(key)) => Arc::new(PineconeIndex::new(
            host.clone(),
            retrieval.namespace.clone(),
            key,
        )?),
        _ => {
            tracing::warn!("vector index not configured, answers will have no retrieved context");
            Arc::new(UnconfiguredIndex)
        }
    };

    let records = SqliteRecordStore::connect(&config.records_db_url)
        .await
        .with_context(|| format!("opening record store {}", config.records_db_url))?;

    let session = Arc::new(
        SessionStore::new(&config.data_dir.join("conversations.db"))
            .await
            .context("initializing session store")?,
    );

    let parts = Collaborators {
        llm: Arc::new(provider),
        embedder: Arc::new(embedder),
        index,
        records: Arc::new(records),
        curriculum: Arc::new(FileCurriculum::new(&assistant.knowledge.curriculum_path)),
    };
    let chat_engine = Arc::new(ChatEngine::new(parts, session, &assistant, prompts));

    let state = AppState {
        chat_engine,
        provider: provider_name,
    };

    let app = routes::router()
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("SyaKi assistant running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
