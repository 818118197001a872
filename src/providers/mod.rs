//! External AI service integrations
//!
//! Language model backends, the embedding service and the vector index all
//! sit behind small traits so the pipeline never depends on a concrete vendor.

pub mod embedding;
mod ollama;
mod openai_compat;
pub mod vector_index;

use std::pin::Pin;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use thiserror::Error;

use crate::config::LlmConfig;
use crate::conversation::Message;

pub use embedding::{EmbeddingService, OllamaEmbedder};
pub use ollama::OllamaProvider;
pub use openai_compat::{OpenAICompatConfig, OpenAICompatProvider};
pub use vector_index::{IndexMatch, PineconeIndex, UnconfiguredIndex, VectorIndex};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Stream interrupted: {0}")]
    Stream(String),
}

/// Incremental text chunks produced by a streaming completion
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Per-call sampling options
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A chat-completion backend.
///
/// Dropping a [`TextStream`] closes the underlying HTTP response, which is how
/// cancellation reaches the model server.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Run a completion and return the whole answer.
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<String, ProviderError>;

    /// Run a completion and yield text as it is produced.
    async fn stream(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<TextStream, ProviderError>;
}

/// Backend chosen once at startup from configuration
pub enum Provider {
    Ollama(OllamaProvider),
    OpenAICompat(OpenAICompatProvider),
}

impl Provider {
    pub fn from_config(config: &LlmConfig) -> Result<Self, ProviderError> {
        match config.provider.to_lowercase().as_str() {
            "ollama" => {
                let url = config
                    .endpoint
                    .clone()
                    .unwrap_or_else(|| "http://localhost:11434".into());
                Ok(Provider::Ollama(OllamaProvider::new(
                    url,
                    config.request_timeout_secs,
                )?))
            }
            "openai" | "openai_compat" | "google" => {
                let base_url = config.endpoint.clone().ok_or_else(|| {
                    ProviderError::NotConfigured("llm.endpoint is required for openai".into())
                })?;
                let compat = OpenAICompatConfig {
                    base_url,
                    api_key: config.api_key(),
                    default_model: config.model.clone(),
                    timeout_secs: config.request_timeout_secs,
                };
                Ok(Provider::OpenAICompat(OpenAICompatProvider::new(compat)?))
            }
            _ => Err(ProviderError::UnknownProvider(config.provider.clone())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::Ollama(_) => "ollama",
            Provider::OpenAICompat(_) => "openai",
        }
    }
}

#[async_trait]
impl LanguageModel for Provider {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        match self {
            Provider::Ollama(p) => p.complete(messages, options).await,
            Provider::OpenAICompat(p) => p.complete(messages, options).await,
        }
    }

    async fn stream(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<TextStream, ProviderError> {
        match self {
            Provider::Ollama(p) => p.stream(messages, options).await,
            Provider::OpenAICompat(p) => p.stream(messages, options).await,
        }
    }
}

/// Split a streamed HTTP body into complete, non-empty text lines.
pub(crate) fn body_lines<S, B>(body: S) -> impl Stream<Item = Result<String, ProviderError>>
where
    S: Stream<Item = Result<B, reqwest::Error>>,
    B: AsRef<[u8]>,
{
    try_stream! {
        let mut body = Box::pin(body);
        let mut pending: Vec<u8> = Vec::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            pending.extend_from_slice(chunk.as_ref());

            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line).trim().to_string();
                if !line.is_empty() {
                    yield line;
                }
            }
        }

        let tail = String::from_utf8_lossy(&pending).trim().to_string();
        if !tail.is_empty() {
            yield tail;
        }
    }
}
