//! OpenAI-compatible provider
//!
//! Works with any API that implements the OpenAI chat completions format:
//! - OpenAI (api.openai.com)
//! - Google Gemini / Gemma through the OpenAI compatibility endpoint
//! - Groq, vLLM, LM Studio, LocalAI
//!
//! # Configuration
//!
//! ```toml
//! [llm]
//! provider = "openai"
//! endpoint = "https://generativelanguage.googleapis.com/v1beta/openai"
//! api_key_env = "GOOGLE_API_KEY"
//! model = "gemma-3-27b-it"
//! ```

use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use crate::conversation::Message;

use super::{body_lines, CompletionOptions, LanguageModel, ProviderError, TextStream};

/// OpenAI-compatible chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl From<&Message> for ChatMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role.as_str().to_string(),
            content: msg.content.clone(),
        }
    }
}

/// Chat completion request
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

/// Chat completion response
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// One `data:` event of a streaming response
#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Error response from API
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// OpenAI-compatible provider configuration
#[derive(Debug, Clone)]
pub struct OpenAICompatConfig {
    /// Base URL for the API (e.g., https://api.openai.com/v1)
    pub base_url: String,
    /// API key (optional for local servers)
    pub api_key: Option<String>,
    /// Model used when a call does not name one
    pub default_model: String,
    /// Timeout in seconds for buffered completions; streams are not cut by it
    pub timeout_secs: u64,
}

/// OpenAI-compatible API provider
pub struct OpenAICompatProvider {
    config: OpenAICompatConfig,
    client: Client,
}

impl OpenAICompatProvider {
    /// Create a new provider with the given configuration
    pub fn new(config: OpenAICompatConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { config, client })
    }

    fn build_request(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
        stream: bool,
    ) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: if options.model.is_empty() {
                self.config.default_model.clone()
            } else {
                options.model.clone()
            },
            messages: messages.iter().map(ChatMessage::from).collect(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream,
        }
    }

    fn post(&self) -> RequestBuilder {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let mut req_builder = self.client.post(&url);

        // Add authorization if API key is provided
        if let Some(ref api_key) = self.config.api_key {
            req_builder = req_builder.header("Authorization", format!("Bearer {}", api_key));
        }

        req_builder.header("Content-Type", "application/json")
    }

    async fn send(
        &self,
        request: &ChatCompletionRequest,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut builder = self.post().json(request);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder.send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        // Try to parse error response
        if let Ok(error_resp) = serde_json::from_str::<ErrorResponse>(&body) {
            return Err(ProviderError::InvalidResponse(format!(
                "API error: {}",
                error_resp.error.message
            )));
        }
        Err(ProviderError::InvalidResponse(format!(
            "HTTP {}: {}",
            status, body
        )))
    }
}

/// Interpret one SSE line. `Ok(None)` means the stream is finished.
fn parse_event(line: &str) -> Result<Option<String>, ProviderError> {
    let Some(data) = line.strip_prefix("data:") else {
        // comments, `event:` lines and keep-alives
        return Ok(Some(String::new()));
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(None);
    }

    if let Ok(error_resp) = serde_json::from_str::<ErrorResponse>(data) {
        return Err(ProviderError::Stream(error_resp.error.message));
    }

    let chunk: ChatCompletionChunk = serde_json::from_str(data)
        .map_err(|e| ProviderError::InvalidResponse(format!("bad stream event: {e}")))?;

    Ok(Some(
        chunk
            .choices
            .into_iter()
            .filter_map(|c| c.delta.content)
            .collect(),
    ))
}

fn text_deltas<S>(lines: S) -> impl Stream<Item = Result<String, ProviderError>>
where
    S: Stream<Item = Result<String, ProviderError>>,
{
    try_stream! {
        let mut lines = Box::pin(lines);
        while let Some(line) = lines.next().await {
            let line = line?;
            match parse_event(&line)? {
                Some(text) => {
                    if !text.is_empty() {
                        yield text;
                    }
                }
                None => break,
            }
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAICompatProvider {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        let request = self.build_request(messages, options, false);
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let response = self.send(&request, Some(timeout)).await?;
        let body = response.text().await?;

        let completion: ChatCompletionResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse response: {} - Body: {}", e, body))
        })?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".to_string()))?;

        Ok(choice.message.content.unwrap_or_default())
    }

    async fn stream(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<TextStream, ProviderError> {
        let request = self.build_request(messages, options, true);
        let response = self.send(&request, None).await?;
        Ok(Box::pin(text_deltas(body_lines(response.bytes_stream()))))
    }
}
