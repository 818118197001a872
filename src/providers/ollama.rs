//! Ollama provider implementation

use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::conversation::Message;

use super::{body_lines, CompletionOptions, LanguageModel, ProviderError, TextStream};

/// Bound on establishing the connection to the model server.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct OllamaProvider {
    client: Client,
    base_url: String,
    /// Applies to buffered completions only. Streams are bounded by the
    /// generation deadlines of whoever consumes them.
    request_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
}

/// One NDJSON line of a streaming `/api/chat` response
#[derive(Debug, Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaProvider {
    pub fn new(base_url: String, timeout_secs: u64) -> Result<Self, ProviderError> {
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }

    fn request<'a>(
        messages: &[Message],
        options: &'a CompletionOptions,
        stream: bool,
    ) -> OllamaRequest<'a> {
        OllamaRequest {
            model: &options.model,
            messages: messages
                .iter()
                .map(|m| OllamaMessage {
                    role: m.role.as_str().to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            stream,
            options: OllamaOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        }
    }

    async fn send(
        &self,
        request: &OllamaRequest<'_>,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut builder = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(request);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::InvalidResponse(format!(
                "{}: {}",
                status, body
            )));
        }
        Ok(response)
    }
}

/// Extract the text delta from one streamed line; `None` marks the final line.
fn parse_chunk(line: &str) -> Result<Option<String>, ProviderError> {
    let chunk: OllamaChunk = serde_json::from_str(line)
        .map_err(|e| ProviderError::InvalidResponse(format!("bad stream line: {e}")))?;
    if let Some(error) = chunk.error {
        return Err(ProviderError::Stream(error));
    }
    if chunk.done {
        return Ok(None);
    }
    Ok(Some(chunk.message.map(|m| m.content).unwrap_or_default()))
}

#[async_trait]
impl LanguageModel for OllamaProvider {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        let request = Self::request(messages, options, false);
        let response = self.send(&request, Some(self.request_timeout)).await?;
        let ollama_response: OllamaResponse = response.json().await?;
        Ok(ollama_response.message.content)
    }

    async fn stream(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<TextStream, ProviderError> {
        let request = Self::request(messages, options, true);
        let response = self.send(&request, None).await?;
        Ok(Box::pin(text_deltas(body_lines(response.bytes_stream()))))
    }
}

fn text_deltas<S>(lines: S) -> impl Stream<Item = Result<String, ProviderError>>
where
    S: Stream<Item = Result<String, ProviderError>>,
{
    try_stream! {
        let mut lines = Box::pin(lines);
        while let Some(line) = lines.next().await {
            let line = line?;
            match parse_chunk(&line)? {
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
