//! In-process fakes for pipeline tests

use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;

use crate::conversation::Message;
use crate::providers::{
    CompletionOptions, EmbeddingService, IndexMatch, LanguageModel, ProviderError, TextStream,
    VectorIndex,
};

use super::curriculum::CurriculumSource;

#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub messages: Vec<Message>,
    pub options: CompletionOptions,
    pub streamed: bool,
}

#[derive(Debug, Clone)]
enum StreamScript {
    Chunks(Vec<String>),
    ChunksThenHang(Vec<String>),
    ChunksThenError(Vec<String>),
    Refuse,
}

/// A language model that answers from a script and records every call.
pub(crate) struct ScriptedModel {
    completion: Option<String>,
    stream: StreamScript,
    calls: Mutex<Vec<RecordedCall>>,
}

fn owned(chunks: &[&str]) -> Vec<String> {
    chunks.iter().map(|c| c.to_string()).collect()
}

impl ScriptedModel {
    /// Completes with `text` and streams it word by word.
    pub fn replying(text: &str) -> Self {
        Self {
            completion: Some(text.to_string()),
            stream: StreamScript::Chunks(text.split_inclusive(' ').map(String::from).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call fails at the transport level.
    pub fn failing() -> Self {
        Self {
            completion: None,
            stream: StreamScript::Refuse,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer for `complete` calls (the classifier).
    pub fn classifying(mut self, raw: &str) -> Self {
        self.completion = Some(raw.to_string());
        self
    }

    pub fn streaming(mut self, chunks: &[&str]) -> Self {
        self.stream = StreamScript::Chunks(owned(chunks));
        self
    }

    /// Yields `chunks`, then never finishes.
    pub fn hanging_after(mut self, chunks: &[&str]) -> Self {
        self.stream = StreamScript::ChunksThenHang(owned(chunks));
        self
    }

    /// Yields `chunks`, then the connection drops.
    pub fn breaking_after(mut self, chunks: &[&str]) -> Self {
        self.stream = StreamScript::ChunksThenError(owned(chunks));
        self
    }

    pub fn refusing_stream(mut self) -> Self {
        self.stream = StreamScript::Refuse;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn streamed_calls(&self) -> Vec<RecordedCall> {
        self.calls().into_iter().filter(|c| c.streamed).collect()
    }

    fn record(&self, messages: &[Message], options: &CompletionOptions, streamed: bool) {
        self.calls.lock().unwrap().push(RecordedCall {
            messages: messages.to_vec(),
            options: options.clone(),
            streamed,
        });
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        self.record(messages, options, false);
        self.completion
            .clone()
            .ok_or_else(|| ProviderError::InvalidResponse("model unavailable".into()))
    }

    async fn stream(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<TextStream, ProviderError> {
        self.record(messages, options, true);
        let ok = |chunks: Vec<String>| {
            stream::iter(chunks.into_iter().map(Ok::<String, ProviderError>))
        };
        match self.stream.clone() {
            StreamScript::Chunks(chunks) => Ok(Box::pin(ok(chunks))),
            StreamScript::ChunksThenHang(chunks) => {
                Ok(Box::pin(ok(chunks).chain(stream::pending())))
            }
            StreamScript::ChunksThenError(chunks) => Ok(Box::pin(ok(chunks).chain(stream::once(
                async { Err(ProviderError::Stream("connection reset".into())) },
            )))),
            StreamScript::Refuse => Err(ProviderError::InvalidResponse(
                "HTTP 503: model unavailable".into(),
            )),
        }
    }
}

/// Embeds every query to the same vector and remembers what it was asked.
#[derive(Default)]
pub(crate) struct FixedEmbedder {
    queries: Mutex<Vec<String>>,
}

impl FixedEmbedder {
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmbeddingService for FixedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.queries.lock().unwrap().push(text.to_string());
        Ok(vec![0.1, 0.2, 0.3, 0.4])
    }
}

pub(crate) struct FailingEmbedder;

#[async_trait]
impl EmbeddingService for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
        Err(ProviderError::InvalidResponse("embedding model offline".into()))
    }
}

pub(crate) struct StaticIndex {
    matches: Vec<IndexMatch>,
}

impl StaticIndex {
    pub fn new(matches: Vec<IndexMatch>) -> Self {
        Self { matches }
    }
}

#[async_trait]
impl VectorIndex for StaticIndex {
    async fn query(&self, _vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>, ProviderError> {
        Ok(self.matches.iter().take(top_k).cloned().collect())
    }
}

pub(crate) struct FailingIndex;

#[async_trait]
impl VectorIndex for FailingIndex {
    async fn query(&self, _vector: &[f32], _top_k: usize) -> Result<Vec<IndexMatch>, ProviderError> {
        Err(ProviderError::InvalidResponse("index unreachable".into()))
    }
}

/// `None` behaves like a missing file.
pub(crate) struct StaticCurriculum(pub Option<String>);

#[async_trait]
impl CurriculumSource for StaticCurriculum {
    async fn load_curriculum_text(&self) -> std::io::Result<String> {
        self.0.clone().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "curriculum missing")
        })
    }
}

pub(crate) use super::records::tests::seeded_store;
