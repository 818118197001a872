//! Chat pipeline
//!
//! The ChatEngine turns one student message into an answer:
//! 1. Validates the request and identifies the student
//! 2. Normalizes the message (abbreviation expansion)
//! 3. Classifies the intent while the student's record is loaded
//! 4. Gathers context: curriculum for planning, retrieved passages otherwise
//! 5. Assembles the final prompt
//! 6. Runs generation (buffered or streamed) and commits the turn on success

use std::sync::Arc;

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::DropGuard;

use crate::config::prompts::{builtin, render};
use crate::config::{AssistantConfig, PromptSet};
use crate::conversation::{Conversation, Message, Role};
use crate::providers::{
    CompletionOptions, EmbeddingService, LanguageModel, ProviderError, VectorIndex,
};

use super::active::ActiveGenerations;
use super::curriculum::CurriculumSource;
use super::generation::{
    CancelReason, GenerationMode, GenerationOrchestrator, GenerationOutcome, Turn,
};
use super::intent::{Intent, IntentClassifier};
use super::memory::{SessionError, SessionStore};
use super::normalize::{normalize, strip_bot_command};
use super::prompt::{PromptAssembler, PromptContext};
use super::records::{RecordError, RecordStore};
use super::retriever::{KnowledgeRetriever, RetrievedPassage};
use super::user_context::{format_record, ClassEntry};

/// Request to the chat engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Conversation to continue; a new one is created when absent
    #[serde(default)]
    pub conversation_id: Option<String>,

    /// Student asking the question
    #[serde(default)]
    pub user_id: Option<String>,

    /// Dialogue so far; the last entry is the current user message
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Request from the WhatsApp bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotRequest {
    #[serde(default)]
    pub conversation_id: Option<String>,

    #[serde(default)]
    pub user_id: Option<String>,

    /// Raw chat line, possibly prefixed with `!tanya`
    pub message: String,
}

/// Buffered answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub conversation_id: String,
    pub text: String,
    pub intent: Intent,
}

/// Errors from the chat engine
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Upstream failure: {0}")]
    UpstreamFailure(#[from] ProviderError),

    #[error("Generation cancelled ({reason:?})")]
    Cancelled {
        reason: CancelReason,
        partial: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<SessionError> for ChatError {
    fn from(e: SessionError) -> Self {
        ChatError::Storage(e.to_string())
    }
}

/// Services the pipeline talks to
pub struct Collaborators {
    pub llm: Arc<dyn LanguageModel>,
    pub embedder: Arc<dyn EmbeddingService>,
    pub index: Arc<dyn VectorIndex>,
    pub records: Arc<dyn RecordStore>,
    pub curriculum: Arc<dyn CurriculumSource>,
}

/// Events of a streamed answer. Exactly one terminal event ends the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Delta(String),
    Done {
        conversation_id: String,
        intent: Intent,
    },
    Cancelled {
        reason: CancelReason,
    },
    Error {
        message: String,
    },
}

/// A streamed answer in progress.
///
/// Dropping it (or the stream from [`ChatStream::into_events`]) cancels the
/// generation, which is how a client disconnect is propagated.
pub struct ChatStream {
    pub conversation_id: String,
    pub intent: Intent,
    deltas: mpsc::UnboundedReceiver<String>,
    task: JoinHandle<Result<GenerationOutcome, SessionError>>,
    disconnect: DropGuard,
}

impl ChatStream {
    pub fn into_events(self) -> impl Stream<Item = StreamEvent> + Send {
        let ChatStream {
            conversation_id,
            intent,
            mut deltas,
            task,
            disconnect,
        } = self;

        async_stream::stream! {
            let _disconnect = disconnect;

            while let Some(delta) = deltas.recv().await {
                yield StreamEvent::Delta(delta);
            }

            yield match task.await {
                Ok(Ok(GenerationOutcome::Completed(_))) => StreamEvent::Done {
                    conversation_id,
                    intent,
                },
                Ok(Ok(GenerationOutcome::Cancelled { reason, .. })) => {
                    StreamEvent::Cancelled { reason }
                }
                Ok(Ok(GenerationOutcome::Failed(e))) => StreamEvent::Error {
                    message: e.to_string(),
                },
                Ok(Err(e)) => StreamEvent::Error {
                    message: e.to_string(),
                },
                Err(e) => StreamEvent::Error {
                    message: format!("generation task failed: {}", e),
                },
            };
        }
    }
}

/// A request that passed validation and has its prompt ready
struct Prepared {
    conversation_id: String,
    intent: Intent,
    turn: Turn,
}

/// The core chat engine
pub struct ChatEngine {
    llm: Arc<dyn LanguageModel>,
    classifier: IntentClassifier,
    retriever: KnowledgeRetriever,
    records: Arc<dyn RecordStore>,
    curriculum: Arc<dyn CurriculumSource>,
    assembler: PromptAssembler,
    orchestrator: GenerationOrchestrator,
    session: Arc<SessionStore>,
    reminder_template: String,
    generation: CompletionOptions,
    bot_max_tokens: u32,
    active: ActiveGenerations,
}

impl ChatEngine {
    /// Create a new chat engine
    pub fn new(
        parts: Collaborators,
        session: Arc<SessionStore>,
        config: &AssistantConfig,
        prompts: PromptSet,
    ) -> Self {
        let classifier_options = CompletionOptions {
            model: config
                .classifier
                .model
                .clone()
                .unwrap_or_else(|| config.llm.model.clone()),
            temperature: config.classifier.temperature,
            max_tokens: config.classifier.max_tokens,
        };
        let generation = CompletionOptions {
            model: config.llm.model.clone(),
            temperature: config.generation.temperature,
            max_tokens: config.generation.max_tokens,
        };

        Self {
            classifier: IntentClassifier::new(
                parts.llm.clone(),
                prompts.intent.clone(),
                classifier_options,
            ),
            retriever: KnowledgeRetriever::new(parts.embedder, parts.index, &config.retrieval),
            orchestrator: GenerationOrchestrator::new(
                parts.llm.clone(),
                session.clone(),
                &config.generation,
            ),
            llm: parts.llm,
            records: parts.records,
            curriculum: parts.curriculum,
            reminder_template: prompts.reminder.clone(),
            assembler: PromptAssembler::new(prompts),
            session,
            generation,
            bot_max_tokens: config.generation.bot_max_tokens,
            active: ActiveGenerations::new(),
        }
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// Stop the in-flight generation of a conversation.
    pub fn stop(&self, conversation_id: &str) -> bool {
        let stopped = self.active.stop(conversation_id);
        if stopped {
            tracing::info!(conversation_id, "stop requested");
        }
        stopped
    }

    /// Answer a chat request with one complete text.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatReply, ChatError> {
        let prepared = self.prepare(request, None).await?;
        self.run_buffered(prepared).await
    }

    /// Answer a WhatsApp bridge request with the length-capped template.
    pub async fn bot(&self, request: BotRequest) -> Result<ChatReply, ChatError> {
        let question = strip_bot_command(&request.message).trim();
        if question.is_empty() {
            return Err(ChatError::BadRequest("message must not be empty".into()));
        }

        let request = ChatRequest {
            conversation_id: request.conversation_id,
            user_id: request.user_id,
            messages: vec![Message::user(question)],
        };
        let prepared = self.prepare(request, Some(self.bot_max_tokens)).await?;
        self.run_buffered(prepared).await
    }

    /// Start a streamed answer. Validation and context gathering happen
    /// before this returns, so request errors surface as plain errors.
    pub async fn chat_stream(
        self: &Arc<Self>,
        request: ChatRequest,
    ) -> Result<ChatStream, ChatError> {
        let prepared = self.prepare(request, None).await?;
        let registration = self.active.register(&prepared.conversation_id);
        let cancel = registration.token();
        let disconnect = cancel.clone().drop_guard();
        let (tx, rx) = mpsc::unbounded_channel();

        let engine = Arc::clone(self);
        let turn = prepared.turn;
        let task = tokio::spawn(async move {
            let _registration = registration;
            engine
                .orchestrator
                .generate(turn, GenerationMode::Stream(tx), cancel)
                .await
        });

        Ok(ChatStream {
            conversation_id: prepared.conversation_id,
            intent: prepared.intent,
            deltas: rx,
            task,
            disconnect,
        })
    }

    /// Write a reminder for a class that is about to start. No retrieval and
    /// nothing is stored.
    /// Knowledge search on its own, without classification or generation.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedPassage>, ChatError> {
        let normalized = normalize(query);
        if normalized.is_empty() {
            return Err(ChatError::BadRequest("query must not be empty".into()));
        }
        Ok(self.retriever.retrieve(&normalized).await)
    }

    pub async fn reminder(&self, class: &ClassEntry) -> Result<String, ChatError> {
        let prompt = render(
            &self.reminder_template,
            &[
                ("markup_rules", builtin::MARKUP_RULES),
                ("class_details", &class.describe()),
            ],
        );
        let options = CompletionOptions {
            max_tokens: self.bot_max_tokens,
            ..self.generation.clone()
        };
        Ok(self.llm.complete(&[Message::user(prompt)], &options).await?)
    }

    async fn run_buffered(&self, prepared: Prepared) -> Result<ChatReply, ChatError> {
        let registration = self.active.register(&prepared.conversation_id);
        let outcome = self
            .orchestrator
            .generate(prepared.turn, GenerationMode::Buffer, registration.token())
            .await?;

        match outcome {
            GenerationOutcome::Completed(text) => Ok(ChatReply {
                conversation_id: prepared.conversation_id,
                text,
                intent: prepared.intent,
            }),
            GenerationOutcome::Cancelled { reason, partial } => {
                Err(ChatError::Cancelled { reason, partial })
            }
            GenerationOutcome::Failed(e) => Err(ChatError::UpstreamFailure(e)),
        }
    }

    async fn prepare(
        &self,
        request: ChatRequest,
        bot_max_tokens: Option<u32>,
    ) -> Result<Prepared, ChatError> {
        let ChatRequest {
            conversation_id,
            user_id,
            mut messages,
        } = request;

        let current = match messages.pop() {
            Some(m) if m.role == Role::User && !m.content.trim().is_empty() => m,
            Some(_) => {
                return Err(ChatError::BadRequest(
                    "last message must be a non-empty user message".into(),
                ))
            }
            None => return Err(ChatError::BadRequest("messages must not be empty".into())),
        };
        let user_id = user_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ChatError::Unauthorized("no user identified".into()))?;

        let mut conversation = match conversation_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => Conversation::with_id(id),
            None => Conversation::new(),
        };

        let normalized = normalize(&current.content);
        let (intent, user_context) = tokio::join!(
            self.classifier.classify(&normalized),
            self.user_context(user_id)
        );
        let user_context = user_context?;

        let context = if intent.is_planning() {
            PromptContext {
                curriculum: self.load_curriculum().await,
                ..PromptContext::default()
            }
        } else {
            PromptContext {
                passages: self.retriever.retrieve(&normalized).await,
                ..PromptContext::default()
            }
        };

        let kind = PromptAssembler::template_for(intent, bot_max_tokens);
        let prompt = self.assembler.assemble(
            kind,
            &PromptContext {
                normalized_input: normalized,
                user_context,
                ..context
            },
        );

        // a stored session wins over whatever history the client sent
        let pending = if self.session.exists(&conversation.id).await? {
            conversation.messages = self.session.history(&conversation.id).await?;
            vec![current]
        } else {
            conversation.messages = messages;
            let mut pending = conversation.messages.clone();
            pending.push(current);
            pending
        };

        tracing::debug!(
            conversation_id = %conversation.id,
            ?intent,
            ?kind,
            history = conversation.messages.len(),
            "prompt assembled"
        );

        let options = CompletionOptions {
            max_tokens: bot_max_tokens.unwrap_or(self.generation.max_tokens),
            ..self.generation.clone()
        };

        Ok(Prepared {
            conversation_id: conversation.id.clone(),
            intent,
            turn: Turn {
                conversation_id: conversation.id,
                history: conversation.messages,
                prompt,
                pending,
                options,
            },
        })
    }

    async fn user_context(&self, user_id: &str) -> Result<String, ChatError> {
        match self.records.find_user_with_semesters_and_classes(user_id).await {
            Ok(record) => Ok(format_record(&record)),
            Err(RecordError::NotFound(id)) => {
                Err(ChatError::Unauthorized(format!("unknown user {}", id)))
            }
            Err(e) => {
                tracing::warn!(
                    user_id,
                    error = %e,
                    "record store unavailable, answering without user data"
                );
                Ok(String::new())
            }
        }
    }

    async fn load_curriculum(&self) -> Option<String> {
        match self.curriculum.load_curriculum_text().await {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::warn!(error = %e, "curriculum unavailable");
                None
            }
        }
    }
}
