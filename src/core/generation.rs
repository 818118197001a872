//! Generation orchestration
//!
//! Drives one model call through an explicit state machine:
//!
//! ```text
//! Idle -> AwaitingFirstToken -> Streaming -> Completed
//!              |                    |
//!              +--> Aborted / Failed <--+
//! ```
//!
//! A [`CancellationToken`] carries explicit stops and client disconnects.
//! Two clocks bound a call: a first-token guard that is cleared once output
//! starts, and a wall-clock ceiling for the whole answer. The turn is
//! committed to the session only when the state machine reaches `Completed`.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::GenerationConfig;
use crate::conversation::Message;
use crate::providers::{CompletionOptions, LanguageModel, ProviderError};

use super::memory::{SessionError, SessionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationState {
    Idle,
    AwaitingFirstToken,
    Streaming,
    Completed,
    Aborted,
    Failed,
}

impl GenerationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GenerationState::Completed | GenerationState::Aborted | GenerationState::Failed
        )
    }

    pub fn can_transition_to(self, next: GenerationState) -> bool {
        use GenerationState::*;
        match (self, next) {
            (Idle, AwaitingFirstToken) => true,
            (AwaitingFirstToken, Streaming) => true,
            (Streaming, Completed) => true,
            (AwaitingFirstToken | Streaming, Aborted | Failed) => true,
            _ => false,
        }
    }
}

/// Why a generation was aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// Explicit stop or the client went away
    Stopped,
    TimedOut,
}

/// Where generated text goes while the model is running
pub enum GenerationMode {
    /// Accumulate and return the whole answer
    Buffer,
    /// Forward every chunk as soon as it arrives
    Stream(mpsc::UnboundedSender<String>),
}

#[derive(Debug)]
pub enum GenerationOutcome {
    Completed(String),
    /// `partial` may be shown to the user but is never persisted.
    Cancelled {
        reason: CancelReason,
        partial: String,
    },
    Failed(ProviderError),
}

/// One request's worth of input to the model
#[derive(Debug, Clone)]
pub struct Turn {
    pub conversation_id: String,
    /// Dialogue context sent before the prompt, oldest first
    pub history: Vec<Message>,
    /// Final assembled prompt, sent as the last user message
    pub prompt: String,
    /// Messages committed together with the answer (seeded history and the
    /// user's own message)
    pub pending: Vec<Message>,
    pub options: CompletionOptions,
}

impl Turn {
    fn model_messages(&self) -> Vec<Message> {
        let mut messages = self.history.clone();
        messages.push(Message::user(self.prompt.clone()));
        messages
    }
}

/// Tracks the state of a single generation and rejects illegal transitions.
struct Tracker {
    conversation_id: String,
    state: GenerationState,
    started: std::time::Instant,
}

impl Tracker {
    fn new(conversation_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            state: GenerationState::Idle,
            started: std::time::Instant::now(),
        }
    }

    fn advance(&mut self, next: GenerationState) {
        if !self.state.can_transition_to(next) {
            tracing::error!(from = ?self.state, to = ?next, "illegal generation transition");
            return;
        }
        tracing::debug!(
            conversation_id = %self.conversation_id,
            from = ?self.state,
            to = ?next,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "generation state"
        );
        self.state = next;
    }
}

pub struct GenerationOrchestrator {
    llm: Arc<dyn LanguageModel>,
    session: Arc<SessionStore>,
    first_token_timeout: Duration,
    max_duration: Duration,
}

impl GenerationOrchestrator {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        session: Arc<SessionStore>,
        config: &GenerationConfig,
    ) -> Self {
        Self {
            llm,
            session,
            first_token_timeout: config.first_token_timeout(),
            max_duration: config.max_duration(),
        }
    }

    pub fn with_timeouts(mut self, first_token: Duration, max_duration: Duration) -> Self {
        self.first_token_timeout = first_token;
        self.max_duration = max_duration;
        self
    }

    /// Run the model for `turn` and commit it to the session on success.
    ///
    /// Only a failed session write is an `Err`; cancellation and model
    /// failures are outcomes.
    pub async fn generate(
        &self,
        turn: Turn,
        mode: GenerationMode,
        cancel: CancellationToken,
    ) -> Result<GenerationOutcome, SessionError> {
        let mut tracker = Tracker::new(&turn.conversation_id);
        let outcome = self.drive(&turn, &mode, &cancel, &mut tracker).await;

        match &outcome {
            GenerationOutcome::Completed(text) => {
                self.session
                    .append_turn(
                        &turn.conversation_id,
                        &turn.pending,
                        &Message::assistant(text.clone()),
                    )
                    .await?;
                tracing::info!(
                    conversation_id = %turn.conversation_id,
                    chars = text.len(),
                    elapsed_ms = tracker.started.elapsed().as_millis() as u64,
                    "generation completed"
                );
            }
            GenerationOutcome::Cancelled { reason, partial } => {
                tracing::info!(
                    conversation_id = %turn.conversation_id,
                    ?reason,
                    partial_chars = partial.len(),
                    "generation cancelled"
                );
            }
            GenerationOutcome::Failed(e) => {
                tracing::warn!(
                    conversation_id = %turn.conversation_id,
                    error = %e,
                    "generation failed"
                );
            }
        }

        Ok(outcome)
    }

    async fn drive(
        &self,
        turn: &Turn,
        mode: &GenerationMode,
        cancel: &CancellationToken,
        tracker: &mut Tracker,
    ) -> GenerationOutcome {
        let start = Instant::now();
        let deadline = start + self.max_duration;
        let first_token_deadline = (start + self.first_token_timeout).min(deadline);
        let mut text = String::new();

        tracker.advance(GenerationState::AwaitingFirstToken);

        let messages = turn.model_messages();
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            _ = sleep_until(first_token_deadline) => Some(Err(CancelReason::TimedOut)),
            result = self.llm.stream(&messages, &turn.options) => Some(Ok(result)),
        };

        let mut stream = match opened {
            None => return abort(tracker, CancelReason::Stopped, text),
            Some(Err(reason)) => return abort(tracker, reason, text),
            Some(Ok(Err(e))) => {
                tracker.advance(GenerationState::Failed);
                return GenerationOutcome::Failed(e);
            }
            Some(Ok(Ok(stream))) => stream,
        };

        loop {
            let guard = if tracker.state == GenerationState::AwaitingFirstToken {
                first_token_deadline
            } else {
                deadline
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return abort(tracker, CancelReason::Stopped, text);
                }
                _ = sleep_until(guard) => {
                    return abort(tracker, CancelReason::TimedOut, text);
                }
                next = stream.next() => match next {
                    Some(Ok(chunk)) => {
                        if chunk.is_empty() {
                            continue;
                        }
                        if tracker.state == GenerationState::AwaitingFirstToken {
                            tracker.advance(GenerationState::Streaming);
                        }
                        text.push_str(&chunk);
                        if let GenerationMode::Stream(tx) = mode {
                            if tx.send(chunk).is_err() {
                                // nobody is listening any more
                                return abort(tracker, CancelReason::Stopped, text);
                            }
                        }
                    }
                    Some(Err(e)) => {
                        tracker.advance(GenerationState::Failed);
                        return GenerationOutcome::Failed(e);
                    }
                    None if text.trim().is_empty() => {
                        tracker.advance(GenerationState::Failed);
                        return GenerationOutcome::Failed(ProviderError::InvalidResponse(
                            "empty completion".into(),
                        ));
                    }
                    None => {
                        tracker.advance(GenerationState::Completed);
                        return GenerationOutcome::Completed(text);
                    }
                }
            }
        }
    }
}

fn abort(tracker: &mut Tracker, reason: CancelReason, partial: String) -> GenerationOutcome {
    tracker.advance(GenerationState::Aborted);
    GenerationOutcome::Cancelled { reason, partial }
}
