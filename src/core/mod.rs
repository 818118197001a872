//! Core assistant pipeline
//!
//! Normalization, intent classification, context gathering, prompt assembly
//! and generation for one student message.

mod active;
mod chat;
mod curriculum;
mod generation;
mod intent;
mod memory;
mod normalize;
mod prompt;
mod records;
mod retriever;
mod user_context;

#[cfg(test)]
pub(crate) mod testing;

pub use chat::{
    BotRequest, ChatEngine, ChatError, ChatReply, ChatRequest, ChatStream, Collaborators,
    StreamEvent,
};
pub use curriculum::FileCurriculum;
pub use generation::CancelReason;
pub use memory::{SessionError, SessionStore, StoredMessage};
pub use records::SqliteRecordStore;
pub use retriever::RetrievedPassage;
pub use user_context::ClassEntry;
