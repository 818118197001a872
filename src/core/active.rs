//! Registry of in-flight generations, keyed by conversation id

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
pub struct ActiveGenerations {
    inner: Arc<Mutex<HashMap<String, (u64, CancellationToken)>>>,
    next_id: Arc<AtomicU64>,
}

impl ActiveGenerations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new generation for `conversation_id`. A generation already
    /// running for the same conversation is cancelled and replaced.
    pub fn register(&self, conversation_id: &str) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        let previous = self
            .lock()
            .insert(conversation_id.to_string(), (id, token.clone()));
        if let Some((_, previous)) = previous {
            tracing::debug!(conversation_id, "replacing in-flight generation");
            previous.cancel();
        }

        Registration {
            registry: self.clone(),
            conversation_id: conversation_id.to_string(),
            id,
            token,
        }
    }

    /// Cancel the generation running for `conversation_id`, if any.
    pub fn stop(&self, conversation_id: &str) -> bool {
        match self.lock().remove(conversation_id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.lock().contains_key(conversation_id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (u64, CancellationToken)>> {
        // the map stays consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Removes its entry from the registry when dropped.
pub struct Registration {
    registry: ActiveGenerations,
    conversation_id: String,
    id: u64,
    token: CancellationToken,
}

impl Registration {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut map = self.registry.lock();
        if matches!(map.get(&self.conversation_id), Some((id, _)) if *id == self.id) {
            map.remove(&self.conversation_id);
        }
    }
}
