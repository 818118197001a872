//! Knowledge retrieval over the vector index

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::RetrievalConfig;
use crate::providers::{EmbeddingService, IndexMatch, ProviderError, VectorIndex};

/// A passage from the knowledge base with its relevance to the current query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub text: String,
    pub relevance_score: f32,
}

pub struct KnowledgeRetriever {
    embedder: Arc<dyn EmbeddingService>,
    index: Arc<dyn VectorIndex>,
    top_k: usize,
    max_passages: usize,
    min_score: f32,
}

impl KnowledgeRetriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingService>,
        index: Arc<dyn VectorIndex>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            top_k: config.top_k,
            max_passages: config.max_passages,
            min_score: config.min_score,
        }
    }

    /// Passages relevant to `query`, best first.
    ///
    /// Embedding or index failures are logged and yield an empty result; a
    /// request never fails because the knowledge base is unreachable.
    pub async fn retrieve(&self, query: &str) -> Vec<RetrievedPassage> {
        let started = Instant::now();
        match self.try_retrieve(query).await {
            Ok(passages) => {
                tracing::debug!(
                    count = passages.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "retrieval finished"
                );
                passages
            }
            Err(e) => {
                tracing::warn!(error = %e, "retrieval failed, continuing without context");
                Vec::new()
            }
        }
    }

    async fn try_retrieve(&self, query: &str) -> Result<Vec<RetrievedPassage>, ProviderError> {
        let vector = self.embedder.embed(query).await?;
        let matches = self.index.query(&vector, self.top_k).await?;
        Ok(rank(matches, self.min_score, self.max_passages))
    }
}

/// Drop matches below `min_score`, sort descending and keep at most `limit`.
pub fn rank(matches: Vec<IndexMatch>, min_score: f32, limit: usize) -> Vec<RetrievedPassage> {
    let mut passages: Vec<RetrievedPassage> = matches
        .into_iter()
        .filter(|m| m.score >= min_score)
        .map(|m| RetrievedPassage {
            text: m.text,
            relevance_score: m.score.clamp(0.0, 1.0),
        })
        .collect();

    passages.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
    passages.truncate(limit);
    passages
}

/// `[Relevance: 0.90] text` blocks separated by `---`.
pub fn render_passages(passages: &[RetrievedPassage]) -> Option<String> {
    if passages.is_empty() {
        return None;
    }
    Some(
        passages
            .iter()
            .map(|p| format!("[Relevance: {:.2}] {}", p.relevance_score, p.text))
            .collect::<Vec<_>>()
            .join("\n\n---\n\n"),
    )
}
