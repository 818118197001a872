//! Vector index client
//!
//! Queries a Pinecone-style index scoped to one namespace. Passage text is
//! stored in match metadata under `text` (current ingestion) or `chunk`
//! (older ingestion runs).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ProviderError;

/// A raw match returned by the index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMatch {
    pub text: String,
    pub score: f32,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>, ProviderError>;
}

pub struct PineconeIndex {
    client: Client,
    host: String,
    namespace: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    namespace: &'a str,
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<RawMatch>,
}

#[derive(Debug, Deserialize)]
struct RawMatch {
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<Value>,
}

impl RawMatch {
    fn into_match(self) -> Option<IndexMatch> {
        let metadata = self.metadata?;
        let text = metadata
            .get("text")
            .or_else(|| metadata.get("chunk"))
            .and_then(Value::as_str)?;
        Some(IndexMatch {
            text: text.to_string(),
            score: self.score,
        })
    }
}

impl PineconeIndex {
    pub fn new(
        host: impl Into<String>,
        namespace: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            host: host.into().trim_end_matches('/').to_string(),
            namespace: namespace.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>, ProviderError> {
        let response = self
            .client
            .post(format!("{}/query", self.host))
            .header("Api-Key", &self.api_key)
            .json(&QueryRequest {
                namespace: &self.namespace,
                vector,
                top_k,
                include_metadata: true,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::InvalidResponse(format!("{}: {}", status, body)));
        }

        let body: QueryResponse = response.json().await?;
        Ok(body
            .matches
            .into_iter()
            .filter_map(RawMatch::into_match)
            .collect())
    }
}

/// Stand-in used when no index host is configured; every query fails so the
/// retriever degrades to an empty context.
pub struct UnconfiguredIndex;

#[async_trait]
impl VectorIndex for UnconfiguredIndex {
    async fn query(&self, _vector: &[f32], _top_k: usize) -> Result<Vec<IndexMatch>, ProviderError> {
        Err(ProviderError::NotConfigured("retrieval.index_host".into()))
    }
}
