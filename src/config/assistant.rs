//! Assistant configuration loaded from TOML files
//!
//! A deployment describes:
//! - Which language model backend answers and classifies
//! - Where embeddings and the knowledge index live
//! - Generation limits and timeouts
//! - Where the curriculum reference and prompt overrides are stored

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root assistant configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// Language model backend used for answers
    #[serde(default)]
    pub llm: LlmConfig,

    /// Intent classification settings
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Answer generation settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Embedding + vector index settings
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Static reference documents
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Prompt override file
    #[serde(default)]
    pub prompts: PromptsConfig,
}

impl AssistantConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: AssistantConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let retrieval = &self.retrieval;
        if !(0.0..=1.0).contains(&retrieval.min_score) {
            return Err(ConfigError::Validation(format!(
                "retrieval.min_score must be within [0, 1], got {}",
                retrieval.min_score
            )));
        }
        if !(3..=15).contains(&retrieval.max_passages) {
            return Err(ConfigError::Validation(format!(
                "retrieval.max_passages must be within [3, 15], got {}",
                retrieval.max_passages
            )));
        }
        if retrieval.top_k < retrieval.max_passages {
            return Err(ConfigError::Validation(
                "retrieval.top_k must not be smaller than retrieval.max_passages".to_string(),
            ));
        }
        if self.generation.first_token_timeout_secs == 0 || self.generation.max_duration_secs == 0
        {
            return Err(ConfigError::Validation(
                "generation timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Language model backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "ollama" or "openai" (any OpenAI-compatible server)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model to use
    #[serde(default = "default_model")]
    pub model: String,

    /// API key environment variable name (for cloud providers)
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Custom API endpoint
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Timeout in seconds for buffered completions such as classification.
    /// Streamed answers are bounded by `[generation]` deadlines instead.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_model() -> String {
    "syaki-ai".to_string()
}

fn default_request_timeout() -> u64 {
    600
}

impl LlmConfig {
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key_env: None,
            endpoint: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Intent classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Model override; falls back to `llm.model`
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default = "default_classifier_temperature")]
    pub temperature: f32,

    #[serde(default = "default_classifier_max_tokens")]
    pub max_tokens: u32,
}

fn default_classifier_temperature() -> f32 {
    0.2
}

fn default_classifier_max_tokens() -> u32 {
    50
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model: None,
            temperature: default_classifier_temperature(),
            max_tokens: default_classifier_max_tokens(),
        }
    }
}

/// Answer generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_temperature")]
    pub temperature: f32,

    #[serde(default = "default_generation_max_tokens")]
    pub max_tokens: u32,

    /// Output budget for the WhatsApp bridge
    #[serde(default = "default_bot_max_tokens")]
    pub bot_max_tokens: u32,

    /// Guard that only runs until the first chunk arrives
    #[serde(default = "default_first_token_timeout")]
    pub first_token_timeout_secs: u64,

    /// Wall-clock ceiling for a whole generation
    #[serde(default = "default_max_duration")]
    pub max_duration_secs: u64,
}

fn default_generation_temperature() -> f32 {
    0.2
}

fn default_generation_max_tokens() -> u32 {
    1024
}

fn default_bot_max_tokens() -> u32 {
    240
}

fn default_first_token_timeout() -> u64 {
    320
}

fn default_max_duration() -> u64 {
    600
}

impl GenerationConfig {
    pub fn first_token_timeout(&self) -> Duration {
        Duration::from_secs(self.first_token_timeout_secs)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: default_generation_temperature(),
            max_tokens: default_generation_max_tokens(),
            bot_max_tokens: default_bot_max_tokens(),
            first_token_timeout_secs: default_first_token_timeout(),
            max_duration_secs: default_max_duration(),
        }
    }
}

/// Embedding service and vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Embedding endpoint (Ollama-compatible)
    #[serde(default = "default_embedding_endpoint")]
    pub embedding_endpoint: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Vector index host, e.g. https://va-xxxx.svc.pinecone.io
    #[serde(default)]
    pub index_host: Option<String>,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Environment variable holding the index API key
    #[serde(default = "default_index_key_env")]
    pub api_key_env: String,

    /// Matches requested from the index
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Passages kept after filtering
    #[serde(default = "default_max_passages")]
    pub max_passages: usize,

    /// Minimum relevance score a match needs to be kept
    #[serde(default = "default_min_score")]
    pub min_score: f32,
}

fn default_embedding_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_embedding_model() -> String {
    "mxbai-embed-large".to_string()
}

fn default_namespace() -> String {
    "cnn".to_string()
}

fn default_index_key_env() -> String {
    "PINECONE_API_KEY".to_string()
}

fn default_top_k() -> usize {
    10
}

fn default_max_passages() -> usize {
    3
}

fn default_min_score() -> f32 {
    0.7
}

impl RetrievalConfig {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok()
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            embedding_endpoint: default_embedding_endpoint(),
            embedding_model: default_embedding_model(),
            index_host: None,
            namespace: default_namespace(),
            api_key_env: default_index_key_env(),
            top_k: default_top_k(),
            max_passages: default_max_passages(),
            min_score: default_min_score(),
        }
    }
}

/// Static reference documents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Course catalog / prerequisite document used for planning requests
    #[serde(default = "default_curriculum_path")]
    pub curriculum_path: PathBuf,
}

fn default_curriculum_path() -> PathBuf {
    PathBuf::from("./data/curriculum.md")
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            curriculum_path: default_curriculum_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptsConfig {
    /// Optional TOML file overriding the built-in templates
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CONFIG: &str = r#"
[llm]
provider = "openai"
model = "gemma-3-27b-it"
endpoint = "https://generativelanguage.googleapis.com/v1beta/openai"
api_key_env = "GOOGLE_API_KEY"

[classifier]
temperature = 0.1

[generation]
max_tokens = 512
first_token_timeout_secs = 120

[retrieval]
index_host = "https://va-abc123.svc.pinecone.io"
namespace = "kampus"
min_score = 0.6
max_passages = 5

[knowledge]
curriculum_path = "/srv/syaki/kurikulum.md"
"#;

    #[test]
    fn test_parse_config() {
        let config = AssistantConfig::from_str(SAMPLE_CONFIG).unwrap();

        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.llm.model, "gemma-3-27b-it");
        assert_eq!(config.classifier.temperature, 0.1);
        assert_eq!(config.classifier.max_tokens, 50);
        assert_eq!(config.generation.max_tokens, 512);
        assert_eq!(config.generation.first_token_timeout(), Duration::from_secs(120));
        assert_eq!(config.retrieval.namespace, "kampus");
        assert_eq!(config.retrieval.max_passages, 5);
        assert_eq!(
            config.knowledge.curriculum_path,
            PathBuf::from("/srv/syaki/kurikulum.md")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_minimal_config() {
        let config = AssistantConfig::from_str("").unwrap();
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.retrieval.min_score, 0.7);
        assert_eq!(config.retrieval.top_k, 10);
        assert_eq!(config.generation.bot_max_tokens, 240);
        assert!(config.prompts.path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_out_of_range_threshold() {
        let config = AssistantConfig::from_str("[retrieval]\nmin_score = 1.5\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_rejects_passage_budget() {
        let config = AssistantConfig::from_str("[retrieval]\nmax_passages = 20\ntop_k = 20\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let config = AssistantConfig::from_str("[retrieval]\nmax_passages = 5\ntop_k = 4\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let config =
            AssistantConfig::from_str("[generation]\nmax_duration_secs = 0\n").unwrap();
        assert!(config.validate().is_err());
    }
}
