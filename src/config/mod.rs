//! Application configuration

pub mod assistant;
pub mod prompts;

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use assistant::{AssistantConfig, ConfigError, GenerationConfig, LlmConfig, RetrievalConfig};
pub use prompts::PromptSet;

/// Process-level settings read from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub records_db_url: String,
    pub assistant_config_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let data_dir = env::var("SYAKI_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let records_db_url = env::var("SYAKI_RECORDS_DB")
            .unwrap_or_else(|_| format!("sqlite:{}", data_dir.join("records.db").display()));

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            data_dir,
            records_db_url,
            assistant_config_path: env::var("SYAKI_CONFIG").ok().map(PathBuf::from),
        })
    }

    /// Load the assistant TOML, falling back to built-in defaults when no
    /// file is configured.
    pub fn load_assistant(&self) -> Result<AssistantConfig, ConfigError> {
        let config = match &self.assistant_config_path {
            Some(path) => AssistantConfig::from_file(path)?,
            None => AssistantConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }
}
