use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub memory: MemoryConfig,
    pub prompts: PromptsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub backend: StorageBackend,
    pub url: String,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

fn default_run_migrations() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    pub model: String,
    pub base_url: String,
    pub dimension: usize,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// In-flight requests during `embed_batch`
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
}

fn default_timeout_seconds() -> u64 {
    60
}

fn default_batch_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_seconds: u64,
    pub max_tokens: usize,
    pub temperature: f32,
    /// Attempts per generation before the turn fails
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    3
}

/// Retrieval window sizes for context assembly
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MemoryConfig {
    pub recent_limit: usize,
    pub similar_limit: usize,
    /// Cosine distance cutoff; absent or zero disables it
    #[serde(default)]
    pub similarity_threshold: Option<f32>,
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
}

fn default_max_message_chars() -> usize {
    16_000
}

impl MemoryConfig {
    /// Threshold as an effective cutoff, `None` when disabled
    pub fn distance_cutoff(&self) -> Option<f32> {
        self.similarity_threshold.filter(|t| *t > 0.0)
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            recent_limit: 20,
            similar_limit: 5,
            similarity_threshold: Some(0.7),
            max_message_chars: default_max_message_chars(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PromptsConfig {
    pub system_prompt: String,
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::load_from("config/settings")
    }

    pub fn load_from(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name(path).required(true))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }
}
