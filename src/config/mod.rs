//! Configuration management for Mailsage
//!
//! TOML file with a versioned `_meta` block, named profiles and
//! `MAILSAGE_SECTION__KEY` environment overrides. Every tunable constant of
//! the retrieval and answer pipeline lives here.

use crate::error::{MailsageError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub answer: AnswerConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    #[serde(default = "default_database_file")]
    pub database_file: String,
}

fn default_database_file() -> String {
    "mailsage.db".to_string()
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("indexes")
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub batch_size: usize,
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,
    /// Chunk size in characters for email bodies
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_max_concurrent_batches() -> usize {
    4
}

fn default_chunk_size() -> usize {
    512
}

fn default_chunk_overlap() -> usize {
    50
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    pub vector_dim: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_m: usize,
    #[serde(default = "default_ef_search")]
    pub hnsw_ef_search: usize,
    #[serde(default = "default_max_elements")]
    pub max_elements: usize,
}

fn default_ef_search() -> usize {
    64
}

fn default_max_elements() -> usize {
    100_000
}

/// Retrieval engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_top_k: usize,
    pub max_top_k: usize,
    pub analytical_multiplier: usize,
    pub sub_query_top_k: usize,
    pub keyword_bonus: f32,
    pub entity_bonus: f32,
    pub subject_bonus: f32,
    pub sender_bonus: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 10,
            max_top_k: 100,
            analytical_multiplier: 3,
            sub_query_top_k: 3,
            keyword_bonus: 0.02,
            entity_bonus: 0.05,
            subject_bonus: 0.10,
            sender_bonus: 0.05,
        }
    }
}

/// Query processor settings for the LLM-backed steps
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub llm_enrichment: bool,
    pub classification_temperature: f32,
    pub classification_max_tokens: u32,
    pub sub_query_temperature: f32,
    pub sub_query_max_tokens: u32,
    pub hyde_temperature: f32,
    pub hyde_max_tokens: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            llm_enrichment: true,
            classification_temperature: 0.1,
            classification_max_tokens: 20,
            sub_query_temperature: 0.3,
            sub_query_max_tokens: 200,
            hyde_temperature: 0.7,
            hyde_max_tokens: 150,
        }
    }
}

/// Search service weights and paging
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub semantic_weight: f32,
    pub lexical_weight: f32,
    pub attachment_penalty: f32,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            semantic_weight: 0.6,
            lexical_weight: 0.4,
            attachment_penalty: 0.9,
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

/// Answer orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnswerConfig {
    pub context_char_budget: usize,
    pub max_citations: usize,
    pub history_turns: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    pub summary_max_documents: usize,
    pub summary_temperature: f32,
    pub stream_buffer: usize,
    pub fast_path: bool,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            context_char_budget: 32_000,
            max_citations: 10,
            history_turns: 10,
            temperature: 0.7,
            max_tokens: 2048,
            summary_max_documents: 50,
            summary_temperature: 0.5,
            stream_buffer: 32,
            fast_path: true,
        }
    }
}

/// Generation backend fallback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub enabled: bool,
    pub provider: String,
    pub api_key_env: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: "groq".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            base_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_llm_enrichment: Option<bool>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MailsageError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| MailsageError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file, creating the parent directory
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MailsageError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| MailsageError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| MailsageError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(model) = overrides.embedding_model {
            self.embedding.model = model;
        }
        if let Some(enabled) = overrides.llm_enabled {
            self.llm.enabled = enabled;
        }
        if let Some(provider) = overrides.llm_provider {
            self.llm.provider = provider;
        }
        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
        if let Some(enrichment) = overrides.query_llm_enrichment {
            self.query.llm_enrichment = enrichment;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: MAILSAGE_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            // MAILSAGE_LOG configures logging, not the file
            if key == "MAILSAGE_LOG" {
                continue;
            }
            if let Some(config_key) = key.strip_prefix("MAILSAGE_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => self.storage.data_dir = PathBuf::from(value),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "EMBEDDING__BATCH_SIZE" => self.embedding.batch_size = parse_env(path, value)?,
            "LLM__ENABLED" => self.llm.enabled = parse_env(path, value)?,
            "LLM__PROVIDER" => self.llm.provider = value.to_string(),
            "LLM__MODEL" => self.llm.model = value.to_string(),
            "LLM__API_KEY_ENV" => self.llm.api_key_env = value.to_string(),
            "LLM__BASE_URL" => self.llm.base_url = Some(value.to_string()),
            "QUERY__LLM_ENRICHMENT" => self.query.llm_enrichment = parse_env(path, value)?,
            "RETRIEVAL__DEFAULT_TOP_K" => {
                self.retrieval.default_top_k = parse_env(path, value)?;
            }
            "RETRIEVAL__MAX_TOP_K" => self.retrieval.max_top_k = parse_env(path, value)?,
            "SEARCH__SEMANTIC_WEIGHT" => self.search.semantic_weight = parse_env(path, value)?,
            "SEARCH__LEXICAL_WEIGHT" => self.search.lexical_weight = parse_env(path, value)?,
            "ANSWER__CONTEXT_CHAR_BUDGET" => {
                self.answer.context_char_budget = parse_env(path, value)?;
            }
            "ANSWER__FAST_PATH" => self.answer.fast_path = parse_env(path, value)?,
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            MailsageError::Config("Cannot determine config directory".to_string())
        })?;

        Ok(config_dir.join("mailsage").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| MailsageError::Config("Cannot determine data directory".to_string()))?;

        Ok(data_dir.join("mailsage"))
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| MailsageError::InvalidConfigValue {
            path: path.to_string(),
            message: format!("Cannot parse '{}'", value),
        })
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = Self::default_data_dir().unwrap_or_else(|_| PathBuf::from(".mailsage"));

        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir,
                database_file: default_database_file(),
            },
            embedding: EmbeddingConfig {
                model: "all-MiniLM-L6-v2".to_string(),
                batch_size: 32,
                max_concurrent_batches: default_max_concurrent_batches(),
                chunk_size: default_chunk_size(),
                chunk_overlap: default_chunk_overlap(),
            },
            indexing: IndexingConfig {
                vector_dim: 384,
                hnsw_ef_construction: 200,
                hnsw_m: 16,
                hnsw_ef_search: default_ef_search(),
                max_elements: default_max_elements(),
            },
            retrieval: RetrievalConfig::default(),
            query: QueryConfig::default(),
            search: SearchConfig::default(),
            answer: AnswerConfig::default(),
            llm: LlmConfig::default(),
            profiles: HashMap::new(),
        }
    }
}
