//! Configuration management for the Lexigraph pipeline
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/local.toml)
//! - Default values
//!
//! Required keys are checked by [`AppConfig::validate`] before the pipeline
//! opens any network connection, so a missing prompt or endpoint fails fast
//! instead of deep inside a model request.

use crate::errors::{PipelineError, Result};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Feed source configuration
    pub feed: FeedConfig,

    /// Local storage configuration (documents, batch files, metrics)
    pub storage: StorageConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Model configuration (keyword + definition extraction)
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    /// Category query, e.g. "cs.AI"
    #[serde(default = "default_category")]
    pub category: String,

    /// Maximum number of entries to request per run
    #[serde(default = "default_max_results")]
    pub max_results: u32,

    /// Feed API endpoint
    #[serde(default = "default_feed_endpoint")]
    pub endpoint: String,

    /// Request timeout in seconds
    #[serde(default = "default_feed_timeout")]
    pub timeout_secs: u64,

    /// Courtesy delay before each document download, in seconds
    #[serde(default = "default_download_delay")]
    pub download_delay_secs: u64,

    /// Document download timeout in seconds
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root directory for documents, batch files, and metrics logs
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Text extraction method: "lopdf" or "pdf-extract"
    #[serde(default = "default_extraction_method")]
    pub extraction_method: String,

    /// Days to keep per-run document directories
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Keyword model endpoint (local streaming server)
    pub keyword_endpoint: Option<String>,

    /// Keyword model name
    #[serde(default = "default_keyword_model")]
    pub keyword_model: String,

    /// Prompt prefix for keyword extraction; the abstract is appended
    pub keyword_prompt: Option<String>,

    /// Definition provider: "local" or "hosted"
    #[serde(default = "default_definition_provider")]
    pub definition_provider: String,

    /// Definition model endpoint
    pub definition_endpoint: Option<String>,

    /// Definition model name
    #[serde(default = "default_definition_model")]
    pub definition_model: String,

    /// Prompt prefix for definition extraction; keywords and full text
    /// are appended
    pub definition_prompt: Option<String>,

    /// API key for the hosted provider
    pub api_key: Option<String>,

    /// Context window passed to the local model server
    #[serde(default = "default_num_ctx")]
    pub num_ctx: u32,

    /// Model request timeout in seconds (long: full papers in context)
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

// Default value functions
fn default_category() -> String { "cs.AI".to_string() }
fn default_max_results() -> u32 { 200 }
fn default_feed_endpoint() -> String { "http://export.arxiv.org/api/query".to_string() }
fn default_feed_timeout() -> u64 { 30 }
fn default_download_delay() -> u64 { 3 }
fn default_download_timeout() -> u64 { 120 }
fn default_data_dir() -> PathBuf { PathBuf::from("./data") }
fn default_extraction_method() -> String { "lopdf".to_string() }
fn default_retention_days() -> u32 { 7 }
fn default_database_path() -> PathBuf { PathBuf::from("./data/lexigraph.db") }
fn default_keyword_model() -> String { "gemma3:12b".to_string() }
fn default_definition_provider() -> String { "local".to_string() }
fn default_definition_model() -> String { "gemma3:12b".to_string() }
fn default_num_ctx() -> u32 { 65536 }
fn default_llm_timeout() -> u64 { 600 }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__FEED__CATEGORY=cs.LG
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Check that every key the pipeline will need is present and
    /// well-formed. Called once at startup, before any network activity.
    pub fn validate(&self) -> Result<()> {
        if self.llm.keyword_endpoint.as_deref().unwrap_or("").is_empty() {
            return Err(PipelineError::MissingConfig { key: "llm.keyword_endpoint".into() });
        }
        if self.llm.keyword_prompt.as_deref().unwrap_or("").is_empty() {
            return Err(PipelineError::MissingConfig { key: "llm.keyword_prompt".into() });
        }
        if self.llm.definition_endpoint.as_deref().unwrap_or("").is_empty() {
            return Err(PipelineError::MissingConfig { key: "llm.definition_endpoint".into() });
        }
        if self.llm.definition_prompt.as_deref().unwrap_or("").is_empty() {
            return Err(PipelineError::MissingConfig { key: "llm.definition_prompt".into() });
        }

        match self.llm.definition_provider.as_str() {
            "local" => {}
            "hosted" => {
                if self.llm.api_key.as_deref().unwrap_or("").is_empty() {
                    return Err(PipelineError::MissingConfig { key: "llm.api_key".into() });
                }
            }
            other => {
                return Err(PipelineError::InvalidConfig {
                    key: "llm.definition_provider".into(),
                    message: format!("unknown provider '{}', expected 'local' or 'hosted'", other),
                });
            }
        }

        match self.storage.extraction_method.as_str() {
            "lopdf" | "pdf-extract" => {}
            other => {
                return Err(PipelineError::InvalidConfig {
                    key: "storage.extraction_method".into(),
                    message: format!(
                        "unknown extraction method '{}', expected 'lopdf' or 'pdf-extract'",
                        other
                    ),
                });
            }
        }

        Ok(())
    }

    /// Get the feed request timeout as Duration
    pub fn feed_timeout(&self) -> Duration {
        Duration::from_secs(self.feed.timeout_secs)
    }

    /// Get the document download timeout as Duration
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.feed.download_timeout_secs)
    }

    /// Get the model request timeout as Duration
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.timeout_secs)
    }

    /// Directory holding downloaded documents for one run date
    pub fn documents_dir(&self, run_date: &str) -> PathBuf {
        self.storage.data_dir.join("pdfs").join(format!("papers_{}", run_date))
    }

    /// Path of the intermediate batch file for one run date
    pub fn batch_path(&self, run_date: &str) -> PathBuf {
        self.storage
            .data_dir
            .join("metadata")
            .join(format!("metadata_{}.json", run_date))
    }

    /// Path of the metrics export log for one run date
    pub fn metrics_path(&self, run_date: &str) -> PathBuf {
        self.storage
            .data_dir
            .join("metrics")
            .join(format!("metrics_{}.jsonl", run_date))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            feed: FeedConfig {
                category: default_category(),
                max_results: default_max_results(),
                endpoint: default_feed_endpoint(),
                timeout_secs: default_feed_timeout(),
                download_delay_secs: default_download_delay(),
                download_timeout_secs: default_download_timeout(),
            },
            storage: StorageConfig {
                data_dir: default_data_dir(),
                extraction_method: default_extraction_method(),
                retention_days: default_retention_days(),
            },
            database: DatabaseConfig { path: default_database_path() },
            llm: LlmConfig {
                keyword_endpoint: None,
                keyword_model: default_keyword_model(),
                keyword_prompt: None,
                definition_provider: default_definition_provider(),
                definition_endpoint: None,
                definition_model: default_definition_model(),
                definition_prompt: None,
                api_key: None,
                num_ctx: default_num_ctx(),
                timeout_secs: default_llm_timeout(),
            },
        }
    }
}
