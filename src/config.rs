//! Pipeline configuration
//!
//! Loaded from a TOML file, then overridden by environment variables.
//! Every field has a default so a partial file is valid.

use crate::error::{PipelineError, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_API_KEY: &str = "EXCHANGE_API_KEY";
pub const ENV_BASE_URL: &str = "EXCHANGE_BASE_URL";
pub const ENV_DB_URI: &str = "DB_URI";
pub const ENV_ENRICHMENT_KEY: &str = "OPENAI_API_KEY";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default = "default_pipeline_version")]
    pub pipeline_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_currency")]
    pub base_currency: String,
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// SQLite database file; no mirror when unset
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// Mirror retries sleep on the calling thread; each delay is capped
    /// at 500ms
    #[serde(default = "default_mirror_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_mirror_delay_ms")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_window")]
    pub window: usize,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

/// Which text generator backs the enrichment gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentMode {
    #[default]
    Simulated,
    Chat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default)]
    pub mode: EnrichmentMode,
    #[serde(default = "default_chat_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_enrichment_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_enrichment_timeout")]
    pub timeout_secs: u64,
    /// Prompt preamble; the built-in analyst instruction when unset
    #[serde(default)]
    pub instruction: Option<String>,
}

fn default_pipeline_version() -> String {
    "1.0".to_string()
}

fn default_base_currency() -> String {
    "USD".to_string()
}

fn default_source_timeout() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_mirror_attempts() -> u32 {
    3
}

fn default_mirror_delay_ms() -> u64 {
    100
}

/// Upper bound for a single mirror backoff
const MIRROR_MAX_DELAY: Duration = Duration::from_millis(500);

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_window() -> usize {
    30
}

fn default_top_n() -> usize {
    5
}

fn default_chat_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_enrichment_attempts() -> u32 {
    3
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    500
}

fn default_enrichment_timeout() -> u64 {
    30
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            retry: RetryConfig::default(),
            storage: StorageConfig::default(),
            mirror: MirrorConfig::default(),
            metrics: MetricsConfig::default(),
            enrichment: EnrichmentConfig::default(),
            pipeline_version: default_pipeline_version(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            base_currency: default_base_currency(),
            timeout_secs: default_source_timeout(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            logs_dir: default_logs_dir(),
        }
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            retry_attempts: default_mirror_attempts(),
            retry_delay_ms: default_mirror_delay_ms(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            top_n: default_top_n(),
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            mode: EnrichmentMode::default(),
            api_url: default_chat_url(),
            api_key: String::new(),
            model: default_model(),
            max_attempts: default_enrichment_attempts(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_enrichment_timeout(),
            instruction: None,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

impl MirrorConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_delay_ms).min(MIRROR_MAX_DELAY),
            MIRROR_MAX_DELAY,
        )
    }
}

impl PipelineConfig {
    /// Load from `path` (defaults when the file does not exist), then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => Self::from_file(p)?,
            Some(p) => {
                log::warn!("Config file {} not found, using defaults", p.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
            .map_err(|e| PipelineError::ConfigError(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(contents: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production)
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty(ENV_API_KEY) {
            self.source.api_key = key;
        }
        if let Some(url) = non_empty(ENV_BASE_URL) {
            self.source.base_url = url;
        }
        if let Some(db) = non_empty(ENV_DB_URI) {
            let path = db.strip_prefix("sqlite://").unwrap_or(&db).to_string();
            self.mirror.db_path = Some(PathBuf::from(path));
        }
        if let Some(key) = non_empty(ENV_ENRICHMENT_KEY) {
            self.enrichment.api_key = key;
        }
    }

    /// Check the settings a full run depends on
    pub fn validate(&self) -> Result<()> {
        if self.source.base_url.trim().is_empty() {
            return Err(PipelineError::ConfigError(format!(
                "rate source base URL is not set (use [source].base_url or {})",
                ENV_BASE_URL
            )));
        }
        if self.source.api_key.trim().is_empty() {
            return Err(PipelineError::ConfigError(format!(
                "rate source API key is not set (use [source].api_key or {})",
                ENV_API_KEY
            )));
        }
        if !crate::types::is_currency_code(&self.source.base_currency) {
            return Err(PipelineError::ConfigError(format!(
                "invalid base currency: {}",
                self.source.base_currency
            )));
        }
        if self.metrics.window < 2 {
            return Err(PipelineError::ConfigError(
                "metrics window must be at least 2".to_string(),
            ));
        }
        if self.enrichment.mode == EnrichmentMode::Chat && self.enrichment.api_key.is_empty() {
            return Err(PipelineError::ConfigError(format!(
                "chat enrichment needs an API key (use [enrichment].api_key or {})",
                ENV_ENRICHMENT_KEY
            )));
        }
        #[cfg(not(feature = "rusqlite-support"))]
        if self.mirror.db_path.is_some() {
            return Err(PipelineError::ConfigError(
                "relational mirror configured but built without rusqlite-support".to_string(),
            ));
        }
        Ok(())
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source.timeout_secs)
    }
}
