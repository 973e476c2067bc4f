#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::embeddings::{Device, EncoderBackend};
use crate::retry::RetryPolicy;

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub retriever: RetrieverConfig,
    #[serde(default)]
    pub generation: GenerationServiceConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Which encoder to run and where
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EncoderConfig {
    pub backend: EncoderBackend,
    /// Model name (Ollama) or model identifier recorded with the index
    pub model: String,
    pub device: Device,
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub batch_size: u32,
    /// Inputs longer than this many tokens are truncated
    pub max_tokens: u32,
    /// Output width of the hashing encoder
    pub dimension: u32,
    pub timeout_secs: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            backend: EncoderBackend::Ollama,
            model: "nomic-embed-text:latest".to_string(),
            device: Device::Cpu,
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            batch_size: 32,
            max_tokens: 512,
            dimension: 384,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrieverConfig {
    pub batch_size: u32,
    pub save_every: u64,
    /// Candidates fetched per requested result, to absorb duplicate texts
    pub oversample: u32,
    pub default_topk: u32,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            save_every: 1_000_000,
            oversample: 10,
            default_topk: 10,
        }
    }
}

/// OpenAI-compatible text generation endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GenerationServiceConfig {
    pub endpoint: String,
    pub model_name: String,
    pub timeout_secs: u64,
    pub api_key: Option<String>,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub system_message: String,
}

impl Default for GenerationServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000/v1".to_string(),
            model_name: "llama8b".to_string(),
            timeout_secs: 100,
            api_key: None,
            max_attempts: 3,
            backoff_ms: 1000,
            system_message: "You are a helpful assistant.".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 8 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid max tokens: {0} (must be between 1 and 8192)")]
    InvalidMaxTokens(u32),
    #[error("Invalid checkpoint interval: {0} (must be greater than 0)")]
    InvalidSaveEvery(u64),
    #[error("Invalid oversample factor: {0} (must be between 1 and 100)")]
    InvalidOversample(u32),
    #[error("Invalid default topk: {0} (must be greater than 0)")]
    InvalidTopk(u32),
    #[error("Invalid attempt count: {0} (must be between 1 and 10)")]
    InvalidMaxAttempts(u32),
    #[error("Invalid timeout: {0} (must be between 1 and 3600 seconds)")]
    InvalidTimeout(u64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            encoder: EncoderConfig::default(),
            retriever: RetrieverConfig::default(),
            generation: GenerationServiceConfig::default(),
            base_dir: Self::config_dir().unwrap_or_else(|_| PathBuf::from(".hop-retriever")),
        }
    }
}

impl Config {
    /// Default base directory, `~/.hop-retriever`
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".hop-retriever"))
            .or_else(|| dirs::data_dir().map(|data| data.join("hop-retriever")))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                self.base_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.base_dir.join(CONFIG_FILE_NAME)
    }

    /// Default output directory for an index built in `mode` ("passage" or "qa")
    #[inline]
    pub fn index_dir(&self, mode: &str) -> PathBuf {
        self.base_dir.join("index").join(mode)
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.encoder.validate()?;
        self.retriever.validate()?;
        self.generation.validate()?;
        Ok(())
    }

    #[inline]
    pub fn encoder_url(&self) -> Result<Url, ConfigError> {
        self.encoder.base_url()
    }
}

fn validate_batch_size(batch_size: u32) -> Result<(), ConfigError> {
    if batch_size == 0 || batch_size > 1000 {
        return Err(ConfigError::InvalidBatchSize(batch_size));
    }
    Ok(())
}

impl EncoderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        self.base_url()?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        validate_batch_size(self.batch_size)?;

        if self.max_tokens == 0 || self.max_tokens > 8192 {
            return Err(ConfigError::InvalidMaxTokens(self.max_tokens));
        }

        // Only the hashing encoder reads the configured width
        if self.backend == EncoderBackend::Hashing && !(8..=4096).contains(&self.dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(self.dimension));
        }

        if self.timeout_secs == 0 || self.timeout_secs > 3600 {
            return Err(ConfigError::InvalidTimeout(self.timeout_secs));
        }

        Ok(())
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn set_batch_size(&mut self, batch_size: u32) -> Result<(), ConfigError> {
        validate_batch_size(batch_size)?;
        self.batch_size = batch_size;
        Ok(())
    }

    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }
}

impl RetrieverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_batch_size(self.batch_size)?;

        if self.save_every == 0 {
            return Err(ConfigError::InvalidSaveEvery(self.save_every));
        }

        if !(1..=100).contains(&self.oversample) {
            return Err(ConfigError::InvalidOversample(self.oversample));
        }

        if self.default_topk == 0 {
            return Err(ConfigError::InvalidTopk(self.default_topk));
        }

        Ok(())
    }
}

impl GenerationServiceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.endpoint)
            .map_err(|_| ConfigError::InvalidUrl(self.endpoint.clone()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidProtocol(url.scheme().to_string()));
        }

        if self.model_name.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model_name.clone()));
        }

        if !(1..=10).contains(&self.max_attempts) {
            return Err(ConfigError::InvalidMaxAttempts(self.max_attempts));
        }

        if self.timeout_secs == 0 || self.timeout_secs > 3600 {
            return Err(ConfigError::InvalidTimeout(self.timeout_secs));
        }

        Ok(())
    }

    /// Endpoint URL with a trailing slash so relative joins keep the `/v1` prefix
    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        let mut endpoint = self.endpoint.clone();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        Url::parse(&endpoint).map_err(|_| ConfigError::InvalidUrl(self.endpoint.clone()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_ms))
    }
}
