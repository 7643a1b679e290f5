// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration file support for ragpipe
//!
//! Loads configuration from .ragpiperc.toml in current directory or
//! ~/.config/ragpipe/config.toml. Environment overrides are applied once at
//! start-up; the resulting struct is then passed around explicitly.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::context::DEFAULT_MAX_CONTEXT_CHARS;
use crate::embedding::chunker::{
    ChunkConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_DOCUMENT_BYTES,
};
#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
use crate::embedding::provider::FastEmbedder;
use crate::embedding::provider::{
    CommandProvider, EmbeddingProvider, HashingProvider, OllamaConfig, OllamaProvider,
    DEFAULT_EMBED_TIMEOUT, DEFAULT_HASHING_DIM, DEFAULT_OLLAMA_BASE_URL,
};
use crate::embedding::retry::RetryPolicy;
use crate::embedding::storage::DEFAULT_STORE_PATH;
use crate::errors::{RagError, Result};
use crate::pipeline::{IngestOptions, DEFAULT_WORKERS};
use crate::retriever::{RetrievalConfig, DEFAULT_MIN_SIMILARITY, DEFAULT_TOP_K};
use crate::source::DEFAULT_EXTENSIONS;

pub const CONFIG_FILE_NAME: &str = ".ragpiperc.toml";
pub const DEFAULT_SOURCE_DIR: &str = "scraped_pages";
pub const DEFAULT_ERROR_LOG: &str = "logs/errorlogs.txt";

/// Embedding provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Ollama HTTP server
    #[default]
    Ollama,
    /// External command speaking JSON over stdin/stdout
    Command,
    /// Local fastembed model
    Builtin,
    /// Offline feature hashing
    Hashing,
}

impl FromStr for ProviderKind {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "command" => Ok(Self::Command),
            "builtin" | "fastembed" => Ok(Self::Builtin),
            "hashing" => Ok(Self::Hashing),
            other => Err(RagError::config(format!(
                "unknown embedding provider '{}' (expected ollama, command, builtin or hashing)",
                other
            ))),
        }
    }
}

/// Document source configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Directory holding the documents
    pub dir: Option<PathBuf>,
    /// File extensions to ingest
    pub extensions: Option<Vec<String>>,
}

impl SourcesConfig {
    /// Get source directory (defaults to "scraped_pages")
    pub fn dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SOURCE_DIR))
    }

    /// Get extensions (defaults to "txt")
    pub fn extensions(&self) -> Vec<String> {
        self.extensions
            .clone()
            .unwrap_or_else(|| DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect())
    }
}

/// Chunking configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Characters per chunk
    pub chunk_size: Option<i64>,
    /// Characters shared by consecutive chunks
    pub overlap: Option<i64>,
}

/// Embedding configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    /// Provider type (ollama, command, builtin, hashing)
    pub provider: Option<ProviderKind>,
    /// Model identifier for the embedding provider
    pub model: Option<String>,
    /// Ollama base URL
    pub base_url: Option<String>,
    /// Command to execute for command provider
    pub command: Option<String>,
    /// Per-call timeout in seconds
    pub timeout_secs: Option<u64>,
    /// Texts per embedder call
    pub batch_size: Option<usize>,
    /// Vector dimension (hashing provider, optional check for command provider)
    pub dimension: Option<usize>,
}

impl EmbeddingsConfig {
    /// Get provider type (defaults to Ollama)
    pub fn provider(&self) -> ProviderKind {
        self.provider.unwrap_or_default()
    }

    /// Get Ollama base URL (defaults to http://127.0.0.1:11434)
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_OLLAMA_BASE_URL)
    }

    /// Get command (defaults to "embedder")
    pub fn command(&self) -> &str {
        self.command.as_deref().unwrap_or("embedder")
    }

    /// Get timeout (defaults to 60s)
    pub fn timeout(&self) -> Duration {
        self.timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_EMBED_TIMEOUT)
    }
}

/// Retrieval configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    pub top_k: Option<i64>,
    pub min_similarity: Option<f32>,
    /// Budget for the packed grounding context
    pub max_context_chars: Option<usize>,
}

impl RetrievalSection {
    /// Get context budget (defaults to 3600)
    pub fn max_context_chars(&self) -> usize {
        self.max_context_chars.unwrap_or(DEFAULT_MAX_CONTEXT_CHARS)
    }
}

/// Store configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    /// Get database path (defaults to artifacts/ingest/rag.sqlite3)
    pub fn path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH))
    }
}

/// Ingestion configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub workers: Option<usize>,
    pub prune_missing: Option<bool>,
    /// Maximum document size in bytes
    pub max_document_bytes: Option<usize>,
    pub max_retries: Option<u32>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// File receiving ERROR-level events
    pub error_log: Option<PathBuf>,
    /// Disable the error log file entirely
    pub error_log_enabled: Option<bool>,
}

impl LoggingConfig {
    /// Get the error log path, or `None` when disabled (defaults to logs/errorlogs.txt)
    pub fn error_log(&self) -> Option<PathBuf> {
        if !self.error_log_enabled.unwrap_or(true) {
            return None;
        }
        Some(
            self.error_log
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ERROR_LOG)),
        )
    }
}

/// Configuration loaded from .ragpiperc.toml or ~/.config/ragpipe/config.toml
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sources: SourcesConfig,
    pub chunking: ChunkingConfig,
    pub embeddings: EmbeddingsConfig,
    pub retrieval: RetrievalSection,
    pub store: StoreConfig,
    pub ingest: IngestConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from files
    ///
    /// Precedence (highest to lowest):
    /// 1. .ragpiperc.toml in current directory
    /// 2. ~/.config/ragpipe/config.toml
    pub fn load() -> Result<Self> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.is_file() {
            return Self::load_file(&local);
        }

        if let Some(config_dir) = dirs::home_dir().map(|h| h.join(".config").join("ragpipe")) {
            let path = config_dir.join("config.toml");
            if path.is_file() {
                return Self::load_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from an explicit path
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| RagError::io(path, e))?;
        toml::from_str(&content)
            .map_err(|e| RagError::config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Applies environment overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Applies environment overrides read through `get`.
    pub fn apply_env_from<F>(&mut self, get: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        if let Some(raw) = value("RAGPIPE_CHUNK_SIZE") {
            self.chunking.chunk_size = Some(parse_env("RAGPIPE_CHUNK_SIZE", &raw)?);
        }
        if let Some(raw) = value("RAGPIPE_CHUNK_OVERLAP") {
            self.chunking.overlap = Some(parse_env("RAGPIPE_CHUNK_OVERLAP", &raw)?);
        }
        if let Some(raw) = value("RAGPIPE_TOP_K") {
            self.retrieval.top_k = Some(parse_env("RAGPIPE_TOP_K", &raw)?);
        }
        if let Some(raw) = value("RAGPIPE_MIN_SIMILARITY") {
            self.retrieval.min_similarity = Some(parse_env("RAGPIPE_MIN_SIMILARITY", &raw)?);
        }
        if let Some(raw) = value("RAGPIPE_PROVIDER") {
            self.embeddings.provider = Some(raw.parse()?);
        }
        if let Some(raw) = value("OLLAMA_BASE_URL") {
            self.embeddings.base_url = Some(raw.trim().to_string());
        }
        if let Some(raw) = value("OLLAMA_EMBED_MODEL") {
            self.embeddings.model = Some(raw.trim().to_string());
        }
        Ok(())
    }

    /// Validated chunking parameters.
    pub fn chunk_config(&self) -> Result<ChunkConfig> {
        ChunkConfig::from_signed(
            self.chunking.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE as i64),
            self.chunking.overlap.unwrap_or(DEFAULT_CHUNK_OVERLAP as i64),
        )
    }

    /// Validated retrieval parameters.
    pub fn retrieval_config(&self) -> Result<RetrievalConfig> {
        let top_k = self.retrieval.top_k.unwrap_or(DEFAULT_TOP_K as i64);
        if top_k <= 0 {
            return Err(RagError::config(format!(
                "top_k must be greater than 0 (got {})",
                top_k
            )));
        }
        let top_k = usize::try_from(top_k)
            .map_err(|_| RagError::config("top_k does not fit in usize"))?;
        RetrievalConfig::new(
            top_k,
            self.retrieval.min_similarity.unwrap_or(DEFAULT_MIN_SIMILARITY),
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_retries: self.ingest.max_retries.unwrap_or(defaults.max_retries),
            backoff_base_ms: self.ingest.backoff_base_ms.unwrap_or(defaults.backoff_base_ms),
            backoff_max_ms: self.ingest.backoff_max_ms.unwrap_or(defaults.backoff_max_ms),
        }
    }

    pub fn ingest_options(&self) -> Result<IngestOptions> {
        let workers = self.ingest.workers.unwrap_or(DEFAULT_WORKERS);
        if workers == 0 {
            return Err(RagError::config("ingest.workers must be greater than 0"));
        }
        Ok(IngestOptions {
            workers,
            prune_missing: self.ingest.prune_missing.unwrap_or(false),
            force: false,
            max_document_bytes: self
                .ingest
                .max_document_bytes
                .unwrap_or(DEFAULT_MAX_DOCUMENT_BYTES),
            show_progress: false,
        })
    }

    /// Builds the configured embedding provider.
    ///
    /// `stored_model` is the model recorded in the store; the Ollama provider
    /// falls back to it when no model is configured.
    pub fn build_provider(&self, stored_model: Option<&str>) -> Result<Box<dyn EmbeddingProvider>> {
        let embeddings = &self.embeddings;
        let model = embeddings
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty());

        match embeddings.provider() {
            ProviderKind::Ollama => {
                let model = model.or(stored_model).ok_or_else(|| {
                    RagError::config(
                        "no embedding model configured; set OLLAMA_EMBED_MODEL or embeddings.model",
                    )
                })?;
                let mut config = OllamaConfig::new(model);
                config.base_url = embeddings.base_url().to_string();
                config.timeout = embeddings.timeout();
                if let Some(batch_size) = embeddings.batch_size {
                    config.batch_size = batch_size;
                }
                Ok(Box::new(OllamaProvider::new(config)?))
            }
            ProviderKind::Command => {
                let mut provider =
                    CommandProvider::new(embeddings.command(), model.unwrap_or("command"))?
                        .with_timeout(embeddings.timeout())
                        .with_dimension(embeddings.dimension);
                if let Some(batch_size) = embeddings.batch_size {
                    provider = provider.with_batch_size(batch_size);
                }
                Ok(Box::new(provider))
            }
            ProviderKind::Hashing => Ok(Box::new(HashingProvider::new(
                embeddings.dimension.unwrap_or(DEFAULT_HASHING_DIM),
            )?)),
            #[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
            ProviderKind::Builtin => Ok(Box::new(FastEmbedder::new()?)),
            #[cfg(all(target_os = "macos", target_arch = "x86_64"))]
            ProviderKind::Builtin => Err(RagError::config(
                "the builtin provider is not available on this platform",
            )),
        }
    }
}

fn parse_env<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| RagError::config(format!("invalid {} value: {}", key, raw.trim())))
}
