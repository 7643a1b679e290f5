// SPDX-License-Identifier: MIT OR Apache-2.0

//! Subcommand implementations

pub mod chunk;
pub mod ingest;
pub mod query;
pub mod reset;
pub mod status;
pub mod watch;

use anyhow::{Context, Result};
use ragpipe::config::Config;
use ragpipe::embedding::{EmbeddingChunker, VectorStore};
use ragpipe::output;
use ragpipe::{IngestOptions, Pipeline, Retriever};
use serde::Serialize;

use crate::cli::OutputFormat;

/// Settings shared by every subcommand.
pub struct Session {
    pub config: Config,
    pub format: OutputFormat,
    pub compact: bool,
    pub use_color: bool,
}

impl Session {
    pub fn new(config: Config, format: OutputFormat, compact: bool) -> Self {
        Self {
            config,
            format,
            compact,
            use_color: output::use_colors(),
        }
    }

    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    pub fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", output::to_json(value, self.compact)?);
        Ok(())
    }

    pub fn open_store(&self) -> Result<VectorStore> {
        let path = self.config.store.path();
        VectorStore::open(&path)
            .with_context(|| format!("Failed to open vector store {}", path.display()))
    }
}

/// Assembles a pipeline from `config`.
pub fn build_pipeline(
    session: &Session,
    config: &Config,
    options: IngestOptions,
) -> Result<Pipeline> {
    let store = session.open_store()?;
    let stored_model = store.model_id()?;
    let provider = config
        .build_provider(stored_model.as_deref())
        .context("Failed to set up embedding provider")?;

    Ok(Pipeline::new(store, provider)
        .with_chunker(EmbeddingChunker::new(config.chunk_config()?))
        .with_retriever(Retriever::new(config.retrieval_config()?))
        .with_retry(config.retry_policy())
        .with_options(options))
}
