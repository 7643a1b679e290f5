// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pipeline orchestrator - ingestion into the vector store and query answering
//!
//! A [`Pipeline`] owns the store, the embedding provider and the chunking and
//! retrieval settings. Everything is passed in at construction; nothing is
//! read from the environment here.

pub mod ingest;
pub mod watch;

pub use ingest::{IngestReport, SourceFailure};
pub use watch::{SourceWatcher, WatchEvent};

use tracing::debug;

use crate::cancel::CancelFlag;
use crate::embedding::chunker::{EmbeddingChunker, DEFAULT_MAX_DOCUMENT_BYTES};
use crate::embedding::provider::EmbeddingProvider;
use crate::embedding::retry::{embed_with_retry, RetryPolicy};
use crate::embedding::storage::VectorStore;
use crate::embedding::vector::Embedding;
use crate::errors::{RagError, Result};
use crate::retriever::{Match, Retriever};

pub const DEFAULT_WORKERS: usize = 4;

/// Knobs for an ingestion run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Size of the embedding worker pool.
    pub workers: usize,
    /// Delete sources that are in the store but not in the document list.
    pub prune_missing: bool,
    /// Re-embed and rewrite every source, ignoring the embedding cache.
    pub force: bool,
    /// Documents larger than this many bytes are skipped.
    pub max_document_bytes: usize,
    pub show_progress: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            prune_missing: false,
            force: false,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
            show_progress: false,
        }
    }
}

/// Chunk, embed, store and retrieve.
pub struct Pipeline {
    store: VectorStore,
    provider: Box<dyn EmbeddingProvider>,
    chunker: EmbeddingChunker,
    retriever: Retriever,
    retry: RetryPolicy,
    options: IngestOptions,
}

impl Pipeline {
    /// Creates a pipeline with default chunking, retrieval and retry settings.
    pub fn new(store: VectorStore, provider: Box<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            provider,
            chunker: EmbeddingChunker::default(),
            retriever: Retriever::default(),
            retry: RetryPolicy::default(),
            options: IngestOptions::default(),
        }
    }

    pub fn with_chunker(mut self, chunker: EmbeddingChunker) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_retriever(mut self, retriever: Retriever) -> Self {
        self.retriever = retriever;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_options(mut self, options: IngestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn provider(&self) -> &dyn EmbeddingProvider {
        self.provider.as_ref()
    }

    pub fn chunker(&self) -> &EmbeddingChunker {
        &self.chunker
    }

    pub fn options(&self) -> &IngestOptions {
        &self.options
    }

    /// Fails when the store already holds vectors of another model.
    pub(crate) fn ensure_same_model(&self) -> Result<()> {
        match self.store.model_id()? {
            Some(stored) if stored != self.provider.model_id() => Err(RagError::ModelMismatch {
                stored,
                requested: self.provider.model_id().to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Embeds query text through the retry policy.
    pub fn embed_query(&self, text: &str) -> Result<Embedding> {
        let texts = [text.to_string()];
        let mut embeddings =
            embed_with_retry(self.provider.as_ref(), &texts, &self.retry, &CancelFlag::new())?;
        embeddings
            .pop()
            .ok_or_else(|| RagError::EmbedderResponse("no embedding returned".to_string()))
    }

    /// Returns the chunks most similar to `text`.
    ///
    /// An empty store answers with no matches without calling the embedder.
    pub fn query(&self, text: &str) -> Result<Vec<Match>> {
        if text.trim().is_empty() {
            return Err(RagError::config("query text is empty"));
        }
        if self.store.dimension()?.is_none() {
            debug!("store is empty; skipping query embedding");
            return Ok(Vec::new());
        }
        self.ensure_same_model()?;

        let query = self.embed_query(text)?;
        self.retriever.retrieve(&self.store, &query)
    }
}
