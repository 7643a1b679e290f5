// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error taxonomy for the retrieval pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, RagError>;

/// Errors raised by chunking, embedding, storage and retrieval.
#[derive(Debug, Error)]
pub enum RagError {
    /// Invalid chunk, overlap, top-k, similarity or other configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A vector does not match the store's established dimension.
    #[error("vector dimension mismatch for {chunk_id}: expected {expected}, got {actual}")]
    DimensionMismatch {
        chunk_id: String,
        expected: usize,
        actual: usize,
    },

    /// A vector was produced by a different embedding model than the store holds.
    #[error("embedding model mismatch: store was built with '{stored}', got '{requested}'")]
    ModelMismatch { stored: String, requested: String },

    /// The embedder could not be reached, timed out, or reported a transient failure.
    #[error("embedder unavailable: {0}")]
    EmbedderUnavailable(String),

    /// The embedder answered, but the answer is unusable.
    #[error("embedder returned an invalid response: {0}")]
    EmbedderResponse(String),

    /// Persistence failed mid-batch; the transaction was rolled back.
    #[error("store write failed: {0}")]
    StoreWrite(#[source] rusqlite::Error),

    #[error("store read failed: {0}")]
    StoreRead(#[source] rusqlite::Error),

    /// A stored record could not be decoded.
    #[error("corrupt record {chunk_id}: {reason}")]
    CorruptRecord { chunk_id: String, reason: String },

    /// The operation observed a raised cancel flag and left the store untouched.
    #[error("operation cancelled")]
    Cancelled,

    #[error("no documents found in {}", .0.display())]
    NoDocuments(PathBuf),

    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RagError {
    /// Builds a configuration error from any message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Only transient embedder failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::EmbedderUnavailable(_))
    }
}
