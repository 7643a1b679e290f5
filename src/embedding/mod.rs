// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding module - chunking, embedding providers and vector storage
//!
//! Documents are split into overlapping chunks, embedded through an
//! [`EmbeddingProvider`], and persisted in a SQLite-backed [`VectorStore`].

pub mod chunker;
pub mod provider;
pub mod retry;
pub mod storage;
pub mod vector;

pub use chunker::{chunk, Chunk, ChunkConfig, EmbeddingChunker};
#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
pub use provider::FastEmbedder;
pub use provider::{
    CommandProvider, EmbeddingProvider, HashingProvider, OllamaConfig, OllamaProvider,
};
pub use retry::{embed_with_retry, RetryPolicy};
pub use storage::{EmbeddedChunk, RefreshOutcome, StoreScan, StoreStats, VectorStore};
pub use vector::{cosine_similarity, Embedding};
