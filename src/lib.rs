// SPDX-License-Identifier: MIT OR Apache-2.0

//! ragpipe - Local retrieval pipeline library
//!
//! Splits documents into overlapping chunks, embeds them, persists the
//! vectors in SQLite and answers similarity queries with grounding context.

pub mod cancel;
pub mod config;
pub mod context;
pub mod embedding;
pub mod errors;
pub mod output;
pub mod pipeline;
pub mod retriever;
pub mod source;

pub use cancel::CancelFlag;
pub use errors::{RagError, Result};
pub use pipeline::{IngestOptions, IngestReport, Pipeline};
pub use retriever::{Match, RetrievalConfig, Retriever};
pub use source::{source_id_for, DirectorySource, Document, DocumentSource};
