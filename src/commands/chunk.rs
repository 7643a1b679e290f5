// SPDX-License-Identifier: MIT OR Apache-2.0

//! `ragpipe chunk`: preview chunk boundaries without embedding

use anyhow::{Context, Result};
use ragpipe::embedding::EmbeddingChunker;
use ragpipe::{source_id_for, Document};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::Session;

pub fn run(
    session: &Session,
    file: &Path,
    root: Option<PathBuf>,
    chunk_size: Option<i64>,
    overlap: Option<i64>,
) -> Result<()> {
    let mut config = session.config.clone();
    if chunk_size.is_some() {
        config.chunking.chunk_size = chunk_size;
    }
    if overlap.is_some() {
        config.chunking.overlap = overlap;
    }
    let chunker = EmbeddingChunker::new(config.chunk_config()?);

    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    // Same ids as `ingest` produces for this file.
    let root = root.unwrap_or_else(|| config.sources.dir());
    let document = Document::new(source_id_for(&root, file), text);

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for chunk in chunker.chunk(&document) {
        writeln!(out, "{}", serde_json::to_string(&chunk)?)?;
    }
    out.flush()?;
    Ok(())
}
