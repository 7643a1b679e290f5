// SPDX-License-Identifier: MIT OR Apache-2.0

//! Text chunker for embedding generation.
//!
//! Documents are split into fixed-size character windows that advance by
//! `chunk_size - overlap`. Offsets count Unicode scalar values (Rust `char`s),
//! never bytes, so a window can never split a multi-byte character and the
//! overlap between neighbours is exactly `overlap` characters.

use serde::Serialize;

use crate::errors::{RagError, Result};
use crate::source::Document;

/// Default number of characters per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1200;

/// Default overlap between consecutive chunks.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Maximum document size in bytes for embedding generation.
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 2_000_000;

/// Configuration for the text chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Number of characters per chunk.
    chunk_size: usize,
    /// Number of characters shared by consecutive chunks.
    overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkConfig {
    /// Creates a validated ChunkConfig.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::config("chunk_size must be greater than 0"));
        }
        if overlap >= chunk_size {
            return Err(RagError::config(format!(
                "chunk overlap ({}) must be less than chunk_size ({})",
                overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    /// Validates signed values as they arrive from configuration files.
    pub fn from_signed(chunk_size: i64, overlap: i64) -> Result<Self> {
        if chunk_size <= 0 {
            return Err(RagError::config(format!(
                "chunk_size must be greater than 0 (got {})",
                chunk_size
            )));
        }
        if overlap < 0 {
            return Err(RagError::config(format!(
                "chunk overlap cannot be negative (got {})",
                overlap
            )));
        }
        let chunk_size = usize::try_from(chunk_size)
            .map_err(|_| RagError::config("chunk_size does not fit in usize"))?;
        let overlap = usize::try_from(overlap)
            .map_err(|_| RagError::config("chunk overlap does not fit in usize"))?;
        Self::new(chunk_size, overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Distance between consecutive window starts.
    pub fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

/// A window of a document, the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// Deterministic id derived from `source_id` and `sequence_index`
    pub chunk_id: String,
    pub source_id: String,
    /// Position of this chunk within its source (0-based)
    pub sequence_index: u32,
    pub text: String,
    /// Start character offset (inclusive)
    pub start_offset: usize,
    /// End character offset (exclusive)
    pub end_offset: usize,
}

impl Chunk {
    /// Length of the window in characters.
    pub fn char_len(&self) -> usize {
        self.end_offset - self.start_offset
    }

    /// blake3 digest of the chunk text, used to detect unchanged chunks.
    pub fn content_hash(&self) -> String {
        content_hash(&self.text)
    }
}

/// Hex digest of a chunk's text.
pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Builds the stable chunk id `<stem>-<hash8>-<index:04>`.
///
/// The stem keeps ids readable; the hash of the full source id keeps them
/// unique across sources that share a file name.
pub fn chunk_id_for(source_id: &str, sequence_index: u32) -> String {
    let stem = source_id
        .rsplit('/')
        .next()
        .map(|name| name.rsplit_once('.').map_or(name, |(stem, _)| stem))
        .filter(|stem| !stem.is_empty())
        .unwrap_or("doc");
    let stem: String = stem
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    let hash = blake3::hash(source_id.as_bytes());
    format!("{}-{}-{:04}", stem, &hash.to_hex()[..8], sequence_index)
}

/// Splits documents into overlapping chunks for embedding generation.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingChunker {
    config: ChunkConfig,
}

impl EmbeddingChunker {
    /// Creates a new chunker with the given configuration.
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// Returns the current configuration.
    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Splits a document into overlapping chunks.
    ///
    /// Algorithm:
    /// ```text
    /// start = 0
    /// loop:
    ///   end = min(start + chunk_size, total_chars)
    ///   emit text[start..end]
    ///   if end == total_chars: stop
    ///   start += chunk_size - overlap
    /// ```
    pub fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let text = document.text.as_str();
        if text.is_empty() {
            return Vec::new();
        }

        // Byte position of every char boundary, including the end of the text.
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(idx, _)| idx)
            .chain(std::iter::once(text.len()))
            .collect();
        let total_chars = boundaries.len() - 1;

        let step = self.config.step();
        let mut chunks = Vec::with_capacity(total_chars / step + 1);
        let mut start = 0usize;
        let mut sequence_index = 0u32;

        loop {
            let end = (start + self.config.chunk_size).min(total_chars);
            chunks.push(Chunk {
                chunk_id: chunk_id_for(&document.source_id, sequence_index),
                source_id: document.source_id.clone(),
                sequence_index,
                text: text[boundaries[start]..boundaries[end]].to_string(),
                start_offset: start,
                end_offset: end,
            });

            if end == total_chars {
                break;
            }
            start += step;
            sequence_index += 1;
        }

        chunks
    }
}

/// Validating free-function form of [`EmbeddingChunker::chunk`].
pub fn chunk(document: &Document, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    let config = ChunkConfig::new(chunk_size, overlap)?;
    Ok(EmbeddingChunker::new(config).chunk(document))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> Document {
        Document::new("pages/fox.txt", text)
    }

    /// Concatenates chunk texts with the overlapping prefix of each later chunk removed.
    fn reconstruct(chunks: &[Chunk]) -> String {
        let mut out = String::new();
        let mut covered = 0usize;
        for chunk in chunks {
            let skip = covered.saturating_sub(chunk.start_offset);
            out.extend(chunk.text.chars().skip(skip));
            covered = chunk.end_offset;
        }
        out
    }

    #[test]
    fn test_default_config() {
        let config = ChunkConfig::default();
        assert_eq!(config.chunk_size(), 1200);
        assert_eq!(config.overlap(), 200);
        assert_eq!(config.step(), 1000);
    }

    #[test]
    fn test_config_validation() {
        assert!(ChunkConfig::new(80, 20).is_ok());
        assert!(ChunkConfig::new(20, 0).is_ok());

        // overlap >= size
        assert!(matches!(ChunkConfig::new(20, 20), Err(RagError::Config(_))));
        assert!(matches!(ChunkConfig::new(20, 30), Err(RagError::Config(_))));

        // zero size
        assert!(matches!(ChunkConfig::new(0, 0), Err(RagError::Config(_))));
    }

    #[test]
    fn test_signed_config_validation() {
        assert!(ChunkConfig::from_signed(100, 10).is_ok());
        assert!(matches!(ChunkConfig::from_signed(-5, 0), Err(RagError::Config(_))));
        assert!(matches!(ChunkConfig::from_signed(0, 0), Err(RagError::Config(_))));
        assert!(matches!(ChunkConfig::from_signed(10, -1), Err(RagError::Config(_))));
        assert!(matches!(ChunkConfig::from_signed(10, 10), Err(RagError::Config(_))));
    }

    #[test]
    fn test_quick_brown_fox_windows() {
        let text = "The quick brown fox jumps over the lazy dog.";
        assert_eq!(text.chars().count(), 44);

        let chunks = chunk(&doc(text), 20, 5).unwrap();
        let spans: Vec<(usize, usize)> = chunks
            .iter()
            .map(|c| (c.start_offset, c.end_offset))
            .collect();
        assert_eq!(spans, vec![(0, 20), (15, 35), (30, 44)]);
        assert_eq!(chunks[0].text, "The quick brown fox ");
        assert_eq!(chunks[2].text, "over the lazy dog.");
        assert_eq!(chunks[2].char_len(), 14);
    }

    #[test]
    fn test_empty_document() {
        let chunks = chunk(&doc(""), 20, 5).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_short_document_single_chunk() {
        let chunks = chunk(&doc("tiny"), 20, 5).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "tiny");
        assert_eq!((chunks[0].start_offset, chunks[0].end_offset), (0, 4));
        assert_eq!(chunks[0].sequence_index, 0);
    }

    #[test]
    fn test_exact_multiple_has_no_trailing_sliver() {
        // 35 chars, size 20, overlap 5: [0,20) [15,35) and nothing after.
        let text = "a".repeat(35);
        let chunks = chunk(&doc(&text), 20, 5).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].end_offset, 35);
    }

    #[test]
    fn test_overlap_and_size_invariants() {
        let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. ".repeat(9);
        for (size, overlap) in [(7, 0), (7, 3), (50, 49), (64, 16), (1000, 10)] {
            let chunks = chunk(&doc(&text), size, overlap).unwrap();
            for (i, c) in chunks.iter().enumerate() {
                assert!(c.char_len() <= size);
                assert_eq!(c.sequence_index as usize, i);
                if i > 0 {
                    let prev = &chunks[i - 1];
                    assert_eq!(prev.end_offset - c.start_offset, overlap);
                }
            }
            assert_eq!(reconstruct(&chunks), text, "size={size} overlap={overlap}");
        }
    }

    #[test]
    fn test_multibyte_offsets_are_characters() {
        let text = "héllo wörld ünïcode ✓✓✓ done";
        let chunks = chunk(&doc(text), 6, 2).unwrap();
        assert_eq!(chunks[0].text, "héllo ");
        assert_eq!(chunks[1].start_offset, 4);
        assert_eq!(chunks[1].text, "o wörl");
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_chunk_ids_are_deterministic() {
        let text = "x".repeat(100);
        let first: Vec<String> = chunk(&doc(&text), 30, 10)
            .unwrap()
            .into_iter()
            .map(|c| c.chunk_id)
            .collect();
        let second: Vec<String> = chunk(&doc(&text), 30, 10)
            .unwrap()
            .into_iter()
            .map(|c| c.chunk_id)
            .collect();
        assert_eq!(first, second);
        assert!(first[0].starts_with("fox-"));
        assert!(first[0].ends_with("-0000"));
        assert!(first[1].ends_with("-0001"));
    }

    #[test]
    fn test_chunk_ids_differ_between_sources_with_same_name() {
        assert_ne!(chunk_id_for("a/fox.txt", 0), chunk_id_for("b/fox.txt", 0));
        assert_eq!(chunk_id_for("a/fox.txt", 3), chunk_id_for("a/fox.txt", 3));
    }

    #[test]
    fn test_content_hash_tracks_text() {
        let chunks = chunk(&doc("same text"), 20, 0).unwrap();
        assert_eq!(chunks[0].content_hash(), content_hash("same text"));
        assert_ne!(content_hash("same text"), content_hash("other text"));
    }
}
