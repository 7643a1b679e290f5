// SPDX-License-Identifier: MIT OR Apache-2.0

//! Top-k cosine retrieval over the vector store.
//!
//! The store is scanned once; candidates below the similarity floor are dropped
//! and the rest pass through a heap bounded at `top_k`. Results are ordered by
//! score descending, ties broken by `chunk_id` ascending.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tracing::debug;

use crate::embedding::storage::{EmbeddedChunk, VectorStore};
use crate::embedding::vector::{cosine_similarity, Embedding};
use crate::errors::{RagError, Result};

pub const DEFAULT_TOP_K: usize = 4;
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.15;

/// Validated retrieval parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalConfig {
    top_k: usize,
    min_similarity: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            min_similarity: DEFAULT_MIN_SIMILARITY,
        }
    }
}

impl RetrievalConfig {
    pub fn new(top_k: usize, min_similarity: f32) -> Result<Self> {
        if top_k == 0 {
            return Err(RagError::config("top_k must be greater than 0"));
        }
        if !(-1.0..=1.0).contains(&min_similarity) {
            return Err(RagError::config(format!(
                "min_similarity must be within [-1, 1] (got {})",
                min_similarity
            )));
        }
        Ok(Self {
            top_k,
            min_similarity,
        })
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn min_similarity(&self) -> f32 {
        self.min_similarity
    }
}

/// A retrieved chunk with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    pub chunk_id: String,
    pub source_id: String,
    pub sequence_index: u32,
    pub text: String,
    pub score: f32,
}

/// Heap entry ordered so that the weakest match is the maximum.
struct Ranked(Match);

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .0
            .score
            .total_cmp(&self.0.score)
            .then_with(|| self.0.chunk_id.cmp(&other.0.chunk_id))
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

/// Ranks stored chunks against a query vector.
#[derive(Debug, Clone, Default)]
pub struct Retriever {
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(config: RetrievalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Ranks an arbitrary record stream against `query`.
    ///
    /// Records whose vector has zero norm are skipped. A record of a different
    /// dimension than the query is an error.
    pub fn rank<I>(&self, query: &[f32], records: I) -> Result<Vec<Match>>
    where
        I: IntoIterator<Item = Result<EmbeddedChunk>>,
    {
        let top_k = self.config.top_k;
        let mut heap: BinaryHeap<Ranked> = BinaryHeap::with_capacity(top_k + 1);
        let mut scanned = 0usize;

        for record in records {
            let EmbeddedChunk { chunk, embedding } = record?;
            scanned += 1;

            if embedding.dim() != query.len() {
                return Err(RagError::DimensionMismatch {
                    chunk_id: chunk.chunk_id,
                    expected: query.len(),
                    actual: embedding.dim(),
                });
            }
            let Some(score) = cosine_similarity(query, embedding.values()) else {
                continue;
            };
            if score < self.config.min_similarity {
                continue;
            }

            heap.push(Ranked(Match {
                chunk_id: chunk.chunk_id,
                source_id: chunk.source_id,
                sequence_index: chunk.sequence_index,
                text: chunk.text,
                score,
            }));
            if heap.len() > top_k {
                heap.pop();
            }
        }

        let matches: Vec<Match> = heap.into_sorted_vec().into_iter().map(|r| r.0).collect();
        debug!(scanned, returned = matches.len(), "ranked candidates");
        Ok(matches)
    }

    /// Retrieves the best matches for `query` from the store.
    ///
    /// An empty store yields no matches. A query from another model or of
    /// another dimension than the store's vectors is rejected.
    pub fn retrieve(&self, store: &VectorStore, query: &Embedding) -> Result<Vec<Match>> {
        let Some(dimension) = store.dimension()? else {
            return Ok(Vec::new());
        };
        if let Some(stored) = store.model_id()? {
            if stored != query.model_id() {
                return Err(RagError::ModelMismatch {
                    stored,
                    requested: query.model_id().to_string(),
                });
            }
        }
        if dimension != query.dim() {
            return Err(RagError::DimensionMismatch {
                chunk_id: "<query>".to_string(),
                expected: dimension,
                actual: query.dim(),
            });
        }

        self.rank(query.values(), store.scan_all()?)
    }
}

/// One-shot retrieval with explicit parameters.
pub fn retrieve(
    store: &VectorStore,
    query: &Embedding,
    top_k: usize,
    min_similarity: f32,
) -> Result<Vec<Match>> {
    Retriever::new(RetrievalConfig::new(top_k, min_similarity)?).retrieve(store, query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::chunker::{chunk_id_for, Chunk};
    use tempfile::tempdir;

    fn record(id: &str, values: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk::new(
            Chunk {
                chunk_id: id.to_string(),
                source_id: "doc.txt".to_string(),
                sequence_index: 0,
                text: format!("text of {}", id),
                start_offset: 0,
                end_offset: 10,
            },
            Embedding::new("m", values).unwrap(),
        )
    }

    fn scored_records() -> Vec<EmbeddedChunk> {
        // Cosine against [1, 0] is the first component of each unit vector.
        vec![
            record("c", vec![0.2, 0.979_795_9]),
            record("a", vec![0.9, 0.435_889_9]),
            record("b", vec![0.5, 0.866_025_4]),
        ]
    }

    #[test]
    fn test_config_validation() {
        assert!(RetrievalConfig::new(1, 0.0).is_ok());
        assert!(RetrievalConfig::new(4, -1.0).is_ok());
        assert!(RetrievalConfig::new(4, 1.0).is_ok());
        assert!(matches!(RetrievalConfig::new(0, 0.1), Err(RagError::Config(_))));
        assert!(matches!(RetrievalConfig::new(3, 1.5), Err(RagError::Config(_))));
        assert!(matches!(RetrievalConfig::new(3, -1.01), Err(RagError::Config(_))));
        assert!(matches!(RetrievalConfig::new(3, f32::NAN), Err(RagError::Config(_))));
    }

    #[test]
    fn test_top_k_and_floor() {
        let retriever = Retriever::new(RetrievalConfig::new(2, 0.3).unwrap());
        let matches = retriever
            .rank(&[1.0, 0.0], scored_records().into_iter().map(Ok))
            .unwrap();
        let ids: Vec<&str> = matches.iter().map(|m| m.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!((matches[0].score - 0.9).abs() < 1e-4);
        assert!((matches[1].score - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_floor_drops_everything() {
        let retriever = Retriever::new(RetrievalConfig::new(5, 0.95).unwrap());
        let matches = retriever
            .rank(&[1.0, 0.0], scored_records().into_iter().map(Ok))
            .unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn test_ties_break_by_chunk_id() {
        let retriever = Retriever::new(RetrievalConfig::new(3, -1.0).unwrap());
        let records = vec![
            record("z", vec![1.0, 1.0]),
            record("m", vec![1.0, 1.0]),
            record("b", vec![1.0, 1.0]),
            record("low", vec![0.0, 1.0]),
        ];
        let matches = retriever.rank(&[1.0, 1.0], records.into_iter().map(Ok)).unwrap();
        let ids: Vec<&str> = matches.iter().map(|m| m.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "m", "z"]);
    }

    #[test]
    fn test_negative_zero_ties_with_zero() {
        let retriever = Retriever::new(RetrievalConfig::new(2, -1.0).unwrap());
        let records = vec![record("b", vec![0.0, 1.0]), record("a", vec![-0.0, -1.0])];
        let matches = retriever.rank(&[1.0, 0.0], records.into_iter().map(Ok)).unwrap();
        let ids: Vec<&str> = matches.iter().map(|m| m.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(matches.iter().all(|m| m.score.to_bits() == 0.0f32.to_bits()));
    }

    #[test]
    fn test_huge_vectors_score_within_range() {
        let retriever = Retriever::new(RetrievalConfig::new(4, 0.5).unwrap());
        let records = vec![
            record("big", vec![1.0e20, 0.0]),
            record("good", vec![1.0, 0.0]),
            record("off", vec![0.0, 1.0e20]),
        ];
        let matches = retriever.rank(&[1.0e20, 0.0], records.into_iter().map(Ok)).unwrap();
        let ids: Vec<&str> = matches.iter().map(|m| m.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["big", "good"]);
        for m in &matches {
            assert!(m.score.is_finite());
            assert!((0.5..=1.0).contains(&m.score));
        }
    }

    #[test]
    fn test_zero_norm_vectors_are_excluded() {
        let retriever = Retriever::new(RetrievalConfig::new(3, -1.0).unwrap());
        let records = vec![record("zero", vec![0.0, 0.0]), record("one", vec![1.0, 0.0])];
        let matches = retriever.rank(&[1.0, 0.0], records.into_iter().map(Ok)).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].chunk_id, "one");
    }

    #[test]
    fn test_rank_propagates_record_errors() {
        let retriever = Retriever::default();
        let records = vec![
            Ok(record("a", vec![1.0, 0.0])),
            Err(RagError::CorruptRecord {
                chunk_id: "b".into(),
                reason: "truncated blob".into(),
            }),
        ];
        assert!(matches!(
            retriever.rank(&[1.0, 0.0], records),
            Err(RagError::CorruptRecord { .. })
        ));
    }

    #[test]
    fn test_retrieve_from_store() {
        let dir = tempdir().unwrap();
        let store = VectorStore::open(dir.path().join("rag.sqlite3")).unwrap();

        let query = Embedding::new("m", vec![1.0, 0.0]).unwrap();
        assert!(retrieve(&store, &query, 2, 0.3).unwrap().is_empty());

        let mut records = scored_records();
        for (i, rec) in records.iter_mut().enumerate() {
            rec.chunk.chunk_id = chunk_id_for("doc.txt", i as u32);
            rec.chunk.sequence_index = i as u32;
        }
        store.upsert_batch(&records).unwrap();

        let matches = retrieve(&store, &query, 2, 0.3).unwrap();
        assert_eq!(matches.len(), 2);
        assert!((matches[0].score - 0.9).abs() < 1e-4);
        assert!((matches[1].score - 0.5).abs() < 1e-4);
        assert!(matches[0].text.starts_with("text of"));
    }

    #[test]
    fn test_retrieve_rejects_other_space() {
        let dir = tempdir().unwrap();
        let store = VectorStore::open(dir.path().join("rag.sqlite3")).unwrap();
        store.upsert_batch(&scored_records()).unwrap();

        let other_model = Embedding::new("other", vec![1.0, 0.0]).unwrap();
        assert!(matches!(
            retrieve(&store, &other_model, 2, 0.0),
            Err(RagError::ModelMismatch { .. })
        ));

        let wrong_dim = Embedding::new("m", vec![1.0, 0.0, 0.0]).unwrap();
        assert!(matches!(
            retrieve(&store, &wrong_dim, 2, 0.0),
            Err(RagError::DimensionMismatch { .. })
        ));

        assert!(matches!(
            retrieve(&store, &Embedding::new("m", vec![1.0, 0.0]).unwrap(), 0, 0.0),
            Err(RagError::Config(_))
        ));
    }
}
