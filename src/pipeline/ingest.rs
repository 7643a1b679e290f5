// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ingestion: parallel chunk + embed, serialized per-source refresh.
//!
//! Workers on a bounded rayon pool prepare one source each and hand the result
//! to a bounded channel. The calling thread is the only writer; it applies one
//! `refresh_source` transaction per source.

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::Pipeline;
use crate::cancel::CancelFlag;
use crate::embedding::retry::embed_with_retry;
use crate::embedding::storage::EmbeddedChunk;
use crate::embedding::vector::Embedding;
use crate::errors::{RagError, Result};
use crate::source::{Document, DocumentSource};

const CHANNEL_CAPACITY: usize = 64;

/// A source that could not be refreshed. Its previous records were kept.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceFailure {
    pub source_id: String,
    pub error: String,
}

/// Outcome of an ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub documents: usize,
    /// Sources whose records were rewritten.
    pub refreshed: usize,
    /// Sources whose stored chunks already matched the input.
    pub unchanged: usize,
    /// Sources over the size limit.
    pub skipped: usize,
    pub chunks_written: usize,
    pub chunks_deleted: usize,
    /// Chunks sent to the embedder.
    pub embedded: usize,
    /// Chunks whose stored vector was reused.
    pub reused: usize,
    pub pruned_sources: Vec<String>,
    pub failures: Vec<SourceFailure>,
    pub cancelled: bool,
}

impl IngestReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }
}

/// Per-source worker result.
enum Prepared {
    Ready {
        source_id: String,
        records: Vec<EmbeddedChunk>,
        embedded: usize,
        reused: usize,
    },
    Unchanged {
        source_id: String,
    },
    Skipped {
        source_id: String,
    },
    Failed {
        source_id: String,
        error: RagError,
    },
}

impl Pipeline {
    /// Ingests every document of `source`.
    pub fn ingest_source(
        &self,
        source: &dyn DocumentSource,
        cancel: &CancelFlag,
    ) -> Result<IngestReport> {
        let documents = source.list_documents()?;
        self.ingest(&documents, cancel)
    }

    /// Brings the store in line with `documents`.
    ///
    /// A source whose embedding fails keeps its previous records and is listed
    /// in [`IngestReport::failures`]; the other sources proceed.
    pub fn ingest(&self, documents: &[Document], cancel: &CancelFlag) -> Result<IngestReport> {
        let mut seen = HashSet::with_capacity(documents.len());
        if let Some(dup) = documents.iter().find(|d| !seen.insert(d.source_id.as_str())) {
            return Err(RagError::config(format!(
                "duplicate source id '{}' in document list",
                dup.source_id
            )));
        }
        self.ensure_same_model()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.workers.max(1))
            .thread_name(|i| format!("ragpipe-embed-{}", i))
            .build()
            .map_err(|e| RagError::config(format!("failed to build worker pool: {}", e)))?;

        let pb = if self.options.show_progress {
            let pb = ProgressBar::new(documents.len() as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("[{bar:40.cyan/blue}] {pos}/{len} sources | Embedding {msg}")
            {
                pb.set_style(style.progress_chars("##."));
            }
            pb
        } else {
            ProgressBar::hidden()
        };

        let mut report = IngestReport {
            documents: documents.len(),
            ..IngestReport::default()
        };
        let (tx, rx) = mpsc::sync_channel::<Prepared>(CHANNEL_CAPACITY);

        pool.in_place_scope(|s| {
            let pb_producer = pb.clone();
            s.spawn(move |_| {
                documents.par_iter().for_each_with(tx, |tx, document| {
                    pb_producer.set_message(document.source_id.clone());
                    let _ = tx.send(self.prepare(document, cancel));
                    pb_producer.inc(1);
                });
            });

            for prepared in rx {
                self.apply(prepared, cancel, &mut report);
            }
        });
        pb.finish_and_clear();

        if cancel.is_cancelled() {
            report.cancelled = true;
        } else if self.options.prune_missing {
            let keep: HashSet<&str> = documents.iter().map(|d| d.source_id.as_str()).collect();
            for source_id in self.store.list_sources()? {
                if !keep.contains(source_id.as_str()) {
                    let deleted = self.store.delete_by_source(&source_id)?;
                    info!(source_id = %source_id, deleted, "pruned missing source");
                    report.chunks_deleted += deleted;
                    report.pruned_sources.push(source_id);
                }
            }
        }

        info!(
            documents = report.documents,
            refreshed = report.refreshed,
            unchanged = report.unchanged,
            failed = report.failures.len(),
            embedded = report.embedded,
            reused = report.reused,
            "ingestion finished"
        );
        Ok(report)
    }

    /// Chunks and embeds one document. Runs on a worker thread.
    fn prepare(&self, document: &Document, cancel: &CancelFlag) -> Prepared {
        let source_id = document.source_id.clone();
        if cancel.is_cancelled() {
            return Prepared::Failed {
                source_id,
                error: RagError::Cancelled,
            };
        }
        if document.byte_len() > self.options.max_document_bytes {
            warn!(
                source_id = %source_id,
                bytes = document.byte_len(),
                limit = self.options.max_document_bytes,
                "skipping oversized document"
            );
            return Prepared::Skipped { source_id };
        }

        match self.embed_document(document, cancel) {
            Ok(Some((records, embedded, reused))) => Prepared::Ready {
                source_id,
                records,
                embedded,
                reused,
            },
            Ok(None) => Prepared::Unchanged { source_id },
            Err(error) => Prepared::Failed { source_id, error },
        }
    }

    /// Returns `None` when the stored chunks already match the document.
    fn embed_document(
        &self,
        document: &Document,
        cancel: &CancelFlag,
    ) -> Result<Option<(Vec<EmbeddedChunk>, usize, usize)>> {
        let provider = self.provider.as_ref();
        let model_id = provider.model_id();
        let chunks = self.chunker.chunk(document);

        let mut cached = if self.options.force {
            Default::default()
        } else {
            self.store.cached_vectors(&document.source_id, model_id)?
        };

        let stored = self.store.count_for_source(&document.source_id)? as usize;
        let hashes: Vec<String> = chunks.iter().map(|c| c.content_hash()).collect();
        let all_cached = chunks
            .iter()
            .zip(&hashes)
            .all(|(c, h)| cached.get(&c.chunk_id).is_some_and(|v| &v.content_hash == h));
        if !self.options.force && all_cached && stored == chunks.len() {
            return Ok(None);
        }

        // Positions of chunks that need a fresh vector.
        let missing: Vec<usize> = chunks
            .iter()
            .zip(&hashes)
            .enumerate()
            .filter(|(_, (c, h))| !cached.get(&c.chunk_id).is_some_and(|v| &v.content_hash == *h))
            .map(|(i, _)| i)
            .collect();

        let mut fresh: Vec<Option<Embedding>> = vec![None; chunks.len()];
        for batch in missing.chunks(provider.batch_size().max(1)) {
            let texts: Vec<String> = batch.iter().map(|&i| chunks[i].text.clone()).collect();
            let embeddings = embed_with_retry(provider, &texts, &self.retry, cancel)?;
            for (&i, embedding) in batch.iter().zip(embeddings) {
                fresh[i] = Some(embedding);
            }
        }

        let embedded = missing.len();
        let reused = chunks.len() - embedded;
        let mut records = Vec::with_capacity(chunks.len());
        for (chunk, slot) in chunks.into_iter().zip(fresh) {
            let embedding = match slot {
                Some(embedding) => embedding,
                None => {
                    let hit = cached.remove(&chunk.chunk_id).ok_or_else(|| {
                        RagError::EmbedderResponse(format!(
                            "no vector produced for {}",
                            chunk.chunk_id
                        ))
                    })?;
                    Embedding::new(model_id, hit.values)?
                }
            };
            records.push(EmbeddedChunk::new(chunk, embedding));
        }

        Ok(Some((records, embedded, reused)))
    }

    /// Applies one worker result. Runs on the calling thread only.
    fn apply(&self, prepared: Prepared, cancel: &CancelFlag, report: &mut IngestReport) {
        match prepared {
            Prepared::Ready {
                source_id,
                records,
                embedded,
                reused,
            } => match self.store.refresh_source(&source_id, &records, cancel) {
                Ok(outcome) => {
                    report.refreshed += 1;
                    report.chunks_written += outcome.written;
                    report.chunks_deleted += outcome.deleted;
                    report.embedded += embedded;
                    report.reused += reused;
                }
                Err(RagError::Cancelled) => report.cancelled = true,
                Err(error) => record_failure(report, source_id, error),
            },
            Prepared::Unchanged { source_id } => {
                debug!(source_id = %source_id, "source unchanged");
                report.unchanged += 1;
            }
            Prepared::Skipped { source_id } => {
                debug!(source_id = %source_id, "source skipped");
                report.skipped += 1;
            }
            Prepared::Failed {
                error: RagError::Cancelled,
                ..
            } => report.cancelled = true,
            Prepared::Failed { source_id, error } => record_failure(report, source_id, error),
        }
    }
}

fn record_failure(report: &mut IngestReport, source_id: String, error: RagError) {
    error!(source_id = %source_id, error = %error, "source not refreshed; previous records kept");
    report.failures.push(SourceFailure {
        source_id,
        error: error.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::chunker::{ChunkConfig, EmbeddingChunker};
    use crate::embedding::provider::HashingProvider;
    use crate::embedding::storage::VectorStore;
    use crate::pipeline::IngestOptions;
    use tempfile::TempDir;

    fn pipeline(dir: &TempDir) -> Pipeline {
        let store = VectorStore::open(dir.path().join("rag.sqlite3")).unwrap();
        Pipeline::new(store, Box::new(HashingProvider::new(32).unwrap()))
            .with_chunker(EmbeddingChunker::new(ChunkConfig::new(20, 5).unwrap()))
    }

    #[test]
    fn test_duplicate_source_ids_are_rejected() {
        let dir = TempDir::new().unwrap();
        let docs = vec![Document::new("a.txt", "one"), Document::new("a.txt", "two")];
        let err = pipeline(&dir).ingest(&docs, &CancelFlag::new()).unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }

    #[test]
    fn test_oversized_documents_are_skipped() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir).with_options(IngestOptions {
            max_document_bytes: 10,
            ..IngestOptions::default()
        });
        let docs = vec![
            Document::new("small.txt", "tiny"),
            Document::new("big.txt", "this one is far too large"),
        ];
        let report = pipeline.ingest(&docs, &CancelFlag::new()).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.refreshed, 1);
        assert_eq!(pipeline.store().list_sources().unwrap(), vec!["small.txt".to_string()]);
    }

    #[test]
    fn test_cancelled_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let report = pipeline
            .ingest(&[Document::new("a.txt", "some text to embed")], &cancel)
            .unwrap();
        assert!(report.cancelled);
        assert!(!report.is_clean());
        assert_eq!(pipeline.store().count().unwrap(), 0);
    }

    #[test]
    fn test_empty_document_clears_source() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);
        let cancel = CancelFlag::new();
        let doc = Document::new("a.txt", "The quick brown fox jumps over the lazy dog.");
        pipeline.ingest(&[doc], &cancel).unwrap();
        assert_eq!(pipeline.store().count().unwrap(), 3);

        let report = pipeline.ingest(&[Document::new("a.txt", "")], &cancel).unwrap();
        assert_eq!(report.refreshed, 1);
        assert_eq!(report.chunks_deleted, 3);
        assert_eq!(pipeline.store().count().unwrap(), 0);
    }
}
