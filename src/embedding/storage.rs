// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-based storage for chunk embedding vectors.
//!
//! One row per chunk, keyed by `chunk_id`. Every write runs in a single
//! transaction, so a batch is either fully visible or not at all. The
//! database runs in WAL mode and each scan reads through its own connection
//! inside a read transaction, which pins the snapshot taken at scan start.
//!
//! The first batch ever written fixes the store's embedding space (model id
//! and dimension); later batches must match it.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, Transaction};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::cancel::CancelFlag;
use crate::embedding::chunker::Chunk;
use crate::embedding::vector::{blob_to_embedding, embedding_to_blob, Embedding};
use crate::errors::{RagError, Result};

/// Default database location, relative to the working directory.
pub const DEFAULT_STORE_PATH: &str = "artifacts/ingest/rag.sqlite3";

const SCHEMA_VERSION: &str = "1";
const META_MODEL: &str = "embedding_model";
const META_DIM: &str = "embedding_dim";
const SCAN_PAGE_SIZE: usize = 256;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const RECORD_COLUMNS: &str = "chunk_id, source_id, sequence_index, text, start_offset, end_offset, \
                              content_hash, embedding, embedding_dim, model";

/// A chunk together with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Embedding,
}

impl EmbeddedChunk {
    pub fn new(chunk: Chunk, embedding: Embedding) -> Self {
        Self { chunk, embedding }
    }

    pub fn chunk_id(&self) -> &str {
        &self.chunk.chunk_id
    }
}

/// A stored vector that can be reused when a chunk's text has not changed.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedVector {
    pub content_hash: String,
    pub values: Vec<f32>,
}

/// Result of replacing one source's records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
    pub deleted: usize,
    pub written: usize,
}

/// Summary of the store contents.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub path: PathBuf,
    pub records: u64,
    pub sources: u64,
    pub dimension: Option<usize>,
    pub model_id: Option<String>,
}

/// Model and dimension the store has committed to.
#[derive(Debug, Clone, Default)]
struct EmbeddingSpace {
    model_id: Option<String>,
    dimension: Option<usize>,
}

/// SQLite-based storage for embedding vectors.
pub struct VectorStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl VectorStore {
    /// Opens or creates a vector store at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| RagError::io(parent, e))?;
        }

        let conn = Connection::open(&path).map_err(RagError::StoreWrite)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(RagError::StoreWrite)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(RagError::StoreWrite)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(RagError::StoreWrite)?;

        let store = Self {
            conn: Mutex::new(conn),
            path,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Initializes the database schema if it does not exist.
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chunks (
                chunk_id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                sequence_index INTEGER NOT NULL,
                text TEXT NOT NULL,
                start_offset INTEGER NOT NULL,
                end_offset INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                embedding BLOB NOT NULL,
                embedding_dim INTEGER NOT NULL,
                model TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_source
                ON chunks(source_id, sequence_index);
            "#,
        )
        .map_err(RagError::StoreWrite)?;

        conn.execute(
            "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION],
        )
        .map_err(RagError::StoreWrite)?;
        Ok(())
    }

    /// Returns the path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dimension fixed by the first insert, if any.
    pub fn dimension(&self) -> Result<Option<usize>> {
        Ok(read_space(&self.conn.lock())?.dimension)
    }

    /// Embedding model that produced the stored vectors, if any.
    pub fn model_id(&self) -> Result<Option<String>> {
        Ok(read_space(&self.conn.lock())?.model_id)
    }

    /// Inserts or overwrites records by `chunk_id` in a single transaction.
    ///
    /// The whole batch is validated before anything is written; one bad vector
    /// rejects the batch.
    pub fn upsert_batch(&self, records: &[EmbeddedChunk]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(RagError::StoreWrite)?;
        let space = read_space(&tx)?;
        let established = validate_records(&space, records)?;

        write_records(&tx, records, WriteMode::Upsert)?;
        if let Some((model_id, dimension)) = established {
            record_space(&tx, &model_id, dimension)?;
        }
        tx.commit().map_err(RagError::StoreWrite)?;

        debug!(records = records.len(), "upserted batch");
        Ok(records.len())
    }

    /// Deletes every record belonging to a source.
    pub fn delete_by_source(&self, source_id: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let deleted = conn
            .execute("DELETE FROM chunks WHERE source_id = ?1", params![source_id])
            .map_err(RagError::StoreWrite)?;
        debug!(source_id, deleted, "deleted source records");
        Ok(deleted)
    }

    /// Replaces all records of one source in a single transaction.
    ///
    /// Stale chunks (ids no longer produced by the new chunking) disappear with
    /// the delete. If `cancel` is raised before commit, the transaction is
    /// rolled back and the source keeps its previous records.
    pub fn refresh_source(
        &self,
        source_id: &str,
        records: &[EmbeddedChunk],
        cancel: &CancelFlag,
    ) -> Result<RefreshOutcome> {
        if let Some(stray) = records.iter().find(|r| r.chunk.source_id != source_id) {
            return Err(RagError::config(format!(
                "record {} belongs to source '{}', not '{}'",
                stray.chunk_id(),
                stray.chunk.source_id,
                source_id
            )));
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(RagError::StoreWrite)?;
        let space = read_space(&tx)?;
        let established = validate_records(&space, records)?;

        let deleted = tx
            .execute("DELETE FROM chunks WHERE source_id = ?1", params![source_id])
            .map_err(RagError::StoreWrite)?;
        write_records(&tx, records, WriteMode::Insert)?;
        if let Some((model_id, dimension)) = established {
            record_space(&tx, &model_id, dimension)?;
        }

        if cancel.is_cancelled() {
            // Dropping the transaction rolls it back.
            drop(tx);
            return Err(RagError::Cancelled);
        }
        tx.commit().map_err(RagError::StoreWrite)?;

        let outcome = RefreshOutcome {
            deleted,
            written: records.len(),
        };
        debug!(source_id, deleted, written = outcome.written, "refreshed source");
        Ok(outcome)
    }

    /// Starts a lazy, snapshot-consistent scan over all records in `chunk_id` order.
    pub fn scan_all(&self) -> Result<StoreScan> {
        StoreScan::open(&self.path, SCAN_PAGE_SIZE)
    }

    /// Retrieves a record by chunk id.
    pub fn get(&self, chunk_id: &str) -> Result<Option<EmbeddedChunk>> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM chunks WHERE chunk_id = ?1", RECORD_COLUMNS),
                params![chunk_id],
                RawRecord::from_row,
            )
            .optional()
            .map_err(RagError::StoreRead)?;
        raw.map(RawRecord::into_embedded).transpose()
    }

    /// Returns reusable vectors of a source that were produced by `model_id`.
    pub fn cached_vectors(
        &self,
        source_id: &str,
        model_id: &str,
    ) -> Result<HashMap<String, CachedVector>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT chunk_id, content_hash, embedding
                FROM chunks
                WHERE source_id = ?1 AND model = ?2
                "#,
            )
            .map_err(RagError::StoreRead)?;

        let rows = stmt
            .query_map(params![source_id, model_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })
            .map_err(RagError::StoreRead)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(RagError::StoreRead)?;

        let mut cached = HashMap::with_capacity(rows.len());
        for (chunk_id, content_hash, blob) in rows {
            let values = blob_to_embedding(&blob).ok_or_else(|| RagError::CorruptRecord {
                chunk_id: chunk_id.clone(),
                reason: format!("embedding blob of {} bytes", blob.len()),
            })?;
            cached.insert(
                chunk_id,
                CachedVector {
                    content_hash,
                    values,
                },
            );
        }
        Ok(cached)
    }

    /// Counts total number of records.
    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .map_err(RagError::StoreRead)?;
        Ok(count.max(0) as u64)
    }

    /// Counts records of one source.
    pub fn count_for_source(&self, source_id: &str) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM chunks WHERE source_id = ?1",
                params![source_id],
                |row| row.get(0),
            )
            .map_err(RagError::StoreRead)?;
        Ok(count.max(0) as u64)
    }

    /// Lists all sources that have records.
    pub fn list_sources(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT DISTINCT source_id FROM chunks ORDER BY source_id")
            .map_err(RagError::StoreRead)?;
        let sources = stmt
            .query_map([], |row| row.get(0))
            .map_err(RagError::StoreRead)?
            .collect::<std::result::Result<Vec<String>, _>>()
            .map_err(RagError::StoreRead)?;
        Ok(sources)
    }

    /// Deletes every record and forgets the embedding space.
    pub fn clear(&self) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(RagError::StoreWrite)?;
        tx.execute("DELETE FROM chunks", []).map_err(RagError::StoreWrite)?;
        tx.execute(
            "DELETE FROM meta WHERE key IN (?1, ?2)",
            params![META_MODEL, META_DIM],
        )
        .map_err(RagError::StoreWrite)?;
        tx.commit().map_err(RagError::StoreWrite)?;
        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let (records, sources, space) = {
            let conn = self.conn.lock();
            let (records, sources): (i64, i64) = conn
                .query_row(
                    "SELECT COUNT(*), COUNT(DISTINCT source_id) FROM chunks",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(RagError::StoreRead)?;
            (records, sources, read_space(&conn)?)
        };
        Ok(StoreStats {
            path: self.path.clone(),
            records: records.max(0) as u64,
            sources: sources.max(0) as u64,
            dimension: space.dimension,
            model_id: space.model_id,
        })
    }
}

#[derive(Clone, Copy)]
enum WriteMode {
    /// Overwrite rows with the same chunk id.
    Upsert,
    /// Plain insert; a duplicate chunk id fails the transaction.
    Insert,
}

fn write_records(tx: &Transaction<'_>, records: &[EmbeddedChunk], mode: WriteMode) -> Result<()> {
    let created_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    let sql = match mode {
        WriteMode::Insert => {
            r#"
            INSERT INTO chunks (
                chunk_id, source_id, sequence_index, text, start_offset, end_offset,
                content_hash, embedding, embedding_dim, model, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#
        }
        WriteMode::Upsert => {
            r#"
            INSERT INTO chunks (
                chunk_id, source_id, sequence_index, text, start_offset, end_offset,
                content_hash, embedding, embedding_dim, model, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(chunk_id) DO UPDATE SET
                source_id = excluded.source_id,
                sequence_index = excluded.sequence_index,
                text = excluded.text,
                start_offset = excluded.start_offset,
                end_offset = excluded.end_offset,
                content_hash = excluded.content_hash,
                embedding = excluded.embedding,
                embedding_dim = excluded.embedding_dim,
                model = excluded.model,
                created_at = excluded.created_at
            "#
        }
    };

    let mut stmt = tx.prepare(sql).map_err(RagError::StoreWrite)?;
    for record in records {
        let chunk = &record.chunk;
        stmt.execute(params![
            chunk.chunk_id,
            chunk.source_id,
            chunk.sequence_index,
            chunk.text,
            chunk.start_offset as i64,
            chunk.end_offset as i64,
            chunk.content_hash(),
            embedding_to_blob(record.embedding.values()),
            record.embedding.dim() as i64,
            record.embedding.model_id(),
            created_at
        ])
        .map_err(RagError::StoreWrite)?;
    }
    Ok(())
}

fn read_space(conn: &Connection) -> Result<EmbeddingSpace> {
    let get = |key: &str| -> Result<Option<String>> {
        conn.query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(RagError::StoreRead)
    };

    let model_id = get(META_MODEL)?;
    let dimension = match get(META_DIM)? {
        Some(raw) => Some(raw.parse::<usize>().map_err(|_| RagError::CorruptRecord {
            chunk_id: "meta".to_string(),
            reason: format!("invalid {} value '{}'", META_DIM, raw),
        })?),
        None => None,
    };
    Ok(EmbeddingSpace {
        model_id,
        dimension,
    })
}

fn record_space(tx: &Transaction<'_>, model_id: &str, dimension: usize) -> Result<()> {
    let mut stmt = tx
        .prepare(
            r#"
            INSERT INTO meta (key, value)
            VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .map_err(RagError::StoreWrite)?;
    stmt.execute(params![META_MODEL, model_id])
        .map_err(RagError::StoreWrite)?;
    stmt.execute(params![META_DIM, dimension.to_string()])
        .map_err(RagError::StoreWrite)?;
    Ok(())
}

/// Checks a batch against the store's embedding space.
///
/// Returns the space to record when the store has none yet.
fn validate_records(
    space: &EmbeddingSpace,
    records: &[EmbeddedChunk],
) -> Result<Option<(String, usize)>> {
    let Some(first) = records.first() else {
        return Ok(None);
    };

    let expected_model = space
        .model_id
        .clone()
        .unwrap_or_else(|| first.embedding.model_id().to_string());
    let expected_dim = space.dimension.unwrap_or_else(|| first.embedding.dim());

    for record in records {
        if record.embedding.model_id() != expected_model {
            return Err(RagError::ModelMismatch {
                stored: expected_model,
                requested: record.embedding.model_id().to_string(),
            });
        }
        if record.embedding.dim() != expected_dim {
            return Err(RagError::DimensionMismatch {
                chunk_id: record.chunk_id().to_string(),
                expected: expected_dim,
                actual: record.embedding.dim(),
            });
        }
    }

    if space.model_id.is_none() || space.dimension.is_none() {
        Ok(Some((expected_model, expected_dim)))
    } else {
        Ok(None)
    }
}

/// Row as read from SQLite, before the vector blob is decoded.
struct RawRecord {
    chunk_id: String,
    source_id: String,
    sequence_index: u32,
    text: String,
    start_offset: i64,
    end_offset: i64,
    embedding: Vec<u8>,
    embedding_dim: i64,
    model: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            chunk_id: row.get(0)?,
            source_id: row.get(1)?,
            sequence_index: row.get(2)?,
            text: row.get(3)?,
            start_offset: row.get(4)?,
            end_offset: row.get(5)?,
            // column 6 (content_hash) is only needed by the cache lookup
            embedding: row.get(7)?,
            embedding_dim: row.get(8)?,
            model: row.get(9)?,
        })
    }

    fn into_embedded(self) -> Result<EmbeddedChunk> {
        let corrupt = |chunk_id: &str, reason: String| RagError::CorruptRecord {
            chunk_id: chunk_id.to_string(),
            reason,
        };

        let values = blob_to_embedding(&self.embedding).ok_or_else(|| {
            corrupt(
                &self.chunk_id,
                format!("embedding blob of {} bytes", self.embedding.len()),
            )
        })?;
        if values.len() as i64 != self.embedding_dim {
            return Err(corrupt(
                &self.chunk_id,
                format!(
                    "embedding has {} values, row declares {}",
                    values.len(),
                    self.embedding_dim
                ),
            ));
        }
        let offsets = usize::try_from(self.start_offset)
            .ok()
            .zip(usize::try_from(self.end_offset).ok());
        let Some((start_offset, end_offset)) = offsets else {
            return Err(corrupt(&self.chunk_id, "negative chunk offsets".to_string()));
        };
        let embedding = Embedding::new(self.model, values)
            .map_err(|e| corrupt(&self.chunk_id, e.to_string()))?;

        Ok(EmbeddedChunk {
            chunk: Chunk {
                chunk_id: self.chunk_id,
                source_id: self.source_id,
                sequence_index: self.sequence_index,
                text: self.text,
                start_offset,
                end_offset,
            },
            embedding,
        })
    }
}

/// Lazy scan over a read-only snapshot of the store.
///
/// Records arrive in `chunk_id` order, a page at a time. The scan's read
/// transaction stays open until the scan is dropped, so concurrent writers
/// are never observed mid-scan.
pub struct StoreScan {
    conn: Connection,
    buffer: VecDeque<Result<EmbeddedChunk>>,
    last_chunk_id: String,
    page_size: usize,
    exhausted: bool,
}

impl StoreScan {
    fn open(path: &Path, page_size: usize) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(RagError::StoreRead)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(RagError::StoreRead)?;
        conn.execute_batch("BEGIN").map_err(RagError::StoreRead)?;

        let mut scan = Self {
            conn,
            buffer: VecDeque::new(),
            last_chunk_id: String::new(),
            page_size: page_size.max(1),
            exhausted: false,
        };
        // The first read pins the snapshot.
        scan.fetch_page()?;
        Ok(scan)
    }

    fn fetch_page(&mut self) -> Result<()> {
        let rows = {
            let mut stmt = self
                .conn
                .prepare_cached(&format!(
                    "SELECT {} FROM chunks WHERE chunk_id > ?1 ORDER BY chunk_id LIMIT ?2",
                    RECORD_COLUMNS
                ))
                .map_err(RagError::StoreRead)?;
            let rows = stmt
                .query_map(
                    params![self.last_chunk_id, self.page_size as i64],
                    RawRecord::from_row,
                )
                .map_err(RagError::StoreRead)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(RagError::StoreRead)?;
            rows
        };

        if rows.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = rows.last() {
            self.last_chunk_id = last.chunk_id.clone();
        }
        self.buffer
            .extend(rows.into_iter().map(RawRecord::into_embedded));
        Ok(())
    }
}

impl Iterator for StoreScan {
    type Item = Result<EmbeddedChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
        self.buffer.pop_front()
    }
}

impl Drop for StoreScan {
    fn drop(&mut self) {
        let _ = self.conn.execute_batch("COMMIT");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::chunker::chunk_id_for;
    use tempfile::tempdir;

    fn record(source: &str, idx: u32, text: &str, model: &str, values: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk::new(
            Chunk {
                chunk_id: chunk_id_for(source, idx),
                source_id: source.to_string(),
                sequence_index: idx,
                text: text.to_string(),
                start_offset: idx as usize * 10,
                end_offset: idx as usize * 10 + text.chars().count(),
            },
            Embedding::new(model, values).unwrap(),
        )
    }

    fn open_temp() -> (tempfile::TempDir, VectorStore) {
        let dir = tempdir().unwrap();
        let store = VectorStore::open(dir.path().join("nested").join("rag.sqlite3")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_store_create_and_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("rag.sqlite3");

        let store = VectorStore::open(&db_path).unwrap();
        assert!(db_path.exists());
        store
            .upsert_batch(&[record("a.txt", 0, "alpha", "m", vec![1.0, 0.0])])
            .unwrap();
        drop(store);

        let store = VectorStore::open(&db_path).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.dimension().unwrap(), Some(2));
        assert_eq!(store.model_id().unwrap().as_deref(), Some("m"));
    }

    #[test]
    fn test_upsert_overwrites_by_chunk_id() {
        let (_dir, store) = open_temp();
        store
            .upsert_batch(&[
                record("a.txt", 0, "alpha", "m", vec![1.0, 0.0]),
                record("a.txt", 1, "beta", "m", vec![0.0, 1.0]),
            ])
            .unwrap();
        let written = store
            .upsert_batch(&[record("a.txt", 1, "beta v2", "m", vec![0.5, 0.5])])
            .unwrap();
        assert_eq!(written, 1);
        assert_eq!(store.count().unwrap(), 2);

        let got = store.get(&chunk_id_for("a.txt", 1)).unwrap().unwrap();
        assert_eq!(got.chunk.text, "beta v2");
        assert_eq!(got.embedding.values(), &[0.5, 0.5]);
    }

    #[test]
    fn test_vectors_round_trip_exactly() {
        let (_dir, store) = open_temp();
        let values = vec![0.1f32, -0.333_333_34, 1.0e-20, 7.5];
        let rec = record("a.txt", 0, "alpha", "m", values.clone());
        store.upsert_batch(&[rec.clone()]).unwrap();

        let got = store.get(rec.chunk_id()).unwrap().unwrap();
        assert_eq!(got, rec);
        let bits: Vec<u32> = got.embedding.values().iter().map(|v| v.to_bits()).collect();
        let expected: Vec<u32> = values.iter().map(|v| v.to_bits()).collect();
        assert_eq!(bits, expected);
    }

    #[test]
    fn test_dimension_mismatch_rejects_whole_batch() {
        let (_dir, store) = open_temp();
        store
            .upsert_batch(&[record("a.txt", 0, "alpha", "m", vec![1.0, 0.0])])
            .unwrap();

        let err = store
            .upsert_batch(&[
                record("b.txt", 0, "ok", "m", vec![0.0, 1.0]),
                record("b.txt", 1, "bad", "m", vec![0.0, 1.0, 0.0]),
            ])
            .unwrap_err();
        match err {
            RagError::DimensionMismatch {
                expected, actual, ..
            } => {
                assert_eq!(expected, 2);
                assert_eq!(actual, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.count_for_source("b.txt").unwrap(), 0);
    }

    #[test]
    fn test_first_batch_must_be_self_consistent() {
        let (_dir, store) = open_temp();
        let err = store
            .upsert_batch(&[
                record("a.txt", 0, "x", "m", vec![1.0, 0.0]),
                record("a.txt", 1, "y", "m", vec![1.0]),
            ])
            .unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { .. }));
        assert_eq!(store.dimension().unwrap(), None);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_model_mismatch_is_rejected() {
        let (_dir, store) = open_temp();
        store
            .upsert_batch(&[record("a.txt", 0, "alpha", "model-a", vec![1.0, 0.0])])
            .unwrap();
        let err = store
            .upsert_batch(&[record("b.txt", 0, "beta", "model-b", vec![1.0, 0.0])])
            .unwrap_err();
        assert!(matches!(err, RagError::ModelMismatch { .. }));
    }

    #[test]
    fn test_delete_by_source() {
        let (_dir, store) = open_temp();
        store
            .upsert_batch(&[
                record("a.txt", 0, "a0", "m", vec![1.0, 0.0]),
                record("a.txt", 1, "a1", "m", vec![1.0, 0.0]),
                record("b.txt", 0, "b0", "m", vec![0.0, 1.0]),
            ])
            .unwrap();

        assert_eq!(store.delete_by_source("a.txt").unwrap(), 2);
        assert_eq!(store.delete_by_source("a.txt").unwrap(), 0);
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.list_sources().unwrap(), vec!["b.txt".to_string()]);
    }

    #[test]
    fn test_refresh_removes_stale_chunks() {
        let (_dir, store) = open_temp();
        let cancel = CancelFlag::new();
        let first: Vec<_> = (0..3)
            .map(|i| record("a.txt", i, "old", "m", vec![1.0, i as f32]))
            .collect();
        store.refresh_source("a.txt", &first, &cancel).unwrap();

        let second = vec![record("a.txt", 0, "new", "m", vec![0.0, 1.0])];
        let outcome = store.refresh_source("a.txt", &second, &cancel).unwrap();
        assert_eq!(
            outcome,
            RefreshOutcome {
                deleted: 3,
                written: 1
            }
        );
        assert_eq!(store.count_for_source("a.txt").unwrap(), 1);
        assert!(store.get(&chunk_id_for("a.txt", 2)).unwrap().is_none());
    }

    #[test]
    fn test_cancelled_refresh_keeps_previous_state() {
        let (_dir, store) = open_temp();
        let live = CancelFlag::new();
        store
            .refresh_source("a.txt", &[record("a.txt", 0, "keep", "m", vec![1.0, 0.0])], &live)
            .unwrap();

        let cancelled = CancelFlag::new();
        cancelled.cancel();
        let err = store
            .refresh_source(
                "a.txt",
                &[
                    record("a.txt", 0, "replace", "m", vec![0.0, 1.0]),
                    record("a.txt", 1, "extra", "m", vec![0.0, 1.0]),
                ],
                &cancelled,
            )
            .unwrap_err();
        assert!(matches!(err, RagError::Cancelled));

        assert_eq!(store.count().unwrap(), 1);
        let kept = store.get(&chunk_id_for("a.txt", 0)).unwrap().unwrap();
        assert_eq!(kept.chunk.text, "keep");
    }

    #[test]
    fn test_failed_refresh_rolls_back() {
        let (_dir, store) = open_temp();
        let cancel = CancelFlag::new();
        store
            .refresh_source("a.txt", &[record("a.txt", 0, "keep", "m", vec![1.0, 0.0])], &cancel)
            .unwrap();

        // Duplicate chunk ids violate the primary key halfway through the batch.
        let dup = record("a.txt", 1, "dup", "m", vec![0.0, 1.0]);
        let err = store
            .refresh_source("a.txt", &[dup.clone(), dup], &cancel)
            .unwrap_err();
        assert!(matches!(err, RagError::StoreWrite(_)));

        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(
            store.get(&chunk_id_for("a.txt", 0)).unwrap().unwrap().chunk.text,
            "keep"
        );
    }

    #[test]
    fn test_refresh_rejects_foreign_records() {
        let (_dir, store) = open_temp();
        let err = store
            .refresh_source(
                "a.txt",
                &[record("b.txt", 0, "b", "m", vec![1.0])],
                &CancelFlag::new(),
            )
            .unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }

    #[test]
    fn test_scan_is_ordered_restartable_and_paged() {
        let (_dir, store) = open_temp();
        let records: Vec<_> = (0..(SCAN_PAGE_SIZE as u32 + 7))
            .map(|i| record("a.txt", i, "t", "m", vec![1.0, i as f32]))
            .collect();
        store.upsert_batch(&records).unwrap();

        let ids: Vec<String> = store
            .scan_all()
            .unwrap()
            .map(|r| r.unwrap().chunk.chunk_id)
            .collect();
        assert_eq!(ids.len(), records.len());
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);

        let again = store.scan_all().unwrap().count();
        assert_eq!(again, records.len());
    }

    #[test]
    fn test_scan_sees_snapshot_from_scan_start() {
        let (_dir, store) = open_temp();
        let records: Vec<_> = (0..(SCAN_PAGE_SIZE as u32 * 2))
            .map(|i| record("a.txt", i, "t", "m", vec![1.0, 0.0]))
            .collect();
        store.upsert_batch(&records).unwrap();

        let mut scan = store.scan_all().unwrap();
        let first = scan.next().unwrap().unwrap();
        assert_eq!(first.chunk.sequence_index, 0);

        // Writes after the scan started are not observed by it.
        store.delete_by_source("a.txt").unwrap();
        store
            .upsert_batch(&[record("z.txt", 0, "late", "m", vec![0.0, 1.0])])
            .unwrap();

        let rest: Vec<_> = scan.map(|r| r.unwrap()).collect();
        assert_eq!(rest.len() + 1, records.len());
        assert!(rest.iter().all(|r| r.chunk.source_id == "a.txt"));

        assert_eq!(store.scan_all().unwrap().count(), 1);
    }

    #[test]
    fn test_cached_vectors_filter_by_model() {
        let (_dir, store) = open_temp();
        let rec = record("a.txt", 0, "alpha", "m", vec![1.0, 2.0]);
        store.upsert_batch(&[rec.clone()]).unwrap();

        let cached = store.cached_vectors("a.txt", "m").unwrap();
        let hit = cached.get(rec.chunk_id()).unwrap();
        assert_eq!(hit.content_hash, rec.chunk.content_hash());
        assert_eq!(hit.values, vec![1.0, 2.0]);

        assert!(store.cached_vectors("a.txt", "other").unwrap().is_empty());
        assert!(store.cached_vectors("b.txt", "m").unwrap().is_empty());
    }

    #[test]
    fn test_clear_forgets_embedding_space() {
        let (_dir, store) = open_temp();
        store
            .upsert_batch(&[record("a.txt", 0, "alpha", "m", vec![1.0, 0.0])])
            .unwrap();
        store.clear().unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.records, 0);
        assert_eq!(stats.dimension, None);
        assert_eq!(stats.model_id, None);

        // A different model and dimension are accepted after a clear.
        store
            .upsert_batch(&[record("a.txt", 0, "alpha", "other", vec![1.0, 0.0, 0.0])])
            .unwrap();
        assert_eq!(store.dimension().unwrap(), Some(3));
    }

    #[test]
    fn test_stats() {
        let (_dir, store) = open_temp();
        store
            .upsert_batch(&[
                record("a.txt", 0, "a", "m", vec![1.0, 0.0]),
                record("b.txt", 0, "b", "m", vec![0.0, 1.0]),
                record("b.txt", 1, "b", "m", vec![0.0, 1.0]),
            ])
            .unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.records, 3);
        assert_eq!(stats.sources, 2);
        assert_eq!(stats.dimension, Some(2));
        assert_eq!(stats.model_id.as_deref(), Some("m"));
    }
}
