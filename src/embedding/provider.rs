// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding provider interface and implementations.
//!
//! Providers turn a batch of texts into one vector per text, in order. Every
//! call is bounded in time: the HTTP client carries a timeout and the command
//! provider kills its child process on deadline.

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::embedding::vector::{l2_normalize, Embedding};
use crate::errors::{RagError, Result};

pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_HASHING_DIM: usize = 256;

const DEFAULT_OLLAMA_BATCH_SIZE: usize = 32;
const DEFAULT_COMMAND_BATCH_SIZE: usize = 64;
const COMMAND_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Trait for embedding providers.
///
/// Implementations are shared across ingestion workers, so they take `&self`.
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier recorded alongside every vector.
    fn model_id(&self) -> &str;

    /// Vector dimension, when known before the first call.
    fn dimension(&self) -> Option<usize> {
        None
    }

    /// Returns the batch size used by the provider.
    fn batch_size(&self) -> usize;

    /// Generates embeddings for the given texts, one per text, in order.
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Generates an embedding for a single text.
    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut result = self.embed_texts(&[text.to_string()])?;
        result
            .pop()
            .ok_or_else(|| RagError::EmbedderResponse("no embedding returned".to_string()))
    }
}

/// Tags raw provider output with the model id, checking count and dimension.
pub fn tag_vectors(
    provider: &dyn EmbeddingProvider,
    expected: usize,
    vectors: Vec<Vec<f32>>,
) -> Result<Vec<Embedding>> {
    if vectors.len() != expected {
        return Err(RagError::EmbedderResponse(format!(
            "model '{}' returned {} embeddings for {} inputs",
            provider.model_id(),
            vectors.len(),
            expected
        )));
    }

    let declared = provider.dimension();
    let mut first_dim = None;
    vectors
        .into_iter()
        .map(|values| {
            let dim = values.len();
            let expected_dim = *first_dim.get_or_insert(declared.unwrap_or(dim));
            if dim != expected_dim {
                return Err(RagError::EmbedderResponse(format!(
                    "model '{}' returned vectors of dimension {} and {}",
                    provider.model_id(),
                    expected_dim,
                    dim
                )));
            }
            Embedding::new(provider.model_id(), values)
        })
        .collect()
}

/// Connection settings for an Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub batch_size: usize,
}

impl OllamaConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_BASE_URL.to_string(),
            model: model.into(),
            timeout: DEFAULT_EMBED_TIMEOUT,
            batch_size: DEFAULT_OLLAMA_BATCH_SIZE,
        }
    }
}

/// Blocking embeddings client for Ollama.
///
/// Uses the batched `/api/embed` endpoint. Servers that answer 404 there are
/// older releases, and the provider switches to the per-text
/// `/api/embeddings` endpoint for the rest of its lifetime.
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    batch_size: usize,
    legacy: AtomicBool,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct LegacyEmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct LegacyEmbedResponse {
    embedding: Vec<f32>,
}

impl OllamaProvider {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        if config.model.trim().is_empty() {
            return Err(RagError::config(
                "missing Ollama embedding model (set OLLAMA_EMBED_MODEL or embeddings.model)",
            ));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RagError::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model,
            batch_size: config.batch_size.max(1),
            legacy: AtomicBool::new(false),
        })
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Option<Vec<Vec<f32>>>> {
        let url = format!("{}/api/embed", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .map_err(|e| transport_error(&url, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let parsed: EmbedResponse = decode_response(&url, response)?;
        Ok(Some(parsed.embeddings))
    }

    fn embed_legacy(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embeddings", self.base_url);
        texts
            .iter()
            .map(|text| {
                let response = self
                    .client
                    .post(&url)
                    .json(&LegacyEmbedRequest {
                        model: &self.model,
                        prompt: text,
                    })
                    .send()
                    .map_err(|e| transport_error(&url, e))?;
                let parsed: LegacyEmbedResponse = decode_response(&url, response)?;
                Ok(parsed.embedding)
            })
            .collect()
    }
}

impl EmbeddingProvider for OllamaProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if !self.legacy.load(Ordering::Relaxed) {
            if let Some(vectors) = self.embed_batch(texts)? {
                return Ok(vectors);
            }
            debug!(base_url = %self.base_url, "/api/embed not found; using /api/embeddings");
            self.legacy.store(true, Ordering::Relaxed);
        }
        self.embed_legacy(texts)
    }
}

fn transport_error(url: &str, err: reqwest::Error) -> RagError {
    let kind = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    RagError::EmbedderUnavailable(format!("{} {}: {}", url, kind, err))
}

fn decode_response<T: serde::de::DeserializeOwned>(
    url: &str,
    response: reqwest::blocking::Response,
) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        let message = format!("{} returned {}: {}", url, status, body.trim());
        return Err(
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                RagError::EmbedderUnavailable(message)
            } else {
                RagError::EmbedderResponse(message)
            },
        );
    }
    let body = response
        .text()
        .map_err(|e| transport_error(url, e))?;
    serde_json::from_str(&body)
        .map_err(|e| RagError::EmbedderResponse(format!("{} sent malformed JSON: {}", url, e)))
}

/// Command provider that shells out to an external process.
///
/// The command receives `{"model": .., "texts": [..]}` on stdin and prints
/// either a JSON array of vectors or an object holding one under
/// `embeddings`, `vectors` or `data`.
pub struct CommandProvider {
    command: String,
    model: String,
    batch_size: usize,
    dimension: Option<usize>,
    timeout: Duration,
}

impl CommandProvider {
    pub fn new(command: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let command = command.into();
        if command.trim().is_empty() {
            return Err(RagError::config("embedding command is empty"));
        }
        which::which("sh").map_err(|e| {
            RagError::config(format!("embedding command needs a shell: {}", e))
        })?;
        Ok(Self {
            command,
            model: model.into(),
            batch_size: DEFAULT_COMMAND_BATCH_SIZE,
            dimension: None,
            timeout: DEFAULT_EMBED_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_dimension(mut self, dimension: Option<usize>) -> Self {
        self.dimension = dimension;
        self
    }

    fn run_command(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let payload = serde_json::json!({
            "model": self.model,
            "texts": texts,
        })
        .to_string();

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                RagError::EmbedderUnavailable(format!(
                    "failed to spawn embedding command '{}': {}",
                    self.command, e
                ))
            })?;

        // Pipes are drained on their own threads so a chatty child cannot block.
        let stdin = child.stdin.take().map(|mut stdin| {
            thread::spawn(move || {
                let _ = stdin.write_all(payload.as_bytes());
            })
        });
        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    warn!(
                        command = %self.command,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "embedding command timed out"
                    );
                    return Err(RagError::EmbedderUnavailable(format!(
                        "embedding command timed out after {:?}",
                        self.timeout
                    )));
                }
                Ok(None) => thread::sleep(COMMAND_POLL_INTERVAL),
                Err(e) => {
                    let _ = child.kill();
                    return Err(RagError::EmbedderUnavailable(format!(
                        "failed to wait for embedding command: {}",
                        e
                    )));
                }
            }
        };

        if let Some(handle) = stdin {
            let _ = handle.join();
        }
        let stdout = join_reader(stdout);
        let stderr = join_reader(stderr);

        if !status.success() {
            return Err(RagError::EmbedderUnavailable(format!(
                "embedding command failed ({}): {}",
                status,
                String::from_utf8_lossy(&stderr).trim()
            )));
        }

        parse_command_output(&String::from_utf8_lossy(&stdout))
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

fn join_reader(handle: Option<thread::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

fn parse_command_output(stdout: &str) -> Result<Vec<Vec<f32>>> {
    let malformed = |msg: &str| RagError::EmbedderResponse(format!("embedding command {}", msg));

    let parsed: Value = serde_json::from_str(stdout.trim())
        .map_err(|e| malformed(&format!("printed invalid JSON: {}", e)))?;

    let embeddings_value = match parsed {
        Value::Array(arr) => Value::Array(arr),
        Value::Object(obj) => ["embeddings", "vectors", "data"]
            .iter()
            .find_map(|key| obj.get(*key).cloned())
            .ok_or_else(|| malformed("output missing 'embeddings' field"))?,
        _ => return Err(malformed("output must be a JSON array or object")),
    };

    embeddings_value
        .as_array()
        .ok_or_else(|| malformed("embeddings must be a JSON array"))?
        .iter()
        .map(|row| {
            row.as_array()
                .ok_or_else(|| malformed("embedding row must be an array"))?
                .iter()
                .map(|value| {
                    value
                        .as_f64()
                        .map(|v| v as f32)
                        .ok_or_else(|| malformed("embedding value must be a number"))
                })
                .collect::<Result<Vec<f32>>>()
        })
        .collect()
}

impl EmbeddingProvider for CommandProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.run_command(texts)
    }
}

/// Offline feature-hashing embedder.
///
/// Lowercased alphanumeric tokens are hashed into a fixed number of signed
/// buckets and the result is L2-normalized. Deterministic and dependency-free
/// at runtime, which makes it suitable for tests and air-gapped setups.
pub struct HashingProvider {
    model: String,
    dimension: usize,
    batch_size: usize,
}

impl HashingProvider {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::config("hashing dimension must be greater than 0"));
        }
        Ok(Self {
            model: format!("hashing-{}", dimension),
            dimension,
            batch_size: DEFAULT_COMMAND_BATCH_SIZE,
        })
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = blake3::hash(token.to_lowercase().as_bytes());
            let bytes = hash.as_bytes();
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&bytes[..8]);
            let index = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl EmbeddingProvider for HashingProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}

#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
pub use local::FastEmbedder;

#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
mod local {
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use parking_lot::Mutex;

    use super::{truncate_to_chars, EmbeddingProvider};
    use crate::embedding::vector::l2_normalize;
    use crate::errors::{RagError, Result};

    const FASTEMBED_BATCH_SIZE: usize = 256;
    const FASTEMBED_MAX_CHARS: usize = 2000;
    const MINILM_DIM: usize = 384;

    /// FastEmbed provider using sentence-transformers/all-MiniLM-L6-v2.
    pub struct FastEmbedder {
        embedder: Mutex<TextEmbedding>,
        model_id: String,
    }

    impl FastEmbedder {
        pub fn new() -> Result<Self> {
            let model = EmbeddingModel::AllMiniLML6V2;
            let model_id = model.to_string();
            let embedder = TextEmbedding::try_new(InitOptions::new(model)).map_err(|e| {
                RagError::EmbedderUnavailable(format!(
                    "failed to initialize fastembed model: {}",
                    e
                ))
            })?;
            Ok(Self {
                embedder: Mutex::new(embedder),
                model_id,
            })
        }
    }

    impl EmbeddingProvider for FastEmbedder {
        fn model_id(&self) -> &str {
            &self.model_id
        }

        fn dimension(&self) -> Option<usize> {
            Some(MINILM_DIM)
        }

        fn batch_size(&self) -> usize {
            FASTEMBED_BATCH_SIZE
        }

        fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }

            let prepared: Vec<_> = texts
                .iter()
                .map(|text| truncate_to_chars(text, FASTEMBED_MAX_CHARS))
                .collect();
            let mut embeddings = self
                .embedder
                .lock()
                .embed(&prepared, Some(FASTEMBED_BATCH_SIZE))
                .map_err(|e| RagError::EmbedderResponse(format!("fastembed failed: {}", e)))?;

            for embedding in embeddings.iter_mut() {
                l2_normalize(embedding);
            }
            Ok(embeddings)
        }
    }
}

#[cfg_attr(all(target_os = "macos", target_arch = "x86_64"), allow(dead_code))]
fn truncate_to_chars(input: &str, max_chars: usize) -> Cow<'_, str> {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => Cow::Owned(input[..idx].to_string()),
        None => Cow::Borrowed(input),
    }
}
