// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded retry with exponential backoff around embedder calls.

use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use crate::cancel::CancelFlag;
use crate::embedding::provider::{tag_vectors, EmbeddingProvider};
use crate::embedding::vector::Embedding;
use crate::errors::{RagError, Result};

/// Configures retry behaviour for embedder calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt + 1`, capped at `backoff_max_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

/// Embeds `texts` and tags the vectors, retrying transient failures.
///
/// Only errors for which [`RagError::is_retryable`] holds are retried. A raised
/// cancel flag stops before the next attempt.
pub fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    policy: &RetryPolicy,
    cancel: &CancelFlag,
) -> Result<Vec<Embedding>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(RagError::Cancelled);
        }

        match provider.embed_texts(texts) {
            Ok(vectors) => {
                if attempt > 0 {
                    info!(model = provider.model_id(), attempt, "embedder recovered");
                }
                return tag_vectors(provider, texts.len(), vectors);
            }
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.backoff(attempt);
                warn!(
                    model = provider.model_id(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "embedder call failed, retrying"
                );
                thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        error: fn() -> RagError,
    }

    impl EmbeddingProvider for Flaky {
        fn model_id(&self) -> &str {
            "flaky"
        }

        fn batch_size(&self) -> usize {
            8
        }

        fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err((self.error)());
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_base_ms: 0,
            backoff_max_ms: 0,
        }
    }

    fn unavailable() -> RagError {
        RagError::EmbedderUnavailable("connection refused".into())
    }

    fn malformed() -> RagError {
        RagError::EmbedderResponse("bad json".into())
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(4), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(63), Duration::from_millis(1_000));
    }

    #[test]
    fn test_recovers_from_transient_failures() {
        let provider = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
            error: unavailable,
        };
        let out = embed_with_retry(&provider, &["a".into()], &fast_policy(2), &CancelFlag::new())
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].model_id(), "flaky");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_stops_after_max_retries() {
        let provider = Flaky {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
            error: unavailable,
        };
        let err = embed_with_retry(&provider, &["a".into()], &fast_policy(2), &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, RagError::EmbedderUnavailable(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_does_not_retry_malformed_responses() {
        let provider = Flaky {
            failures: 1,
            calls: AtomicU32::new(0),
            error: malformed,
        };
        let err = embed_with_retry(&provider, &["a".into()], &fast_policy(5), &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, RagError::EmbedderResponse(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancelled_before_first_attempt() {
        let provider = Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
            error: unavailable,
        };
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = embed_with_retry(&provider, &["a".into()], &RetryPolicy::none(), &cancel)
            .unwrap_err();
        assert!(matches!(err, RagError::Cancelled));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
