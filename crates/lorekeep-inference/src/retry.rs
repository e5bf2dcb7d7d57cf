//! Deadline and retry policy for embedding calls.
//!
//! Each attempt runs under its own deadline. Transient failures
//! ([`Error::is_transient`]) are retried with a doubling backoff until the
//! attempt budget is spent; anything else fails immediately.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use lorekeep_core::{defaults, EmbeddingBackend, Error, Result, Vector};

/// Bounded retry with per-attempt timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each later one.
    pub backoff: Duration,
    /// Deadline for a single attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::EMBED_MAX_ATTEMPTS,
            backoff: Duration::from_millis(defaults::EMBED_BACKOFF_MS),
            timeout: Duration::from_secs(defaults::EMBED_TIMEOUT_SECS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration, timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            timeout,
        }
    }

    /// Delay before attempt `attempt + 1`, given `attempt` failed (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(factor)
    }
}

/// Embed `texts`, retrying transient failures per `policy`.
pub async fn embed_with_retry(
    backend: &dyn EmbeddingBackend,
    texts: &[String],
    policy: &RetryPolicy,
) -> Result<Vec<Vector>> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let start = Instant::now();
        let outcome = match tokio::time::timeout(policy.timeout, backend.embed_texts(texts)).await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "Embedding exceeded {}ms deadline",
                policy.timeout.as_millis()
            ))),
        };

        match outcome {
            Ok(vectors) => {
                debug!(
                    subsystem = "inference",
                    component = "retry",
                    attempt,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Embedding attempt succeeded"
                );
                return Ok(vectors);
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    subsystem = "inference",
                    component = "retry",
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Embedding attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
