//! Per-chunk retry, backoff and timeout.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use reelhub_protocol::ChunkAccepted;

use crate::error::ClientError;
use crate::transport::{ChunkUpload, ProgressFn, UploadTransport};

/// Retry settings for a single chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Bound on one HTTP exchange.
    pub chunk_timeout: Duration,
    /// After failed attempt `n` the sender waits `n * backoff_step`.
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            chunk_timeout: Duration::from_secs(30),
            backoff_step: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step.saturating_mul(attempt)
    }
}

/// Sends chunks through an [`UploadTransport`], retrying transient failures.
pub struct ChunkTransport<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: UploadTransport> ChunkTransport<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The wrapped transport, for calls that are not retried per chunk.
    pub fn transport(&self) -> &T {
        &self.inner
    }

    /// Delivers one chunk.
    ///
    /// Returns the first success, the first non-retryable error, or the
    /// last error once every attempt is spent. Cancellation interrupts both
    /// an in-flight attempt and a backoff sleep.
    pub async fn send_chunk(
        &self,
        chunk: &ChunkUpload,
        progress: ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<ChunkAccepted, ClientError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                r = tokio::time::timeout(
                    self.policy.chunk_timeout,
                    self.inner.send_chunk(chunk, progress.clone()),
                ) => r.unwrap_or(Err(ClientError::Timeout(self.policy.chunk_timeout))),
            };

            let err = match result {
                Ok(ack) => {
                    if attempt > 1 {
                        debug!(index = chunk.index, attempt, "chunk delivered after retry");
                    }
                    return Ok(ack);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            if attempt >= max_attempts {
                warn!(
                    index = chunk.index,
                    attempts = attempt,
                    error = %err,
                    "chunk failed, retries exhausted"
                );
                return Err(err);
            }

            let delay = self.policy.backoff(attempt);
            warn!(
                index = chunk.index,
                attempt,
                retry_in_ms = delay.as_millis() as u64,
                error = %err,
                "chunk attempt failed"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
