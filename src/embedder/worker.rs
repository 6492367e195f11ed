//! Turns one prepared record into an upsert unit, retrying the service call.

use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use super::{Embed, EmbedError, RetryPolicy, RetryStep};
use crate::record::{PreparedRecord, Record, UpsertUnit, METADATA_LIMIT_BYTES};

/// Why a record could not be embedded.
#[derive(Debug, thiserror::Error)]
pub enum FailureReason {
    /// Every allowed attempt failed; carries the last error.
    #[error("embedding generation failed after {attempts} attempt(s): {last_error}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last_error: EmbedError,
    },
    /// The embedding backend panicked while handling this record.
    #[error("embedding worker panicked: {0}")]
    Panicked(String),
    /// Metadata would exceed the index's per-record ceiling.
    #[error("metadata is {bytes} bytes, over the {limit} byte limit")]
    MetadataTooLarge {
        /// Encoded metadata size.
        bytes: usize,
        /// Allowed size.
        limit: usize,
    },
}

/// Terminal per-record failure. Carries the originating record so callers
/// can log its identifier and title.
#[derive(Debug, thiserror::Error)]
#[error("record {}: {reason}", .record.id)]
pub struct EmbeddingFailure {
    /// The record that failed.
    pub record: Record,
    /// What went wrong.
    pub reason: FailureReason,
}

/// Calls the embedding service for one record at a time.
#[derive(Debug, Clone)]
pub struct EmbeddingWorker<E> {
    embedder: E,
    policy: RetryPolicy,
    dimension: usize,
}

impl<E: Embed> EmbeddingWorker<E> {
    /// Worker expecting vectors of exactly `dimension` values.
    pub fn new(embedder: E, policy: RetryPolicy, dimension: usize) -> Self {
        Self {
            embedder,
            policy,
            dimension,
        }
    }

    /// Embeds one record, sleeping the calling thread between rate-limited
    /// retries.
    pub fn embed(&self, item: PreparedRecord) -> Result<UpsertUnit, EmbeddingFailure> {
        self.embed_with(item, thread::sleep)
    }

    /// Like [`EmbeddingWorker::embed`], but waits through `sleep`.
    pub fn embed_with<S>(
        &self,
        item: PreparedRecord,
        mut sleep: S,
    ) -> Result<UpsertUnit, EmbeddingFailure>
    where
        S: FnMut(Duration),
    {
        let PreparedRecord {
            record,
            text,
            metadata,
        } = item;

        let bytes = metadata.encoded_len();
        if bytes > METADATA_LIMIT_BYTES {
            return Err(EmbeddingFailure {
                record,
                reason: FailureReason::MetadataTooLarge {
                    bytes,
                    limit: METADATA_LIMIT_BYTES,
                },
            });
        }

        let mut state = self.policy.start();
        loop {
            let err = match self.call(&text) {
                Ok(values) => {
                    return Ok(UpsertUnit {
                        id: record.id,
                        values,
                        metadata,
                    })
                }
                Err(err) => err,
            };
            match state.record_failure(err.kind()) {
                RetryStep::Retry(delay) => {
                    debug!(
                        id = %record.id,
                        error = %err,
                        attempts_remaining = state.attempts_remaining(),
                        delay_ms = delay.as_millis() as u64,
                        "retrying embedding"
                    );
                    if !delay.is_zero() {
                        sleep(delay);
                    }
                }
                RetryStep::GiveUp => {
                    warn!(id = %record.id, error = %err, "embedding failed permanently");
                    return Err(EmbeddingFailure {
                        record,
                        reason: FailureReason::Exhausted {
                            attempts: state.attempts_made(),
                            last_error: err,
                        },
                    });
                }
            }
        }
    }

    fn call(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let values = self.embedder.embed(text)?;
        if values.len() != self.dimension {
            return Err(EmbedError::Malformed(format!(
                "expected {} dimensions, got {}",
                self.dimension,
                values.len()
            )));
        }
        Ok(values)
    }
}
