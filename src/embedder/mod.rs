//! Embedding service boundary, retry policy, and the per-record worker.

pub mod gemini;
mod retry;
mod worker;

pub use retry::{
    ErrorKind, RetryPolicy, RetryState, RetryStep, DEFAULT_BACKOFF_BASE, DEFAULT_MAX_ATTEMPTS,
};
pub use worker::{EmbeddingFailure, EmbeddingWorker, FailureReason};

/// Single-text embedding backend.
pub trait Embed: Send + Sync {
    /// Returns the embedding vector for `text`.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

impl<T: Embed + ?Sized> Embed for &T {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        (**self).embed(text)
    }
}

impl<T: Embed + ?Sized> Embed for std::sync::Arc<T> {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        (**self).embed(text)
    }
}

/// Failure from one embedding call.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// The service signalled rate limiting (HTTP 429).
    #[error("embedding service rate limited the request: {0}")]
    RateLimited(String),
    /// The service answered with a non-success status.
    #[error("embedding service returned {status}: {body}")]
    Service {
        /// HTTP status code.
        status: u16,
        /// Response body, if readable.
        body: String,
    },
    /// The request never produced a response.
    #[error("embedding request failed: {0}")]
    Transport(reqwest::Error),
    /// The response was readable but unusable.
    #[error("malformed embedding response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for EmbedError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err)
    }
}

impl EmbedError {
    /// Coarse classification driving the retry path.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited(_) => ErrorKind::RateLimited,
            _ => ErrorKind::Other,
        }
    }
}
