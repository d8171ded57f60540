//! Error types for the `quill-rag` crate.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in indexing, caching, rate limiting or generation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RagError {
    /// Malformed input: `top_k < 1`, a non-positive TTL, an unknown parameter value, etc.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An embedding did not have the index's fixed dimensionality.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The dimensionality the index was created with.
        expected: usize,
        /// The length of the offending vector.
        actual: usize,
    },

    /// A document with the same ID is already indexed.
    #[error("Duplicate document ID: {0}")]
    DuplicateId(String),

    /// Rate limiter permits did not become available in time.
    #[error("Rate limit permits not available within {waited:?}")]
    RateLimitTimeout {
        /// How long the caller waited before giving up.
        waited: Duration,
    },

    /// The embedding provider failed.
    #[error("Embedding unavailable ({provider}): {message}")]
    EmbeddingUnavailable {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The generation provider failed.
    #[error("Generation failed ({provider}{}): {message}", status_suffix(.status))]
    GenerationFailed {
        /// The generation provider that produced the error.
        provider: String,
        /// Provider status detail (HTTP status for remote providers).
        status: Option<u16>,
        /// A description of the failure.
        message: String,
    },

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl RagError {
    /// Shorthand for [`RagError::InvalidArgument`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Whether a caller may reasonably retry the failed operation (with backoff).
    ///
    /// Input and index-mutation errors are permanent; provider failures and
    /// rate-limit timeouts are transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimitTimeout { .. }
                | Self::EmbeddingUnavailable { .. }
                | Self::GenerationFailed { .. }
        )
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(", status {s}")).unwrap_or_default()
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;

/// The request stage at which [`RagOrchestrator::handle`](crate::RagOrchestrator::handle) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Parameter validation, before any retrieval happens.
    Validating,
    /// Query embedding and vector search.
    Retrieving,
    /// Waiting for rate limiter permits.
    RateGate,
    /// The external generation call.
    Generating,
}

impl Stage {
    /// Stable lowercase name used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::Retrieving => "retrieving",
            Self::RateGate => "rate_gate",
            Self::Generating => "generating",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A [`RagError`] annotated with the [`Stage`] where it occurred.
///
/// The inner error kind is passed through unchanged so callers can tell a
/// transient failure from a permanent input error.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{stage} failed: {error}")]
pub struct HandleError {
    /// Where the request failed.
    pub stage: Stage,
    /// What went wrong.
    #[source]
    pub error: RagError,
}

impl HandleError {
    /// Annotate `error` with `stage`.
    pub fn new(stage: Stage, error: RagError) -> Self {
        Self { stage, error }
    }

    /// See [`RagError::is_retryable`].
    pub fn is_retryable(&self) -> bool {
        self.error.is_retryable()
    }
}
