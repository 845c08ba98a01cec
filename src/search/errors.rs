use std::time::Duration;

use crate::semantic::{EmbeddingError, IndexError};

/// Request-level failures surfaced to the caller.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    /// Bad request shape or values; never retried.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The only retriever able to serve the request failed or timed out.
    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),
}

/// Failure of a single retrieval path.
#[derive(thiserror::Error, Debug)]
pub enum RetrievalError {
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(#[from] EmbeddingError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("retrieval task failed: {0}")]
    Task(String),

    #[error("semantic search is disabled")]
    Disabled,
}

impl From<tokio::task::JoinError> for RetrievalError {
    fn from(err: tokio::task::JoinError) -> Self {
        RetrievalError::Task(err.to_string())
    }
}
