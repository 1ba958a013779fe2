// Crate-wide error type
// Driver failures are surfaced to the caller instead of being logged and dropped,
// so an empty result and a failed query stay distinguishable.

use thiserror::Error;

/// Errors produced by the document-store and relational wrappers
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Target not set: select a {0} before running data operations")]
    TargetNotSet(&'static str),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection pool error: {0}")]
    PoolError(String),

    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate id: a record with id {0} already exists")]
    DuplicateId(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Wrap a driver error as a query failure, logging it on the way through.
    pub(crate) fn query<E: std::fmt::Display>(err: E) -> Self {
        tracing::warn!("query failed: {}", err);
        StoreError::QueryFailed(err.to_string())
    }
}
