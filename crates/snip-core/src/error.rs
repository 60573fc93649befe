use thiserror::Error;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by every store backend.
///
/// A resubmitted URL is not an error: it is reported through
/// [`Shortened::Conflict`](crate::Shortened::Conflict).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("short code generation failed: {0}")]
    Generation(String),
    #[error("no free short code found after {attempts} attempts")]
    AllocationExhausted { attempts: usize },
    #[error("short code not found: {0}")]
    NotFound(String),
    #[error("short code is gone: {0}")]
    Gone(String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("journal error: {0}")]
    Journal(String),
}

#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
}
