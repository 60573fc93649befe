use snip_core::StoreError;
use thiserror::Error;

/// Result type for code generation.
pub type Result<T> = std::result::Result<T, GenerationError>;

/// Errors returned when a short code cannot be produced.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("entropy source failed: {0}")]
    Entropy(String),
    #[error("invalid code length {length}; expected 1..={max}")]
    InvalidLength { length: usize, max: usize },
}

impl From<GenerationError> for StoreError {
    fn from(value: GenerationError) -> Self {
        StoreError::Generation(value.to_string())
    }
}
