use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorStoreError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VectorStoreError {
    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding model mismatch: index holds '{expected}', got '{actual}'")]
    ModelMismatch { expected: String, actual: String },

    #[error("Embedding computation exceeded {0:?}")]
    ComputeTimeout(Duration),
}
