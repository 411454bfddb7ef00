use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by personid operations.
///
/// Per-observation and per-image problems never surface here; they are
/// recorded as [`crate::SkipReason`] values inside the batch result.
#[derive(Debug, Error)]
pub enum PersonIdError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("non-finite value at index {index}")]
    NonFinite { index: usize },

    #[error("identity id space exhausted")]
    IdSpaceExhausted,

    #[error("identity not found: {0}")]
    UnknownIdentity(String),

    #[error("persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("encode store: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("store backend: {0}")]
    Backend(String),
}

/// Errors an [`crate::EmbeddingSource`] reports for a single image.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no embeddings available for image: {0}")]
    NotFound(String),

    #[error("model error: {0}")]
    Model(String),
}
