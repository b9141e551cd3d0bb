// Error taxonomy for indexing runs.
//
// Only `StoreError` aborts a run; scan and parse problems are logged,
// counted in the run summary and skipped. Embedding failures degrade to
// a per-record vector skip.

use std::path::PathBuf;
use thiserror::Error;

/// Persistence failure in one of the stores or the registry.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("vector store database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("store serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Embedding provider failure.
///
/// Transient failures are retried a bounded number of times before the
/// record is skipped from the vector store; permanent failures skip
/// immediately. Neither aborts the run.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("transient embedding failure: {0}")]
    Transient(String),

    #[error("permanent embedding failure: {0}")]
    Permanent(String),
}
