use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("corpus file not found: {0}")]
    MissingCorpus(PathBuf),

    #[error("collection {0} has not been built")]
    StoreNotFound(String),

    #[error("a build of collection {collection} is already running (lock file {lock:?}; remove it if no build is running)")]
    BuildInProgress { collection: String, lock: PathBuf },

    #[error("{path:?} line {line}: {message}")]
    Corpus {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("{path:?} has no {column:?} column")]
    MissingColumn { path: PathBuf, column: String },

    #[error("metadata field {key:?} missing or mistyped for {collection}")]
    Metadata { collection: String, key: String },

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("collection {collection} was built with embedder {built_with:?} but is being used with {using:?}; rebuild it or switch embedders")]
    EmbedderMismatch {
        collection: String,
        built_with: String,
        using: String,
    },

    #[error("embedding dimension {got} does not match index dimension {expected}")]
    Dimension { expected: usize, got: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[cfg(feature = "lancedb")]
    #[error("lancedb error: {0}")]
    Lance(#[from] lancedb::Error),

    #[error("{0}")]
    Other(String),
}
