//! Error types for the sync engine.

use std::path::PathBuf;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while reading or regenerating notebooks.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Failed to read a source file.
    #[error("failed to read file {path}: {message}")]
    Read { path: PathBuf, message: String },

    /// The file extension is not a notebook format.
    #[error("file must end with .py or .md: {0}")]
    UnsupportedExtension(PathBuf),

    /// The core rejected the notebook.
    #[error(transparent)]
    Core(#[from] callisto_core::Error),

    /// JSON (de)serialization of the notebook IR failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
