//! Common error types for the SGRE pipeline

use thiserror::Error;

/// Common result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across pipeline stages
///
/// Variants follow the failure taxonomy of the stages: configuration and input
/// problems fail fast, drift between the ledger and the filesystem is reported
/// as `NotFound`, and codec or unexpected I/O failures surface as `Internal`
/// with context.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error (ledger, cache envelopes)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Parquet encode/decode error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Arrow record batch error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Ledger references a file that no longer exists on disk
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid caller input (unknown dataset, version mismatch, empty save)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unexpected failure, wrapped with context
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap any error as `Internal` with a context prefix
    pub fn internal(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        Error::Internal(format!("{}: {}", context, err))
    }
}
