//! Error types for fitstore
//!
//! Lock contention is never an error: the writer retries internally with
//! adaptive backoff. Everything surfaced here is caller-visible.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Fitstore error types
#[derive(Error, Debug)]
pub enum Error {
    /// Fit result cannot be stored (missing output config, or shutdown begun)
    #[error("cannot store fit result: {0}")]
    CannotStore(String),

    /// Fit results cannot be read (no shards configured, or no shard usable)
    #[error("cannot read fit results: {0}")]
    CannotRead(String),

    /// Aggregate evaluation impossible (empty result set is not a silent success)
    #[error("cannot evaluate fit results: {0}")]
    CannotEvaluate(String),

    /// Advisory lock bookkeeping failed (marker file unreadable/unremovable)
    #[error("advisory lock error: {0}")]
    Lock(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Fit-outcome blob (de)serialization error
    #[error("fit outcome codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
