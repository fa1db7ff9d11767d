//! Cache error types

use std::path::PathBuf;
use thiserror::Error;

pub type CacheResult<T> = std::result::Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    /// The value could not be turned into a JSON payload
    #[error("Cannot encode cache payload: {0}")]
    Encode(#[source] serde_json::Error),

    /// A cache file exists but does not hold a valid envelope
    #[error("Corrupt cache file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The stored payload does not match the requested type
    #[error("Cached payload has an unexpected shape: {0}")]
    PayloadMismatch(#[source] serde_json::Error),

    #[error("Invalid cache configuration: {0}")]
    InvalidConfiguration(String),

    /// The disk writer is spawned on the ambient tokio runtime
    #[error("Disk tier must be created inside a tokio runtime")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}
