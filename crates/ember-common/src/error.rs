//! Error types for EmberDB

use thiserror::Error;

/// Result type alias using EmberDB's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for EmberDB
#[derive(Error, Debug)]
pub enum Error {
    // Storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    /// Every frame is either handed out or pinned; nothing to evict.
    #[error("Buffer pool exhausted")]
    PoolExhausted,

    /// The reserved sentinel page id was passed to a pool operation.
    #[error("Invalid page id")]
    InvalidPageId,
}

impl Error {
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// True when the failure is transient pool pressure: the caller can retry
    /// after unpinning pages.
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self, Error::Storage(StorageError::PoolExhausted))
    }
}
