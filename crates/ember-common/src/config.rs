//! Configuration types for EmberDB

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageOptions {
    /// Database file path
    pub data_path: PathBuf,

    /// Number of frames in the buffer pool
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// K in the LRU-K replacement policy
    #[serde(default = "default_replacer_k")]
    pub replacer_k: usize,

    /// Maximum entries per page-directory bucket
    #[serde(default = "default_bucket_size")]
    pub bucket_size: usize,

    /// fsync the data file after every explicit flush
    #[serde(default)]
    pub sync_on_flush: bool,
}

fn default_pool_size() -> usize {
    64
}

fn default_replacer_k() -> usize {
    2
}

fn default_bucket_size() -> usize {
    8
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("./ember.db"),
            pool_size: default_pool_size(),
            replacer_k: default_replacer_k(),
            bucket_size: default_bucket_size(),
            sync_on_flush: false,
        }
    }
}

impl StorageOptions {
    pub fn with_data_path(path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: path.into(),
            ..Self::default()
        }
    }

    /// Validate the configuration.
    /// Fatal errors are returned as `Err(Vec<String>)`.
    /// Warnings are logged but do not cause failure.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.pool_size == 0 {
            errors.push("pool_size must be > 0".to_string());
        }
        if self.replacer_k == 0 {
            errors.push("replacer_k must be > 0".to_string());
        }
        if self.bucket_size == 0 {
            errors.push("bucket_size must be > 0".to_string());
        }

        // Warnings (logged but not fatal)
        if self.pool_size != 0 && self.pool_size < 4 {
            tracing::warn!(
                "pool_size {} is very small; pin pressure will exhaust the pool quickly",
                self.pool_size
            );
        }
        if self.replacer_k > self.pool_size && self.pool_size != 0 {
            tracing::warn!(
                "replacer_k {} exceeds pool_size {}; most frames will never reach K accesses",
                self.replacer_k,
                self.pool_size
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
