//! # Ember Common
//!
//! Common types, errors, and utilities shared across all EmberDB crates.

pub mod config;
pub mod error;
pub mod testing;
pub mod types;

pub use config::StorageOptions;
pub use error::{Error, Result};
pub use types::{FrameId, PageId};

/// Re-export commonly used external types
pub mod prelude {
    pub use super::config::StorageOptions;
    pub use super::error::{Error, Result, StorageError};
    pub use super::types::{FrameId, PageId};
    pub use tracing::{debug, error, info, trace, warn};
}
