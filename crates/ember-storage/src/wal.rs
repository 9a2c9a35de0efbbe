//! Write-ahead logging hook.
//!
//! The cache core owns no log format; it only promises to notify the log
//! manager before a page image goes to disk. Log contents and crash recovery
//! belong to the log manager.

use ember_common::types::PageId;

/// Opaque sink notified before the pool writes a page image back to disk.
pub trait WalSink: Send + Sync {
    fn before_page_write(&self, page_id: PageId);
}

/// Sink for pools running without a log manager.
#[derive(Debug, Default)]
pub struct NoopWal;

impl WalSink for NoopWal {
    fn before_page_write(&self, _page_id: PageId) {}
}
