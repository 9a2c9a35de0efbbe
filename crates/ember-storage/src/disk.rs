//! Disk manager: blocking page-granular file I/O.
//!
//! Page `p` lives at byte offset `p * PAGE_SIZE` of a single data file.
//! Page-id allocation is owned by the buffer pool; the disk manager only
//! learns about deallocations.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use ember_common::prelude::*;

use crate::PAGE_SIZE;

/// Blocking random-access page store backed by a single file.
pub struct DiskManager {
    path: PathBuf,
    file: Mutex<File>,
    reads: AtomicU64,
    writes: AtomicU64,
    deallocations: AtomicU64,
}

impl DiskManager {
    /// Open the data file, creating it if it does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deallocations: AtomicU64::new(0),
        })
    }

    /// Fill `buf` with the stored image of `page_id`.
    ///
    /// Reading past the current end of file yields zeroes: a page that was
    /// allocated but never written back has an all-zero image.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        debug_assert!(page_id.is_valid());
        debug_assert_eq!(buf.len(), PAGE_SIZE);

        let offset = page_id.0 * PAGE_SIZE as u64;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        buf[filled..].fill(0);

        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Persist `buf` as the image of `page_id`.
    pub fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<()> {
        debug_assert!(page_id.is_valid());
        debug_assert_eq!(buf.len(), PAGE_SIZE);

        let offset = page_id.0 * PAGE_SIZE as u64;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;

        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Record that the pool released `page_id`. Ids are never reused, so this
    /// is informational only.
    pub fn deallocate_page(&self, page_id: PageId) {
        self.deallocations.fetch_add(1, Ordering::Relaxed);
        trace!("deallocated {page_id}");
    }

    /// fsync the data file.
    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of page reads served so far.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of page writes performed so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn deallocations(&self) -> u64 {
        self.deallocations.load(Ordering::Relaxed)
    }
}
