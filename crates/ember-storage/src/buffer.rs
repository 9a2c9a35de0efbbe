//! Buffer pool manager.
//!
//! The pool owns a fixed array of page frames and is the only path between
//! higher layers and the disk manager:
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                     BufferPoolManager                        |
//! |  +----------------+   +-----------------------------------+  |
//! |  | page directory |   |         frames: Vec<Frame>        |  |
//! |  | PageId -> Fid  |-->|  [frame0] [frame1] [frame2] ...   |  |
//! |  +----------------+   +-----------------------------------+  |
//! |  +----------------+   +---------------+   +--------------+   |
//! |  |   free_list    |   | LruKReplacer  |   | DiskManager  |   |
//! |  +----------------+   +---------------+   +--------------+   |
//! +--------------------------------------------------------------+
//! ```
//!
//! Every public operation serializes on the pool-wide latch, and disk I/O
//! runs while it is held; the directory and replacer keep their own internal
//! locks but are only ever called under the latch, so those are uncontended.
//! Frame data buffers sit behind per-frame `RwLock`s so page guards stay
//! usable after the latch is released. Guards release the data lock before
//! re-taking the latch to unpin, which keeps the two lock levels ordered.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ember_common::prelude::*;

use crate::disk::DiskManager;
use crate::hash_table::ExtendibleHashTable;
use crate::page::Page;
use crate::replacer::LruKReplacer;
use crate::wal::{NoopWal, WalSink};

/// A pool slot. `page_id`, `pin_count` and `dirty` only change under the
/// pool latch; the data buffer has its own lock so guards can keep reading
/// and writing after the latch is dropped.
struct Frame {
    data: RwLock<Page>,
    page_id: AtomicU64,
    pin_count: AtomicU32,
    dirty: AtomicBool,
}

impl Frame {
    fn new() -> Self {
        Self {
            data: RwLock::new(Page::new()),
            page_id: AtomicU64::new(PageId::INVALID.0),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
        }
    }

    #[inline]
    fn page_id(&self) -> PageId {
        PageId(self.page_id.load(Ordering::Acquire))
    }

    #[inline]
    fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    #[inline]
    fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns the pin count after the decrement.
    #[inline]
    fn unpin(&self) -> u32 {
        let old = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old > 0, "unpin with pin_count == 0");
        old - 1
    }

    #[inline]
    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    #[inline]
    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    #[inline]
    fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    /// Rebind the frame to a new page: one pin, clean.
    fn rebind(&self, page_id: PageId) {
        self.page_id.store(page_id.0, Ordering::Release);
        self.pin_count.store(1, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
    }

    fn unbind(&self) {
        self.page_id.store(PageId::INVALID.0, Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
    }
}

/// State guarded by the pool-wide latch.
struct PoolState {
    free_list: VecDeque<FrameId>,
    next_page_id: u64,
}

/// Internal statistics with atomic counters
struct PoolCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    flushes: AtomicU64,
}

impl PoolCounters {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        }
    }
}

/// Snapshot of buffer pool activity.
#[derive(Debug, Clone, Default)]
pub struct BufferPoolStats {
    pub pool_size: usize,
    pub resident_pages: usize,
    pub dirty_pages: usize,
    pub free_frames: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub flushes: u64,
}

/// Fixed-capacity page cache between access methods and the disk manager.
pub struct BufferPoolManager {
    latch: Mutex<PoolState>,
    frames: Vec<Frame>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LruKReplacer,
    disk: Arc<DiskManager>,
    wal: Arc<dyn WalSink>,
    stats: PoolCounters,
    sync_on_flush: bool,
}

impl BufferPoolManager {
    /// Create a pool of `pool_size` frames over `disk`.
    ///
    /// # Panics
    /// Panics if `pool_size` is 0.
    pub fn new(
        pool_size: usize,
        replacer_k: usize,
        bucket_size: usize,
        disk: Arc<DiskManager>,
    ) -> Self {
        assert!(pool_size > 0, "pool_size must be > 0");
        Self {
            latch: Mutex::new(PoolState {
                free_list: (0..pool_size).map(FrameId).collect(),
                next_page_id: 0,
            }),
            frames: (0..pool_size).map(|_| Frame::new()).collect(),
            page_table: ExtendibleHashTable::new(bucket_size),
            replacer: LruKReplacer::new(pool_size, replacer_k),
            disk,
            wal: Arc::new(NoopWal),
            stats: PoolCounters::new(),
            sync_on_flush: false,
        }
    }

    /// Open the data file named by `options` and build a pool sized from it.
    pub fn open(options: &StorageOptions) -> Result<Self> {
        options
            .validate()
            .map_err(|errors| Error::config(errors.join("; ")))?;
        let disk = Arc::new(DiskManager::open(&options.data_path)?);
        let mut pool = Self::new(
            options.pool_size,
            options.replacer_k,
            options.bucket_size,
            disk,
        );
        pool.sync_on_flush = options.sync_on_flush;
        Ok(pool)
    }

    /// Route page write-back through `wal` from now on.
    pub fn with_wal(mut self, wal: Arc<dyn WalSink>) -> Self {
        self.wal = wal;
        self
    }

    // ========================================================================
    // Public API
    // ========================================================================

    /// Allocate the next page id and return its zeroed, pinned frame.
    pub fn new_page(&self) -> Result<PageWriteGuard<'_>> {
        let (frame_id, page_id) = {
            let mut state = self.latch.lock();
            let frame_id = self.acquire_frame(&mut state)?;
            let page_id = PageId(state.next_page_id);
            state.next_page_id += 1;

            let frame = &self.frames[frame_id.0];
            self.page_table.insert(page_id, frame_id);
            frame.data.write().reset();
            frame.rebind(page_id);
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            debug!("allocated {page_id} in {frame_id}");
            (frame_id, page_id)
        };
        Ok(PageWriteGuard::new(self, frame_id, page_id))
    }

    /// Fetch `page_id` for shared access, reading it from disk on a miss.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PageReadGuard<'_>> {
        let frame_id = self.fetch_frame(page_id)?;
        Ok(PageReadGuard::new(self, frame_id, page_id))
    }

    /// Fetch `page_id` for exclusive access, reading it from disk on a miss.
    /// Mutating through the guard taints the frame.
    pub fn fetch_page_mut(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        let frame_id = self.fetch_frame(page_id)?;
        Ok(PageWriteGuard::new(self, frame_id, page_id))
    }

    /// Drop one pin on `page_id`. A dirty unpin taints the frame; a clean
    /// unpin never clears an existing taint. When the last pin goes, the
    /// frame becomes an eviction candidate.
    ///
    /// Returns `false` when the page is not resident or its pin count is
    /// already zero.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _state = self.latch.lock();
        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.0];
        if frame.pin_count() == 0 {
            return false;
        }
        if is_dirty {
            frame.mark_dirty();
        }
        if frame.unpin() == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Write the page image out regardless of the dirty flag and mark the
    /// frame clean. Pin state is untouched. Returns `Ok(false)` when the page
    /// is not resident.
    ///
    /// Callers must not hold a write guard on `page_id` while flushing it.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let _state = self.latch.lock();
        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(false);
        };
        self.write_frame(page_id, &self.frames[frame_id.0])?;
        if self.sync_on_flush {
            self.disk.sync()?;
        }
        Ok(true)
    }

    /// Write every resident page out and mark all frames clean.
    pub fn flush_all(&self) -> Result<()> {
        let _state = self.latch.lock();
        for frame in &self.frames {
            let page_id = frame.page_id();
            if page_id.is_valid() {
                self.write_frame(page_id, frame)?;
            }
        }
        if self.sync_on_flush {
            self.disk.sync()?;
        }
        Ok(())
    }

    /// Drop `page_id` from the pool and tell the disk manager it is gone.
    /// Succeeds vacuously when the page is not resident; returns `Ok(false)`
    /// when it is resident but still pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut state = self.latch.lock();
        let Some(frame_id) = self.page_table.find(&page_id) else {
            self.disk.deallocate_page(page_id);
            return Ok(true);
        };
        let frame = &self.frames[frame_id.0];
        if frame.pin_count() > 0 {
            return Ok(false);
        }
        if frame.is_dirty() {
            self.write_frame(page_id, frame)?;
        }

        self.replacer.remove(frame_id);
        self.page_table.remove(&page_id);
        frame.unbind();
        state.free_list.push_back(frame_id);
        self.disk.deallocate_page(page_id);
        debug!("deleted {page_id} from {frame_id}");
        Ok(true)
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    /// Pin count of `page_id`, or `None` if it is not resident.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let _state = self.latch.lock();
        self.page_table
            .find(&page_id)
            .map(|frame_id| self.frames[frame_id.0].pin_count())
    }

    pub fn contains_page(&self, page_id: PageId) -> bool {
        let _state = self.latch.lock();
        self.page_table.find(&page_id).is_some()
    }

    pub fn free_frame_count(&self) -> usize {
        self.latch.lock().free_list.len()
    }

    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Snapshot of pool counters and occupancy.
    pub fn stats(&self) -> BufferPoolStats {
        let state = self.latch.lock();
        let mut resident = 0;
        let mut dirty = 0;
        for frame in &self.frames {
            if frame.page_id().is_valid() {
                resident += 1;
                if frame.is_dirty() {
                    dirty += 1;
                }
            }
        }
        BufferPoolStats {
            pool_size: self.frames.len(),
            resident_pages: resident,
            dirty_pages: dirty,
            free_frames: state.free_list.len(),
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            flushes: self.stats.flushes.load(Ordering::Relaxed),
        }
    }

    // ========================================================================
    // Internals (latch held by caller)
    // ========================================================================

    /// Shared hit/miss path behind `fetch_page` and `fetch_page_mut`: returns
    /// the pinned frame holding `page_id`.
    fn fetch_frame(&self, page_id: PageId) -> Result<FrameId> {
        if !page_id.is_valid() {
            return Err(StorageError::InvalidPageId.into());
        }
        let mut state = self.latch.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = &self.frames[frame_id.0];
            frame.pin();
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            trace!("hit for {page_id} in {frame_id}");
            return Ok(frame_id);
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        trace!("miss for {page_id}, loading from disk");

        let frame_id = self.acquire_frame(&mut state)?;
        let frame = &self.frames[frame_id.0];
        self.page_table.insert(page_id, frame_id);
        frame.rebind(page_id);

        {
            let mut data = frame.data.write();
            if let Err(e) = self.disk.read_page(page_id, data.as_mut_slice()) {
                drop(data);
                // Undo the binding so the frame goes back to the free list
                // and the failed page stays non-resident.
                self.page_table.remove(&page_id);
                frame.unbind();
                state.free_list.push_back(frame_id);
                return Err(e);
            }
        }

        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);
        Ok(frame_id)
    }

    /// Pop a free frame, or evict the replacer's victim after writing back
    /// its dirty image and removing its directory binding.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = self.replacer.evict() else {
            return Err(StorageError::PoolExhausted.into());
        };
        let frame = &self.frames[frame_id.0];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            if let Err(e) = self.write_frame(old_page_id, frame) {
                // The frame stays bound and dirty; re-register it with the
                // replacer so a later call can retry the eviction.
                self.replacer.record_access(frame_id);
                self.replacer.set_evictable(frame_id, true);
                return Err(e);
            }
        }

        self.page_table.remove(&old_page_id);
        self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        trace!("evicted {old_page_id} from {frame_id}");
        Ok(frame_id)
    }

    /// Write one frame's image to disk and mark it clean. The dirty flag
    /// survives a failed write.
    fn write_frame(&self, page_id: PageId, frame: &Frame) -> Result<()> {
        self.wal.before_page_write(page_id);
        {
            let data = frame.data.read();
            self.disk.write_page(page_id, data.as_slice())?;
        }
        frame.clear_dirty();
        self.stats.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// ============================================================================
// Page guards
// ============================================================================

/// Shared page handle. Holding it keeps the frame pinned; dropping it
/// releases the pin. A read guard never taints the frame.
pub struct PageReadGuard<'a> {
    pool: &'a BufferPoolManager,
    page_id: PageId,
    data: Option<RwLockReadGuard<'a, Page>>,
}

impl<'a> PageReadGuard<'a> {
    fn new(pool: &'a BufferPoolManager, frame_id: FrameId, page_id: PageId) -> Self {
        Self {
            pool,
            page_id,
            data: Some(pool.frames[frame_id.0].data.read()),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn as_slice(&self) -> &[u8] {
        self.data.as_ref().expect("guard not dropped").as_slice()
    }
}

impl Deref for PageReadGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        // Release the frame data lock before re-taking the pool latch.
        self.data.take();
        self.pool.unpin_page(self.page_id, false);
    }
}

impl fmt::Debug for PageReadGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageReadGuard")
            .field("page_id", &self.page_id)
            .finish()
    }
}

/// Exclusive page handle. Mutable access taints the frame; the drop unpins
/// with whatever taint accumulated.
pub struct PageWriteGuard<'a> {
    pool: &'a BufferPoolManager,
    page_id: PageId,
    dirty: bool,
    data: Option<RwLockWriteGuard<'a, Page>>,
}

impl<'a> PageWriteGuard<'a> {
    fn new(pool: &'a BufferPoolManager, frame_id: FrameId, page_id: PageId) -> Self {
        Self {
            pool,
            page_id,
            dirty: false,
            data: Some(pool.frames[frame_id.0].data.write()),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn as_slice(&self) -> &[u8] {
        self.data.as_ref().expect("guard not dropped").as_slice()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.dirty = true;
        self.data.as_mut().expect("guard not dropped").as_mut_slice()
    }
}

impl Deref for PageWriteGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl DerefMut for PageWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_mut_slice()
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        // Release the frame data lock before re-taking the pool latch.
        self.data.take();
        self.pool.unpin_page(self.page_id, self.dirty);
    }
}

impl fmt::Debug for PageWriteGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageWriteGuard")
            .field("page_id", &self.page_id)
            .field("dirty", &self.dirty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_common::testing::{fixtures, TestContext};
    use crate::PAGE_SIZE;

    fn test_pool(pool_size: usize) -> (BufferPoolManager, TestContext) {
        let ctx = TestContext::new();
        let disk = Arc::new(DiskManager::open(ctx.db_path()).unwrap());
        (BufferPoolManager::new(pool_size, 2, 4, disk), ctx)
    }

    /// Cross-checks the pool's structural invariants from the inside.
    fn check_invariants(pool: &BufferPoolManager) {
        let state = pool.latch.lock();
        let mut bound_unpinned = 0;
        for (idx, frame) in pool.frames.iter().enumerate() {
            let page_id = frame.page_id();
            let free = state.free_list.contains(&FrameId(idx));
            if page_id.is_valid() {
                // Bound frames are not free-listed and the directory points
                // straight back at them.
                assert!(!free, "bound frame {idx} on free list");
                assert_eq!(pool.page_table.find(&page_id), Some(FrameId(idx)));
                if frame.pin_count() == 0 {
                    bound_unpinned += 1;
                }
            } else {
                assert!(free, "unbound frame {idx} missing from free list");
                assert_eq!(frame.pin_count(), 0);
            }
        }
        assert_eq!(pool.replacer.size(), bound_unpinned);
    }

    #[test]
    fn test_new_page_then_fetch() {
        let (pool, _ctx) = test_pool(10);
        let image = fixtures::page_image(3, 16);

        let page_id = {
            let mut guard = pool.new_page().unwrap();
            assert_eq!(guard.page_id(), PageId(0));
            guard.as_mut_slice()[..16].copy_from_slice(&image);
            guard.page_id()
        };
        check_invariants(&pool);

        let guard = pool.fetch_page(page_id).unwrap();
        assert_eq!(&guard[..16], &image[..]);
        drop(guard);
        check_invariants(&pool);
    }

    #[test]
    fn test_page_ids_are_monotonic() {
        let (pool, _ctx) = test_pool(4);
        for expected in 0..4u64 {
            let guard = pool.new_page().unwrap();
            assert_eq!(guard.page_id(), PageId(expected));
        }
        // Deleting a page never recycles its id.
        assert!(pool.delete_page(PageId(3)).unwrap());
        let guard = pool.new_page().unwrap();
        assert_eq!(guard.page_id(), PageId(4));
    }

    #[test]
    fn test_pin_counting_via_guards_and_unpin() {
        let (pool, _ctx) = test_pool(4);
        let page_id = pool.new_page().unwrap().page_id();
        assert_eq!(pool.pin_count(page_id), Some(0));

        let g1 = pool.fetch_page(page_id).unwrap();
        let g2 = pool.fetch_page(page_id).unwrap();
        assert_eq!(pool.pin_count(page_id), Some(2));
        drop(g1);
        assert_eq!(pool.pin_count(page_id), Some(1));
        drop(g2);
        assert_eq!(pool.pin_count(page_id), Some(0));

        // Pin count already zero: a bare unpin fails.
        assert!(!pool.unpin_page(page_id, false));
        // Not resident at all: also fails.
        assert!(!pool.unpin_page(PageId(999), false));
        check_invariants(&pool);
    }

    #[test]
    fn test_clean_unpin_keeps_dirty_flag() {
        let (pool, _ctx) = test_pool(4);
        let page_id = {
            let mut guard = pool.new_page().unwrap();
            guard.as_mut_slice()[0] = 1;
            guard.page_id()
        };
        assert_eq!(pool.stats().dirty_pages, 1);

        // A later clean unpin must not wash the taint out.
        let guard = pool.fetch_page(page_id).unwrap();
        drop(guard);
        assert_eq!(pool.stats().dirty_pages, 1);
    }

    #[test]
    fn test_pool_exhaustion_and_recovery() {
        let (pool, _ctx) = test_pool(3);
        let g0 = pool.new_page().unwrap();
        let g1 = pool.new_page().unwrap();
        let g2 = pool.new_page().unwrap();

        // Every frame pinned: allocation and fetch of anything non-resident
        // both fail with pool exhaustion.
        assert!(pool.new_page().unwrap_err().is_pool_exhausted());
        assert!(pool
            .fetch_page(PageId(999))
            .unwrap_err()
            .is_pool_exhausted());

        let p0 = g0.page_id();
        drop(g0);
        // One evictable frame is enough again.
        let g3 = pool.new_page().unwrap();
        assert!(!pool.contains_page(p0));

        drop(g1);
        drop(g2);
        drop(g3);
        check_invariants(&pool);
    }

    #[test]
    fn test_eviction_prefers_coldest_frame() {
        let (pool, _ctx) = test_pool(3);
        let p0 = pool.new_page().unwrap().page_id();
        let p1 = pool.new_page().unwrap().page_id();
        let p2 = pool.new_page().unwrap().page_id();

        // Touch p1 and p2 again; p0 keeps the oldest history.
        drop(pool.fetch_page(p1).unwrap());
        drop(pool.fetch_page(p2).unwrap());

        let _p3 = pool.new_page().unwrap();
        assert!(!pool.contains_page(p0));
        assert!(pool.contains_page(p1));
        assert!(pool.contains_page(p2));
    }

    #[test]
    fn test_eviction_writes_back_dirty_page() {
        let (pool, _ctx) = test_pool(1);
        let image = fixtures::page_image(5, PAGE_SIZE);

        let p0 = {
            let mut guard = pool.new_page().unwrap();
            guard.as_mut_slice().copy_from_slice(&image);
            guard.page_id()
        };

        // Single frame: the next allocation evicts p0 and must persist it.
        let writes_before = pool.disk().writes();
        let _p1 = pool.new_page().unwrap();
        assert_eq!(pool.disk().writes(), writes_before + 1);

        // p1's guard still pins the only frame, so p0 cannot come back yet.
        assert!(pool.fetch_page(p0).unwrap_err().is_pool_exhausted());
        drop(_p1);

        let guard = pool.fetch_page(p0).unwrap();
        assert_eq!(&guard[..], &image[..]);
    }

    #[test]
    fn test_clean_eviction_skips_disk_write() {
        let (pool, _ctx) = test_pool(1);
        let p0 = {
            let mut guard = pool.new_page().unwrap();
            guard.as_mut_slice()[0] = 9;
            guard.page_id()
        };
        pool.flush_page(p0).unwrap();

        let writes_before = pool.disk().writes();
        let _p1 = pool.new_page().unwrap();
        // p0 was clean after the flush; eviction wrote nothing.
        assert_eq!(pool.disk().writes(), writes_before);
    }

    #[test]
    fn test_flush_page_clears_target_dirty_flag() {
        let (pool, _ctx) = test_pool(4);
        let p0 = pool.new_page().unwrap().page_id();
        let p1 = {
            let mut guard = pool.new_page().unwrap();
            guard.as_mut_slice()[0] = 1;
            guard.page_id()
        };
        assert_eq!(pool.stats().dirty_pages, 1);

        // Flushing the dirty page cleans exactly that frame, not frame 0.
        assert!(pool.flush_page(p1).unwrap());
        assert_eq!(pool.stats().dirty_pages, 0);

        // Flushing is unconditional: a clean page still writes.
        let writes_before = pool.disk().writes();
        assert!(pool.flush_page(p0).unwrap());
        assert_eq!(pool.disk().writes(), writes_before + 1);

        // Non-resident page: no write, false.
        assert!(!pool.flush_page(PageId(999)).unwrap());
    }

    #[test]
    fn test_flush_all_leaves_pool_clean() {
        let (pool, _ctx) = test_pool(4);
        for _ in 0..3 {
            let mut guard = pool.new_page().unwrap();
            guard.as_mut_slice()[0] = 7;
        }
        assert_eq!(pool.stats().dirty_pages, 3);

        pool.flush_all().unwrap();
        assert_eq!(pool.stats().dirty_pages, 0);

        // Second flush_all still writes every resident page but changes
        // nothing observable.
        let writes_before = pool.disk().writes();
        pool.flush_all().unwrap();
        assert_eq!(pool.disk().writes(), writes_before + 3);
        assert_eq!(pool.stats().dirty_pages, 0);
        check_invariants(&pool);
    }

    #[test]
    fn test_delete_page_rules() {
        let (pool, _ctx) = test_pool(4);
        let guard = pool.new_page().unwrap();
        let p0 = guard.page_id();

        // Pinned: refused, page stays resident.
        assert!(!pool.delete_page(p0).unwrap());
        assert!(pool.contains_page(p0));
        assert_eq!(pool.pin_count(p0), Some(1));

        drop(guard);
        let deallocs_before = pool.disk().deallocations();
        assert!(pool.delete_page(p0).unwrap());
        assert!(!pool.contains_page(p0));
        assert_eq!(pool.disk().deallocations(), deallocs_before + 1);
        check_invariants(&pool);

        // Not resident: vacuous success.
        assert!(pool.delete_page(PageId(999)).unwrap());
    }

    #[test]
    fn test_delete_page_flushes_dirty_image() {
        let (pool, _ctx) = test_pool(4);
        let image = fixtures::page_image(8, PAGE_SIZE);
        let p0 = {
            let mut guard = pool.new_page().unwrap();
            guard.as_mut_slice().copy_from_slice(&image);
            guard.page_id()
        };

        assert!(pool.delete_page(p0).unwrap());

        // The image survived on disk even though the binding is gone.
        let guard = pool.fetch_page(p0).unwrap();
        assert_eq!(&guard[..], &image[..]);
    }

    #[test]
    fn test_fetch_invalid_page_id_is_rejected() {
        let (pool, _ctx) = test_pool(2);
        let err = pool.fetch_page(PageId::INVALID).unwrap_err();
        assert!(matches!(
            err,
            Error::Storage(StorageError::InvalidPageId)
        ));
    }

    #[test]
    fn test_wal_sink_sees_every_write_back() {
        use std::sync::atomic::AtomicUsize;

        #[derive(Default)]
        struct CountingWal(AtomicUsize);

        impl WalSink for CountingWal {
            fn before_page_write(&self, _page_id: PageId) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let ctx = TestContext::new();
        let disk = Arc::new(DiskManager::open(ctx.db_path()).unwrap());
        let wal = Arc::new(CountingWal::default());
        let pool =
            BufferPoolManager::new(1, 2, 4, disk).with_wal(Arc::clone(&wal) as Arc<dyn WalSink>);

        let p0 = {
            let mut guard = pool.new_page().unwrap();
            guard.as_mut_slice()[0] = 1;
            guard.page_id()
        };
        pool.flush_page(p0).unwrap(); // explicit flush
        {
            let mut guard = pool.fetch_page_mut(p0).unwrap();
            guard.as_mut_slice()[0] = 2;
        }
        let _p1 = pool.new_page().unwrap(); // eviction flush

        assert_eq!(wal.0.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_open_from_options() {
        let ctx = TestContext::new();
        let mut options = StorageOptions::with_data_path(ctx.db_path());
        options.pool_size = 8;
        options.sync_on_flush = true;

        let pool = BufferPoolManager::open(&options).unwrap();
        assert_eq!(pool.pool_size(), 8);
        let p0 = {
            let mut guard = pool.new_page().unwrap();
            guard.as_mut_slice()[0] = 1;
            guard.page_id()
        };
        assert!(pool.flush_page(p0).unwrap());

        options.pool_size = 0;
        assert!(matches!(
            BufferPoolManager::open(&options),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_stats_snapshot() {
        let (pool, _ctx) = test_pool(4);
        let p0 = pool.new_page().unwrap().page_id();
        drop(pool.fetch_page(p0).unwrap()); // hit
        let _ = pool.fetch_page(PageId(2)); // miss (zero image from disk)

        let stats = pool.stats();
        assert_eq!(stats.pool_size, 4);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.resident_pages, 2);
        assert_eq!(stats.free_frames, 2);
    }

    #[test]
    fn test_concurrent_fetches_share_frames() {
        use std::thread;

        let (pool, _ctx) = test_pool(8);
        let pool = Arc::new(pool);

        let mut page_ids = Vec::new();
        for tag in 0..4u8 {
            let mut guard = pool.new_page().unwrap();
            guard
                .as_mut_slice()
                .copy_from_slice(&fixtures::page_image(tag, PAGE_SIZE));
            page_ids.push(guard.page_id());
        }
        pool.flush_all().unwrap();

        let mut handles = vec![];
        for t in 0..8usize {
            let pool = Arc::clone(&pool);
            let page_ids = page_ids.clone();
            handles.push(thread::spawn(move || {
                for round in 0..50 {
                    let idx = (t + round) % page_ids.len();
                    let guard = pool.fetch_page(page_ids[idx]).unwrap();
                    let expected = fixtures::page_image(idx as u8, PAGE_SIZE);
                    assert_eq!(&guard[..], &expected[..]);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        check_invariants(&pool);
    }
}
