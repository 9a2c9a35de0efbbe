//! LRU-K replacement policy.
//!
//! Each tracked frame keeps the timestamps of its K most recent accesses.
//! The backward k-distance of a frame is the gap between now and its K-th
//! most recent access, infinite while fewer than K accesses are recorded.
//! Eviction takes the evictable frame with the greatest distance: any frame
//! with an infinite distance beats every frame with K accesses, and ties fall
//! to the earliest retained timestamp, then the smallest frame id.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use ember_common::types::FrameId;

/// Tracks access history for pool frames and selects eviction victims.
///
/// A single mutex protects all replacer state.
pub struct LruKReplacer {
    state: Mutex<ReplacerState>,
}

struct ReplacerState {
    k: usize,
    capacity: usize,
    timestamp: u64,
    evictable: usize,
    frames: HashMap<FrameId, FrameHistory>,
}

struct FrameHistory {
    /// At most `k` timestamps, oldest first.
    history: VecDeque<u64>,
    evictable: bool,
}

impl LruKReplacer {
    /// A replacer tracking at most `capacity` frames with history depth `k`.
    pub fn new(capacity: usize, k: usize) -> Self {
        assert!(k > 0, "k must be > 0");
        Self {
            state: Mutex::new(ReplacerState {
                k,
                capacity,
                timestamp: 0,
                evictable: 0,
                frames: HashMap::with_capacity(capacity),
            }),
        }
    }

    /// Stamp `frame_id` with the next logical timestamp, keeping the K most
    /// recent. An unknown frame starts a fresh, non-evictable history; when
    /// the replacer is already tracking `capacity` frames the access is
    /// dropped.
    pub fn record_access(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        if !state.frames.contains_key(&frame_id) && state.frames.len() == state.capacity {
            return;
        }

        let ts = state.timestamp;
        state.timestamp += 1;
        let k = state.k;
        let entry = state.frames.entry(frame_id).or_insert_with(|| FrameHistory {
            history: VecDeque::with_capacity(k),
            evictable: false,
        });
        if entry.history.len() == k {
            entry.history.pop_front();
        }
        entry.history.push_back(ts);
    }

    /// Toggle `frame_id`'s membership in the eviction candidate pool.
    /// Unknown frames are ignored.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut state = self.state.lock();
        let Some(entry) = state.frames.get_mut(&frame_id) else {
            return;
        };
        let was = entry.evictable;
        entry.evictable = evictable;
        if !was && evictable {
            state.evictable += 1;
        } else if was && !evictable {
            state.evictable -= 1;
        }
    }

    /// Select, untrack, and return the victim with the greatest backward
    /// k-distance, or `None` if no frame is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        let k = state.k;

        let victim = state
            .frames
            .iter()
            .filter(|(_, entry)| entry.evictable)
            .map(|(&frame_id, entry)| {
                let full = entry.history.len() >= k;
                let earliest = entry.history.front().copied().unwrap_or(0);
                (full, earliest, frame_id)
            })
            // Infinite distance (not yet K accesses) first, then the oldest
            // earliest access, then the smallest frame id.
            .min()?
            .2;

        state.frames.remove(&victim);
        state.evictable -= 1;
        Some(victim)
    }

    /// Drop `frame_id`'s history entirely. A later `record_access` starts
    /// over. Unknown frames are ignored.
    ///
    /// # Panics
    ///
    /// Removing a non-evictable frame is a usage bug and panics.
    pub fn remove(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        let Some(entry) = state.frames.get(&frame_id) else {
            return;
        };
        if !entry.evictable {
            panic!("removed non-evictable {frame_id} from replacer");
        }
        state.frames.remove(&frame_id);
        state.evictable -= 1;
    }

    /// Number of currently evictable frames.
    pub fn size(&self) -> usize {
        self.state.lock().evictable
    }
}
