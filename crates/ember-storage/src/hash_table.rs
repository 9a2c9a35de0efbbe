//! Extendible hash table, used as the buffer pool's page directory.
//!
//! The directory holds `2^global_depth` slots; each slot is a shared handle
//! to a bucket whose keys all agree on their low `local_depth` hash bits.
//! A full bucket splits into itself and a sibling one local-depth level down,
//! doubling the directory first whenever the bucket is already at full depth.
//! Splitting touches one bucket at a time; the table never rehashes
//! wholesale.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

/// A mutable `K -> V` mapping with amortized O(1) operations that grows by
/// splitting individual buckets.
///
/// All public operations serialize on a single table-wide mutex. Buckets are
/// shared between directory slots whenever `local_depth < global_depth`; a
/// bucket is freed once the last slot referring to it is redirected away.
///
/// `insert` always succeeds, provided no more than `bucket_size` keys share
/// an identical full hash value; beyond that no amount of splitting can
/// separate them.
pub struct ExtendibleHashTable<K, V, S = RandomState> {
    state: Mutex<Directory<K, V>>,
    hasher: S,
    bucket_size: usize,
}

struct Directory<K, V> {
    global_depth: usize,
    num_buckets: usize,
    slots: Vec<Arc<RwLock<Bucket<K, V>>>>,
}

struct Bucket<K, V> {
    local_depth: usize,
    items: Vec<(K, V)>,
}

impl<K, V> Directory<K, V> {
    fn mask(&self) -> usize {
        (1 << self.global_depth) - 1
    }

    /// Duplicate every slot into its new high-bit sibling.
    fn double(&mut self) {
        let len = self.slots.len();
        for i in 0..len {
            self.slots.push(Arc::clone(&self.slots[i]));
        }
        self.global_depth += 1;
    }
}

impl<K, V> ExtendibleHashTable<K, V, RandomState>
where
    K: Hash + Eq,
    V: Clone,
{
    pub fn new(bucket_size: usize) -> Self {
        Self::with_hasher(bucket_size, RandomState::new())
    }
}

impl<K, V, S> ExtendibleHashTable<K, V, S>
where
    K: Hash + Eq,
    V: Clone,
    S: BuildHasher,
{
    pub fn with_hasher(bucket_size: usize, hasher: S) -> Self {
        assert!(bucket_size > 0, "bucket_size must be > 0");
        Self {
            state: Mutex::new(Directory {
                global_depth: 0,
                num_buckets: 1,
                slots: vec![Arc::new(RwLock::new(Bucket {
                    local_depth: 0,
                    items: Vec::new(),
                }))],
            }),
            hasher,
            bucket_size,
        }
    }

    fn hash_of(&self, key: &K) -> usize {
        self.hasher.hash_one(key) as usize
    }

    /// Current binding for `key`, if any.
    pub fn find(&self, key: &K) -> Option<V> {
        let dir = self.state.lock();
        let slot = &dir.slots[self.hash_of(key) & dir.mask()];
        let bucket = slot.read();
        bucket
            .items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Remove the binding for `key`. Returns whether a removal occurred.
    pub fn remove(&self, key: &K) -> bool {
        let dir = self.state.lock();
        let slot = &dir.slots[self.hash_of(key) & dir.mask()];
        let mut bucket = slot.write();
        match bucket.items.iter().position(|(k, _)| k == key) {
            Some(idx) => {
                bucket.items.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Insert or overwrite the binding for `key`.
    pub fn insert(&self, key: K, value: V) {
        let mut dir = self.state.lock();
        let hash = self.hash_of(&key);

        // A single split may leave the target bucket still full (every entry
        // can land in the same half); keep splitting until the key fits.
        loop {
            let bucket = Arc::clone(&dir.slots[hash & dir.mask()]);
            {
                let mut b = bucket.write();
                if let Some(entry) = b.items.iter_mut().find(|(k, _)| *k == key) {
                    entry.1 = value;
                    return;
                }
                if b.items.len() < self.bucket_size {
                    b.items.push((key, value));
                    return;
                }
            }

            if bucket.read().local_depth == dir.global_depth {
                dir.double();
            }
            self.split(&mut dir, &bucket);
        }
    }

    /// Split `bucket` one local-depth level down, moving entries whose hash
    /// gains the new high bit into a fresh sibling, and re-point every
    /// directory slot matching the sibling's pattern.
    fn split(&self, dir: &mut Directory<K, V>, bucket: &Arc<RwLock<Bucket<K, V>>>) {
        let mut old = bucket.write();
        old.local_depth += 1;
        let depth = old.local_depth;
        let high_bit = 1usize << (depth - 1);
        let mask = (1usize << depth) - 1;

        // Every key in a full bucket agrees on its low `depth - 1` bits.
        let pattern = self.hash_of(&old.items[0].0) & (high_bit - 1);
        let sibling_pattern = pattern | high_bit;

        let items = std::mem::take(&mut old.items);
        let (moved, kept): (Vec<_>, Vec<_>) = items
            .into_iter()
            .partition(|(k, _)| self.hash_of(k) & mask == sibling_pattern);
        old.items = kept;
        drop(old);

        let sibling = Arc::new(RwLock::new(Bucket {
            local_depth: depth,
            items: moved,
        }));
        for i in 0..dir.slots.len() {
            if i & mask == sibling_pattern {
                dir.slots[i] = Arc::clone(&sibling);
            }
        }
        dir.num_buckets += 1;
    }

    /// Number of low-order hash bits indexing the directory.
    pub fn global_depth(&self) -> usize {
        self.state.lock().global_depth
    }

    /// Local depth of the bucket behind directory slot `dir_index`.
    pub fn local_depth(&self, dir_index: usize) -> usize {
        self.state.lock().slots[dir_index].read().local_depth
    }

    /// Number of distinct buckets.
    pub fn num_buckets(&self) -> usize {
        self.state.lock().num_buckets
    }
}
