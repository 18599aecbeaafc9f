use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::debug;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex, RwLock};

/// A bucket holds up to `bucket_size` entries and its own lock. A split
/// retires the bucket after draining it; anyone who locked a retired bucket
/// re-reads its directory slot and retries against the replacement.
struct BucketInner<K, V> {
    local_depth: u32,
    retired: bool,
    entries: HashMap<K, V>,
}

type BucketRef<K, V> = Arc<Mutex<BucketInner<K, V>>>;
type BucketGuard<K, V> = ArcMutexGuard<RawMutex, BucketInner<K, V>>;

struct Directory<K, V> {
    global_depth: u32,
    slots: Vec<BucketRef<K, V>>,
}

/// Concurrent extendible hash table, used as the buffer pool's page table.
///
/// The directory is indexed by the low `global_depth` bits of the key hash.
/// Lookups and updates lock only the target bucket, so operations on
/// distinct buckets proceed in parallel; the directory lock is taken only to
/// read a slot or to run a split. Bucket locks are never held while waiting
/// on the directory lock.
pub struct ExtendibleHashTable<K, V> {
    bucket_size: usize,
    directory: RwLock<Directory<K, V>>,
    num_buckets: AtomicUsize,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a table whose buckets hold up to `bucket_size` entries
    pub fn new(bucket_size: usize) -> Self {
        assert!(bucket_size > 0, "bucket size must be positive");
        let initial = Arc::new(Mutex::new(BucketInner {
            local_depth: 0,
            retired: false,
            entries: HashMap::new(),
        }));
        Self {
            bucket_size,
            directory: RwLock::new(Directory {
                global_depth: 0,
                slots: vec![initial],
            }),
            num_buckets: AtomicUsize::new(1),
        }
    }

    fn hash_key(key: &K) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    /// Bucket-stable acquisition: lock the bucket the key currently maps to.
    /// If a concurrent split redirected the slot while we were blocking on
    /// the bucket lock, the bucket is marked retired; release and retry
    /// against the slot's new occupant.
    fn lock_bucket(&self, key: &K) -> BucketGuard<K, V> {
        loop {
            let bucket = {
                let dir = self.directory.read();
                let slot = (Self::hash_key(key) & dir.mask()) as usize;
                dir.slots[slot].clone()
            };
            let guard = bucket.lock_arc();
            if !guard.retired {
                return guard;
            }
        }
    }

    /// Look up the value associated with the key
    pub fn find(&self, key: &K) -> Option<V> {
        let guard = self.lock_bucket(key);
        guard.entries.get(key).cloned()
    }

    /// Insert a key/value pair, overwriting the value on a duplicate key.
    /// Splits the target bucket (possibly repeatedly) on overflow.
    pub fn insert(&self, key: K, value: V) {
        loop {
            let mut guard = self.lock_bucket(&key);
            if guard.entries.contains_key(&key) || guard.entries.len() < self.bucket_size {
                guard.entries.insert(key, value);
                return;
            }
            drop(guard);
            self.split_bucket(&key);
        }
    }

    /// Remove the entry for the key; returns whether it was present
    pub fn remove(&self, key: &K) -> bool {
        let mut guard = self.lock_bucket(key);
        guard.entries.remove(key).is_some()
    }

    /// Split the bucket the key maps to. Runs entirely under the directory
    /// write lock, so no reader can observe a half-redirected directory. A
    /// racing split or a concurrent removal may make the split unnecessary,
    /// in which case this is a no-op and the caller's retry loop proceeds.
    fn split_bucket(&self, key: &K) {
        let mut dir = self.directory.write();
        let slot = (Self::hash_key(key) & dir.mask()) as usize;
        let target = dir.slots[slot].clone();
        let mut inner = target.lock();

        if inner.retired || inner.entries.len() < self.bucket_size {
            return;
        }

        let depth = inner.local_depth;
        if depth == dir.global_depth {
            // Double the directory: slot i is duplicated at i + old_size
            let old_size = dir.slots.len();
            dir.slots.extend_from_within(0..old_size);
            dir.global_depth += 1;
            debug!("hash directory doubled to global_depth {}", dir.global_depth);
        }

        // Redistribute by bit `depth` of the full key hash
        let mut zero_entries = HashMap::new();
        let mut one_entries = HashMap::new();
        for (k, v) in inner.entries.drain() {
            if (Self::hash_key(&k) >> depth) & 1 == 0 {
                zero_entries.insert(k, v);
            } else {
                one_entries.insert(k, v);
            }
        }
        inner.retired = true;
        drop(inner);

        let zero_bucket = Arc::new(Mutex::new(BucketInner {
            local_depth: depth + 1,
            retired: false,
            entries: zero_entries,
        }));
        let one_bucket = Arc::new(Mutex::new(BucketInner {
            local_depth: depth + 1,
            retired: false,
            entries: one_entries,
        }));

        // Redirect every slot that referenced the split bucket, by bit
        // `depth` of the slot index
        for (index, slot_ref) in dir.slots.iter_mut().enumerate() {
            if Arc::ptr_eq(slot_ref, &target) {
                *slot_ref = if (index >> depth) & 1 == 0 {
                    zero_bucket.clone()
                } else {
                    one_bucket.clone()
                };
            }
        }
        self.num_buckets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn global_depth(&self) -> u32 {
        self.directory.read().global_depth
    }

    /// Local depth of the bucket referenced by the given directory slot
    pub fn local_depth(&self, bucket_index: usize) -> u32 {
        let bucket = {
            let dir = self.directory.read();
            dir.slots[bucket_index].clone()
        };
        let guard = bucket.lock();
        guard.local_depth
    }

    pub fn num_buckets(&self) -> usize {
        self.num_buckets.load(Ordering::Relaxed)
    }

    /// Number of directory slots (2^global_depth)
    pub fn directory_size(&self) -> usize {
        self.directory.read().slots.len()
    }
}

impl<K, V> Directory<K, V> {
    fn mask(&self) -> u64 {
        (1u64 << self.global_depth) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_find_remove() {
        let table = ExtendibleHashTable::new(4);
        for i in 0..100 {
            table.insert(i, i * 10);
        }
        for i in 0..100 {
            assert_eq!(table.find(&i), Some(i * 10));
        }
        assert!(table.remove(&42));
        assert!(!table.remove(&42));
        assert_eq!(table.find(&42), None);
    }

    #[test]
    fn test_insert_overwrites_duplicate() {
        let table = ExtendibleHashTable::new(2);
        table.insert("a", 1);
        table.insert("a", 2);
        assert_eq!(table.find(&"a"), Some(2));
    }

    #[test]
    fn test_overflow_splits() {
        let table = ExtendibleHashTable::new(2);
        table.insert(0, 'a');
        table.insert(1, 'b');
        table.insert(2, 'c');

        assert!(table.global_depth() >= 1);
        assert_eq!(table.num_buckets(), 2);
        assert_eq!(table.find(&0), Some('a'));
        assert_eq!(table.find(&1), Some('b'));
        assert_eq!(table.find(&2), Some('c'));
    }

    #[test]
    fn test_depth_invariants() {
        let table = ExtendibleHashTable::new(2);
        for i in 0..256 {
            table.insert(i, i);

            let global = table.global_depth();
            assert_eq!(table.directory_size(), 1 << global);
            for slot in 0..table.directory_size() {
                assert!(table.local_depth(slot) <= global);
            }
        }
        for i in 0..256 {
            assert_eq!(table.find(&i), Some(i));
        }
    }
}
