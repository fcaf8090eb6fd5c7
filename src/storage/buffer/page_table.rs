use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};

use parking_lot::Mutex;

/// Thread-safe extendible hash table, used by the buffer pool as its
/// page table (`PageId -> FrameId`).
///
/// A directory of `2^global_depth` slots maps the low bits of a key's hash
/// to a bucket. Buckets hold at most `bucket_size` pairs; inserting into a
/// full bucket splits it, doubling the directory when the bucket's local
/// depth has caught up with the global depth.
pub struct ExtendibleHashTable<K, V, S = RandomState> {
    inner: Mutex<TableInner<K, V>>,
    hash_builder: S,
}

struct TableInner<K, V> {
    global_depth: usize,
    bucket_size: usize,
    /// Directory: slot -> index into `buckets`. Multiple slots may share a bucket.
    dir: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
}

struct Bucket<K, V> {
    depth: usize,
    items: Vec<(K, V)>,
}

impl<K, V> Bucket<K, V> {
    fn new(bucket_size: usize, depth: usize) -> Self {
        Self {
            depth,
            items: Vec::with_capacity(bucket_size),
        }
    }
}

impl<K, V> ExtendibleHashTable<K, V, RandomState>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(bucket_size: usize) -> Self {
        Self::with_hasher(bucket_size, RandomState::new())
    }
}

impl<K, V, S> ExtendibleHashTable<K, V, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher,
{
    pub fn with_hasher(bucket_size: usize, hash_builder: S) -> Self {
        Self {
            inner: Mutex::new(TableInner {
                global_depth: 0,
                bucket_size,
                dir: vec![0],
                buckets: vec![Bucket::new(bucket_size, 0)],
            }),
            hash_builder,
        }
    }

    /// Insert a key/value pair, replacing the value of an existing key
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        loop {
            let slot = self.index_of(&key, inner.global_depth);
            let bucket_idx = inner.dir[slot];
            let bucket_size = inner.bucket_size;
            let bucket = &mut inner.buckets[bucket_idx];

            if let Some(pair) = bucket.items.iter_mut().find(|(k, _)| *k == key) {
                pair.1 = value;
                return;
            }
            if bucket.items.len() < bucket_size {
                bucket.items.push((key, value));
                return;
            }

            // One split may not free up the target bucket; retry until it does.
            self.split_bucket(&mut inner, slot);
        }
    }

    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let slot = self.index_of(key, inner.global_depth);
        let bucket = &inner.buckets[inner.dir[slot]];
        bucket
            .items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let slot = self.index_of(key, inner.global_depth);
        let bucket_idx = inner.dir[slot];
        let bucket = &mut inner.buckets[bucket_idx];
        match bucket.items.iter().position(|(k, _)| k == key) {
            Some(pos) => {
                bucket.items.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn global_depth(&self) -> usize {
        self.inner.lock().global_depth
    }

    pub fn local_depth(&self, dir_index: usize) -> usize {
        let inner = self.inner.lock();
        inner.buckets[inner.dir[dir_index]].depth
    }

    pub fn num_buckets(&self) -> usize {
        self.inner.lock().buckets.len()
    }

    fn index_of(&self, key: &K, global_depth: usize) -> usize {
        let mut hasher = self.hash_builder.build_hasher();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & ((1 << global_depth) - 1)
    }

    /// Split the bucket behind directory slot `slot`, doubling the directory
    /// if its local depth equals the global depth, then rehash its entries.
    fn split_bucket(&self, inner: &mut TableInner<K, V>, slot: usize) {
        assert!(inner.bucket_size > 0, "cannot split zero-capacity bucket");

        let old_idx = inner.dir[slot];
        let old_depth = inner.buckets[old_idx].depth;

        if old_depth == inner.global_depth {
            // New slots initially alias the bucket of their low-bit twin.
            let old_size = inner.dir.len();
            let mask = (1 << inner.global_depth) - 1;
            for i in old_size..old_size * 2 {
                let twin = inner.dir[i & mask];
                inner.dir.push(twin);
            }
            inner.global_depth += 1;
        }

        let new_depth = old_depth + 1;
        let old_index = slot & ((1 << old_depth) - 1);
        let high_bit = 1 << old_depth;

        let new_idx = inner.buckets.len();
        inner.buckets.push(Bucket::new(inner.bucket_size, new_depth));
        inner.buckets[old_idx].depth = new_depth;

        let new_mask = (1 << new_depth) - 1;
        for i in 0..inner.dir.len() {
            if (i & new_mask) == (old_index | high_bit) {
                inner.dir[i] = new_idx;
            }
        }

        // Rehash the split bucket's entries across the two halves.
        let items = std::mem::take(&mut inner.buckets[old_idx].items);
        for (k, v) in items {
            let target_slot = self.index_of(&k, inner.global_depth);
            let target = inner.dir[target_slot];
            inner.buckets[target].items.push((k, v));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hashes an integer key to itself so directory slots are predictable
    #[derive(Default, Clone)]
    struct IdentityState;

    struct IdentityHasher(u64);

    impl Hasher for IdentityHasher {
        fn finish(&self) -> u64 {
            self.0
        }

        fn write(&mut self, bytes: &[u8]) {
            let mut buf = [0u8; 8];
            let n = bytes.len().min(8);
            buf[..n].copy_from_slice(&bytes[..n]);
            self.0 = u64::from_le_bytes(buf);
        }
    }

    impl BuildHasher for IdentityState {
        type Hasher = IdentityHasher;

        fn build_hasher(&self) -> IdentityHasher {
            IdentityHasher(0)
        }
    }

    #[test]
    fn test_insert_find_remove() {
        let table: ExtendibleHashTable<i32, String> = ExtendibleHashTable::new(4);

        table.insert(1, "a".to_string());
        table.insert(2, "b".to_string());
        assert_eq!(table.find(&1), Some("a".to_string()));
        assert_eq!(table.find(&2), Some("b".to_string()));
        assert_eq!(table.find(&3), None);

        // insert replaces on duplicate key
        table.insert(1, "a2".to_string());
        assert_eq!(table.find(&1), Some("a2".to_string()));

        assert!(table.remove(&1));
        assert!(!table.remove(&1));
        assert_eq!(table.find(&1), None);
    }

    #[test]
    fn test_split_depths() {
        let table: ExtendibleHashTable<u64, u64, IdentityState> =
            ExtendibleHashTable::with_hasher(2, IdentityState);

        for k in 1..=9u64 {
            table.insert(k, k * 10);
        }

        assert_eq!(table.global_depth(), 3);
        assert_eq!(table.local_depth(0), 2);
        assert_eq!(table.local_depth(1), 3);
        assert_eq!(table.local_depth(2), 2);
        assert_eq!(table.local_depth(3), 2);

        for k in 1..=9u64 {
            assert_eq!(table.find(&k), Some(k * 10));
        }
        table.insert(9, 999);
        assert_eq!(table.find(&9), Some(999));
    }

    #[test]
    fn test_many_inserts_survive_splits() {
        let table: ExtendibleHashTable<i32, i32> = ExtendibleHashTable::new(3);
        for k in 0..500 {
            table.insert(k, k * 2);
        }
        for k in 0..500 {
            assert_eq!(table.find(&k), Some(k * 2));
        }
        assert!(table.num_buckets() > 1);
    }
}
