use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use xxhash_rust::xxh3::xxh3_64;

use crate::common::types::PageId;
use crate::index::hash::bucket_page::{max_bucket_capacity, HashBucketPage};
use crate::index::hash::directory_page::{HashDirectoryPage, DIRECTORY_ARRAY_SIZE};
use crate::index::hash::error::HashIndexError;
use crate::storage::buffer::BufferPool;

/// Default hash function: xxh3 over the bincode encoding of the key,
/// truncated to the 32 bits the directory consumes.
pub fn xxh3_key_hasher<K: Serialize>() -> impl Fn(&K) -> u32 {
    |key| {
        let bytes = bincode::serialize(key).unwrap_or_default();
        xxh3_64(&bytes) as u32
    }
}

/// A disk-backed extendible hash table.
///
/// The directory lives in one page and each bucket in its own page; both
/// are borrowed from the buffer pool for the duration of a pin, and only
/// page ids are held across calls. Multiple values per key are supported;
/// an exact (key, value) duplicate is rejected.
///
/// Latching is two-level. Point operations take the table latch shared
/// plus a latch on the target bucket page; structural changes (split,
/// merge) take the table latch exclusive, which serializes them against
/// everything else.
pub struct ExtendibleHashTable<K, V, C, H> {
    buffer_pool: Arc<dyn BufferPool>,
    directory_page_id: PageId,
    bucket_capacity: usize,
    comparator: C,
    hash_fn: H,
    table_latch: RwLock<()>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, C, H> ExtendibleHashTable<K, V, C, H>
where
    K: Serialize + DeserializeOwned + Clone,
    V: Serialize + DeserializeOwned + Clone + PartialEq,
    C: Fn(&K, &K) -> Ordering,
    H: Fn(&K) -> u32,
{
    /// Create a table with the largest bucket capacity the page size allows
    pub fn new(
        buffer_pool: Arc<dyn BufferPool>,
        comparator: C,
        hash_fn: H,
    ) -> Result<Self, HashIndexError> {
        let capacity = max_bucket_capacity::<K, V>();
        Self::with_bucket_capacity(buffer_pool, capacity, comparator, hash_fn)
    }

    /// Create a table with an explicit bucket capacity
    pub fn with_bucket_capacity(
        buffer_pool: Arc<dyn BufferPool>,
        bucket_capacity: usize,
        comparator: C,
        hash_fn: H,
    ) -> Result<Self, HashIndexError> {
        assert!(
            bucket_capacity > 0 && bucket_capacity <= max_bucket_capacity::<K, V>(),
            "bucket capacity {} out of range",
            bucket_capacity
        );

        // The directory and the first bucket are created eagerly so every
        // later operation can assume a routable directory.
        let (directory_page, directory_page_id) = buffer_pool.new_page()?;
        let (bucket_page, bucket_page_id) = buffer_pool.new_page()?;

        let mut directory = HashDirectoryPage::new(directory_page_id);
        directory.set_bucket_page_id(0, bucket_page_id);
        {
            let mut guard = directory_page.write();
            directory.to_page(&mut guard);
        }
        {
            let mut guard = bucket_page.write();
            HashBucketPage::<K, V>::new(bucket_capacity).to_page(&mut guard)?;
        }

        let table = Self {
            buffer_pool,
            directory_page_id,
            bucket_capacity,
            comparator,
            hash_fn,
            table_latch: RwLock::new(()),
            _marker: PhantomData,
        };
        table.unpin(directory_page_id, true);
        table.unpin(bucket_page_id, true);
        Ok(table)
    }

    /// Collect every value stored under `key`
    pub fn get_value(&self, key: &K) -> Result<Vec<V>, HashIndexError> {
        let _table = self.table_latch.read();
        let directory = self.read_directory()?;
        let bucket_page_id = self.key_to_page_id(key, &directory);

        let page = self.buffer_pool.fetch_page(bucket_page_id)?;
        let values = {
            let guard = page.read();
            HashBucketPage::<K, V>::from_page(&guard, self.bucket_capacity)
                .map(|bucket| bucket.get_value(key, &self.comparator))
        };
        self.unpin(bucket_page_id, false);
        values
    }

    /// Insert a (key, value) pair.
    ///
    /// `Ok(false)` means the exact pair was already present, or the target
    /// bucket could not split because it already addresses every directory
    /// bit.
    pub fn insert(&self, key: &K, value: &V) -> Result<bool, HashIndexError> {
        {
            let _table = self.table_latch.read();
            let directory = self.read_directory()?;
            let bucket_page_id = self.key_to_page_id(key, &directory);

            let page = self.buffer_pool.fetch_page(bucket_page_id)?;
            let outcome = {
                let mut guard = page.write();
                HashBucketPage::<K, V>::from_page(&guard, self.bucket_capacity).and_then(
                    |mut bucket| {
                        if bucket.is_full() {
                            return Ok(None);
                        }
                        let inserted =
                            bucket.insert(key.clone(), value.clone(), &self.comparator);
                        if inserted {
                            bucket.to_page(&mut guard)?;
                        }
                        Ok(Some(inserted))
                    },
                )
            };
            let dirty = matches!(outcome, Ok(Some(true)));
            self.unpin(bucket_page_id, dirty);
            if let Some(inserted) = outcome? {
                return Ok(inserted);
            }
        }

        // The bucket was full: retry under the exclusive table latch
        self.split_insert(key, value)
    }

    /// Split the target bucket and retry the insertion.
    ///
    /// Raising the local depth may first require doubling the directory.
    /// The retry re-enters `insert`, which either finds room or splits
    /// again; the max-depth check bounds the recursion.
    fn split_insert(&self, key: &K, value: &V) -> Result<bool, HashIndexError> {
        {
            let _table = self.table_latch.write();
            let mut directory = self.read_directory()?;
            let split_idx = self.key_to_directory_index(key, &directory);
            let split_page_id = directory.bucket_page_id(split_idx);

            // A bucket addressing every directory bit cannot split further
            if (1usize << directory.local_depth(split_idx)) == DIRECTORY_ARRAY_SIZE {
                return Ok(false);
            }

            if directory.local_depth(split_idx) == directory.global_depth() {
                directory.incr_global_depth();
            }
            directory.incr_local_depth(split_idx);

            let local_depth = directory.local_depth(split_idx);
            let stride = 1usize << local_depth;

            // Repoint the split bucket's coherence class at the raised depth
            let mut slot = split_idx % stride;
            while slot < directory.size() {
                directory.set_bucket_page_id(slot, split_page_id);
                directory.set_local_depth(slot, local_depth);
                slot += stride;
            }

            // The buddy class gets a freshly allocated bucket
            let buddy_idx = split_idx ^ (1usize << (local_depth - 1));
            let (buddy_page, buddy_page_id) = self.buffer_pool.new_page()?;
            {
                let mut guard = buddy_page.write();
                HashBucketPage::<K, V>::new(self.bucket_capacity).to_page(&mut guard)?;
            }
            self.unpin(buddy_page_id, true);

            let mut slot = buddy_idx % stride;
            while slot < directory.size() {
                directory.set_bucket_page_id(slot, buddy_page_id);
                directory.set_local_depth(slot, local_depth);
                slot += stride;
            }

            debug!(
                "split bucket page {} into buddy page {} at local depth {}",
                split_page_id, buddy_page_id, local_depth
            );

            self.rehash_split(&directory, split_page_id, buddy_page_id)?;
            self.write_directory(&directory)?;
        }

        self.insert(key, value)
    }

    /// Move every entry of the split bucket that now routes to the buddy
    fn rehash_split(
        &self,
        directory: &HashDirectoryPage,
        split_page_id: PageId,
        buddy_page_id: PageId,
    ) -> Result<(), HashIndexError> {
        let split_page = self.buffer_pool.fetch_page(split_page_id)?;
        let buddy_page = self.buffer_pool.fetch_page(buddy_page_id)?;

        let result = (|| -> Result<(), HashIndexError> {
            let mut split_guard = split_page.write();
            let mut buddy_guard = buddy_page.write();
            let mut split_bucket =
                HashBucketPage::<K, V>::from_page(&split_guard, self.bucket_capacity)?;
            let mut buddy_bucket =
                HashBucketPage::<K, V>::from_page(&buddy_guard, self.bucket_capacity)?;

            for slot in 0..split_bucket.capacity() {
                if !split_bucket.is_readable(slot) {
                    continue;
                }
                let entry_key = split_bucket.key_at(slot).clone();
                if self.key_to_page_id(&entry_key, directory) != split_page_id {
                    let entry_value = split_bucket.value_at(slot).clone();
                    let moved = buddy_bucket.insert(entry_key, entry_value, &self.comparator);
                    debug_assert!(moved, "buddy bucket cannot be full during a rehash");
                    split_bucket.remove_at(slot);
                }
            }

            split_bucket.to_page(&mut split_guard)?;
            buddy_bucket.to_page(&mut buddy_guard)?;
            Ok(())
        })();

        self.unpin(split_page_id, true);
        self.unpin(buddy_page_id, true);
        result
    }

    /// Remove the exact (key, value) pair, merging the bucket away if the
    /// removal left it empty.
    pub fn remove(&self, key: &K, value: &V) -> Result<bool, HashIndexError> {
        let (removed, emptied) = {
            let _table = self.table_latch.read();
            let directory = self.read_directory()?;
            let bucket_page_id = self.key_to_page_id(key, &directory);

            let page = self.buffer_pool.fetch_page(bucket_page_id)?;
            let outcome = {
                let mut guard = page.write();
                HashBucketPage::<K, V>::from_page(&guard, self.bucket_capacity).and_then(
                    |mut bucket| {
                        let removed = bucket.remove(key, value, &self.comparator);
                        if removed {
                            bucket.to_page(&mut guard)?;
                        }
                        Ok((removed, bucket.is_empty()))
                    },
                )
            };
            let dirty = matches!(outcome, Ok((true, _)));
            self.unpin(bucket_page_id, dirty);
            outcome?
        };

        if emptied {
            self.merge(key)?;
        }
        Ok(removed)
    }

    /// Fold an empty bucket into its split image and shrink the directory
    /// as far as it will go.
    fn merge(&self, key: &K) -> Result<(), HashIndexError> {
        let _table = self.table_latch.write();
        let mut directory = self.read_directory()?;
        let bucket_idx = self.key_to_directory_index(key, &directory);
        let local_depth = directory.local_depth(bucket_idx);
        if local_depth == 0 {
            return Ok(());
        }

        // Only buckets at the same depth are merge partners
        let buddy_idx = directory.split_image_index(bucket_idx);
        if directory.local_depth(buddy_idx) != local_depth {
            return Ok(());
        }

        let bucket_page_id = directory.bucket_page_id(bucket_idx);

        // Re-check emptiness under the bucket latch: the bucket may have
        // been refilled between the remove and this merge.
        let page = self.buffer_pool.fetch_page(bucket_page_id)?;
        let still_empty = {
            let guard = page.read();
            HashBucketPage::<K, V>::from_page(&guard, self.bucket_capacity)
                .map(|bucket| bucket.is_empty())
        };
        self.unpin(bucket_page_id, false);
        if !still_empty? {
            return Ok(());
        }

        assert!(
            self.buffer_pool.delete_page(bucket_page_id),
            "merged bucket page {} is still pinned",
            bucket_page_id
        );

        // Both coherence classes sit at the same depth, so the walk covers
        // the merged bucket's slots and the buddy's in one pass
        let buddy_page_id = directory.bucket_page_id(buddy_idx);
        let stride = 1usize << (local_depth - 1);
        let mut slot = bucket_idx % stride;
        while slot < directory.size() {
            directory.set_bucket_page_id(slot, buddy_page_id);
            directory.decr_local_depth(slot);
            slot += stride;
        }

        while directory.can_shrink() {
            directory.decr_global_depth();
        }

        debug!(
            "merged bucket page {} into buddy page {}",
            bucket_page_id, buddy_page_id
        );
        self.write_directory(&directory)
    }

    /// Current global depth of the directory
    pub fn global_depth(&self) -> Result<u32, HashIndexError> {
        let _table = self.table_latch.read();
        Ok(self.read_directory()?.global_depth())
    }

    /// Assert the directory invariants; panics on a violation
    pub fn verify_integrity(&self) -> Result<(), HashIndexError> {
        let _table = self.table_latch.read();
        let directory = self.read_directory()?;
        directory.verify_integrity();
        Ok(())
    }

    fn hash(&self, key: &K) -> u32 {
        (self.hash_fn)(key)
    }

    fn key_to_directory_index(&self, key: &K, directory: &HashDirectoryPage) -> usize {
        (self.hash(key) & directory.global_depth_mask()) as usize
    }

    fn key_to_page_id(&self, key: &K, directory: &HashDirectoryPage) -> PageId {
        directory.bucket_page_id(self.key_to_directory_index(key, directory))
    }

    /// Fetch and decode the directory, dropping the pin right away; the
    /// decoded copy stays coherent for as long as the table latch is held.
    fn read_directory(&self) -> Result<HashDirectoryPage, HashIndexError> {
        let page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let directory = {
            let guard = page.read();
            HashDirectoryPage::from_page(&guard)
        };
        self.unpin(self.directory_page_id, false);
        directory
    }

    /// Write the directory back to its page
    fn write_directory(&self, directory: &HashDirectoryPage) -> Result<(), HashIndexError> {
        let page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        {
            let mut guard = page.write();
            directory.to_page(&mut guard);
        }
        self.unpin(self.directory_page_id, true);
        Ok(())
    }

    fn unpin(&self, page_id: PageId, is_dirty: bool) {
        let unpinned = self.buffer_pool.unpin_page(page_id, is_dirty);
        debug_assert!(unpinned, "unpin of page {} failed", page_id);
    }
}
