use std::cmp::Ordering;
use std::mem;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{Page, PAGE_SIZE};
use crate::index::hash::error::HashIndexError;

/// Greatest number of (key, value) cells a bucket page can hold for the
/// given key/value types: each slot costs its fixed-width cell plus one
/// occupied bit and one readable bit.
pub fn max_bucket_capacity<K, V>() -> usize {
    let cell = cell_width::<K, V>();
    let mut capacity = (4 * PAGE_SIZE) / (4 * cell + 1);
    while bucket_bytes(capacity, cell) > PAGE_SIZE {
        capacity -= 1;
    }
    capacity
}

/// Fixed width of one encoded (key, value) cell.
///
/// Keys and values must encode into at most `size_of` bytes, which holds
/// for the fixed-width types this index stores (integers, record ids).
fn cell_width<K, V>() -> usize {
    mem::size_of::<K>() + mem::size_of::<V>()
}

fn bitmap_bytes(capacity: usize) -> usize {
    (capacity + 7) / 8
}

fn bucket_bytes(capacity: usize, cell: usize) -> usize {
    2 * bitmap_bytes(capacity) + capacity * cell
}

/// Bucket page of an extendible hash table: a fixed-capacity slot array
/// with two bitmaps at its head.
///
/// `occupied` marks slots that were ever used and is never cleared, so a
/// scan can stop at the first never-used slot; `readable` marks slots
/// currently holding a live entry. A cleared readable bit over a set
/// occupied bit is a tombstone.
pub struct HashBucketPage<K, V> {
    capacity: usize,
    occupied: Vec<u8>,
    readable: Vec<u8>,
    cells: Vec<Option<(K, V)>>,
}

impl<K, V> HashBucketPage<K, V>
where
    K: Serialize + DeserializeOwned + Clone,
    V: Serialize + DeserializeOwned + Clone + PartialEq,
{
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0 && capacity <= max_bucket_capacity::<K, V>());
        let mut cells = Vec::with_capacity(capacity);
        cells.resize_with(capacity, || None);
        Self {
            capacity,
            occupied: vec![0; bitmap_bytes(capacity)],
            readable: vec![0; bitmap_bytes(capacity)],
            cells,
        }
    }

    /// Decode a bucket of the given capacity from a page
    pub fn from_page(page: &Page, capacity: usize) -> Result<Self, HashIndexError> {
        let bitmap = bitmap_bytes(capacity);
        let cell = cell_width::<K, V>();

        let occupied = page.data[0..bitmap].to_vec();
        let readable = page.data[bitmap..2 * bitmap].to_vec();

        let mut cells = Vec::with_capacity(capacity);
        for slot in 0..capacity {
            if occupied[slot / 8] & (1 << (slot % 8)) == 0 {
                cells.push(None);
                continue;
            }
            let offset = 2 * bitmap + slot * cell;
            let entry: (K, V) = bincode::deserialize(&page.data[offset..offset + cell])
                .map_err(|e| {
                    HashIndexError::InvalidPageFormat(format!(
                        "bucket slot {} does not decode: {}",
                        slot, e
                    ))
                })?;
            cells.push(Some(entry));
        }

        Ok(Self {
            capacity,
            occupied,
            readable,
            cells,
        })
    }

    /// Encode the bucket into a page
    pub fn to_page(&self, page: &mut Page) -> Result<(), HashIndexError> {
        let bitmap = bitmap_bytes(self.capacity);
        let cell = cell_width::<K, V>();

        page.data.fill(0);
        page.data[0..bitmap].copy_from_slice(&self.occupied);
        page.data[bitmap..2 * bitmap].copy_from_slice(&self.readable);

        for (slot, entry) in self.cells.iter().enumerate() {
            let entry = match entry {
                Some(entry) => entry,
                None => continue,
            };
            let encoded = bincode::serialize(entry)
                .map_err(|e| HashIndexError::SerializationError(e.to_string()))?;
            if encoded.len() > cell {
                return Err(HashIndexError::SerializationError(format!(
                    "encoded entry takes {} bytes but the cell width is {}",
                    encoded.len(),
                    cell
                )));
            }
            let offset = 2 * bitmap + slot * cell;
            page.data[offset..offset + encoded.len()].copy_from_slice(&encoded);
        }

        Ok(())
    }

    /// Collect every value stored under `key`
    pub fn get_value<C>(&self, key: &K, comparator: &C) -> Vec<V>
    where
        C: Fn(&K, &K) -> Ordering,
    {
        let mut result = Vec::new();
        for slot in 0..self.capacity {
            if !self.is_readable(slot) {
                continue;
            }
            let (stored_key, stored_value) = self.entry_at(slot);
            if comparator(stored_key, key) == Ordering::Equal {
                result.push(stored_value.clone());
            }
        }
        result
    }

    /// Insert a (key, value) pair into the first free slot.
    ///
    /// Returns false when the exact pair is already present or the bucket
    /// has no free slot.
    pub fn insert<C>(&mut self, key: K, value: V, comparator: &C) -> bool
    where
        C: Fn(&K, &K) -> Ordering,
    {
        let mut insert_slot = None;
        for slot in 0..self.capacity {
            if self.is_readable(slot) {
                let (stored_key, stored_value) = self.entry_at(slot);
                if comparator(stored_key, &key) == Ordering::Equal && *stored_value == value {
                    return false;
                }
            } else if insert_slot.is_none() {
                insert_slot = Some(slot);
            }
        }

        match insert_slot {
            Some(slot) => {
                self.cells[slot] = Some((key, value));
                self.set_occupied(slot);
                self.set_readable(slot);
                true
            }
            None => false,
        }
    }

    /// Remove the exact (key, value) pair, leaving a tombstone
    pub fn remove<C>(&mut self, key: &K, value: &V, comparator: &C) -> bool
    where
        C: Fn(&K, &K) -> Ordering,
    {
        for slot in 0..self.capacity {
            if !self.is_readable(slot) {
                continue;
            }
            let (stored_key, stored_value) = self.entry_at(slot);
            if comparator(stored_key, key) == Ordering::Equal && stored_value == value {
                self.remove_at(slot);
                return true;
            }
        }
        false
    }

    /// Clear the readable bit of a slot; the occupied bit stays set
    pub fn remove_at(&mut self, slot: usize) {
        self.readable[slot / 8] &= !(1 << (slot % 8));
    }

    pub fn key_at(&self, slot: usize) -> &K {
        &self.entry_at(slot).0
    }

    pub fn value_at(&self, slot: usize) -> &V {
        self.entry_at(slot).1
    }

    fn entry_at(&self, slot: usize) -> (&K, &V) {
        let (key, value) = self.cells[slot]
            .as_ref()
            .expect("occupied slot holds an entry");
        (key, value)
    }

    pub fn is_occupied(&self, slot: usize) -> bool {
        self.occupied[slot / 8] & (1 << (slot % 8)) != 0
    }

    pub fn is_readable(&self, slot: usize) -> bool {
        self.readable[slot / 8] & (1 << (slot % 8)) != 0
    }

    fn set_occupied(&mut self, slot: usize) {
        self.occupied[slot / 8] |= 1 << (slot % 8);
    }

    fn set_readable(&mut self, slot: usize) {
        self.readable[slot / 8] |= 1 << (slot % 8);
    }

    /// A bucket is full when every slot is readable; tombstones count as
    /// free space.
    pub fn is_full(&self) -> bool {
        self.num_readable() == self.capacity
    }

    /// Emptiness is judged on the readable bitmap alone
    pub fn is_empty(&self) -> bool {
        self.readable.iter().all(|&byte| byte == 0)
    }

    pub fn num_readable(&self) -> usize {
        self.readable.iter().map(|byte| byte.count_ones() as usize).sum()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
