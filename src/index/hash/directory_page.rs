use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, INVALID_PAGE_ID};
use crate::index::hash::error::HashIndexError;

/// Number of slots in a directory page. The directory grows by doubling and
/// can never exceed this size, so the deepest possible bucket addresses
/// `log2(DIRECTORY_ARRAY_SIZE)` hash bits.
pub const DIRECTORY_ARRAY_SIZE: usize = 512;

// Page layout:
// - page_id: u32
// - global_depth: u32
// - local_depths: DIRECTORY_ARRAY_SIZE bytes
// - bucket_page_ids: DIRECTORY_ARRAY_SIZE u32s
const GLOBAL_DEPTH_OFFSET: usize = 4;
const LOCAL_DEPTHS_OFFSET: usize = 8;
const BUCKET_PAGE_IDS_OFFSET: usize = LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE;

/// Directory page of an extendible hash table.
///
/// Slot `i` routes every key whose low `global_depth` hash bits equal `i`.
/// Slots whose indices agree on the low `local_depth` bits alias the same
/// bucket page.
pub struct HashDirectoryPage {
    page_id: PageId,
    global_depth: u32,
    local_depths: [u8; DIRECTORY_ARRAY_SIZE],
    bucket_page_ids: [PageId; DIRECTORY_ARRAY_SIZE],
}

impl HashDirectoryPage {
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            global_depth: 0,
            local_depths: [0; DIRECTORY_ARRAY_SIZE],
            bucket_page_ids: [INVALID_PAGE_ID; DIRECTORY_ARRAY_SIZE],
        }
    }

    /// Decode a directory from a page
    pub fn from_page(page: &Page) -> Result<Self, HashIndexError> {
        let page_id = LittleEndian::read_u32(&page.data[0..4]);
        let global_depth = LittleEndian::read_u32(
            &page.data[GLOBAL_DEPTH_OFFSET..GLOBAL_DEPTH_OFFSET + 4],
        );
        if global_depth > (DIRECTORY_ARRAY_SIZE as u32).trailing_zeros() {
            return Err(HashIndexError::InvalidPageFormat(format!(
                "global depth {} exceeds the directory size",
                global_depth
            )));
        }

        let mut local_depths = [0u8; DIRECTORY_ARRAY_SIZE];
        local_depths.copy_from_slice(
            &page.data[LOCAL_DEPTHS_OFFSET..LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE],
        );

        let mut bucket_page_ids = [INVALID_PAGE_ID; DIRECTORY_ARRAY_SIZE];
        for (i, id) in bucket_page_ids.iter_mut().enumerate() {
            let offset = BUCKET_PAGE_IDS_OFFSET + i * 4;
            *id = LittleEndian::read_u32(&page.data[offset..offset + 4]);
        }

        Ok(Self {
            page_id,
            global_depth,
            local_depths,
            bucket_page_ids,
        })
    }

    /// Encode the directory into a page
    pub fn to_page(&self, page: &mut Page) {
        LittleEndian::write_u32(&mut page.data[0..4], self.page_id);
        LittleEndian::write_u32(
            &mut page.data[GLOBAL_DEPTH_OFFSET..GLOBAL_DEPTH_OFFSET + 4],
            self.global_depth,
        );
        page.data[LOCAL_DEPTHS_OFFSET..LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE]
            .copy_from_slice(&self.local_depths);
        for (i, &id) in self.bucket_page_ids.iter().enumerate() {
            let offset = BUCKET_PAGE_IDS_OFFSET + i * 4;
            LittleEndian::write_u32(&mut page.data[offset..offset + 4], id);
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn global_depth(&self) -> u32 {
        self.global_depth
    }

    /// Mask extracting the directory index from a 32-bit hash
    pub fn global_depth_mask(&self) -> u32 {
        (1u32 << self.global_depth) - 1
    }

    /// Number of addressable slots
    pub fn size(&self) -> usize {
        1usize << self.global_depth
    }

    pub fn bucket_page_id(&self, slot: usize) -> PageId {
        self.bucket_page_ids[slot]
    }

    pub fn set_bucket_page_id(&mut self, slot: usize, page_id: PageId) {
        self.bucket_page_ids[slot] = page_id;
    }

    pub fn local_depth(&self, slot: usize) -> u32 {
        u32::from(self.local_depths[slot])
    }

    pub fn set_local_depth(&mut self, slot: usize, depth: u32) {
        debug_assert!(depth <= self.global_depth);
        self.local_depths[slot] = depth as u8;
    }

    pub fn incr_local_depth(&mut self, slot: usize) {
        debug_assert!(self.local_depth(slot) < self.global_depth);
        self.local_depths[slot] += 1;
    }

    pub fn decr_local_depth(&mut self, slot: usize) {
        debug_assert!(self.local_depths[slot] > 0);
        self.local_depths[slot] -= 1;
    }

    /// Double the directory, replicating the existing slots into the new
    /// upper half: slot `i + old_size` starts as an alias of slot `i`.
    pub fn incr_global_depth(&mut self) {
        let old_size = self.size();
        debug_assert!(old_size * 2 <= DIRECTORY_ARRAY_SIZE);
        for i in 0..old_size {
            self.bucket_page_ids[old_size + i] = self.bucket_page_ids[i];
            self.local_depths[old_size + i] = self.local_depths[i];
        }
        self.global_depth += 1;
    }

    pub fn decr_global_depth(&mut self) {
        debug_assert!(self.global_depth > 0);
        self.global_depth -= 1;
    }

    /// The directory can halve when no bucket uses its full depth
    pub fn can_shrink(&self) -> bool {
        self.global_depth > 0
            && (0..self.size()).all(|i| self.local_depth(i) < self.global_depth)
    }

    /// The merge partner of `slot`: the index differing in the highest bit
    /// the slot's bucket currently addresses.
    pub fn split_image_index(&self, slot: usize) -> usize {
        debug_assert!(self.local_depth(slot) > 0);
        slot ^ (1usize << (self.local_depth(slot) - 1))
    }

    /// Assert the directory invariants: every local depth is bounded by the
    /// global depth, and all slots agreeing on the low `local_depth` bits
    /// carry the same bucket page id and local depth.
    pub fn verify_integrity(&self) {
        for i in 0..self.size() {
            let depth = self.local_depth(i);
            assert!(
                depth <= self.global_depth,
                "slot {} has local depth {} above global depth {}",
                i,
                depth,
                self.global_depth
            );
            assert_ne!(
                self.bucket_page_ids[i], INVALID_PAGE_ID,
                "slot {} has no bucket page",
                i
            );
            let mask = (1usize << depth) - 1;
            for j in 0..self.size() {
                if i & mask == j & mask {
                    assert_eq!(
                        self.bucket_page_ids[i], self.bucket_page_ids[j],
                        "slots {} and {} alias different buckets",
                        i, j
                    );
                    assert_eq!(
                        self.local_depths[i], self.local_depths[j],
                        "slots {} and {} disagree on local depth",
                        i, j
                    );
                }
            }
        }
    }
}
