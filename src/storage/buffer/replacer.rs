use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;

use crate::common::types::FrameId;

/// LRU replacement policy over the set of unpinned frames.
///
/// The map is ordered by unpin recency: the front entry is the least
/// recently unpinned frame and the next eviction victim.
pub struct LruReplacer {
    unpinned: Mutex<LinkedHashMap<FrameId, ()>>,
}

impl LruReplacer {
    pub fn new(pool_size: usize) -> Self {
        Self {
            unpinned: Mutex::new(LinkedHashMap::with_capacity(pool_size)),
        }
    }

    /// Remove and return the least recently unpinned frame
    pub fn victim(&self) -> Option<FrameId> {
        self.unpinned.lock().pop_front().map(|(frame_id, ())| frame_id)
    }

    /// A pinned frame is no longer a replacement candidate
    pub fn pin(&self, frame_id: FrameId) {
        self.unpinned.lock().remove(&frame_id);
    }

    /// Track a frame as unpinned. Unpinning an already tracked frame
    /// promotes it to most recently unpinned.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut unpinned = self.unpinned.lock();
        unpinned.remove(&frame_id);
        unpinned.insert(frame_id, ());
    }

    /// Number of frames currently eligible for eviction
    pub fn size(&self) -> usize {
        self.unpinned.lock().len()
    }
}
