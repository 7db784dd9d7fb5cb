use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};

use crate::common::types::{Frame, FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::pool::BufferPool;
use crate::storage::buffer::replacer::LruReplacer;
use crate::storage::disk::DiskManager;

/// Bookkeeping guarded by the instance-wide latch
struct PoolCore {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    next_page_id: PageId,
}

/// A single buffer pool instance.
///
/// Mediates all access between on-disk pages and in-memory frames: pinning,
/// dirty tracking and LRU eviction. Every public operation holds the
/// instance latch for its entire duration, disk I/O included.
///
/// As instance `k` of `n`, page ids are allocated from the arithmetic
/// progression `k, k+n, k+2n, ...` so callers can route a page id to its
/// owning instance without a table lookup.
pub struct BufferPoolManager {
    pool_size: usize,
    num_instances: u32,
    instance_index: u32,
    core: Mutex<PoolCore>,
    replacer: LruReplacer,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    /// Create a standalone buffer pool over its own database file
    pub fn new(pool_size: usize, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::new_instance(pool_size, 1, 0, disk_manager))
    }

    /// Create one instance of a sharded pool sharing a disk manager
    pub fn new_instance(
        pool_size: usize,
        num_instances: u32,
        instance_index: u32,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        assert!(num_instances > 0, "a pool needs at least one instance");
        assert!(
            instance_index < num_instances,
            "instance index {} out of range for {} instances",
            instance_index,
            num_instances
        );

        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            let frame_id = i as FrameId;
            frames.push(Frame::new(
                frame_id,
                Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))),
            ));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            num_instances,
            instance_index,
            core: Mutex::new(PoolCore {
                frames,
                page_table: HashMap::new(),
                free_list,
                next_page_id: instance_index,
            }),
            replacer: LruReplacer::new(pool_size),
            disk_manager,
        }
    }

    /// Create a new page, pinned once
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut core = self.core.lock();
        let frame_id = self.allocate_frame(&mut core)?;

        // Allocate the id only once a frame is secured
        let page_id = core.next_page_id;
        core.next_page_id += self.num_instances;
        debug_assert_eq!(page_id % self.num_instances, self.instance_index);

        {
            let frame = &mut core.frames[frame_id as usize];
            {
                let mut page = frame.page.write();
                page.data.fill(0);
                page.page_id = page_id;
            }
            frame.pin_count = 1;
            frame.is_dirty = false;
        }
        core.page_table.insert(page_id, frame_id);

        Ok((core.frames[frame_id as usize].page.clone(), page_id))
    }

    /// Fetch a page from the buffer pool or disk, pinned once more
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot fetch the invalid page id".to_string(),
            ));
        }

        let mut core = self.core.lock();

        // Already resident: bump the pin count and shield it from eviction
        if let Some(&frame_id) = core.page_table.get(&page_id) {
            let frame = &mut core.frames[frame_id as usize];
            frame.pin_count += 1;
            self.replacer.pin(frame_id);
            return Ok(frame.page.clone());
        }

        let frame_id = self.allocate_frame(&mut core)?;
        {
            let frame = &mut core.frames[frame_id as usize];
            {
                let mut page = frame.page.write();
                self.disk_manager.read_page(page_id, &mut page)?;
            }
            frame.pin_count = 1;
            frame.is_dirty = false;
        }
        core.page_table.insert(page_id, frame_id);

        Ok(core.frames[frame_id as usize].page.clone())
    }

    /// Drop one pin on a page, OR-ing in the dirty bit.
    ///
    /// Returns false if the page is not resident or not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut core = self.core.lock();
        let frame_id = match core.page_table.get(&page_id) {
            Some(&id) => id,
            None => return false,
        };

        let frame = &mut core.frames[frame_id as usize];
        if frame.pin_count == 0 {
            return false;
        }
        frame.is_dirty |= is_dirty;
        frame.pin_count -= 1;
        if frame.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }
        true
    }

    /// Write a resident page to disk.
    ///
    /// The page is written even when clean; the dirty bit is cleared after.
    pub fn flush_page(&self, page_id: PageId) -> bool {
        let mut core = self.core.lock();
        let frame_id = match core.page_table.get(&page_id) {
            Some(&id) => id,
            None => return false,
        };

        let page = core.frames[frame_id as usize].page.read().clone();
        if let Err(e) = self.disk_manager.write_page(&page) {
            warn!(
                "instance {}: failed to flush page {}: {}",
                self.instance_index, page_id, e
            );
            return false;
        }
        core.frames[frame_id as usize].is_dirty = false;
        true
    }

    /// Write every resident dirty page to disk
    pub fn flush_all_pages(&self) {
        let mut core = self.core.lock();
        let resident: Vec<(PageId, FrameId)> =
            core.page_table.iter().map(|(&p, &f)| (p, f)).collect();

        for (page_id, frame_id) in resident {
            let frame = &mut core.frames[frame_id as usize];
            if !frame.is_dirty {
                continue;
            }
            let page = frame.page.read().clone();
            if let Err(e) = self.disk_manager.write_page(&page) {
                warn!(
                    "instance {}: failed to flush page {}: {}",
                    self.instance_index, page_id, e
                );
                continue;
            }
            core.frames[frame_id as usize].is_dirty = false;
        }
    }

    /// Drop a page from the pool and deallocate it on disk.
    ///
    /// Deleting a non-resident page succeeds trivially; deleting a pinned
    /// page fails.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut core = self.core.lock();
        let frame_id = match core.page_table.get(&page_id) {
            Some(&id) => id,
            None => {
                // deleting a page that is not resident succeeds no matter
                // what the device says about the id
                let _ = self.disk_manager.deallocate_page(page_id);
                return true;
            }
        };

        {
            let frame = &mut core.frames[frame_id as usize];
            if frame.pin_count > 0 {
                return false;
            }
            {
                let mut page = frame.page.write();
                page.data.fill(0);
                page.page_id = INVALID_PAGE_ID;
            }
            frame.is_dirty = false;
        }

        core.page_table.remove(&page_id);
        self.replacer.pin(frame_id);
        core.free_list.push_back(frame_id);

        if let Err(e) = self.disk_manager.deallocate_page(page_id) {
            warn!(
                "instance {}: failed to deallocate page {}: {}",
                self.instance_index, page_id, e
            );
        }
        true
    }

    /// Number of frames in this instance
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Pick a frame for a new resident page: free list first, then the
    /// replacer. An evicted page is written back when dirty and dropped
    /// from the page table.
    ///
    /// Disk I/O happens while the instance latch is held. A rewrite that
    /// releases the latch around I/O would need a per-frame "loading"
    /// placeholder state so concurrent fetches of the same page wait for
    /// the read instead of issuing their own.
    fn allocate_frame(&self, core: &mut PoolCore) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = core.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self
            .replacer
            .victim()
            .ok_or(BufferPoolError::BufferPoolFull)?;

        let (victim_page_id, dirty_copy) = {
            let frame = &core.frames[frame_id as usize];
            let page = frame.page.read();
            (
                page.page_id,
                if frame.is_dirty { Some(page.clone()) } else { None },
            )
        };

        if let Some(page) = dirty_copy {
            self.disk_manager.write_page(&page)?;
            core.frames[frame_id as usize].is_dirty = false;
        }

        if victim_page_id != INVALID_PAGE_ID {
            debug!(
                "instance {}: evicted page {} from frame {}",
                self.instance_index, victim_page_id, frame_id
            );
            core.page_table.remove(&victim_page_id);
        }

        Ok(frame_id)
    }
}

impl BufferPool for BufferPoolManager {
    fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        BufferPoolManager::new_page(self)
    }

    fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        BufferPoolManager::fetch_page(self, page_id)
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        BufferPoolManager::unpin_page(self, page_id, is_dirty)
    }

    fn flush_page(&self, page_id: PageId) -> bool {
        BufferPoolManager::flush_page(self, page_id)
    }

    fn flush_all_pages(&self) {
        BufferPoolManager::flush_all_pages(self)
    }

    fn delete_page(&self, page_id: PageId) -> bool {
        BufferPoolManager::delete_page(self, page_id)
    }

    fn pool_size(&self) -> usize {
        BufferPoolManager::pool_size(self)
    }
}
