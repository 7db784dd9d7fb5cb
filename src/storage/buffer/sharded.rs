use std::path::Path;
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::{PageId, PagePtr};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::manager::BufferPoolManager;
use crate::storage::buffer::pool::BufferPool;
use crate::storage::disk::DiskManager;

/// A buffer pool sharded into independent instances over one disk manager.
///
/// Page-addressed operations route by `page_id % num_instances`, which is
/// exact because each instance allocates ids congruent to its own index.
/// Allocation round-robins across instances so disjoint shards admit
/// concurrent operations.
pub struct ShardedBufferPoolManager {
    instances: Vec<BufferPoolManager>,
    next_instance: Mutex<usize>,
}

impl ShardedBufferPoolManager {
    pub fn new(
        num_instances: u32,
        pool_size: usize,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        assert!(num_instances > 0, "a sharded pool needs at least one instance");

        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        let instances = (0..num_instances)
            .map(|i| {
                BufferPoolManager::new_instance(pool_size, num_instances, i, disk_manager.clone())
            })
            .collect();

        Ok(Self {
            instances,
            next_instance: Mutex::new(0),
        })
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    fn instance_for(&self, page_id: PageId) -> &BufferPoolManager {
        &self.instances[page_id as usize % self.instances.len()]
    }

    /// Create a new page on the first instance with a frame to spare.
    ///
    /// The probe starts at a rotating cursor that advances exactly once per
    /// call, whatever the outcome, so consecutive allocations spread load
    /// across instances.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let num = self.instances.len();
        let start = {
            let mut cursor = self.next_instance.lock();
            let start = *cursor;
            *cursor = (*cursor + 1) % num;
            start
        };

        for offset in 0..num {
            match self.instances[(start + offset) % num].new_page() {
                Ok(result) => return Ok(result),
                Err(BufferPoolError::BufferPoolFull) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(BufferPoolError::BufferPoolFull)
    }

    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        self.instance_for(page_id).fetch_page(page_id)
    }

    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.instance_for(page_id).unpin_page(page_id, is_dirty)
    }

    pub fn flush_page(&self, page_id: PageId) -> bool {
        self.instance_for(page_id).flush_page(page_id)
    }

    pub fn flush_all_pages(&self) {
        for instance in &self.instances {
            instance.flush_all_pages();
        }
    }

    pub fn delete_page(&self, page_id: PageId) -> bool {
        self.instance_for(page_id).delete_page(page_id)
    }

    /// Total number of frames across all instances
    pub fn pool_size(&self) -> usize {
        self.instances.iter().map(|i| i.pool_size()).sum()
    }
}

impl BufferPool for ShardedBufferPoolManager {
    fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        ShardedBufferPoolManager::new_page(self)
    }

    fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        ShardedBufferPoolManager::fetch_page(self, page_id)
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        ShardedBufferPoolManager::unpin_page(self, page_id, is_dirty)
    }

    fn flush_page(&self, page_id: PageId) -> bool {
        ShardedBufferPoolManager::flush_page(self, page_id)
    }

    fn flush_all_pages(&self) {
        ShardedBufferPoolManager::flush_all_pages(self)
    }

    fn delete_page(&self, page_id: PageId) -> bool {
        ShardedBufferPoolManager::delete_page(self, page_id)
    }

    fn pool_size(&self) -> usize {
        ShardedBufferPoolManager::pool_size(self)
    }
}
