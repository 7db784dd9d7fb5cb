use crate::common::types::{PageId, PagePtr};
use crate::storage::buffer::error::BufferPoolError;

/// Common capability of the single-instance and sharded buffer pools.
///
/// Index and table-heap code is written against this trait so either
/// variant can back it. Every successful `new_page`/`fetch_page` must be
/// paired with exactly one `unpin_page`; an unbalanced pair leaks a frame.
pub trait BufferPool: Send + Sync {
    /// Allocate a fresh page, pinned once. Fails with
    /// [`BufferPoolError::BufferPoolFull`] when every frame is pinned.
    fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError>;

    /// Pin a page, reading it from disk if it is not resident
    fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError>;

    /// Drop one pin, OR-ing the dirty bit. Returns false if the page is not
    /// resident or its pin count is already zero.
    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool;

    /// Write a resident page back to disk. Returns false if not resident.
    fn flush_page(&self, page_id: PageId) -> bool;

    /// Write every resident dirty page back to disk
    fn flush_all_pages(&self);

    /// Drop a page from the pool and deallocate it on disk. Returns false
    /// if the page is resident and pinned.
    fn delete_page(&self, page_id: PageId) -> bool;

    /// Total number of frames
    fn pool_size(&self) -> usize;
}
