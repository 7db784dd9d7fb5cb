use anyhow::Result;
use emberdb::storage::buffer::BufferPoolError;

mod common;
use common::create_test_buffer_pool;

#[test]
fn test_new_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page, page_id) = buffer_pool.new_page()?;

    // a standalone pool allocates ids from 0 upwards
    assert_eq!(page_id, 0);
    {
        let page_guard = page.read();
        assert_eq!(page_guard.page_id, page_id);
        assert!(page_guard.data.iter().all(|&b| b == 0));
    }

    assert!(buffer_pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_fetch_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;
    assert!(buffer_pool.unpin_page(page_id, false));

    let fetched_page = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched_page.read();
        assert_eq!(page_guard.page_id, page_id);
    }

    assert!(buffer_pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_page_modification_survives_eviction() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        let test_data = b"Test Data";
        page_guard.data[100..100 + test_data.len()].copy_from_slice(test_data);
    }
    assert!(buffer_pool.unpin_page(page_id, true));

    // churn through enough pages to evict the first one
    for _ in 0..5 {
        let (_, id) = buffer_pool.new_page()?;
        assert!(buffer_pool.unpin_page(id, true));
    }

    let fetched_page = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched_page.read();
        assert_eq!(&page_guard.data[100..109], b"Test Data");
    }
    assert!(buffer_pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_new_page_with_all_frames_pinned() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    // fill every frame with a pinned page
    let mut page_ids = Vec::new();
    for _ in 0..10 {
        let (_, page_id) = buffer_pool.new_page()?;
        page_ids.push(page_id);
    }

    assert!(matches!(
        buffer_pool.new_page(),
        Err(BufferPoolError::BufferPoolFull)
    ));

    // releasing one pin frees exactly one frame
    assert!(buffer_pool.unpin_page(page_ids[3], false));
    let (_, new_page_id) = buffer_pool.new_page()?;
    assert_eq!(new_page_id, 10);

    // the evicted page is no longer resident but still fetchable from disk
    assert!(buffer_pool.unpin_page(new_page_id, false));
    let refetched = buffer_pool.fetch_page(page_ids[3])?;
    assert_eq!(refetched.read().page_id, page_ids[3]);
    assert!(buffer_pool.unpin_page(page_ids[3], false));
    Ok(())
}

#[test]
fn test_unpin_semantics() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;

    // pin count 1: first unpin succeeds, second has nothing to release
    assert!(buffer_pool.unpin_page(page_id, false));
    assert!(!buffer_pool.unpin_page(page_id, false));

    // a page that is not resident cannot be unpinned
    assert!(!buffer_pool.unpin_page(999, false));
    Ok(())
}

#[test]
fn test_flush_page_round_trip() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        let test_data = b"Test Data For Flushing";
        page_guard.data[100..100 + test_data.len()].copy_from_slice(test_data);
    }
    assert!(buffer_pool.unpin_page(page_id, true));

    assert!(buffer_pool.flush_page(page_id));
    assert!(!buffer_pool.flush_page(999));

    // the flushed bytes come back identical
    let fetched_page = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched_page.read();
        assert_eq!(&page_guard.data[100..122], b"Test Data For Flushing");
    }
    assert!(buffer_pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_flush_all_pages() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let mut page_ids = Vec::new();
    for i in 0..5 {
        let (page, page_id) = buffer_pool.new_page()?;
        {
            let mut page_guard = page.write();
            let test_data = format!("Test Data {}", i).into_bytes();
            page_guard.data[100..100 + test_data.len()].copy_from_slice(&test_data);
        }
        assert!(buffer_pool.unpin_page(page_id, true));
        page_ids.push(page_id);
    }

    buffer_pool.flush_all_pages();

    for (i, &page_id) in page_ids.iter().enumerate() {
        let fetched_page = buffer_pool.fetch_page(page_id)?;
        {
            let page_guard = fetched_page.read();
            let expected = format!("Test Data {}", i).into_bytes();
            assert_eq!(&page_guard.data[100..100 + expected.len()], &expected[..]);
        }
        assert!(buffer_pool.unpin_page(page_id, false));
    }
    Ok(())
}

#[test]
fn test_delete_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;

    // a pinned page cannot be deleted
    assert!(!buffer_pool.delete_page(page_id));

    assert!(buffer_pool.unpin_page(page_id, false));
    assert!(buffer_pool.delete_page(page_id));

    // deleting a page that is not resident succeeds trivially
    assert!(buffer_pool.delete_page(page_id));

    // the freed frame is reusable
    let (new_page, new_page_id) = buffer_pool.new_page()?;
    assert_eq!(new_page.read().page_id, new_page_id);
    assert!(buffer_pool.unpin_page(new_page_id, false));
    Ok(())
}
