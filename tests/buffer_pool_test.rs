use anyhow::Result;

mod common;
use common::create_test_buffer_pool;

#[test]
fn test_new_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10, 2)?;

    let (page_id, page) = buffer_pool.new_page()?;
    assert!(page_id > 0);

    {
        let page_guard = page.read();
        assert_eq!(page_guard.page_id, page_id);
        assert!(page_guard.data.iter().all(|&b| b == 0));
    }

    buffer_pool.unpin_page(page_id, false)?;
    Ok(())
}

#[test]
fn test_pool_capacity_and_eviction() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10, 2)?;

    // Fill every frame with a pinned page.
    let mut page_ids = Vec::new();
    for _ in 0..10 {
        let (page_id, _page) = buffer_pool.new_page()?;
        page_ids.push(page_id);
    }

    // All frames pinned: the eleventh allocation must fail.
    assert!(buffer_pool.new_page().is_err());

    // Unpin the first page with data in it, dirty.
    {
        let page = buffer_pool.fetch_page(page_ids[0])?;
        {
            let mut guard = page.write();
            guard.data[0..4].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        }
        buffer_pool.unpin_page(page_ids[0], true)?;
        buffer_pool.unpin_page(page_ids[0], true)?;
    }

    // Now allocation succeeds by evicting page 0, writing it back first.
    let (new_id, _new_page) = buffer_pool.new_page()?;

    // Make room and fetch page 0 back from disk: the bytes survived.
    buffer_pool.unpin_page(new_id, false)?;
    let page = buffer_pool.fetch_page(page_ids[0])?;
    {
        let guard = page.read();
        assert_eq!(&guard.data[0..4], &[0xDE, 0xAD, 0xBE, 0xEF]);
    }
    buffer_pool.unpin_page(page_ids[0], false)?;

    Ok(())
}

#[test]
fn test_unpin_semantics() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(4, 2)?;

    let (page_id, _page) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(page_id, false)?;

    // Already at pin count zero.
    assert!(buffer_pool.unpin_page(page_id, false).is_err());
    // Never resident.
    assert!(buffer_pool.unpin_page(9999, false).is_err());

    Ok(())
}

#[test]
fn test_flush_clean_page_is_idempotent() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(4, 2)?;

    let (page_id, _page) = buffer_pool.new_page()?;
    buffer_pool.flush_page(page_id)?;
    // A second flush of the now-clean page also succeeds.
    buffer_pool.flush_page(page_id)?;
    buffer_pool.unpin_page(page_id, false)?;

    assert!(buffer_pool.flush_page(12345).is_err());
    Ok(())
}

#[test]
fn test_delete_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(4, 2)?;

    let (page_id, _page) = buffer_pool.new_page()?;

    // Pinned pages cannot be deleted.
    assert!(buffer_pool.delete_page(page_id).is_err());

    buffer_pool.unpin_page(page_id, false)?;
    buffer_pool.delete_page(page_id)?;
    assert_eq!(buffer_pool.free_frame_count(), 4);

    // Deleting an absent page succeeds.
    buffer_pool.delete_page(page_id)?;
    buffer_pool.delete_page(4242)?;

    Ok(())
}

#[test]
fn test_data_persists_across_eviction() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3, 2)?;

    // Write a distinct marker into each of 9 pages, forcing evictions.
    let mut page_ids = Vec::new();
    for i in 0..9u8 {
        let (page_id, page) = buffer_pool.new_page()?;
        {
            let mut guard = page.write();
            guard.data[100] = i;
        }
        buffer_pool.unpin_page(page_id, true)?;
        page_ids.push(page_id);
    }

    for (i, &page_id) in page_ids.iter().enumerate() {
        let page = buffer_pool.fetch_page(page_id)?;
        {
            let guard = page.read();
            assert_eq!(guard.page_id, page_id);
            assert_eq!(guard.data[100], i as u8);
        }
        buffer_pool.unpin_page(page_id, false)?;
    }

    Ok(())
}

#[test]
fn test_flush_all_pages() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(5, 2)?;

    let mut page_ids = Vec::new();
    for i in 0..5u8 {
        let (page_id, page) = buffer_pool.new_page()?;
        {
            let mut guard = page.write();
            guard.data[0] = i + 1;
        }
        buffer_pool.unpin_page(page_id, true)?;
        page_ids.push(page_id);
    }

    buffer_pool.flush_all_pages()?;

    // After the flush the pages are clean; evicting them must not lose data.
    for _ in 0..5 {
        let (page_id, _page) = buffer_pool.new_page()?;
        buffer_pool.unpin_page(page_id, false)?;
    }
    for (i, &page_id) in page_ids.iter().enumerate() {
        let page = buffer_pool.fetch_page(page_id)?;
        assert_eq!(page.read().data[0], i as u8 + 1);
        buffer_pool.unpin_page(page_id, false)?;
    }

    Ok(())
}
