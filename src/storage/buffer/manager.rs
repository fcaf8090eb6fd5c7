use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::common::types::{FrameId, PageId, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::page_table::ExtendibleHashTable;
use crate::storage::buffer::replacer::LruKReplacer;
use crate::storage::disk::DiskManager;
use crate::storage::page::{new_page_ptr, PagePtr};

/// How many entries an extendible-hash bucket of the page table holds
const PAGE_TABLE_BUCKET_SIZE: usize = 8;

/// One slot of the buffer pool.
///
/// The page payload sits behind its own reader/writer latch (`PagePtr`);
/// pin count and dirty flag stay out here so that pin bookkeeping only ever
/// takes the pool latch.
struct Frame {
    page: PagePtr,
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

/// Fixed-size cache of disk pages.
///
/// A single latch serializes all public operations; the page table and the
/// replacer carry their own latches inside it. Callers receive a `PagePtr`
/// whose `RwLock` is the per-page latch, and give the pin back through
/// [`BufferPoolManager::unpin_page`].
pub struct BufferPoolManager {
    pool_size: usize,
    disk_manager: Arc<DiskManager>,
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    frames: Vec<Frame>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LruKReplacer,
    free_list: VecDeque<FrameId>,
    next_page_id: PageId,
}

impl BufferPoolManager {
    pub fn new(
        pool_size: usize,
        replacer_k: usize,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);

        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for frame_id in 0..pool_size {
            frames.push(Frame {
                page: new_page_ptr(INVALID_PAGE_ID),
                page_id: INVALID_PAGE_ID,
                pin_count: 0,
                is_dirty: false,
            });
            free_list.push_back(frame_id);
        }

        Ok(Self {
            pool_size,
            disk_manager,
            inner: Mutex::new(PoolInner {
                frames,
                page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
                replacer: LruKReplacer::new(pool_size, replacer_k),
                free_list,
                // Page id 0 is the header page; ordinary pages start at 1.
                next_page_id: 1,
            }),
        })
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Number of frames currently on the free list
    pub fn free_frame_count(&self) -> usize {
        self.inner.lock().free_list.len()
    }

    /// Allocate a fresh page id and pin a zeroed frame for it.
    ///
    /// Fails with [`BufferPoolError::PoolExhausted`] when every frame is
    /// pinned.
    pub fn new_page(&self) -> Result<(PageId, PagePtr), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = self.take_frame(&mut inner)?;
        let page_id = inner.next_page_id;
        inner.next_page_id += 1;

        let frame = &mut inner.frames[frame_id];
        {
            let mut page = frame.page.write();
            page.reset();
            page.page_id = page_id;
        }
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;
        let page = frame.page.clone();

        inner.page_table.insert(page_id, frame_id);
        inner.replacer.record_access(frame_id);
        inner.replacer.set_evictable(frame_id, false);

        Ok((page_id, page))
    }

    /// Pin the frame holding `page_id`, reading the page from disk when it
    /// is not resident.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot fetch the invalid page id".to_string(),
            ));
        }

        let mut inner = self.inner.lock();

        if let Some(frame_id) = inner.page_table.find(&page_id) {
            inner.replacer.record_access(frame_id);
            let frame = &mut inner.frames[frame_id];
            frame.pin_count += 1;
            let first_pin = frame.pin_count == 1;
            let page = frame.page.clone();
            if first_pin {
                inner.replacer.set_evictable(frame_id, false);
            }
            return Ok(page);
        }

        let frame_id = self.take_frame(&mut inner)?;
        let frame = &mut inner.frames[frame_id];
        {
            let mut page = frame.page.write();
            self.disk_manager.read_page(page_id, &mut page)?;
        }
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;
        let page = frame.page.clone();

        inner.page_table.insert(page_id, frame_id);
        inner.replacer.record_access(frame_id);
        inner.replacer.set_evictable(frame_id, false);

        Ok(page)
    }

    /// Drop one pin on the page, OR-ing in the dirty flag. The frame becomes
    /// an eviction candidate once its pin count reaches zero.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = inner
            .page_table
            .find(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;
        let frame = &mut inner.frames[frame_id];
        if frame.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }

        if is_dirty {
            frame.is_dirty = true;
        }
        frame.pin_count -= 1;
        let now_unpinned = frame.pin_count == 0;
        if now_unpinned {
            inner.replacer.set_evictable(frame_id, true);
        }

        Ok(())
    }

    /// Write the page back to disk and clear its dirty flag
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot flush the invalid page id".to_string(),
            ));
        }

        let mut inner = self.inner.lock();
        let frame_id = inner
            .page_table
            .find(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;
        let frame = &mut inner.frames[frame_id];
        {
            let page = frame.page.read();
            self.disk_manager.write_page(&page)?;
        }
        frame.is_dirty = false;

        Ok(())
    }

    /// Flush every resident page
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();
        for frame in inner.frames.iter_mut() {
            if frame.page_id != INVALID_PAGE_ID {
                let page = frame.page.read();
                self.disk_manager.write_page(&page)?;
                drop(page);
                frame.is_dirty = false;
            }
        }
        Ok(())
    }

    /// Drop the page from the pool and deallocate its id.
    ///
    /// Deleting a page that is not resident succeeds; deleting a pinned page
    /// fails with [`BufferPoolError::PagePinned`].
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let Some(frame_id) = inner.page_table.find(&page_id) else {
            return Ok(());
        };

        let frame = &mut inner.frames[frame_id];
        if frame.pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        frame.page.write().reset();
        frame.page_id = INVALID_PAGE_ID;
        frame.is_dirty = false;

        inner.page_table.remove(&page_id);
        inner.replacer.remove(frame_id);
        inner.free_list.push_back(frame_id);

        Ok(())
    }

    /// Grab a frame for reuse: prefer the free list, otherwise evict.
    /// A dirty victim is written back before the frame is handed out.
    fn take_frame(&self, inner: &mut PoolInner) -> Result<FrameId, BufferPoolError> {
        let frame_id = if let Some(frame_id) = inner.free_list.pop_front() {
            frame_id
        } else if let Some(frame_id) = inner.replacer.evict() {
            let old_page_id = inner.frames[frame_id].page_id;
            debug!("evicting page {} from frame {}", old_page_id, frame_id);
            inner.page_table.remove(&old_page_id);
            frame_id
        } else {
            return Err(BufferPoolError::PoolExhausted);
        };

        let frame = &mut inner.frames[frame_id];
        if frame.is_dirty {
            let page = frame.page.read();
            self.disk_manager.write_page(&page)?;
            drop(page);
            frame.is_dirty = false;
        }

        Ok(frame_id)
    }
}
