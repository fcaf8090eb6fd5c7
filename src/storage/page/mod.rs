use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

use crate::common::types::{PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// In-memory image of one disk page.
///
/// The surrounding `RwLock` is the per-page latch; pin count and dirty flag
/// live in the buffer pool frame so that unpinning never needs this latch.
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
        }
    }

    /// Zero the payload and drop the page identity.
    pub fn reset(&mut self) {
        self.data.fill(0);
        self.page_id = INVALID_PAGE_ID;
    }
}

/// Shared handle to a latched page slot
pub type PagePtr = Arc<RwLock<Page>>;

/// Owned read latch, detachable from the borrow of the `PagePtr`
pub type PageReadGuard = ArcRwLockReadGuard<RawRwLock, Page>;

/// Owned write latch, detachable from the borrow of the `PagePtr`
pub type PageWriteGuard = ArcRwLockWriteGuard<RawRwLock, Page>;

pub fn new_page_ptr(page_id: PageId) -> PagePtr {
    Arc::new(RwLock::new(Page::new(page_id)))
}
