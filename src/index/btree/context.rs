use std::collections::HashSet;

use log::warn;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;

use crate::common::types::PageId;
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::page::{PageReadGuard, PageWriteGuard};

/// What a tree traversal intends to do, which decides latch kinds and the
/// safe-node rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Insert,
    Remove,
}

pub(crate) type RootReadGuard = ArcRwLockReadGuard<RawRwLock, ()>;
pub(crate) type RootWriteGuard = ArcRwLockWriteGuard<RawRwLock, ()>;

pub(crate) enum RootLatch {
    Read(#[allow(dead_code)] RootReadGuard),
    Write(#[allow(dead_code)] RootWriteGuard),
}

pub(crate) enum PageLatch {
    Read(PageReadGuard),
    Write(PageWriteGuard),
}

enum HeldLatch {
    /// The tree-level latch that gates root pointer changes
    VirtualRoot(RootLatch),
    Page {
        page_id: PageId,
        latch: PageLatch,
    },
}

/// Per-operation crabbing state: the FIFO of latched, pinned pages on the
/// current descent plus the pages scheduled for deallocation.
///
/// Latches are released in LIFO order; deallocation is deferred to the
/// release phase so merges never unpin pages the operation still uses.
pub(crate) struct OpContext {
    pub mode: AccessMode,
    latches: Vec<HeldLatch>,
    deleted: HashSet<PageId>,
}

impl OpContext {
    pub fn new(mode: AccessMode) -> Self {
        Self {
            mode,
            latches: Vec::new(),
            deleted: HashSet::new(),
        }
    }

    pub fn push_virtual_root(&mut self, latch: RootLatch) {
        self.latches.push(HeldLatch::VirtualRoot(latch));
    }

    pub fn push_page(&mut self, page_id: PageId, latch: PageLatch) {
        self.latches.push(HeldLatch::Page { page_id, latch });
    }

    /// Write access to a page latched earlier on this descent
    pub fn page_mut(&mut self, page_id: PageId) -> Option<&mut crate::storage::page::Page> {
        self.latches.iter_mut().find_map(|held| match held {
            HeldLatch::Page {
                page_id: id,
                latch: PageLatch::Write(guard),
            } if *id == page_id => Some(&mut **guard),
            _ => None,
        })
    }

    /// Read access to a page latched earlier on this descent
    pub fn page_ref(&self, page_id: PageId) -> Option<&crate::storage::page::Page> {
        self.latches.iter().find_map(|held| match held {
            HeldLatch::Page { page_id: id, latch } if *id == page_id => match latch {
                PageLatch::Read(guard) => Some(&**guard),
                PageLatch::Write(guard) => Some(&**guard),
            },
            _ => None,
        })
    }

    pub fn holds_page(&self, page_id: PageId) -> bool {
        self.page_ref(page_id).is_some()
    }

    /// Schedule a page for deallocation during the release phase
    pub fn mark_deleted(&mut self, page_id: PageId) {
        self.deleted.insert(page_id);
    }

    /// Release everything currently held. Called when the newly latched
    /// child is safe (before it is pushed), making this an ancestor release.
    pub fn release_ancestors(
        &mut self,
        buffer_pool: &BufferPoolManager,
    ) -> Result<(), BufferPoolError> {
        debug_assert!(self.deleted.is_empty());
        let dirty = self.mode != AccessMode::Read;
        for held in self.latches.drain(..).rev() {
            if let HeldLatch::Page { page_id, latch } = held {
                drop(latch);
                buffer_pool.unpin_page(page_id, dirty)?;
            }
        }
        Ok(())
    }

    /// Unlatch and unpin everything in LIFO order, then hand the pages that
    /// fell out of the tree back to the buffer pool.
    pub fn release_all(mut self, buffer_pool: &BufferPoolManager) -> Result<(), BufferPoolError> {
        let dirty = self.mode != AccessMode::Read;
        for held in self.latches.drain(..).rev() {
            if let HeldLatch::Page { page_id, latch } = held {
                drop(latch);
                buffer_pool.unpin_page(page_id, dirty)?;
            }
        }
        for page_id in self.deleted.drain() {
            match buffer_pool.delete_page(page_id) {
                Ok(()) => {}
                Err(BufferPoolError::PagePinned(_)) => {
                    // A concurrent reader still holds a pin; the page is
                    // unreachable from the tree, so leave it to the pool.
                    warn!("deferred delete of page {} skipped: still pinned", page_id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Detach the deepest read-latched page (with its pin) for use by an
    /// iterator, releasing every ancestor latch.
    pub fn take_leaf(
        mut self,
        buffer_pool: &BufferPoolManager,
    ) -> Result<Option<(PageId, PageReadGuard)>, BufferPoolError> {
        debug_assert_eq!(self.mode, AccessMode::Read);
        let leaf = match self.latches.pop() {
            Some(HeldLatch::Page {
                page_id,
                latch: PageLatch::Read(guard),
            }) => Some((page_id, guard)),
            Some(other) => {
                self.latches.push(other);
                None
            }
            None => None,
        };
        self.release_all(buffer_pool)?;
        Ok(leaf)
    }
}
