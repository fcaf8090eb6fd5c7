use std::marker::PhantomData;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::context::{AccessMode, OpContext, PageLatch, RootLatch};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::{
    deserialize_node, leaf_capacity, serialize_node, write_parent_id,
};
use crate::storage::buffer::BufferPoolManager;

/// Disk-resident B+Tree index over the buffer pool.
///
/// All node access goes through page latches obtained from the buffer pool;
/// traversals crab downward, releasing ancestor latches as soon as the
/// current node is safe for the pending operation. The virtual root latch
/// serializes changes to the root pointer itself.
pub struct BTreeIndex<K> {
    pub(crate) buffer_pool: Arc<BufferPoolManager>,
    root_page_id: AtomicI32,
    pub(crate) virtual_root: Arc<RwLock<()>>,
    pub(crate) leaf_max_size: usize,
    pub(crate) internal_max_size: usize,
    _phantom: PhantomData<K>,
}

impl<K> BTreeIndex<K>
where
    K: Clone + Ord + serde::Serialize + for<'de> serde::Deserialize<'de> + Send + Sync + 'static,
{
    /// Create an empty tree with explicit fan-out limits. The root page is
    /// allocated lazily by the first insert.
    pub fn new(
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Self {
        assert!(leaf_max_size >= 2 && internal_max_size >= 3);
        Self {
            buffer_pool,
            root_page_id: AtomicI32::new(INVALID_PAGE_ID),
            virtual_root: Arc::new(RwLock::new(())),
            leaf_max_size,
            internal_max_size,
            _phantom: PhantomData,
        }
    }

    /// Create an empty tree sized from the page capacity of the key type
    pub fn with_default_capacity(buffer_pool: Arc<BufferPoolManager>) -> Self {
        let capacity = leaf_capacity::<K>();
        Self::new(buffer_pool, capacity, capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id.load(Ordering::SeqCst)
    }

    pub(crate) fn set_root_page_id(&self, page_id: PageId) {
        self.root_page_id.store(page_id, Ordering::SeqCst);
    }

    /// Point lookup
    pub fn get_value(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        let mut ctx = OpContext::new(AccessMode::Read);
        let vlatch = self.virtual_root.read_arc();
        if self.root_page_id() == INVALID_PAGE_ID {
            return Ok(None);
        }
        ctx.push_virtual_root(RootLatch::Read(vlatch));

        let leaf_id = self.find_leaf(Some(key), &mut ctx)?;
        let node = self.node_in_ctx(leaf_id, &ctx)?;
        let result = node.leaf_lookup(key);
        ctx.release_all(&self.buffer_pool)?;
        Ok(result)
    }

    /// Crab from the root to the leaf responsible for `key` (the leftmost
    /// leaf when no key is given). On return the leaf and every retained
    /// unsafe ancestor are latched in the context.
    pub(crate) fn find_leaf(
        &self,
        key: Option<&K>,
        ctx: &mut OpContext,
    ) -> Result<PageId, BTreeError> {
        let mut next = self.root_page_id();
        debug_assert_ne!(next, INVALID_PAGE_ID);

        loop {
            let page = self.buffer_pool.fetch_page(next)?;
            let latch = match ctx.mode {
                AccessMode::Read => PageLatch::Read(page.read_arc()),
                AccessMode::Insert | AccessMode::Remove => PageLatch::Write(page.write_arc()),
            };
            let node: BTreeNode<K> = match &latch {
                PageLatch::Read(guard) => deserialize_node(guard)?,
                PageLatch::Write(guard) => deserialize_node(guard)?,
            };

            if node.is_safe(ctx.mode) {
                ctx.release_ancestors(&self.buffer_pool)?;
            }
            ctx.push_page(next, latch);

            if node.is_leaf() {
                return Ok(next);
            }
            next = match key {
                Some(key) => node.child_at(node.child_index_for(key)),
                None => node.child_at(0),
            };
        }
    }

    /// Decode the node from a page latched earlier on this descent
    pub(crate) fn node_in_ctx(
        &self,
        page_id: PageId,
        ctx: &OpContext,
    ) -> Result<BTreeNode<K>, BTreeError> {
        let page = ctx
            .page_ref(page_id)
            .expect("page must be latched on this descent");
        deserialize_node(page)
    }

    /// Write the node back through its write latch
    pub(crate) fn write_node_in_ctx(
        &self,
        node: &BTreeNode<K>,
        ctx: &mut OpContext,
    ) -> Result<(), BTreeError> {
        let page = ctx
            .page_mut(node.page_id)
            .expect("page must be write-latched on this descent");
        serialize_node(node, page)
    }

    /// Repoint a node's parent. Goes through the context when the page is
    /// already latched by this operation, otherwise latches it briefly.
    pub(crate) fn set_parent(
        &self,
        page_id: PageId,
        parent_page_id: PageId,
        ctx: &mut OpContext,
    ) -> Result<(), BTreeError> {
        if let Some(page) = ctx.page_mut(page_id) {
            write_parent_id(&mut page.data, parent_page_id);
            return Ok(());
        }

        let page = self.buffer_pool.fetch_page(page_id)?;
        {
            let mut guard = page.write();
            write_parent_id(&mut guard.data, parent_page_id);
        }
        self.buffer_pool.unpin_page(page_id, true)?;
        Ok(())
    }
}
