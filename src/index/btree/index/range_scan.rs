use std::sync::Arc;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::context::{AccessMode, OpContext, RootLatch};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::deserialize_node;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::PageReadGuard;
use super::base::BTreeIndex;

impl<K> BTreeIndex<K>
where
    K: Clone + Ord + serde::Serialize + for<'de> serde::Deserialize<'de> + Send + Sync + 'static,
{
    /// Forward iterator over all pairs, starting at the leftmost leaf
    pub fn iter(&self) -> Result<BTreeLeafIterator<K>, BTreeError> {
        self.make_iterator(None)
    }

    /// Forward iterator starting at the first key at or after `key`
    pub fn iter_from(&self, key: &K) -> Result<BTreeLeafIterator<K>, BTreeError> {
        self.make_iterator(Some(key))
    }

    fn make_iterator(&self, key: Option<&K>) -> Result<BTreeLeafIterator<K>, BTreeError> {
        let mut ctx = OpContext::new(AccessMode::Read);
        let vlatch = self.virtual_root.read_arc();
        if self.root_page_id() == INVALID_PAGE_ID {
            return Ok(BTreeLeafIterator {
                buffer_pool: self.buffer_pool.clone(),
                current: None,
            });
        }
        ctx.push_virtual_root(RootLatch::Read(vlatch));

        self.find_leaf(key, &mut ctx)?;
        let Some((page_id, guard)) = ctx.take_leaf(&self.buffer_pool)? else {
            return Ok(BTreeLeafIterator {
                buffer_pool: self.buffer_pool.clone(),
                current: None,
            });
        };

        let node: BTreeNode<K> = deserialize_node(&guard)?;
        let index = match key {
            Some(key) => node.keys.partition_point(|k| k < key),
            None => 0,
        };

        Ok(BTreeLeafIterator {
            buffer_pool: self.buffer_pool.clone(),
            current: Some(LeafPosition {
                page_id,
                _guard: guard,
                node,
                index,
            }),
        })
    }
}

struct LeafPosition<K> {
    page_id: PageId,
    /// Keeps the leaf read-latched while the iterator sits on it
    _guard: PageReadGuard,
    node: BTreeNode<K>,
    index: usize,
}

/// Forward scan along the leaf chain.
///
/// Holds one leaf read latch (and pin) at a time; crossing a leaf boundary
/// unpins the current leaf before latching its successor, so concurrent
/// structural changes may be partially observed. Buffer pool failures while
/// walking the chain are treated as fatal.
pub struct BTreeLeafIterator<K> {
    buffer_pool: Arc<BufferPoolManager>,
    current: Option<LeafPosition<K>>,
}

impl<K> Iterator for BTreeLeafIterator<K>
where
    K: Clone + Ord + serde::Serialize + for<'de> serde::Deserialize<'de> + Send + Sync + 'static,
{
    type Item = (K, Rid);

    fn next(&mut self) -> Option<(K, Rid)> {
        loop {
            let position = self.current.as_mut()?;
            if position.index < position.node.size() {
                let item = (
                    position.node.keys[position.index].clone(),
                    position.node.values[position.index],
                );
                position.index += 1;
                return Some(item);
            }

            let next_id = position.node.next_page_id;
            let done = self.current.take().expect("position checked above");
            let old_id = done.page_id;
            drop(done);
            self.buffer_pool
                .unpin_page(old_id, false)
                .expect("unpin iterated leaf");

            if next_id == INVALID_PAGE_ID {
                return None;
            }

            let page = self
                .buffer_pool
                .fetch_page(next_id)
                .expect("fetch next leaf in chain");
            let guard = page.read_arc();
            let node: BTreeNode<K> = deserialize_node(&guard).expect("decode leaf in chain");
            self.current = Some(LeafPosition {
                page_id: next_id,
                _guard: guard,
                node,
                index: 0,
            });
        }
    }
}

impl<K> Drop for BTreeLeafIterator<K> {
    fn drop(&mut self) {
        if let Some(position) = self.current.take() {
            let page_id = position.page_id;
            drop(position);
            let _ = self.buffer_pool.unpin_page(page_id, false);
        }
    }
}
