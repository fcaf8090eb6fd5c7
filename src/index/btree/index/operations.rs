use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::index::btree::context::{AccessMode, OpContext, RootLatch};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::serialize_node;
use super::base::BTreeIndex;

impl<K> BTreeIndex<K>
where
    K: Clone + Ord + serde::Serialize + for<'de> serde::Deserialize<'de> + Send + Sync + 'static,
{
    /// Insert a key/value pair. Keys are unique: inserting an existing key
    /// leaves the tree untouched and returns `false`.
    pub fn insert(&self, key: K, value: Rid) -> Result<bool, BTreeError> {
        let mut ctx = OpContext::new(AccessMode::Insert);
        let vlatch = self.virtual_root.write_arc();
        if self.root_page_id() == INVALID_PAGE_ID {
            // Root pointer changes stay under the virtual root latch.
            self.start_new_tree(key, value)?;
            return Ok(true);
        }
        ctx.push_virtual_root(RootLatch::Write(vlatch));

        let leaf_id = self.find_leaf(Some(&key), &mut ctx)?;
        let mut node = self.node_in_ctx(leaf_id, &ctx)?;
        if !node.leaf_insert(key, value) {
            ctx.release_all(&self.buffer_pool)?;
            return Ok(false);
        }

        // Propagate splits toward the root. Every node that can split on
        // this path is write-latched in the context by the descent.
        loop {
            let overflow = if node.is_leaf() {
                node.size() >= node.max_size
            } else {
                node.size() > node.max_size
            };
            if !overflow {
                self.write_node_in_ctx(&node, &mut ctx)?;
                break;
            }

            let (mut right, promoted) = if node.is_leaf() {
                node.split_leaf()
            } else {
                node.split_internal()
            };

            let (right_id, right_page) = self.buffer_pool.new_page()?;
            right.page_id = right_id;
            if node.is_leaf() {
                node.next_page_id = right_id;
            } else {
                for i in 0..right.children.len() {
                    self.set_parent(right.children[i], right_id, &mut ctx)?;
                }
            }

            let parent_id = node.parent_page_id;
            if parent_id == INVALID_PAGE_ID {
                // The root split: grow the tree by one level.
                let (new_root_id, root_page) = self.buffer_pool.new_page()?;
                let mut root =
                    BTreeNode::new_internal(new_root_id, INVALID_PAGE_ID, self.internal_max_size);
                root.children.push(node.page_id);
                root.children.push(right_id);
                root.keys.push(promoted);

                node.parent_page_id = new_root_id;
                right.parent_page_id = new_root_id;

                {
                    let mut guard = right_page.write();
                    serialize_node(&right, &mut guard)?;
                }
                self.buffer_pool.unpin_page(right_id, true)?;
                self.write_node_in_ctx(&node, &mut ctx)?;
                {
                    let mut guard = root_page.write();
                    serialize_node(&root, &mut guard)?;
                }
                self.buffer_pool.unpin_page(new_root_id, true)?;

                self.set_root_page_id(new_root_id);
                break;
            }

            right.parent_page_id = parent_id;
            {
                let mut guard = right_page.write();
                serialize_node(&right, &mut guard)?;
            }
            self.buffer_pool.unpin_page(right_id, true)?;
            self.write_node_in_ctx(&node, &mut ctx)?;

            let mut parent = self.node_in_ctx(parent_id, &ctx)?;
            parent.internal_insert(promoted, right_id);
            node = parent;
        }

        ctx.release_all(&self.buffer_pool)?;
        Ok(true)
    }

    /// First insert into an empty tree: the root starts as a leaf
    fn start_new_tree(&self, key: K, value: Rid) -> Result<(), BTreeError> {
        let (root_id, root_page) = self.buffer_pool.new_page()?;
        let mut root: BTreeNode<K> =
            BTreeNode::new_leaf(root_id, INVALID_PAGE_ID, self.leaf_max_size);
        root.leaf_insert(key, value);
        {
            let mut guard = root_page.write();
            serialize_node(&root, &mut guard)?;
        }
        self.buffer_pool.unpin_page(root_id, true)?;
        self.set_root_page_id(root_id);
        Ok(())
    }
}
