use crate::common::types::INVALID_PAGE_ID;
use crate::index::btree::context::{AccessMode, OpContext, PageLatch, RootLatch};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::BTreeNode;
use super::base::BTreeIndex;

impl<K> BTreeIndex<K>
where
    K: Clone + Ord + serde::Serialize + for<'de> serde::Deserialize<'de> + Send + Sync + 'static,
{
    /// Remove a key. Removing a key that is not present is a no-op.
    pub fn remove(&self, key: &K) -> Result<(), BTreeError> {
        let mut ctx = OpContext::new(AccessMode::Remove);
        let vlatch = self.virtual_root.write_arc();
        if self.root_page_id() == INVALID_PAGE_ID {
            return Ok(());
        }
        ctx.push_virtual_root(RootLatch::Write(vlatch));

        let leaf_id = self.find_leaf(Some(key), &mut ctx)?;
        let node = self.node_in_ctx(leaf_id, &ctx)?;
        if !node.contains_key(key) {
            ctx.release_all(&self.buffer_pool)?;
            return Ok(());
        }

        self.delete_entry(node, key.clone(), &mut ctx)?;
        ctx.release_all(&self.buffer_pool)?;
        Ok(())
    }

    /// Remove `key` from `node` and repair any underflow, recursing into the
    /// parent when a merge consumes a separator. Every page this touches is
    /// write-latched in the context: the descent retained unsafe ancestors,
    /// and siblings are latched here before use.
    fn delete_entry(
        &self,
        mut node: BTreeNode<K>,
        key: K,
        ctx: &mut OpContext,
    ) -> Result<(), BTreeError> {
        if node.is_leaf() {
            node.leaf_remove(&key);
        } else {
            node.internal_remove(&key);
        }

        if node.is_root() {
            if !node.is_leaf() && node.size() == 1 {
                // Collapse: an internal root with a single child hands the
                // root role down one level.
                let only_child = node.child_at(0);
                self.set_parent(only_child, INVALID_PAGE_ID, ctx)?;
                ctx.mark_deleted(node.page_id);
                self.set_root_page_id(only_child);
                return Ok(());
            }
            if node.is_leaf() && node.size() == 0 {
                ctx.mark_deleted(node.page_id);
                self.set_root_page_id(INVALID_PAGE_ID);
                return Ok(());
            }
            self.write_node_in_ctx(&node, ctx)?;
            return Ok(());
        }

        if node.size() >= node.min_size() {
            self.write_node_in_ctx(&node, ctx)?;
            return Ok(());
        }

        // Underflow: prefer the sibling immediately after, fall back to the
        // one before; merge when both fit in one page, otherwise borrow.
        let parent_id = node.parent_page_id;
        let mut parent = self.node_in_ctx(parent_id, ctx)?;
        let child_pos = parent
            .children
            .iter()
            .position(|&child| child == node.page_id)
            .expect("underflowed node missing from its parent");

        let (sibling_before, sibling_pos, separator_pos) = if child_pos + 1 < parent.size() {
            (false, child_pos + 1, child_pos)
        } else {
            (true, child_pos - 1, child_pos - 1)
        };
        let separator = parent.keys[separator_pos].clone();
        let sibling_id = parent.child_at(sibling_pos);

        let sibling_page = self.buffer_pool.fetch_page(sibling_id)?;
        ctx.push_page(sibling_id, PageLatch::Write(sibling_page.write_arc()));
        let mut sibling = self.node_in_ctx(sibling_id, ctx)?;

        if node.size() + sibling.size() <= node.max_size {
            // Merge into the front page; the back page leaves the tree.
            let (mut front, back) = if sibling_before {
                (sibling, node)
            } else {
                (node, sibling)
            };
            ctx.mark_deleted(back.page_id);

            if front.is_leaf() {
                front.next_page_id = back.next_page_id;
                front.keys.extend(back.keys);
                front.values.extend(back.values);
            } else {
                // The parent separator becomes the key between the two halves.
                front.keys.push(separator.clone());
                front.keys.extend(back.keys);
                for i in 0..back.children.len() {
                    self.set_parent(back.children[i], front.page_id, ctx)?;
                }
                front.children.extend(back.children);
            }
            self.write_node_in_ctx(&front, ctx)?;

            return self.delete_entry(parent, separator, ctx);
        }

        if sibling_before {
            // Take the front sibling's last pair.
            if node.is_leaf() {
                let moved_key = sibling.keys.pop().expect("borrow from empty sibling");
                let moved_value = sibling.values.pop().expect("borrow from empty sibling");
                parent.keys[separator_pos] = moved_key.clone();
                node.keys.insert(0, moved_key);
                node.values.insert(0, moved_value);
            } else {
                let moved_key = sibling.keys.pop().expect("borrow from empty sibling");
                let moved_child = sibling.children.pop().expect("borrow from empty sibling");
                node.keys.insert(0, separator);
                node.children.insert(0, moved_child);
                parent.keys[separator_pos] = moved_key;
                self.set_parent(moved_child, node.page_id, ctx)?;
            }
        } else {
            // Take the rear sibling's first pair.
            if node.is_leaf() {
                let moved_key = sibling.keys.remove(0);
                let moved_value = sibling.values.remove(0);
                node.keys.push(moved_key);
                node.values.push(moved_value);
                parent.keys[separator_pos] = sibling.keys[0].clone();
            } else {
                let moved_key = sibling.keys.remove(0);
                let moved_child = sibling.children.remove(0);
                node.keys.push(separator);
                node.children.push(moved_child);
                parent.keys[separator_pos] = moved_key;
                self.set_parent(moved_child, node.page_id, ctx)?;
            }
        }

        self.write_node_in_ctx(&node, ctx)?;
        self.write_node_in_ctx(&sibling, ctx)?;
        self.write_node_in_ctx(&parent, ctx)?;
        Ok(())
    }
}
