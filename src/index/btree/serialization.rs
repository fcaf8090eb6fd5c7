use std::mem;

use byteorder::{ByteOrder, LittleEndian};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, NodeType};
use crate::storage::page::Page;

// Node header layout, little-endian:
// - page_type:      u8  (1 = leaf, 2 = internal)
// - current_size:   u16 (leaf: pairs, internal: children)
// - max_size:       u16
// - parent_page_id: i32
// - page_id:        i32
// - next_page_id:   i32 (leaf chain; invalid for internals)
pub(crate) const HEADER_SIZE: usize = 17;

const PAGE_TYPE_LEAF: u8 = 1;
const PAGE_TYPE_INTERNAL: u8 = 2;

const PARENT_OFFSET: usize = 5;

/// Conservative estimate of how many entries fit in a leaf page, used to
/// pick a default fan-out for fixed-size key types.
pub fn leaf_capacity<K>() -> usize {
    let key_size = mem::size_of::<K>() + 2;
    let value_size = mem::size_of::<Rid>();
    let capacity = (PAGE_SIZE - HEADER_SIZE) / (key_size + value_size);
    capacity.max(3)
}

/// Patch only the parent pointer in a serialized node, leaving the rest of
/// the page untouched. Used when children migrate between nodes.
pub(crate) fn write_parent_id(data: &mut [u8], parent_page_id: PageId) {
    LittleEndian::write_i32(&mut data[PARENT_OFFSET..PARENT_OFFSET + 4], parent_page_id);
}

/// Serialize a node into a page image
pub fn serialize_node<K>(node: &BTreeNode<K>, page: &mut Page) -> Result<(), BTreeError>
where
    K: Serialize + Clone + Ord,
{
    page.data.fill(0);

    page.data[0] = match node.node_type {
        NodeType::Leaf => PAGE_TYPE_LEAF,
        NodeType::Internal => PAGE_TYPE_INTERNAL,
    };
    LittleEndian::write_u16(&mut page.data[1..3], node.size() as u16);
    LittleEndian::write_u16(&mut page.data[3..5], node.max_size as u16);
    LittleEndian::write_i32(&mut page.data[5..9], node.parent_page_id);
    LittleEndian::write_i32(&mut page.data[9..13], node.page_id);
    let next = if node.is_leaf() {
        node.next_page_id
    } else {
        INVALID_PAGE_ID
    };
    LittleEndian::write_i32(&mut page.data[13..17], next);

    let mut offset = HEADER_SIZE;
    for key in &node.keys {
        let key_bytes = bincode::serialize(key)
            .map_err(|e| BTreeError::SerializationError(e.to_string()))?;
        if offset + 2 + key_bytes.len() > PAGE_SIZE {
            return Err(BTreeError::NodeTooLarge);
        }
        LittleEndian::write_u16(&mut page.data[offset..offset + 2], key_bytes.len() as u16);
        offset += 2;
        page.data[offset..offset + key_bytes.len()].copy_from_slice(&key_bytes);
        offset += key_bytes.len();
    }

    if node.is_leaf() {
        for value in &node.values {
            if offset + 8 > PAGE_SIZE {
                return Err(BTreeError::NodeTooLarge);
            }
            LittleEndian::write_i32(&mut page.data[offset..offset + 4], value.page_id);
            offset += 4;
            LittleEndian::write_u32(&mut page.data[offset..offset + 4], value.slot_num);
            offset += 4;
        }
    } else {
        for &child in &node.children {
            if offset + 4 > PAGE_SIZE {
                return Err(BTreeError::NodeTooLarge);
            }
            LittleEndian::write_i32(&mut page.data[offset..offset + 4], child);
            offset += 4;
        }
    }

    Ok(())
}

/// Deserialize the node stored in a page image
pub fn deserialize_node<K>(page: &Page) -> Result<BTreeNode<K>, BTreeError>
where
    K: DeserializeOwned + Clone + Ord,
{
    let node_type = match page.data[0] {
        PAGE_TYPE_LEAF => NodeType::Leaf,
        PAGE_TYPE_INTERNAL => NodeType::Internal,
        _ => return Err(BTreeError::InvalidPageFormat),
    };
    let size = LittleEndian::read_u16(&page.data[1..3]) as usize;
    let max_size = LittleEndian::read_u16(&page.data[3..5]) as usize;
    let parent_page_id = LittleEndian::read_i32(&page.data[5..9]);
    let page_id = LittleEndian::read_i32(&page.data[9..13]);
    let next_page_id = LittleEndian::read_i32(&page.data[13..17]);

    let key_count = match node_type {
        NodeType::Leaf => size,
        // The leftmost child has no separator of its own.
        NodeType::Internal => size.saturating_sub(1),
    };

    let mut keys = Vec::with_capacity(key_count);
    let mut offset = HEADER_SIZE;
    for _ in 0..key_count {
        if offset + 2 > PAGE_SIZE {
            return Err(BTreeError::DeserializationError(
                "key table past end of page".to_string(),
            ));
        }
        let len = LittleEndian::read_u16(&page.data[offset..offset + 2]) as usize;
        offset += 2;
        if offset + len > PAGE_SIZE {
            return Err(BTreeError::DeserializationError(
                "key bytes past end of page".to_string(),
            ));
        }
        let key = bincode::deserialize(&page.data[offset..offset + len])
            .map_err(|e| BTreeError::DeserializationError(e.to_string()))?;
        offset += len;
        keys.push(key);
    }

    let mut node = match node_type {
        NodeType::Leaf => {
            let mut values = Vec::with_capacity(size);
            for _ in 0..size {
                if offset + 8 > PAGE_SIZE {
                    return Err(BTreeError::DeserializationError(
                        "value table past end of page".to_string(),
                    ));
                }
                let rid_page = LittleEndian::read_i32(&page.data[offset..offset + 4]);
                offset += 4;
                let slot = LittleEndian::read_u32(&page.data[offset..offset + 4]);
                offset += 4;
                values.push(Rid::new(rid_page, slot));
            }
            let mut node = BTreeNode::new_leaf(page_id, parent_page_id, max_size);
            node.values = values;
            node
        }
        NodeType::Internal => {
            let mut children = Vec::with_capacity(size);
            for _ in 0..size {
                if offset + 4 > PAGE_SIZE {
                    return Err(BTreeError::DeserializationError(
                        "child table past end of page".to_string(),
                    ));
                }
                children.push(LittleEndian::read_i32(&page.data[offset..offset + 4]));
                offset += 4;
            }
            let mut node = BTreeNode::new_internal(page_id, parent_page_id, max_size);
            node.children = children;
            node
        }
    };

    node.keys = keys;
    node.next_page_id = next_page_id;
    Ok(node)
}
