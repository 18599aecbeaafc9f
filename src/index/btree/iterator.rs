use std::sync::Arc;

use crate::common::types::INVALID_PAGE_ID;
use crate::index::btree::key::{IndexKey, IndexValue};
use crate::index::btree::node::{BTreeNode, LeafNode};
use crate::storage::buffer::BufferPoolManager;

/// Forward iterator over the leaf chain of a B+ tree.
///
/// Holds a pin (but no latch) on the leaf it is positioned in; the pin
/// moves with the iterator from leaf to leaf and is dropped when the
/// iterator is, including when it was fully consumed.
pub struct BPlusTreeIterator<K, V>
where
    K: IndexKey,
    V: IndexValue,
{
    buffer_pool: Arc<BufferPoolManager>,
    /// Current leaf snapshot; its page stays pinned while this is Some
    node: Option<LeafNode<K, V>>,
    position: usize,
}

impl<K, V> BPlusTreeIterator<K, V>
where
    K: IndexKey,
    V: IndexValue,
{
    pub(crate) fn new(
        buffer_pool: Arc<BufferPoolManager>,
        node: LeafNode<K, V>,
        position: usize,
    ) -> Self {
        Self {
            buffer_pool,
            node: Some(node),
            position,
        }
    }

    pub(crate) fn empty(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            node: None,
            position: 0,
        }
    }

    /// True when no further entries remain
    pub fn is_end(&self) -> bool {
        match &self.node {
            None => true,
            Some(leaf) => self.position >= leaf.size() && leaf.next_page_id == INVALID_PAGE_ID,
        }
    }

    /// Drop the pin on the current leaf and move to the given next page;
    /// clears the position. Returns false when the chain is exhausted or
    /// the next leaf cannot be read.
    fn advance_leaf(&mut self) -> bool {
        let leaf = match self.node.take() {
            Some(leaf) => leaf,
            None => return false,
        };
        let next_page_id = leaf.next_page_id;
        let _ = self.buffer_pool.unpin_page(leaf.page_id, false);

        if next_page_id == INVALID_PAGE_ID {
            return false;
        }

        let page = match self.buffer_pool.fetch_page(next_page_id) {
            Ok(page) => page,
            Err(_) => return false,
        };
        let loaded = {
            let guard = page.read();
            BTreeNode::<K, V>::load(&guard)
        };
        match loaded {
            Ok(BTreeNode::Leaf(next)) => {
                self.node = Some(next);
                self.position = 0;
                true
            }
            _ => {
                let _ = self.buffer_pool.unpin_page(next_page_id, false);
                false
            }
        }
    }
}

impl<K, V> Iterator for BPlusTreeIterator<K, V>
where
    K: IndexKey,
    V: IndexValue,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let leaf = self.node.as_ref()?;
            if self.position < leaf.size() {
                let item = (
                    leaf.keys[self.position].clone(),
                    leaf.values[self.position].clone(),
                );
                self.position += 1;
                return Some(item);
            }
            if !self.advance_leaf() {
                return None;
            }
        }
    }
}

impl<K, V> Drop for BPlusTreeIterator<K, V>
where
    K: IndexKey,
    V: IndexValue,
{
    fn drop(&mut self) {
        if let Some(leaf) = self.node.take() {
            let _ = self.buffer_pool.unpin_page(leaf.page_id, false);
        }
    }
}
