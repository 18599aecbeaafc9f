use std::cmp::Ordering;

use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Lsn, Page, PageId, INVALID_LSN, INVALID_PAGE_ID, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::{IndexKey, IndexValue, KeyComparator};

/// Common node header: page_type, size, max_size, page_id, parent_page_id,
/// lsn, as six LE u32 fields
pub const NODE_HEADER_SIZE: usize = 24;
/// Leaf pages additionally store next_page_id directly after the header
pub const LEAF_HEADER_SIZE: usize = NODE_HEADER_SIZE + 4;

const TYPE_OFFSET: usize = 0;
const SIZE_OFFSET: usize = 4;
const MAX_SIZE_OFFSET: usize = 8;
const PAGE_ID_OFFSET: usize = 12;
const PARENT_OFFSET: usize = 16;
const LSN_OFFSET: usize = 20;
const NEXT_PAGE_OFFSET: usize = 24;

const LEAF_PAGE_TYPE: u32 = 1;
const INTERNAL_PAGE_TYPE: u32 = 2;

/// Default leaf fan-out for the given key and value widths
pub fn leaf_capacity<K: IndexKey, V: IndexValue>() -> u32 {
    ((PAGE_SIZE - LEAF_HEADER_SIZE) / (K::ENCODED_LEN + V::ENCODED_LEN)) as u32
}

/// Default internal fan-out for the given key width; values are child page ids
pub fn internal_capacity<K: IndexKey>() -> u32 {
    ((PAGE_SIZE - NODE_HEADER_SIZE) / (K::ENCODED_LEN + 4)) as u32
}

/// Leaf node: sorted keys with their values and a forward link to the next
/// leaf. Size counts key/value pairs.
#[derive(Debug, Clone)]
pub struct LeafNode<K, V> {
    pub page_id: PageId,
    pub parent_page_id: PageId,
    pub max_size: u32,
    pub lsn: Lsn,
    pub next_page_id: PageId,
    pub keys: Vec<K>,
    pub values: Vec<V>,
}

/// Internal node: `children.len()` child pointers separated by
/// `children.len() - 1` keys; `keys[i]` is the smallest key reachable under
/// `children[i + 1]`. On disk the node is a pair array whose slot 0 carries
/// only a child pointer; its key bytes are an all-zeroes sentinel. Size
/// counts child pointers.
#[derive(Debug, Clone)]
pub struct InternalNode<K> {
    pub page_id: PageId,
    pub parent_page_id: PageId,
    pub max_size: u32,
    pub lsn: Lsn,
    pub keys: Vec<K>,
    pub children: Vec<PageId>,
}

/// A decoded B+ tree node
#[derive(Debug, Clone)]
pub enum BTreeNode<K, V> {
    Leaf(LeafNode<K, V>),
    Internal(InternalNode<K>),
}

impl<K: IndexKey, V: IndexValue> LeafNode<K, V> {
    pub fn new(page_id: PageId, parent_page_id: PageId, max_size: u32) -> Self {
        Self {
            page_id,
            parent_page_id,
            max_size,
            lsn: INVALID_LSN,
            next_page_id: INVALID_PAGE_ID,
            keys: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.keys.len()
    }

    pub fn min_size(&self) -> usize {
        (self.max_size / 2) as usize
    }

    /// First index whose key is >= the probe, or `size()` when every key is
    /// smaller. Used to position iterators.
    pub fn key_index<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> usize {
        self.keys
            .partition_point(|k| comparator.compare(k, key) == Ordering::Less)
    }

    pub fn lookup<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> Option<V> {
        let index = self.key_index(key, comparator);
        if index < self.keys.len() && comparator.compare(&self.keys[index], key) == Ordering::Equal
        {
            Some(self.values[index].clone())
        } else {
            None
        }
    }

    /// Insert in sorted position; returns false on a duplicate key
    pub fn insert<C: KeyComparator<K>>(&mut self, key: K, value: V, comparator: &C) -> bool {
        let index = self.key_index(&key, comparator);
        if index < self.keys.len() && comparator.compare(&self.keys[index], &key) == Ordering::Equal
        {
            return false;
        }
        self.keys.insert(index, key);
        self.values.insert(index, value);
        true
    }

    /// Remove the entry for the key if present
    pub fn remove<C: KeyComparator<K>>(&mut self, key: &K, comparator: &C) -> bool {
        let index = self.key_index(key, comparator);
        if index < self.keys.len() && comparator.compare(&self.keys[index], key) == Ordering::Equal
        {
            self.keys.remove(index);
            self.values.remove(index);
            true
        } else {
            false
        }
    }

    /// Move the upper half of the entries out, for a split
    pub fn split_upper_half(&mut self) -> (Vec<K>, Vec<V>) {
        let mid = self.keys.len() / 2;
        (self.keys.split_off(mid), self.values.split_off(mid))
    }

    pub fn store(&self, page: &mut Page) -> Result<(), BTreeError> {
        let entry_len = K::ENCODED_LEN + V::ENCODED_LEN;
        if LEAF_HEADER_SIZE + self.keys.len() * entry_len > PAGE_SIZE {
            return Err(BTreeError::Corruption(format!(
                "leaf page {} overflows its frame with {} entries",
                self.page_id,
                self.keys.len()
            )));
        }

        page.data.fill(0);
        write_header(
            page,
            LEAF_PAGE_TYPE,
            self.keys.len() as u32,
            self.max_size,
            self.page_id,
            self.parent_page_id,
            self.lsn,
        );
        LittleEndian::write_u32(
            &mut page.data[NEXT_PAGE_OFFSET..NEXT_PAGE_OFFSET + 4],
            self.next_page_id,
        );

        let mut offset = LEAF_HEADER_SIZE;
        for (key, value) in self.keys.iter().zip(self.values.iter()) {
            key.encode(&mut page.data[offset..offset + K::ENCODED_LEN]);
            value.encode(&mut page.data[offset + K::ENCODED_LEN..offset + entry_len]);
            offset += entry_len;
        }
        Ok(())
    }
}

impl<K: IndexKey> InternalNode<K> {
    pub fn new(page_id: PageId, parent_page_id: PageId, max_size: u32) -> Self {
        Self {
            page_id,
            parent_page_id,
            max_size,
            lsn: INVALID_LSN,
            keys: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.children.len()
    }

    pub fn min_size(&self) -> usize {
        (self.max_size / 2) as usize
    }

    /// Child pointer to follow for the probe key: the subtree under
    /// `children[i]` holds keys >= `keys[i - 1]` and < `keys[i]`
    pub fn child_lookup<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> PageId {
        let index = self
            .keys
            .partition_point(|separator| comparator.compare(separator, key) != Ordering::Greater);
        self.children[index]
    }

    /// Index of the given child pointer within this node
    pub fn child_index(&self, page_id: PageId) -> Option<usize> {
        self.children.iter().position(|&child| child == page_id)
    }

    /// Insert `new_key`/`new_child` immediately after the entry whose child
    /// pointer is `old_child`; returns false when `old_child` is absent
    pub fn insert_child_after(&mut self, old_child: PageId, new_key: K, new_child: PageId) -> bool {
        match self.child_index(old_child) {
            Some(index) => {
                self.keys.insert(index, new_key);
                self.children.insert(index + 1, new_child);
                true
            }
            None => false,
        }
    }

    /// Split for an overflowing node: keeps the lower half here and returns
    /// (separator to push up, upper-half keys, upper-half children)
    pub fn split_upper_half(&mut self) -> (K, Vec<K>, Vec<PageId>) {
        let mid = self.children.len() / 2;
        let upper_children = self.children.split_off(mid);
        let mut upper_keys = self.keys.split_off(mid - 1);
        let separator = upper_keys.remove(0);
        (separator, upper_keys, upper_children)
    }

    /// Remove the child at `index` together with its separator key (the key
    /// at `index - 1`; removing child 0 consumes the key at 0)
    pub fn remove_child(&mut self, index: usize) {
        self.children.remove(index);
        if index == 0 {
            self.keys.remove(0);
        } else {
            self.keys.remove(index - 1);
        }
    }

    pub fn store(&self, page: &mut Page) -> Result<(), BTreeError> {
        let entry_len = K::ENCODED_LEN + 4;
        if NODE_HEADER_SIZE + self.children.len() * entry_len > PAGE_SIZE {
            return Err(BTreeError::Corruption(format!(
                "internal page {} overflows its frame with {} children",
                self.page_id,
                self.children.len()
            )));
        }
        if !self.children.is_empty() && self.keys.len() + 1 != self.children.len() {
            return Err(BTreeError::Corruption(format!(
                "internal page {} has {} keys for {} children",
                self.page_id,
                self.keys.len(),
                self.children.len()
            )));
        }

        page.data.fill(0);
        write_header(
            page,
            INTERNAL_PAGE_TYPE,
            self.children.len() as u32,
            self.max_size,
            self.page_id,
            self.parent_page_id,
            self.lsn,
        );

        let mut offset = NODE_HEADER_SIZE;
        for (index, child) in self.children.iter().enumerate() {
            // Slot 0's key bytes stay zeroed: the sentinel for "no key"
            if index > 0 {
                self.keys[index - 1].encode(&mut page.data[offset..offset + K::ENCODED_LEN]);
            }
            LittleEndian::write_u32(
                &mut page.data[offset + K::ENCODED_LEN..offset + entry_len],
                *child,
            );
            offset += entry_len;
        }
        Ok(())
    }
}

impl<K: IndexKey, V: IndexValue> BTreeNode<K, V> {
    pub fn load(page: &Page) -> Result<Self, BTreeError> {
        let page_type = LittleEndian::read_u32(&page.data[TYPE_OFFSET..TYPE_OFFSET + 4]);
        let size = LittleEndian::read_u32(&page.data[SIZE_OFFSET..SIZE_OFFSET + 4]) as usize;
        let max_size = LittleEndian::read_u32(&page.data[MAX_SIZE_OFFSET..MAX_SIZE_OFFSET + 4]);
        let page_id = LittleEndian::read_u32(&page.data[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 4]);
        let parent_page_id = LittleEndian::read_u32(&page.data[PARENT_OFFSET..PARENT_OFFSET + 4]);
        let lsn = LittleEndian::read_u32(&page.data[LSN_OFFSET..LSN_OFFSET + 4]);

        match page_type {
            LEAF_PAGE_TYPE => {
                let entry_len = K::ENCODED_LEN + V::ENCODED_LEN;
                if LEAF_HEADER_SIZE + size * entry_len > PAGE_SIZE {
                    return Err(BTreeError::Corruption(format!(
                        "leaf page {} claims {} entries",
                        page.page_id, size
                    )));
                }
                let next_page_id =
                    LittleEndian::read_u32(&page.data[NEXT_PAGE_OFFSET..NEXT_PAGE_OFFSET + 4]);

                let mut keys = Vec::with_capacity(size);
                let mut values = Vec::with_capacity(size);
                let mut offset = LEAF_HEADER_SIZE;
                for _ in 0..size {
                    keys.push(K::decode(&page.data[offset..offset + K::ENCODED_LEN]));
                    values.push(V::decode(
                        &page.data[offset + K::ENCODED_LEN..offset + entry_len],
                    ));
                    offset += entry_len;
                }

                Ok(BTreeNode::Leaf(LeafNode {
                    page_id,
                    parent_page_id,
                    max_size,
                    lsn,
                    next_page_id,
                    keys,
                    values,
                }))
            }
            INTERNAL_PAGE_TYPE => {
                let entry_len = K::ENCODED_LEN + 4;
                if NODE_HEADER_SIZE + size * entry_len > PAGE_SIZE {
                    return Err(BTreeError::Corruption(format!(
                        "internal page {} claims {} children",
                        page.page_id, size
                    )));
                }

                let mut keys = Vec::with_capacity(size.saturating_sub(1));
                let mut children = Vec::with_capacity(size);
                let mut offset = NODE_HEADER_SIZE;
                for index in 0..size {
                    if index > 0 {
                        keys.push(K::decode(&page.data[offset..offset + K::ENCODED_LEN]));
                    }
                    children.push(LittleEndian::read_u32(
                        &page.data[offset + K::ENCODED_LEN..offset + entry_len],
                    ));
                    offset += entry_len;
                }

                Ok(BTreeNode::Internal(InternalNode {
                    page_id,
                    parent_page_id,
                    max_size,
                    lsn,
                    keys,
                    children,
                }))
            }
            other => Err(BTreeError::Corruption(format!(
                "page {} has unknown index page type {}",
                page.page_id, other
            ))),
        }
    }

    pub fn store(&self, page: &mut Page) -> Result<(), BTreeError> {
        match self {
            BTreeNode::Leaf(leaf) => leaf.store(page),
            BTreeNode::Internal(internal) => internal.store(page),
        }
    }

    pub fn page_id(&self) -> PageId {
        match self {
            BTreeNode::Leaf(leaf) => leaf.page_id,
            BTreeNode::Internal(internal) => internal.page_id,
        }
    }

    pub fn parent_page_id(&self) -> PageId {
        match self {
            BTreeNode::Leaf(leaf) => leaf.parent_page_id,
            BTreeNode::Internal(internal) => internal.parent_page_id,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            BTreeNode::Leaf(leaf) => leaf.size(),
            BTreeNode::Internal(internal) => internal.size(),
        }
    }

    pub fn max_size(&self) -> u32 {
        match self {
            BTreeNode::Leaf(leaf) => leaf.max_size,
            BTreeNode::Internal(internal) => internal.max_size,
        }
    }

    pub fn min_size(&self) -> usize {
        match self {
            BTreeNode::Leaf(leaf) => leaf.min_size(),
            BTreeNode::Internal(internal) => internal.min_size(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, BTreeNode::Leaf(_))
    }
}

fn write_header(
    page: &mut Page,
    page_type: u32,
    size: u32,
    max_size: u32,
    page_id: PageId,
    parent_page_id: PageId,
    lsn: Lsn,
) {
    LittleEndian::write_u32(&mut page.data[TYPE_OFFSET..TYPE_OFFSET + 4], page_type);
    LittleEndian::write_u32(&mut page.data[SIZE_OFFSET..SIZE_OFFSET + 4], size);
    LittleEndian::write_u32(&mut page.data[MAX_SIZE_OFFSET..MAX_SIZE_OFFSET + 4], max_size);
    LittleEndian::write_u32(&mut page.data[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 4], page_id);
    LittleEndian::write_u32(&mut page.data[PARENT_OFFSET..PARENT_OFFSET + 4], parent_page_id);
    LittleEndian::write_u32(&mut page.data[LSN_OFFSET..LSN_OFFSET + 4], lsn);
}

/// Patch only the parent pointer of a serialized node, leaving the rest of
/// the page untouched. Used when splits and merges re-home children.
pub fn write_parent_page_id(page: &mut Page, parent_page_id: PageId) {
    LittleEndian::write_u32(&mut page.data[PARENT_OFFSET..PARENT_OFFSET + 4], parent_page_id);
}
