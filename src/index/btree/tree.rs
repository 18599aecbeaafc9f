use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use crate::common::types::{Page, PageId, PagePtr, HEADER_PAGE_ID, INVALID_PAGE_ID, INVALID_TXN_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::iterator::BPlusTreeIterator;
use crate::index::btree::key::{IndexKey, IndexValue, KeyComparator, OrdComparator};
use crate::index::btree::node::{
    self, internal_capacity, leaf_capacity, BTreeNode, InternalNode, LeafNode,
};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::{HeaderPage, LatchMode, PageLatch};
use crate::transaction::transaction::Transaction;

type Result<T> = std::result::Result<T, BTreeError>;

/// Kind of tree operation, deciding latch modes and crabbing safety
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TreeOp {
    Search,
    Insert,
    Remove,
}

impl TreeOp {
    fn latch_mode(self) -> LatchMode {
        match self {
            TreeOp::Search => LatchMode::Read,
            TreeOp::Insert | TreeOp::Remove => LatchMode::Write,
        }
    }
}

/// Unique-key B+ tree index over buffered pages.
///
/// Descent uses latch crabbing: each node is latched before its parent is
/// released, and ancestors stay latched (in the transaction's page set)
/// only while the current node could push a structure change up to them.
/// The root page id is re-validated after latching, since the root can move
/// between reading the pointer and acquiring the latch.
pub struct BPlusTree<K, V, C = OrdComparator>
where
    K: IndexKey,
    V: IndexValue,
    C: KeyComparator<K>,
{
    index_name: String,
    root_page_id: RwLock<PageId>,
    buffer_pool: Arc<BufferPoolManager>,
    comparator: C,
    leaf_max_size: u32,
    internal_max_size: u32,
    _marker: std::marker::PhantomData<fn(K) -> V>,
}

impl<K, V, C> BPlusTree<K, V, C>
where
    K: IndexKey,
    V: IndexValue,
    C: KeyComparator<K>,
{
    /// Open (or prepare to create) the named index. An existing root is
    /// looked up in the header page; otherwise the tree starts empty and
    /// the first insert allocates the root.
    pub fn new(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        comparator: C,
    ) -> Result<Self> {
        Self::with_max_sizes(
            index_name,
            buffer_pool,
            comparator,
            leaf_capacity::<K, V>(),
            internal_capacity::<K>(),
        )
    }

    /// As `new`, with explicit fan-outs. Small fan-outs force deep trees in
    /// tests. Internal fan-outs below 4 would admit single-child internal
    /// nodes, which the delete path does not support.
    pub fn with_max_sizes(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self> {
        assert!(leaf_max_size >= 2, "leaf fan-out must be at least 2");
        assert!(internal_max_size >= 4, "internal fan-out must be at least 4");
        let index_name = index_name.into();

        let header = buffer_pool
            .fetch_page(HEADER_PAGE_ID)
            .map_err(BTreeError::from_buffer_pool)?;
        let root = {
            let guard = header.read();
            HeaderPage::get_root_id(&guard, &index_name).unwrap_or(INVALID_PAGE_ID)
        };
        buffer_pool.unpin_page(HEADER_PAGE_ID, false)?;

        Ok(Self {
            index_name,
            root_page_id: RwLock::new(root),
            buffer_pool,
            comparator,
            leaf_max_size,
            internal_max_size,
            _marker: std::marker::PhantomData,
        })
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.read() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    /// Point lookup
    pub fn get_value(&self, key: &K, txn: &mut Transaction) -> Result<Option<V>> {
        self.guarded(txn, TreeOp::Search, |tree, txn| {
            if !tree.find_leaf_page(Some(key), TreeOp::Search, txn)? {
                return Ok(None);
            }
            let leaf = tree.load_leaf_from_back(txn)?;
            let result = leaf.lookup(key, &tree.comparator);
            tree.release_page_set(txn, TreeOp::Search, false)?;
            Ok(result)
        })
    }

    /// Insert a key/value pair; returns false when the key already exists
    pub fn insert(&self, key: K, value: V, txn: &mut Transaction) -> Result<bool> {
        self.guarded(txn, TreeOp::Insert, |tree, txn| {
            loop {
                if tree.is_empty() {
                    let mut root_guard = tree.root_page_id.write();
                    if *root_guard == INVALID_PAGE_ID {
                        tree.start_new_tree(&key, &value, &mut root_guard)?;
                        return Ok(true);
                    }
                    // Another thread planted the tree first; fall through
                }
                if tree.find_leaf_page(Some(&key), TreeOp::Insert, txn)? {
                    break;
                }
            }

            let mut leaf = tree.load_leaf_from_back(txn)?;
            if !leaf.insert(key.clone(), value.clone(), &tree.comparator) {
                tree.release_page_set(txn, TreeOp::Insert, false)?;
                return Ok(false);
            }

            if (leaf.size() as u32) < leaf.max_size {
                leaf.store(tree.page_set_page_mut(txn, leaf.page_id)?)?;
            } else {
                debug!("splitting leaf page {}", leaf.page_id);
                let (separator, new_leaf_id) = tree.split_leaf(&mut leaf, txn)?;
                leaf.store(tree.page_set_page_mut(txn, leaf.page_id)?)?;
                tree.insert_into_parent(
                    txn,
                    leaf.page_id,
                    leaf.parent_page_id,
                    separator,
                    new_leaf_id,
                )?;
            }

            tree.release_page_set(txn, TreeOp::Insert, true)?;
            Ok(true)
        })
    }

    /// Remove the entry for the key; absent keys are ignored
    pub fn remove(&self, key: &K, txn: &mut Transaction) -> Result<()> {
        self.guarded(txn, TreeOp::Remove, |tree, txn| {
            if !tree.find_leaf_page(Some(key), TreeOp::Remove, txn)? {
                return Ok(());
            }

            let mut leaf = tree.load_leaf_from_back(txn)?;
            if !leaf.remove(key, &tree.comparator) {
                tree.release_page_set(txn, TreeOp::Remove, false)?;
                return Ok(());
            }

            if leaf.parent_page_id == INVALID_PAGE_ID {
                tree.adjust_root(txn, BTreeNode::Leaf(leaf))?;
            } else if leaf.size() < leaf.min_size() {
                tree.coalesce_or_redistribute(txn, BTreeNode::Leaf(leaf))?;
            } else {
                leaf.store(tree.page_set_page_mut(txn, leaf.page_id)?)?;
            }

            tree.release_page_set(txn, TreeOp::Remove, true)?;
            Ok(())
        })
    }

    /// Forward iterator positioned at the first key
    pub fn iter(&self) -> Result<BPlusTreeIterator<K, V>> {
        self.begin_iterator(None)
    }

    /// Forward iterator positioned at the first key >= `key`
    pub fn iter_from(&self, key: &K) -> Result<BPlusTreeIterator<K, V>> {
        self.begin_iterator(Some(key))
    }

    /// Run an operation body, unwinding any latches and pins it left in the
    /// page set when it fails
    fn guarded<T>(
        &self,
        txn: &mut Transaction,
        op: TreeOp,
        body: impl FnOnce(&Self, &mut Transaction) -> Result<T>,
    ) -> Result<T> {
        match body(self, txn) {
            Ok(value) => Ok(value),
            Err(error) => {
                let _ = self.release_page_set(txn, op, false);
                Err(error)
            }
        }
    }

    fn begin_iterator(&self, key: Option<&K>) -> Result<BPlusTreeIterator<K, V>> {
        let mut txn = Transaction::new(INVALID_TXN_ID);
        let found = self.guarded(&mut txn, TreeOp::Search, |tree, txn| {
            tree.find_leaf_page(key, TreeOp::Search, txn)
        })?;
        if !found {
            return Ok(BPlusTreeIterator::empty(self.buffer_pool.clone()));
        }

        // Keep the pin on the leaf for the iterator; drop only the latch
        let latch = txn
            .page_set_mut()
            .pop_back()
            .expect("descent left no leaf latch");
        let page_id = latch.page_id();
        let loaded = BTreeNode::<K, V>::load(latch.page());
        drop(latch);

        let leaf = match loaded {
            Ok(BTreeNode::Leaf(leaf)) => leaf,
            Ok(BTreeNode::Internal(_)) => {
                let _ = self.buffer_pool.unpin_page(page_id, false);
                return Err(BTreeError::Corruption(
                    "descent ended on a non-leaf page".to_string(),
                ));
            }
            Err(e) => {
                let _ = self.buffer_pool.unpin_page(page_id, false);
                return Err(e);
            }
        };

        let position = match key {
            Some(key) => leaf.key_index(key, &self.comparator),
            None => 0,
        };
        Ok(BPlusTreeIterator::new(
            self.buffer_pool.clone(),
            leaf,
            position,
        ))
    }

    /// Latch-crabbing descent to the leaf responsible for `key` (or the
    /// leftmost leaf when `key` is None). On success the transaction's page
    /// set holds the leaf latch at its back, preceded by every ancestor
    /// that might still be touched by a structure change. Returns false
    /// when the tree is empty.
    fn find_leaf_page(&self, key: Option<&K>, op: TreeOp, txn: &mut Transaction) -> Result<bool> {
        let mode = op.latch_mode();

        // Latch the root, re-validating that it is still the root
        loop {
            let root_id = *self.root_page_id.read();
            if root_id == INVALID_PAGE_ID {
                return Ok(false);
            }
            let page = self
                .buffer_pool
                .fetch_page(root_id)
                .map_err(BTreeError::from_buffer_pool)?;
            let latch = PageLatch::acquire(&page, mode);
            if *self.root_page_id.read() != root_id {
                drop(latch);
                self.buffer_pool.unpin_page(root_id, false)?;
                continue;
            }
            txn.add_to_page_set(latch);
            break;
        }

        loop {
            let child_id = {
                let latch = txn.page_set().back().expect("page set emptied mid-descent");
                match BTreeNode::<K, V>::load(latch.page())? {
                    BTreeNode::Leaf(_) => return Ok(true),
                    BTreeNode::Internal(internal) => match key {
                        Some(key) => internal.child_lookup(key, &self.comparator),
                        None => internal.children[0],
                    },
                }
            };
            if child_id == INVALID_PAGE_ID {
                return Err(BTreeError::Corruption(
                    "internal node references the invalid page".to_string(),
                ));
            }

            let child_page = self
                .buffer_pool
                .fetch_page(child_id)
                .map_err(BTreeError::from_buffer_pool)?;
            txn.add_to_page_set(PageLatch::acquire(&child_page, mode));

            // A safe child confines any structure change below it, so every
            // ancestor latch can be dropped
            let child_safe = match op {
                TreeOp::Search => true,
                TreeOp::Insert | TreeOp::Remove => {
                    let latch = txn.page_set().back().expect("child latch just pushed");
                    let child = BTreeNode::<K, V>::load(latch.page())?;
                    match op {
                        TreeOp::Insert => (child.size() as u32) < child.max_size() - 1,
                        TreeOp::Remove => child.size() > child.min_size(),
                        TreeOp::Search => unreachable!(),
                    }
                }
            };
            if child_safe {
                self.release_ancestors(txn)?;
            }
        }
    }

    /// Unlatch and unpin everything above the most recently latched node
    fn release_ancestors(&self, txn: &mut Transaction) -> Result<()> {
        while txn.page_set().len() > 1 {
            let latch = txn.page_set_mut().pop_front().expect("checked non-empty");
            let page_id = latch.page_id();
            drop(latch);
            self.buffer_pool.unpin_page(page_id, false)?;
        }
        Ok(())
    }

    /// Unlatch and unpin every page in the transaction's page set, oldest
    /// (root-most) first, then drop the pages scheduled for deletion
    fn release_page_set(&self, txn: &mut Transaction, op: TreeOp, dirty: bool) -> Result<()> {
        while let Some(latch) = txn.page_set_mut().pop_front() {
            let page_id = latch.page_id();
            drop(latch);
            self.buffer_pool.unpin_page(page_id, dirty)?;
        }

        if op == TreeOp::Remove {
            let deleted: Vec<PageId> = txn.deleted_page_set_mut().drain().collect();
            for page_id in deleted {
                self.buffer_pool.delete_page(page_id)?;
            }
        }
        Ok(())
    }

    /// Plant a fresh root leaf holding the first entry. Caller holds the
    /// root pointer write lock.
    fn start_new_tree(&self, key: &K, value: &V, root_guard: &mut PageId) -> Result<()> {
        let (page, page_id) = self
            .buffer_pool
            .new_page()
            .map_err(BTreeError::from_buffer_pool)?;

        let mut leaf: LeafNode<K, V> = LeafNode::new(page_id, INVALID_PAGE_ID, self.leaf_max_size);
        leaf.insert(key.clone(), value.clone(), &self.comparator);
        {
            let mut guard = page.write();
            leaf.store(&mut guard)?;
        }
        self.buffer_pool.unpin_page(page_id, true)?;

        *root_guard = page_id;
        self.sync_root_record(page_id)?;
        debug!("started {} with root page {}", self.index_name, page_id);
        Ok(())
    }

    /// Split an overflowing leaf: the upper half moves to a fresh sibling
    /// linked after it. Returns the separator key (the sibling's first key)
    /// and the sibling's page id.
    fn split_leaf(&self, leaf: &mut LeafNode<K, V>, txn: &mut Transaction) -> Result<(K, PageId)> {
        let (new_page, new_page_id) = self.new_index_page(txn)?;

        let (upper_keys, upper_values) = leaf.split_upper_half();
        let separator = upper_keys[0].clone();

        let mut sibling: LeafNode<K, V> =
            LeafNode::new(new_page_id, leaf.parent_page_id, leaf.max_size);
        sibling.keys = upper_keys;
        sibling.values = upper_values;
        sibling.next_page_id = leaf.next_page_id;
        leaf.next_page_id = new_page_id;

        {
            let mut guard = new_page.write();
            sibling.store(&mut guard)?;
        }
        self.buffer_pool.unpin_page(new_page_id, true)?;
        Ok((separator, new_page_id))
    }

    /// Hook a freshly split-off sibling into the tree: either grow a new
    /// root above the old one, or insert the separator into the parent
    /// (splitting it recursively on overflow). The parent, when one exists,
    /// is write-latched in the page set because the child was unsafe.
    fn insert_into_parent(
        &self,
        txn: &mut Transaction,
        old_page_id: PageId,
        parent_page_id: PageId,
        separator: K,
        new_page_id: PageId,
    ) -> Result<()> {
        if parent_page_id == INVALID_PAGE_ID {
            let (root_page, root_id) = self.new_index_page(txn)?;

            let mut root: InternalNode<K> =
                InternalNode::new(root_id, INVALID_PAGE_ID, self.internal_max_size);
            root.keys = vec![separator];
            root.children = vec![old_page_id, new_page_id];
            {
                let mut guard = root_page.write();
                root.store(&mut guard)?;
            }
            self.buffer_pool.unpin_page(root_id, true)?;

            self.set_parent(txn, old_page_id, root_id)?;
            self.set_parent(txn, new_page_id, root_id)?;

            *self.root_page_id.write() = root_id;
            self.sync_root_record(root_id)?;
            debug!("grew {} to new root page {}", self.index_name, root_id);
            return Ok(());
        }

        let mut parent = self.load_internal_from_page_set(txn, parent_page_id)?;
        if !parent.insert_child_after(old_page_id, separator, new_page_id) {
            return Err(BTreeError::Corruption(format!(
                "page {} is not a child of its recorded parent {}",
                old_page_id, parent_page_id
            )));
        }

        if (parent.size() as u32) < parent.max_size {
            parent.store(self.page_set_page_mut(txn, parent_page_id)?)?;
            return Ok(());
        }

        // Parent overflows in turn
        debug!("splitting internal page {}", parent.page_id);
        let (push_up, upper_keys, upper_children) = parent.split_upper_half();
        let (new_page, sibling_id) = self.new_index_page(txn)?;

        let mut sibling: InternalNode<K> =
            InternalNode::new(sibling_id, parent.parent_page_id, parent.max_size);
        sibling.keys = upper_keys;
        sibling.children = upper_children;
        {
            let mut guard = new_page.write();
            sibling.store(&mut guard)?;
        }
        // Transferred children now live under the sibling
        for &child in &sibling.children {
            self.set_parent(txn, child, sibling_id)?;
        }
        self.buffer_pool.unpin_page(sibling_id, true)?;

        let grandparent_id = parent.parent_page_id;
        parent.store(self.page_set_page_mut(txn, parent_page_id)?)?;
        self.insert_into_parent(txn, parent_page_id, grandparent_id, push_up, sibling_id)
    }

    /// An underflowing non-root node either borrows one entry from a
    /// sibling or merges with it, consuming a separator in the parent;
    /// the parent is handled recursively when it underflows in turn.
    fn coalesce_or_redistribute(&self, txn: &mut Transaction, node: BTreeNode<K, V>) -> Result<()> {
        let parent_page_id = node.parent_page_id();
        let mut parent = self.load_internal_from_page_set(txn, parent_page_id)?;
        let index = parent.child_index(node.page_id()).ok_or_else(|| {
            BTreeError::Corruption(format!(
                "page {} missing from its recorded parent {}",
                node.page_id(),
                parent_page_id
            ))
        })?;

        // Left sibling when one exists, else the right sibling
        let sibling_id = if index > 0 {
            parent.children[index - 1]
        } else {
            parent.children[1]
        };
        let sibling_page = self
            .buffer_pool
            .fetch_page(sibling_id)
            .map_err(BTreeError::from_buffer_pool)?;
        let mut sibling_latch = PageLatch::write(&sibling_page);

        let outcome = (|| -> Result<bool> {
            let sibling = BTreeNode::<K, V>::load(sibling_latch.page())?;
            if sibling.size() + node.size() >= node.max_size() as usize {
                self.redistribute(txn, node, sibling, &mut parent, index, &mut sibling_latch)?;
                Ok(false)
            } else {
                self.coalesce(txn, node, sibling, &mut parent, index, &mut sibling_latch)?;
                Ok(true)
            }
        })();
        drop(sibling_latch);
        self.buffer_pool.unpin_page(sibling_id, true)?;
        let merged = outcome?;

        if !merged {
            parent.store(self.page_set_page_mut(txn, parent_page_id)?)?;
            return Ok(());
        }

        // The merge removed one of the parent's children
        if parent.parent_page_id == INVALID_PAGE_ID {
            if parent.size() == 1 {
                return self.adjust_root(txn, BTreeNode::Internal(parent));
            }
            parent.store(self.page_set_page_mut(txn, parent_page_id)?)?;
            return Ok(());
        }

        if parent.size() < parent.min_size() {
            parent.store(self.page_set_page_mut(txn, parent_page_id)?)?;
            return self.coalesce_or_redistribute(txn, BTreeNode::Internal(parent));
        }
        parent.store(self.page_set_page_mut(txn, parent_page_id)?)?;
        Ok(())
    }

    /// Move one entry from the sibling into the underflowing node. With a
    /// right sibling (index 0) its first entry moves to the node's end;
    /// with a left sibling its last entry moves to the node's front. The
    /// parent supplies the old separator and receives the new one.
    fn redistribute(
        &self,
        txn: &mut Transaction,
        node: BTreeNode<K, V>,
        sibling: BTreeNode<K, V>,
        parent: &mut InternalNode<K>,
        index: usize,
        sibling_latch: &mut PageLatch,
    ) -> Result<()> {
        match (node, sibling) {
            (BTreeNode::Leaf(mut node), BTreeNode::Leaf(mut sibling)) => {
                if index == 0 {
                    node.keys.push(sibling.keys.remove(0));
                    node.values.push(sibling.values.remove(0));
                    // Separator between node and its right sibling
                    parent.keys[0] = sibling.keys[0].clone();
                } else {
                    let key = sibling.keys.pop().expect("redistribute from empty sibling");
                    let value = sibling
                        .values
                        .pop()
                        .expect("redistribute from empty sibling");
                    parent.keys[index - 1] = key.clone();
                    node.keys.insert(0, key);
                    node.values.insert(0, value);
                }
                node.store(self.page_set_page_mut(txn, node.page_id)?)?;
                sibling.store(sibling_latch.page_mut().ok_or_else(read_latch_corruption)?)?;
                Ok(())
            }
            (BTreeNode::Internal(mut node), BTreeNode::Internal(mut sibling)) => {
                if index == 0 {
                    // The pulled child's key is the parent separator; the
                    // vacated parent slot takes the sibling's freed key
                    let child = sibling.children.remove(0);
                    let new_separator = sibling.keys.remove(0);
                    node.children.push(child);
                    node.keys.push(parent.keys[0].clone());
                    parent.keys[0] = new_separator;
                    self.set_parent(txn, child, node.page_id)?;
                } else {
                    let child = sibling
                        .children
                        .pop()
                        .expect("redistribute from empty sibling");
                    let key = sibling.keys.pop().expect("redistribute from empty sibling");
                    node.children.insert(0, child);
                    node.keys.insert(0, parent.keys[index - 1].clone());
                    parent.keys[index - 1] = key;
                    self.set_parent(txn, child, node.page_id)?;
                }
                node.store(self.page_set_page_mut(txn, node.page_id)?)?;
                sibling.store(sibling_latch.page_mut().ok_or_else(read_latch_corruption)?)?;
                Ok(())
            }
            _ => Err(BTreeError::Corruption(
                "siblings of different node kinds".to_string(),
            )),
        }
    }

    /// Merge the node with its chosen sibling. The right member of the pair
    /// drains into the left one and is scheduled for deletion, and the
    /// separator between them leaves the parent.
    fn coalesce(
        &self,
        txn: &mut Transaction,
        node: BTreeNode<K, V>,
        sibling: BTreeNode<K, V>,
        parent: &mut InternalNode<K>,
        index: usize,
        sibling_latch: &mut PageLatch,
    ) -> Result<()> {
        match (node, sibling) {
            (BTreeNode::Leaf(mut node), BTreeNode::Leaf(mut sibling)) => {
                if index == 0 {
                    // Right sibling drains into the node
                    node.keys.append(&mut sibling.keys);
                    node.values.append(&mut sibling.values);
                    node.next_page_id = sibling.next_page_id;
                    parent.remove_child(1);
                    txn.deleted_page_set_mut().insert(sibling.page_id);
                    debug!("merged leaf {} into {}", sibling.page_id, node.page_id);
                    node.store(self.page_set_page_mut(txn, node.page_id)?)?;
                } else {
                    // Node drains into its left sibling
                    sibling.keys.append(&mut node.keys);
                    sibling.values.append(&mut node.values);
                    sibling.next_page_id = node.next_page_id;
                    parent.remove_child(index);
                    txn.deleted_page_set_mut().insert(node.page_id);
                    debug!("merged leaf {} into {}", node.page_id, sibling.page_id);
                    sibling.store(sibling_latch.page_mut().ok_or_else(read_latch_corruption)?)?;
                }
                Ok(())
            }
            (BTreeNode::Internal(mut node), BTreeNode::Internal(mut sibling)) => {
                if index == 0 {
                    // The separator dividing the two nodes comes down
                    // between the merged child lists
                    node.keys.push(parent.keys[0].clone());
                    node.keys.append(&mut sibling.keys);
                    let moved = std::mem::take(&mut sibling.children);
                    for &child in &moved {
                        self.set_parent(txn, child, node.page_id)?;
                    }
                    node.children.extend(moved);
                    parent.remove_child(1);
                    txn.deleted_page_set_mut().insert(sibling.page_id);
                    node.store(self.page_set_page_mut(txn, node.page_id)?)?;
                } else {
                    sibling.keys.push(parent.keys[index - 1].clone());
                    sibling.keys.append(&mut node.keys);
                    let moved = std::mem::take(&mut node.children);
                    for &child in &moved {
                        self.set_parent(txn, child, sibling.page_id)?;
                    }
                    sibling.children.extend(moved);
                    parent.remove_child(index);
                    txn.deleted_page_set_mut().insert(node.page_id);
                    sibling.store(sibling_latch.page_mut().ok_or_else(read_latch_corruption)?)?;
                }
                Ok(())
            }
            _ => Err(BTreeError::Corruption(
                "siblings of different node kinds".to_string(),
            )),
        }
    }

    /// The root escapes the minimum-size rule. An internal root left with a
    /// single child promotes that child; a leaf root left empty unregisters
    /// the tree.
    fn adjust_root(&self, txn: &mut Transaction, root: BTreeNode<K, V>) -> Result<()> {
        match root {
            BTreeNode::Internal(root) if root.size() == 1 => {
                let new_root_id = root.children[0];
                self.set_parent(txn, new_root_id, INVALID_PAGE_ID)?;
                txn.deleted_page_set_mut().insert(root.page_id);
                *self.root_page_id.write() = new_root_id;
                self.sync_root_record(new_root_id)?;
                debug!("root of {} collapsed to page {}", self.index_name, new_root_id);
                Ok(())
            }
            BTreeNode::Leaf(root) if root.size() == 0 => {
                txn.deleted_page_set_mut().insert(root.page_id);
                *self.root_page_id.write() = INVALID_PAGE_ID;
                self.sync_root_record(INVALID_PAGE_ID)?;
                debug!("{} is empty again", self.index_name);
                Ok(())
            }
            other => {
                // No structural change needed; persist the removal
                let page_id = other.page_id();
                other.store(self.page_set_page_mut(txn, page_id)?)?;
                Ok(())
            }
        }
    }

    /// Allocate a page for the index; allocation failure surfaces as
    /// out-of-memory and the caller's unwind releases the page set
    fn new_index_page(&self, _txn: &mut Transaction) -> Result<(PagePtr, PageId)> {
        self.buffer_pool
            .new_page()
            .map_err(BTreeError::from_buffer_pool)
    }

    /// Rewrite a node's parent pointer. The node's page is patched through
    /// its latch when it sits in the page set, otherwise it is fetched
    /// briefly; either way only the header field changes.
    fn set_parent(&self, txn: &mut Transaction, page_id: PageId, parent_id: PageId) -> Result<()> {
        if let Some(latch) = txn
            .page_set_mut()
            .iter_mut()
            .find(|latch| latch.page_id() == page_id)
        {
            let page = latch.page_mut().ok_or_else(read_latch_corruption)?;
            node::write_parent_page_id(page, parent_id);
            return Ok(());
        }

        let page = self
            .buffer_pool
            .fetch_page(page_id)
            .map_err(BTreeError::from_buffer_pool)?;
        {
            let mut guard = page.write();
            node::write_parent_page_id(&mut guard, parent_id);
        }
        self.buffer_pool.unpin_page(page_id, true)?;
        Ok(())
    }

    /// Record the index's current root in the header page
    fn sync_root_record(&self, root_id: PageId) -> Result<()> {
        let header = self
            .buffer_pool
            .fetch_page(HEADER_PAGE_ID)
            .map_err(BTreeError::from_buffer_pool)?;
        {
            let mut guard = header.write();
            if !HeaderPage::update_record(&mut guard, &self.index_name, root_id) {
                HeaderPage::insert_record(&mut guard, &self.index_name, root_id);
            }
        }
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, true)?;
        Ok(())
    }

    fn load_leaf_from_back(&self, txn: &mut Transaction) -> Result<LeafNode<K, V>> {
        let latch = txn.page_set().back().expect("descent left no latched leaf");
        match BTreeNode::<K, V>::load(latch.page())? {
            BTreeNode::Leaf(leaf) => Ok(leaf),
            BTreeNode::Internal(_) => Err(BTreeError::Corruption(
                "descent ended on a non-leaf page".to_string(),
            )),
        }
    }

    fn load_internal_from_page_set(
        &self,
        txn: &mut Transaction,
        page_id: PageId,
    ) -> Result<InternalNode<K>> {
        let latch = txn
            .page_set()
            .iter()
            .find(|latch| latch.page_id() == page_id)
            .ok_or_else(|| {
                BTreeError::Corruption(format!(
                    "parent page {} was released before its child went unsafe",
                    page_id
                ))
            })?;
        match BTreeNode::<K, V>::load(latch.page())? {
            BTreeNode::Internal(internal) => Ok(internal),
            BTreeNode::Leaf(_) => Err(BTreeError::Corruption(format!(
                "page {} is a leaf where an internal node was expected",
                page_id
            ))),
        }
    }

    fn page_set_page_mut<'t>(
        &self,
        txn: &'t mut Transaction,
        page_id: PageId,
    ) -> Result<&'t mut Page> {
        let latch = txn
            .page_set_mut()
            .iter_mut()
            .find(|latch| latch.page_id() == page_id)
            .ok_or_else(|| {
                BTreeError::Corruption(format!("page {} is not write-latched", page_id))
            })?;
        latch.page_mut().ok_or_else(read_latch_corruption)
    }
}

fn read_latch_corruption() -> BTreeError {
    BTreeError::Corruption("write access through a read latch".to_string())
}
