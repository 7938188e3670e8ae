use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::buffer::{BufferPoolManager, WritePageGuard};
use crate::common::{
    KeyType, PageId, RecordId, Result, StratumError, HEADER_PAGE_ID, INVALID_PAGE_ID,
};
use crate::storage::page::{HeaderPage, HeaderPageRef};

use super::iterator::IndexIterator;
use super::key_comparator::{IntegerComparator, KeyComparator};
use super::node_page::{NodeMut, NodeRef};

/// What a write descent is about to do; decides when a node is "safe" and
/// ancestor latches can be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Insert,
    Delete,
}

/// Per-operation latch context for write descents.
///
/// Owns the root latch (released once the root can no longer be affected)
/// and the retained write guards along the descent path, root-most first.
/// Dropping the context releases every latch and unpins every page.
struct WriteContext<'a> {
    root_guard: Option<MutexGuard<'a, PageId>>,
    path: Vec<WritePageGuard>,
}

impl WriteContext<'_> {
    /// The safe-release rule: once the just-latched child cannot propagate a
    /// structural change upward, every ancestor latch is dropped.
    fn release_ancestors(&mut self) {
        self.path.clear();
        self.root_guard = None;
    }
}

/// A concurrent on-disk B+ tree index over the buffer pool.
///
/// All node memory is borrowed from the buffer pool per fetch and returned
/// via guard drop. Multi-threaded access is coordinated by latch crabbing:
/// read descents hold at most a parent/child latch pair, write descents keep
/// ancestors latched only while a split or merge could still reach them.
pub struct BPlusTree<C: KeyComparator = IntegerComparator> {
    index_name: String,
    bpm: Arc<BufferPoolManager>,
    /// Root page id; its mutex doubles as the level-zero latch for crabbing.
    root_page_id: Mutex<PageId>,
    comparator: C,
    leaf_max_size: usize,
    internal_max_size: usize,
}

impl<C: KeyComparator> BPlusTree<C> {
    /// Creates a handle over a not-yet-materialized tree. The root page is
    /// allocated lazily on the first insert and registered in the header
    /// page under `name`.
    pub fn new(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Self {
        Self {
            index_name: name.into(),
            bpm,
            root_page_id: Mutex::new(INVALID_PAGE_ID),
            comparator,
            leaf_max_size,
            internal_max_size,
        }
    }

    /// Re-attaches to an index previously registered in the header page.
    pub fn reopen(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        let name = name.into();
        let root = {
            let guard = bpm.read_page(HEADER_PAGE_ID)?;
            HeaderPageRef::new(guard.data())
                .get_record(&name)
                .unwrap_or(INVALID_PAGE_ID)
        };
        Ok(Self {
            index_name: name,
            bpm,
            root_page_id: Mutex::new(root),
            comparator,
            leaf_max_size,
            internal_max_size,
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.lock()
    }

    pub fn is_empty(&self) -> bool {
        !self.root_page_id.lock().is_valid()
    }

    /// Point lookup.
    pub fn get_value(&self, key: &KeyType) -> Result<Option<RecordId>> {
        let leaf = match self.find_leaf_read(Some(key))? {
            Some(guard) => guard,
            None => return Ok(None),
        };
        let node = NodeRef::new(leaf.data());
        Ok(node.lookup(key, &self.comparator))
    }

    /// Inserts a key/value pair. Returns false if the key already exists.
    pub fn insert(&self, key: KeyType, value: RecordId) -> Result<bool> {
        let root_guard = self.root_page_id.lock();
        if !root_guard.is_valid() {
            self.start_new_tree(root_guard, key, value)?;
            return Ok(true);
        }

        let mut ctx = self.descend_write(root_guard, &key, Operation::Insert)?;

        {
            let leaf = NodeRef::new(ctx.path.last().unwrap().data());
            if leaf.lookup(&key, &self.comparator).is_some() {
                return Ok(false);
            }
        }

        let new_size = {
            let leaf_guard = ctx.path.last_mut().unwrap();
            NodeMut::new(leaf_guard.data_mut()).leaf_insert(key, value, &self.comparator)
        };

        if new_size >= self.leaf_max_size {
            let idx = ctx.path.len() - 1;
            self.split_node(&mut ctx, idx)?;
        }

        Ok(true)
    }

    /// Removes a key. Returns false if the key is not present.
    pub fn remove(&self, key: &KeyType) -> Result<bool> {
        let root_guard = self.root_page_id.lock();
        if !root_guard.is_valid() {
            return Ok(false);
        }

        let mut ctx = self.descend_write(root_guard, key, Operation::Delete)?;

        {
            let leaf = NodeRef::new(ctx.path.last().unwrap().data());
            if leaf.lookup(key, &self.comparator).is_none() {
                return Ok(false);
            }
        }
        {
            let leaf_guard = ctx.path.last_mut().unwrap();
            NodeMut::new(leaf_guard.data_mut()).leaf_remove(key, &self.comparator);
        }

        let needs_fix = {
            let view = NodeRef::new(ctx.path.last().unwrap().data());
            if view.is_root() {
                view.size() == 0
            } else {
                view.size() < view.min_size()
            }
        };
        if needs_fix {
            self.fix_underflow(&mut ctx)?;
        }

        Ok(true)
    }

    /// Iterator over the whole tree in ascending key order.
    pub fn begin(&self) -> Result<IndexIterator> {
        let leaf = self.find_leaf_read(None)?;
        Ok(IndexIterator::new(Arc::clone(&self.bpm), leaf, 0))
    }

    /// Iterator starting at the first key >= `key`.
    pub fn begin_at(&self, key: &KeyType) -> Result<IndexIterator> {
        let leaf = match self.find_leaf_read(Some(key))? {
            Some(guard) => guard,
            None => return Ok(IndexIterator::new(Arc::clone(&self.bpm), None, 0)),
        };
        let index = NodeRef::new(leaf.data()).key_index(key, &self.comparator);
        Ok(IndexIterator::new(Arc::clone(&self.bpm), Some(leaf), index))
    }

    /// The exhausted sentinel iterator.
    pub fn end(&self) -> IndexIterator {
        IndexIterator::new(Arc::clone(&self.bpm), None, 0)
    }

    /// Inserts whitespace-separated 64-bit integer keys read from a file.
    /// Each key k maps to the record id (k >> 32, k & 0xFFFFFFFF).
    /// Returns the number of keys actually inserted.
    pub fn insert_from_file<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let contents = std::fs::read_to_string(path).map_err(StratumError::Io)?;
        let mut inserted = 0;
        for token in contents.split_whitespace() {
            if let Ok(key) = token.parse::<KeyType>() {
                if self.insert(key, RecordId::from_key(key))? {
                    inserted += 1;
                }
            }
        }
        Ok(inserted)
    }

    /// Removes whitespace-separated 64-bit integer keys read from a file.
    /// Returns the number of keys actually removed.
    pub fn remove_from_file<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let contents = std::fs::read_to_string(path).map_err(StratumError::Io)?;
        let mut removed = 0;
        for token in contents.split_whitespace() {
            if let Ok(key) = token.parse::<KeyType>() {
                if self.remove(&key)? {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Read-crabbing descent to the leaf covering `key`, or the leftmost
    /// leaf when no key is given. Returns None for an empty tree. The
    /// returned guard keeps the leaf read-latched and pinned.
    fn find_leaf_read(&self, key: Option<&KeyType>) -> Result<Option<crate::buffer::ReadPageGuard>> {
        let root_lock = self.root_page_id.lock();
        let root_pid = *root_lock;
        if !root_pid.is_valid() {
            return Ok(None);
        }
        // Latch the root page before releasing the root id lock so a
        // concurrent root change cannot slip in between.
        let mut guard = self.bpm.read_page(root_pid)?;
        drop(root_lock);

        loop {
            let child_pid = {
                let node = NodeRef::new(guard.data());
                if node.is_leaf() {
                    break;
                }
                match key {
                    Some(k) => node.lookup_child(k, &self.comparator),
                    None => node.child_at(0),
                }
            };
            // Latch the child, then release the parent by replacing it.
            let child = self.bpm.read_page(child_pid)?;
            guard = child;
        }
        Ok(Some(guard))
    }

    /// Write-crabbing descent. Ancestor latches (and the root latch) are
    /// dropped as soon as the just-latched child is safe for `op`.
    fn descend_write<'a>(
        &'a self,
        root_guard: MutexGuard<'a, PageId>,
        key: &KeyType,
        op: Operation,
    ) -> Result<WriteContext<'a>> {
        let mut pid = *root_guard;
        let mut ctx = WriteContext {
            root_guard: Some(root_guard),
            path: Vec::new(),
        };

        loop {
            let guard = self.bpm.write_page(pid)?;
            let (safe, is_leaf, child_pid) = {
                let node = NodeRef::new(guard.data());
                let safe = Self::is_safe(&node, op);
                if node.is_leaf() {
                    (safe, true, INVALID_PAGE_ID)
                } else {
                    (safe, false, node.lookup_child(key, &self.comparator))
                }
            };

            if safe {
                ctx.release_ancestors();
            }
            ctx.path.push(guard);

            if is_leaf {
                return Ok(ctx);
            }
            pid = child_pid;
        }
    }

    /// A node is safe when the pending operation on its subtree cannot
    /// propagate past it: inserts need room for one more entry without a
    /// split, deletes need room to give up one entry without an underflow.
    fn is_safe(node: &NodeRef<'_>, op: Operation) -> bool {
        match op {
            Operation::Insert => {
                if node.is_leaf() {
                    node.size() + 1 < node.max_size()
                } else {
                    node.size() < node.max_size()
                }
            }
            Operation::Delete => {
                if node.is_root() {
                    // The root shrinks through AdjustRoot, not underflow.
                    if node.is_leaf() {
                        node.size() > 1
                    } else {
                        node.size() > 2
                    }
                } else {
                    node.size() > node.min_size()
                }
            }
        }
    }

    /// First insert into an empty tree: a single leaf root.
    fn start_new_tree(
        &self,
        mut root_guard: MutexGuard<'_, PageId>,
        key: KeyType,
        value: RecordId,
    ) -> Result<()> {
        let mut guard = self.bpm.new_write_page()?;
        let pid = guard.page_id();
        {
            let mut node = NodeMut::new(guard.data_mut());
            node.init_leaf(pid, INVALID_PAGE_ID, self.leaf_max_size);
            node.leaf_insert(key, value, &self.comparator);
        }
        drop(guard);

        *root_guard = pid;
        self.update_root_in_header(pid)?;
        debug!(root = pid.as_u32(), "btree.root.start");
        Ok(())
    }

    /// Splits the node at `idx` on the context path, pushing its separator
    /// into the parent and cascading upward while parents overflow.
    fn split_node(&self, ctx: &mut WriteContext<'_>, idx: usize) -> Result<()> {
        let old_pid = ctx.path[idx].page_id();
        let (old_is_leaf, old_parent) = {
            let v = NodeRef::new(ctx.path[idx].data());
            (v.is_leaf(), v.parent_page_id())
        };
        let splitting_root = !old_parent.is_valid();

        let mut new_guard = self.bpm.new_write_page()?;
        let new_pid = new_guard.page_id();

        // For a root split the replacement root is allocated up front, so an
        // exhausted pool fails the operation before any page is modified.
        let mut new_root_guard = if splitting_root {
            match self.bpm.new_write_page() {
                Ok(g) => Some(g),
                Err(e) => {
                    drop(new_guard);
                    let _ = self.bpm.delete_page(new_pid);
                    return Err(e);
                }
            }
        } else {
            None
        };

        let separator = {
            let old_guard = ctx.path.get_mut(idx).unwrap();
            let mut new_node = NodeMut::new(new_guard.data_mut());
            let mut old_node = NodeMut::new(old_guard.data_mut());
            if old_is_leaf {
                new_node.init_leaf(new_pid, old_parent, self.leaf_max_size);
                old_node.leaf_move_half_to(&mut new_node);
                // Splice the new leaf into the linked list.
                let old_next = old_node.as_ref().next_page_id();
                new_node.set_next_page_id(old_next);
                old_node.set_next_page_id(new_pid);
            } else {
                new_node.init_internal(new_pid, old_parent, self.internal_max_size);
                old_node.internal_move_half_to(&mut new_node, &self.bpm)?;
            }
            new_node.as_ref().key_at(0)
        };
        debug!(
            left = old_pid.as_u32(),
            right = new_pid.as_u32(),
            leaf = old_is_leaf,
            "btree.split"
        );

        if let Some(mut root_guard) = new_root_guard.take() {
            let root_pid = root_guard.page_id();
            {
                let mut root = NodeMut::new(root_guard.data_mut());
                root.init_internal(root_pid, INVALID_PAGE_ID, self.internal_max_size);
                root.populate_new_root(old_pid, separator, new_pid);
            }
            {
                let old_guard = ctx.path.get_mut(idx).unwrap();
                NodeMut::new(old_guard.data_mut()).set_parent_page_id(root_pid);
            }
            NodeMut::new(new_guard.data_mut()).set_parent_page_id(root_pid);
            drop(new_guard);
            drop(root_guard);

            self.publish_root(ctx, root_pid)?;
            debug!(root = root_pid.as_u32(), "btree.root.grow");
            return Ok(());
        }

        // The parent is still write-latched on the path: the split node was
        // not safe, so crabbing retained every ancestor.
        drop(new_guard);
        {
            let parent_guard = ctx
                .path
                .get_mut(idx - 1)
                .expect("split of a non-root node retains its parent");
            NodeMut::new(parent_guard.data_mut()).insert_node_after(old_pid, separator, new_pid);
        }

        if NodeRef::new(ctx.path[idx - 1].data()).is_full() {
            self.split_node(ctx, idx - 1)?;
        }
        Ok(())
    }

    /// Repairs the underflowing node at the end of the context path by
    /// merging with or borrowing from a sibling, recursing on the parent.
    fn fix_underflow(&self, ctx: &mut WriteContext<'_>) -> Result<()> {
        let node_is_root = NodeRef::new(ctx.path.last().unwrap().data()).is_root();
        if node_is_root {
            return self.adjust_root(ctx);
        }

        let mut node_guard = ctx.path.pop().unwrap();
        let node_pid = node_guard.page_id();
        let (node_is_leaf, node_size) = {
            let v = NodeRef::new(node_guard.data());
            (v.is_leaf(), v.size())
        };

        let parent_guard = ctx
            .path
            .last_mut()
            .expect("non-root underflow retains its parent");
        let (index_in_parent, sibling_index, sibling_pid) = {
            let parent = NodeRef::new(parent_guard.data());
            let index = parent
                .value_index(node_pid)
                .expect("node must be linked from its parent");
            // Prefer the left sibling; the leftmost child borrows right.
            let sibling_index = if index == 0 { 1 } else { index - 1 };
            (index, sibling_index, parent.child_at(sibling_index))
        };

        let mut sibling_guard = self.bpm.write_page(sibling_pid)?;
        let sibling_size = NodeRef::new(sibling_guard.data()).size();
        let max_size = if node_is_leaf {
            self.leaf_max_size
        } else {
            self.internal_max_size
        };

        if node_size + sibling_size <= max_size {
            // Coalesce: always merge the right node of the pair into the left.
            let (right_pos, right_pid) = if sibling_index < index_in_parent {
                (index_in_parent, node_pid)
            } else {
                (sibling_index, sibling_pid)
            };
            let middle_key = NodeRef::new(parent_guard.data()).key_at(right_pos);

            {
                let (left_guard, right_guard) = if sibling_index < index_in_parent {
                    (&mut sibling_guard, &mut node_guard)
                } else {
                    (&mut node_guard, &mut sibling_guard)
                };
                let mut left = NodeMut::new(left_guard.data_mut());
                let mut right = NodeMut::new(right_guard.data_mut());
                if node_is_leaf {
                    let right_next = right.as_ref().next_page_id();
                    right.leaf_move_all_to(&mut left);
                    left.set_next_page_id(right_next);
                } else {
                    right.internal_move_all_to(&mut left, middle_key, &self.bpm)?;
                }
            }
            NodeMut::new(parent_guard.data_mut()).remove_at(right_pos);
            let survivor = if right_pid == node_pid {
                sibling_pid
            } else {
                node_pid
            };
            debug!(
                survivor = survivor.as_u32(),
                removed = right_pid.as_u32(),
                leaf = node_is_leaf,
                "btree.coalesce"
            );

            drop(node_guard);
            drop(sibling_guard);
            // A latch-blocked reader may still pin the page; the mapping is
            // gone from the tree either way.
            let _ = self.bpm.delete_page(right_pid)?;

            let parent_needs_fix = {
                let v = NodeRef::new(ctx.path.last().unwrap().data());
                if v.is_root() {
                    v.size() == 1
                } else {
                    v.size() < v.min_size()
                }
            };
            if parent_needs_fix {
                self.fix_underflow(ctx)?;
            }
        } else {
            // Redistribute one entry across the pair and fix the separator.
            if sibling_index < index_in_parent {
                // Left sibling lends its last entry.
                let separator_pos = index_in_parent;
                if node_is_leaf {
                    {
                        let mut sibling = NodeMut::new(sibling_guard.data_mut());
                        let mut node = NodeMut::new(node_guard.data_mut());
                        sibling.leaf_move_last_to_front_of(&mut node);
                    }
                    let new_separator = NodeRef::new(node_guard.data()).key_at(0);
                    NodeMut::new(parent_guard.data_mut()).set_key_at(separator_pos, new_separator);
                } else {
                    let middle_key = NodeRef::new(parent_guard.data()).key_at(separator_pos);
                    let new_separator = {
                        let mut sibling = NodeMut::new(sibling_guard.data_mut());
                        let mut node = NodeMut::new(node_guard.data_mut());
                        sibling.internal_move_last_to_front_of(&mut node, middle_key, &self.bpm)?
                    };
                    NodeMut::new(parent_guard.data_mut()).set_key_at(separator_pos, new_separator);
                }
            } else {
                // Right sibling lends its first entry.
                let separator_pos = sibling_index;
                if node_is_leaf {
                    {
                        let mut sibling = NodeMut::new(sibling_guard.data_mut());
                        let mut node = NodeMut::new(node_guard.data_mut());
                        sibling.leaf_move_first_to_end_of(&mut node);
                    }
                    let new_separator = NodeRef::new(sibling_guard.data()).key_at(0);
                    NodeMut::new(parent_guard.data_mut()).set_key_at(separator_pos, new_separator);
                } else {
                    let middle_key = NodeRef::new(parent_guard.data()).key_at(separator_pos);
                    let new_separator = {
                        let mut sibling = NodeMut::new(sibling_guard.data_mut());
                        let mut node = NodeMut::new(node_guard.data_mut());
                        sibling.internal_move_first_to_end_of(&mut node, middle_key, &self.bpm)?
                    };
                    NodeMut::new(parent_guard.data_mut()).set_key_at(separator_pos, new_separator);
                }
            }
            debug!(
                node = node_pid.as_u32(),
                sibling = sibling_pid.as_u32(),
                leaf = node_is_leaf,
                "btree.redistribute"
            );
        }

        Ok(())
    }

    /// Shrinks the tree at the top: an emptied leaf root clears the tree, an
    /// internal root left with a single child promotes that child.
    fn adjust_root(&self, ctx: &mut WriteContext<'_>) -> Result<()> {
        let mut root_guard = ctx.path.pop().expect("adjust_root needs the root on the path");
        let root_pid = root_guard.page_id();
        let (is_leaf, size) = {
            let v = NodeRef::new(root_guard.data());
            (v.is_leaf(), v.size())
        };

        if is_leaf {
            if size == 0 {
                drop(root_guard);
                let _ = self.bpm.delete_page(root_pid)?;
                self.publish_root(ctx, INVALID_PAGE_ID)?;
                debug!(root = root_pid.as_u32(), "btree.root.clear");
            }
            return Ok(());
        }

        if size == 1 {
            let child =
                NodeMut::new(root_guard.data_mut()).remove_and_return_only_child();
            {
                let mut child_guard = self.bpm.write_page(child)?;
                NodeMut::new(child_guard.data_mut()).set_parent_page_id(INVALID_PAGE_ID);
            }
            drop(root_guard);
            let _ = self.bpm.delete_page(root_pid)?;
            self.publish_root(ctx, child)?;
            debug!(
                old_root = root_pid.as_u32(),
                root = child.as_u32(),
                "btree.root.collapse"
            );
        }
        Ok(())
    }

    /// Stores a new root id, both in memory (under the held root latch) and
    /// in the header-page registry.
    fn publish_root(&self, ctx: &mut WriteContext<'_>, root: PageId) -> Result<()> {
        let root_guard = ctx
            .root_guard
            .as_mut()
            .expect("root latch must still be held for a root change");
        **root_guard = root;
        self.update_root_in_header(root)
    }

    fn update_root_in_header(&self, root: PageId) -> Result<()> {
        let mut guard = self.bpm.write_page(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::new(guard.data_mut());
        if !header.update_record(&self.index_name, root)
            && !header.insert_record(&self.index_name, root)
        {
            return Err(StratumError::HeaderFull);
        }
        Ok(())
    }
}
