use std::sync::Arc;

use tracing::warn;

use crate::buffer::{BufferPoolManager, ReadPageGuard};
use crate::common::{KeyType, RecordId};

use super::node_page::NodeRef;

/// Forward scan over the leaf linked list in ascending key order.
///
/// Holds the current leaf read-latched and pinned. Advancing past a leaf
/// releases it before fetching the next one, so the iterator never holds two
/// leaf latches at once. The end state is simply "no current leaf".
pub struct IndexIterator {
    bpm: Arc<BufferPoolManager>,
    current: Option<ReadPageGuard>,
    index: usize,
}

impl IndexIterator {
    pub(crate) fn new(
        bpm: Arc<BufferPoolManager>,
        current: Option<ReadPageGuard>,
        index: usize,
    ) -> Self {
        let mut iter = Self {
            bpm,
            current,
            index,
        };
        // The starting slot may already be past the leaf's end (empty leaf,
        // or a seek landing past the last key); settle on a real entry.
        iter.skip_exhausted_leaves();
        iter
    }

    /// True once the scan has run off the end of the leaf chain.
    pub fn is_end(&self) -> bool {
        self.current.is_none()
    }

    /// The entry under the cursor, if any.
    pub fn current(&self) -> Option<(KeyType, RecordId)> {
        self.current.as_ref().map(|guard| {
            let node = NodeRef::new(guard.data());
            (node.key_at(self.index), node.value_at(self.index))
        })
    }

    /// Advances past leaves with no remaining entries, following the linked
    /// list. Releases the current latch before taking the next one.
    fn skip_exhausted_leaves(&mut self) {
        loop {
            let next_pid = match &self.current {
                None => return,
                Some(guard) => {
                    let node = NodeRef::new(guard.data());
                    if self.index < node.size() {
                        return;
                    }
                    node.next_page_id()
                }
            };

            self.current = None;
            self.index = 0;
            if !next_pid.is_valid() {
                return;
            }
            match self.bpm.read_page(next_pid) {
                Ok(guard) => self.current = Some(guard),
                Err(e) => {
                    warn!(page_id = next_pid.as_u32(), error = %e, "btree.iter.fetch_failed");
                    return;
                }
            }
        }
    }
}

impl Iterator for IndexIterator {
    type Item = (KeyType, RecordId);

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.current()?;
        self.index += 1;
        self.skip_exhausted_leaves();
        Some(entry)
    }
}
