use std::collections::HashMap;

use parking_lot::RwLock;

use crate::common::{FrameId, PageId};

/// Concurrent mapping from page id to the frame currently holding it.
///
/// Covers exactly the set of resident pages. Internally a read-write locked
/// hash map; all state transitions happen while the buffer pool's coarse
/// latch is held, the map's own lock just keeps lookups safe on their own.
pub struct PageTable {
    map: RwLock<HashMap<PageId, FrameId>>,
}

impl PageTable {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }

    /// Maps a page to its frame, replacing any previous mapping.
    pub fn insert(&self, page_id: PageId, frame_id: FrameId) {
        self.map.write().insert(page_id, frame_id);
    }

    /// Removes a mapping; returns the frame it pointed at.
    pub fn remove(&self, page_id: PageId) -> Option<FrameId> {
        self.map.write().remove(&page_id)
    }

    /// Looks up the frame holding a page.
    pub fn get(&self, page_id: PageId) -> Option<FrameId> {
        self.map.read().get(&page_id).copied()
    }

    /// Number of resident pages.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Snapshot of all current mappings, for flush-all style sweeps.
    pub fn entries(&self) -> Vec<(PageId, FrameId)> {
        self.map.read().iter().map(|(&p, &f)| (p, f)).collect()
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_table_insert_get_remove() {
        let table = PageTable::new();
        assert!(table.is_empty());

        table.insert(PageId::new(1), FrameId::new(0));
        table.insert(PageId::new(2), FrameId::new(3));

        assert_eq!(table.get(PageId::new(1)), Some(FrameId::new(0)));
        assert_eq!(table.get(PageId::new(2)), Some(FrameId::new(3)));
        assert_eq!(table.get(PageId::new(3)), None);
        assert_eq!(table.len(), 2);

        assert_eq!(table.remove(PageId::new(1)), Some(FrameId::new(0)));
        assert_eq!(table.remove(PageId::new(1)), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_page_table_concurrent_lookups() {
        use std::sync::Arc;
        use std::thread;

        let table = Arc::new(PageTable::new());
        for i in 0..64 {
            table.insert(PageId::new(i), FrameId::new(i));
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    for i in 0..64 {
                        assert_eq!(table.get(PageId::new(i)), Some(FrameId::new(i)));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
