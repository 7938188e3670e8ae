use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::common::{FrameId, PageId, Result, StratumError, PAGE_SIZE};
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{LruKReplacer, Page, PageTable, ReadPageGuard, WritePageGuard};

/// Internal state shared with page guards for unpinning on drop
struct BufferPoolState {
    /// The buffer pool frames
    pages: Vec<Arc<Page>>,
    /// Coarse latch: held for the full duration of every pool operation.
    /// The free list is its payload so it cannot be touched without it.
    latch: Mutex<VecDeque<FrameId>>,
    /// Page table: maps resident page IDs to frame IDs
    page_table: PageTable,
    /// LRU-K replacer for eviction decisions
    replacer: LruKReplacer,
    /// Disk scheduler for page I/O
    disk_scheduler: DiskScheduler,
    /// Monotonic page id allocator; page 0 is reserved for the header page
    next_page_id: AtomicU32,
}

impl BufferPoolState {
    /// Unpin path shared by the public API and the guard release callbacks.
    fn unpin(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _free_list = self.latch.lock();

        let frame_id = match self.page_table.get(page_id) {
            Some(frame_id) => frame_id,
            None => return false,
        };
        let frame = &self.pages[frame_id.as_usize()];

        if is_dirty {
            frame.set_dirty(true);
        }
        match frame.unpin() {
            Some(0) => {
                self.replacer.set_evictable(frame_id, true);
                true
            }
            Some(_) => true,
            None => false,
        }
    }
}

/// BufferPoolManager brokers fixed-size page frames between disk and clients.
/// It guarantees at most one resident copy per page, tracks pin counts and
/// dirty flags, and uses the LRU-K policy to pick eviction victims.
pub struct BufferPoolManager {
    /// Number of frames in the buffer pool
    pool_size: usize,
    /// Shared state (guards hold a reference for release)
    state: Arc<BufferPoolState>,
}

impl BufferPoolManager {
    /// Creates a new BufferPoolManager with the given pool size, k value for
    /// LRU-K, and disk manager.
    pub fn new(pool_size: usize, k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut pages = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            pages.push(Arc::new(Page::new(frame_id)));
            free_list.push_back(frame_id);
        }

        // Page 0 is the header page; allocation resumes past whatever the
        // database file already holds.
        let first_free_id = disk_manager.get_num_pages().max(1);

        let state = Arc::new(BufferPoolState {
            pages,
            latch: Mutex::new(free_list),
            page_table: PageTable::new(),
            replacer: LruKReplacer::new(k, pool_size),
            disk_scheduler: DiskScheduler::new(disk_manager),
            next_page_id: AtomicU32::new(first_free_id),
        });

        Self { pool_size, state }
    }

    /// Allocates a brand-new page in a frame. The returned page is pinned
    /// (pin count 1) and zero-filled; the caller must unpin it.
    /// Fails with BufferPoolFull if every frame is pinned.
    pub fn new_page(&self) -> Result<Arc<Page>> {
        let state = &self.state;
        let mut free_list = state.latch.lock();

        let frame_id = self.acquire_frame(&mut free_list)?;
        let frame = &state.pages[frame_id.as_usize()];

        let page_id = PageId::new(state.next_page_id.fetch_add(1, Ordering::SeqCst));

        frame.reset();
        frame.set_page_id(page_id);
        frame.pin();

        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);

        Ok(Arc::clone(frame))
    }

    /// Fetches a page, reading it from disk if it is not resident.
    /// The returned page is pinned; the caller must unpin it.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Arc<Page>> {
        if !page_id.is_valid() {
            return Err(StratumError::InvalidPageId(page_id));
        }

        let state = &self.state;
        let mut free_list = state.latch.lock();

        // Already resident: bump the pin and the access history.
        if let Some(frame_id) = state.page_table.get(page_id) {
            let frame = &state.pages[frame_id.as_usize()];
            frame.pin();
            state.replacer.record_access(frame_id);
            state.replacer.set_evictable(frame_id, false);
            return Ok(Arc::clone(frame));
        }

        let frame_id = self.acquire_frame(&mut free_list)?;
        let frame = &state.pages[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        state.disk_scheduler.schedule_read_sync(page_id, &mut data)?;

        frame.set_page_id(page_id);
        frame.copy_from(&data);
        frame.set_dirty(false);
        frame.pin();

        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);

        Ok(Arc::clone(frame))
    }

    /// Drops one pin on a page, ORing the dirty hint into its dirty flag.
    /// Returns false if the page is not resident or was not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.state.unpin(page_id, is_dirty)
    }

    /// Writes a page to disk regardless of its dirty flag and clears the
    /// flag. Returns false if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let state = &self.state;
        let _free_list = state.latch.lock();

        let frame_id = match state.page_table.get(page_id) {
            Some(frame_id) => frame_id,
            None => return Ok(false),
        };
        let frame = &state.pages[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        frame.copy_to(&mut data);
        state.disk_scheduler.schedule_write_sync(page_id, &data)?;
        frame.set_dirty(false);

        Ok(true)
    }

    /// Flushes every resident dirty page.
    pub fn flush_all_pages(&self) -> Result<()> {
        let state = &self.state;
        let _free_list = state.latch.lock();

        for (page_id, frame_id) in state.page_table.entries() {
            let frame = &state.pages[frame_id.as_usize()];
            if frame.is_dirty() {
                let mut data = [0u8; PAGE_SIZE];
                frame.copy_to(&mut data);
                state.disk_scheduler.schedule_write_sync(page_id, &data)?;
                frame.set_dirty(false);
            }
        }

        Ok(())
    }

    /// Removes a page from the pool, returning its frame to the free list.
    /// Not-resident pages delete trivially (true); pinned pages refuse
    /// (false). Dirty contents are written back first.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let state = &self.state;
        let mut free_list = state.latch.lock();

        let frame_id = match state.page_table.get(page_id) {
            Some(frame_id) => frame_id,
            None => return Ok(true),
        };
        let frame = &state.pages[frame_id.as_usize()];

        if frame.pin_count() > 0 {
            return Ok(false);
        }

        if frame.is_dirty() {
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            state.disk_scheduler.schedule_write_sync(page_id, &data)?;
        }

        state.page_table.remove(page_id);
        state.replacer.remove(frame_id);
        frame.reset();
        free_list.push_back(frame_id);

        state.disk_scheduler.disk_manager().deallocate_page(page_id)?;

        Ok(true)
    }

    /// Fetches a page and acquires its read latch, returning an RAII guard
    /// that unlatches and unpins on drop.
    pub fn read_page(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame = self.fetch_page(page_id)?;
        Ok(self.wrap_read(page_id, frame))
    }

    /// Fetches a page and acquires its write latch, returning an RAII guard
    /// that unlatches and unpins (dirty if written) on drop.
    pub fn write_page(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame = self.fetch_page(page_id)?;
        Ok(self.wrap_write(page_id, frame))
    }

    /// Allocates a new page and returns it already write-latched.
    pub fn new_write_page(&self) -> Result<WritePageGuard> {
        let frame = self.new_page()?;
        let page_id = frame.page_id();
        Ok(self.wrap_write(page_id, frame))
    }

    fn wrap_read(&self, page_id: PageId, frame: Arc<Page>) -> ReadPageGuard {
        let state = Arc::clone(&self.state);
        unsafe {
            ReadPageGuard::new(
                page_id,
                frame,
                Box::new(move |pid, is_dirty| {
                    state.unpin(pid, is_dirty);
                }),
            )
        }
    }

    fn wrap_write(&self, page_id: PageId, frame: Arc<Page>) -> WritePageGuard {
        let state = Arc::clone(&self.state);
        unsafe {
            WritePageGuard::new(
                page_id,
                frame,
                Box::new(move |pid, is_dirty| {
                    state.unpin(pid, is_dirty);
                }),
            )
        }
    }

    /// Returns the pin count for a resident page.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = &self.state;
        let _free_list = state.latch.lock();

        state
            .page_table
            .get(page_id)
            .map(|frame_id| state.pages[frame_id.as_usize()].pin_count())
    }

    /// Returns the pool size.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the number of free frames.
    pub fn free_frame_count(&self) -> usize {
        self.state.latch.lock().len()
    }

    /// Gets a usable frame: from the free list if possible, otherwise by
    /// evicting a victim (writing it back if dirty).
    fn acquire_frame(&self, free_list: &mut VecDeque<FrameId>) -> Result<FrameId> {
        if let Some(frame_id) = free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = match self.state.replacer.evict() {
            Some(frame_id) => frame_id,
            None => return Err(StratumError::BufferPoolFull),
        };
        let frame = &self.state.pages[frame_id.as_usize()];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            debug!(
                page_id = old_page_id.as_u32(),
                frame_id = frame_id.as_u32(),
                "bpool.evict.writeback"
            );
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            self.state
                .disk_scheduler
                .schedule_write_sync(old_page_id, &data)?;
        }

        self.state.page_table.remove(old_page_id);
        frame.reset();

        Ok(frame_id)
    }
}
