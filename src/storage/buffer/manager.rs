use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{
    Frame, FrameId, FramePtr, Page, PageId, PagePtr, INVALID_PAGE_ID,
};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::page_table::ExtendibleHashTable;
use crate::storage::buffer::replacer::LruReplacer;
use crate::storage::disk::DiskManager;
use crate::transaction::wal::log_manager::LogManager;

/// Bucket capacity of the extendible-hash page table
const PAGE_TABLE_BUCKET_SIZE: usize = 16;

/// Buffer pool manager: caches disk pages in a fixed set of frames. The
/// extendible hash table maps resident page ids to frames; the LRU replacer
/// tracks unpinned frames as eviction candidates.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<FramePtr>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    free_list: Mutex<VecDeque<FrameId>>,
    replacer: LruReplacer<FrameId>,
    disk_manager: Arc<DiskManager>,
    log_manager: Option<Arc<LogManager>>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_disk_manager(pool_size, disk_manager))
    }

    /// Create a buffer pool manager that gates dirty-page write-back on the
    /// write-ahead log
    pub fn new_with_wal(
        pool_size: usize,
        db_path: impl AsRef<Path>,
        log_manager: Arc<LogManager>,
    ) -> Result<Self, BufferPoolError> {
        let mut pool = Self::new(pool_size, db_path)?;
        pool.log_manager = Some(log_manager);
        Ok(pool)
    }

    fn with_disk_manager(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = i as FrameId;
            let frame = Frame::new(frame_id, Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))));
            frames.push(Arc::new(RwLock::new(frame)));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            frames,
            page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
            free_list: Mutex::new(free_list),
            replacer: LruReplacer::new(pool_size),
            disk_manager,
            log_manager: None,
        }
    }

    /// Fetch a page, reading it from disk if it is not resident. The page
    /// comes back pinned; every successful fetch must be balanced by exactly
    /// one `unpin_page`.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot fetch the invalid page id".to_string(),
            ));
        }

        loop {
            if let Some(frame_id) = self.page_table.find(&page_id) {
                let frame = &self.frames[frame_id as usize];
                let mut frame_guard = frame.write();

                // The mapping may be stale if the frame was evicted between
                // the lookup and taking the frame lock; retry in that case.
                if frame_guard.page.read().page_id != page_id {
                    continue;
                }

                frame_guard.pin_count += 1;
                self.replacer.erase(&frame_id);
                return Ok(frame_guard.page.clone());
            }

            // Not resident: claim a frame and read the page from disk
            let frame_id = self.allocate_frame()?;
            self.evict_frame_contents(frame_id)?;

            let frame = &self.frames[frame_id as usize];
            let mut frame_guard = frame.write();
            {
                let mut page_guard = frame_guard.page.write();
                *page_guard = Page::new(page_id);
                self.disk_manager.read_page(page_id, &mut page_guard)?;
            }
            frame_guard.pin_count = 1;
            frame_guard.is_dirty = false;

            self.page_table.insert(page_id, frame_id);
            return Ok(frame_guard.page.clone());
        }
    }

    /// Allocate a fresh page on disk and pin it in a frame
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let frame_id = self.allocate_frame()?;
        self.evict_frame_contents(frame_id)?;

        let page_id = self.disk_manager.allocate_page()?;

        let frame = &self.frames[frame_id as usize];
        let mut frame_guard = frame.write();
        {
            let mut page_guard = frame_guard.page.write();
            *page_guard = Page::new(page_id);
        }
        frame_guard.pin_count = 1;
        frame_guard.is_dirty = true;

        self.page_table.insert(page_id, frame_id);
        Ok((frame_guard.page.clone(), page_id))
    }

    /// Drop one pin on the page, recording whether the caller dirtied it.
    /// The frame becomes an eviction candidate when its pin count reaches 0.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let frame_id = self
            .page_table
            .find(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let frame = &self.frames[frame_id as usize];
        let mut frame_guard = frame.write();
        if frame_guard.pin_count == 0 {
            return Err(BufferPoolError::InvalidOperation(format!(
                "unpin of page {} which has no pins",
                page_id
            )));
        }

        frame_guard.pin_count -= 1;
        if is_dirty {
            frame_guard.is_dirty = true;
        }
        if frame_guard.pin_count == 0 {
            self.replacer.insert(frame_id);
        }
        Ok(())
    }

    /// Write a page back to disk, honoring the WAL rule: the log must be
    /// durable up to the page's LSN before the page itself is written.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot flush the invalid page id".to_string(),
            ));
        }

        let frame_id = self
            .page_table
            .find(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let frame = &self.frames[frame_id as usize];
        let page_snapshot = {
            let frame_guard = frame.read();
            let page = frame_guard.page.read().clone();
            page
        };

        if let Some(ref log_manager) = self.log_manager {
            log_manager.flush_till_lsn(page_snapshot.lsn)?;
        }
        self.disk_manager.write_page(&page_snapshot)?;

        frame.write().is_dirty = false;
        Ok(())
    }

    /// Flush every resident page
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        if let Some(ref log_manager) = self.log_manager {
            log_manager.trigger_flush();
            log_manager.wait_until_flush_finished();
        }
        for frame in &self.frames {
            let page_id = frame.read().page.read().page_id;
            if page_id != INVALID_PAGE_ID {
                self.flush_page(page_id)?;
            }
        }
        Ok(())
    }

    /// Drop an unpinned page from the pool and deallocate it on disk
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot delete the invalid page id".to_string(),
            ));
        }

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = &self.frames[frame_id as usize];
            let mut frame_guard = frame.write();
            if frame_guard.pin_count > 0 {
                return Err(BufferPoolError::PagePinned(page_id));
            }

            self.page_table.remove(&page_id);
            {
                let mut page_guard = frame_guard.page.write();
                *page_guard = Page::new(INVALID_PAGE_ID);
            }
            frame_guard.is_dirty = false;

            self.replacer.erase(&frame_id);
            self.free_list.lock().push_back(frame_id);
        }

        self.disk_manager.deallocate_page(page_id);
        Ok(())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn log_manager(&self) -> Option<Arc<LogManager>> {
        self.log_manager.clone()
    }

    pub fn disk_manager(&self) -> Arc<DiskManager> {
        self.disk_manager.clone()
    }

    /// Claim a frame: reuse a free one, otherwise evict the LRU victim. The
    /// victim's page-table mapping is removed here; its dirty contents are
    /// written back by `evict_frame_contents`.
    fn allocate_frame(&self) -> Result<FrameId, BufferPoolError> {
        {
            let mut free_list = self.free_list.lock();
            if let Some(frame_id) = free_list.pop_front() {
                return Ok(frame_id);
            }
        }

        let frame_id = self.replacer.victim().ok_or(BufferPoolError::NoFreeFrames)?;

        let old_page_id = self.frames[frame_id as usize].read().page.read().page_id;
        if old_page_id != INVALID_PAGE_ID {
            debug!("evicting page {} from frame {}", old_page_id, frame_id);
            self.page_table.remove(&old_page_id);
        }

        Ok(frame_id)
    }

    /// Write back the frame's current page if it is dirty, with the WAL gate
    fn evict_frame_contents(&self, frame_id: FrameId) -> Result<(), BufferPoolError> {
        let frame = &self.frames[frame_id as usize];
        let (dirty, page_snapshot) = {
            let frame_guard = frame.read();
            let result = (frame_guard.is_dirty, frame_guard.page.read().clone());
            result
        };

        if dirty && page_snapshot.page_id != INVALID_PAGE_ID {
            if let Some(ref log_manager) = self.log_manager {
                log_manager.flush_till_lsn(page_snapshot.lsn)?;
            }
            self.disk_manager.write_page(&page_snapshot)?;
            frame.write().is_dirty = false;
        }
        Ok(())
    }
}
