use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;

use crate::common::types::{Page, PageId, PagePtr};

/// Latch acquisition mode for a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchMode {
    Read,
    Write,
}

/// An owned latch on a buffered page. Unlike a plain lock guard, the guard
/// keeps the underlying `Arc` alive, so latches can be collected in a
/// transaction's page set and carried across function boundaries while
/// crabbing down the tree. Dropping the latch releases the lock; the pin on
/// the frame is managed separately by the buffer pool.
pub enum PageLatch {
    Read(ArcRwLockReadGuard<RawRwLock, Page>),
    Write(ArcRwLockWriteGuard<RawRwLock, Page>),
}

impl PageLatch {
    /// Acquire a read latch on the page
    pub fn read(page: &PagePtr) -> Self {
        PageLatch::Read(page.read_arc())
    }

    /// Acquire a write latch on the page
    pub fn write(page: &PagePtr) -> Self {
        PageLatch::Write(page.write_arc())
    }

    /// Acquire a latch in the given mode
    pub fn acquire(page: &PagePtr, mode: LatchMode) -> Self {
        match mode {
            LatchMode::Read => Self::read(page),
            LatchMode::Write => Self::write(page),
        }
    }

    pub fn mode(&self) -> LatchMode {
        match self {
            PageLatch::Read(_) => LatchMode::Read,
            PageLatch::Write(_) => LatchMode::Write,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page().page_id
    }

    pub fn page(&self) -> &Page {
        match self {
            PageLatch::Read(guard) => guard,
            PageLatch::Write(guard) => guard,
        }
    }

    /// Mutable access to the page; None when only a read latch is held
    pub fn page_mut(&mut self) -> Option<&mut Page> {
        match self {
            PageLatch::Read(_) => None,
            PageLatch::Write(guard) => Some(&mut *guard),
        }
    }
}

impl std::fmt::Debug for PageLatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageLatch")
            .field("page_id", &self.page_id())
            .field("mode", &self.mode())
            .finish()
    }
}
