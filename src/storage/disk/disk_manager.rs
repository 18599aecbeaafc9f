use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Page, PageId, INVALID_PAGE_ID, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager is responsible for the actual file I/O: page reads and writes
/// against the database file and append-only writes against the log file.
pub struct DiskManager {
    db_file: Mutex<File>,
    log_file: Mutex<File>,
}

impl DiskManager {
    /// Create a new DiskManager with the specified database file. The log
    /// lives in a sibling file with a `.log` suffix. Page 1 is reserved for
    /// the header page, so a fresh database file is pre-extended by one page.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let db_path = db_path.as_ref();
        let db_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        let mut log_path = db_path.as_os_str().to_owned();
        log_path.push(".log");
        let log_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&log_path)?;

        let manager = Self {
            db_file: Mutex::new(db_file),
            log_file: Mutex::new(log_file),
        };

        // Reserve the header page so allocate_page never hands out page 1.
        {
            let mut file = manager.db_file.lock();
            if file.metadata()?.len() == 0 {
                file.write_all(&[0u8; PAGE_SIZE])?;
                file.flush()?;
            }
        }

        Ok(manager)
    }

    /// Read a page from disk
    pub fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), DiskManagerError> {
        if page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = self.page_offset(page_id);
        let mut buffer = [0u8; PAGE_SIZE];

        {
            let mut file = self.db_file.lock();
            let file_size = file.metadata()?.len();

            // Reading past the end of the file yields a zeroed page.
            if offset as u64 >= file_size {
                page.data.fill(0);
                page.page_id = page_id;
                return Ok(());
            }

            file.seek(SeekFrom::Start(offset as u64))?;
            file.read_exact(&mut buffer)?;
        }

        page.data.copy_from_slice(&buffer);
        page.page_id = page_id;

        Ok(())
    }

    /// Write a page to disk
    pub fn write_page(&self, page: &Page) -> Result<(), DiskManagerError> {
        if page.page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page.page_id));
        }

        let offset = self.page_offset(page.page_id);

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(&page.data)?;
        file.flush()?;

        Ok(())
    }

    /// Allocate a new page on disk and return its ID
    pub fn allocate_page(&self) -> Result<PageId, DiskManagerError> {
        let mut file = self.db_file.lock();

        let file_size = file.metadata()?.len();
        // First page is 1, not 0
        let new_page_id = (file_size / PAGE_SIZE as u64) as PageId + 1;

        file.seek(SeekFrom::End(0))?;
        file.write_all(&[0u8; PAGE_SIZE])?;
        file.flush()?;

        Ok(new_page_id)
    }

    /// Deallocate a page. The file is not shrunk and the page id is not
    /// recycled; the slot simply becomes dead space.
    pub fn deallocate_page(&self, _page_id: PageId) {}

    /// Append raw log bytes to the log file and sync them to disk
    pub fn write_log(&self, data: &[u8]) -> Result<(), DiskManagerError> {
        if data.is_empty() {
            return Ok(());
        }
        let mut file = self.log_file.lock();
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        file.sync_data()?;
        Ok(())
    }

    /// Read log bytes starting at the given offset. Returns false when the
    /// offset is at or past the end of the log; a short tail fills only a
    /// prefix of the buffer and the remainder is zeroed.
    pub fn read_log(&self, buf: &mut [u8], offset: u64) -> Result<bool, DiskManagerError> {
        let mut file = self.log_file.lock();
        let file_size = file.metadata()?.len();
        if offset >= file_size {
            return Ok(false);
        }

        file.seek(SeekFrom::Start(offset))?;
        let available = ((file_size - offset) as usize).min(buf.len());
        file.read_exact(&mut buf[..available])?;
        buf[available..].fill(0);

        Ok(true)
    }

    /// Size of the log file in bytes
    pub fn log_size(&self) -> Result<u64, DiskManagerError> {
        Ok(self.log_file.lock().metadata()?.len())
    }

    fn page_offset(&self, page_id: PageId) -> usize {
        (page_id as usize - 1) * PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_page_round_trip() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        let page_id = disk.allocate_page().unwrap();
        assert!(page_id > 1, "page 1 is reserved for the header page");

        let mut page = Page::new(page_id);
        page.data[0] = 0xAB;
        page.data[PAGE_SIZE - 1] = 0xCD;
        disk.write_page(&page).unwrap();

        let mut read_back = Page::new(INVALID_PAGE_ID);
        disk.read_page(page_id, &mut read_back).unwrap();
        assert_eq!(read_back.page_id, page_id);
        assert_eq!(read_back.data[0], 0xAB);
        assert_eq!(read_back.data[PAGE_SIZE - 1], 0xCD);
    }

    #[test]
    fn test_log_round_trip() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        disk.write_log(b"hello").unwrap();
        disk.write_log(b" world").unwrap();

        let mut buf = [0u8; 11];
        assert!(disk.read_log(&mut buf, 0).unwrap());
        assert_eq!(&buf, b"hello world");

        // Reading past the end reports exhaustion
        assert!(!disk.read_log(&mut buf, 11).unwrap());
    }
}
