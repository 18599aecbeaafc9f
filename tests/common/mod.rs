use std::sync::Arc;

use anyhow::Result;
use tempfile::NamedTempFile;

use ferrodb::storage::buffer::BufferPoolManager;
use ferrodb::storage::disk::DiskManager;
use ferrodb::transaction::wal::log_manager::{LogConfig, LogManager};

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager backed by a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, path)?);
    Ok((buffer_pool, file))
}

// Create a log manager with a small buffer over a temporary log file
#[allow(dead_code)]
pub fn create_test_log_manager(buffer_size: usize) -> Result<(Arc<LogManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let disk_manager = Arc::new(DiskManager::new(path)?);
    let config = LogConfig {
        log_buffer_size: buffer_size,
        flush_timeout: std::time::Duration::from_millis(50),
    };
    Ok((Arc::new(LogManager::new(disk_manager, config)), file))
}
