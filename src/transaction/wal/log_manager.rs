use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::common::types::{Lsn, INVALID_LSN};
use crate::storage::disk::{DiskManager, DiskManagerError};
use crate::transaction::wal::log_record::{LogRecord, LogRecordError, HEADER_SIZE};

/// Error type for log manager operations
#[derive(Error, Debug)]
pub enum LogError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Disk manager error: {0}")]
    DiskManagerError(#[from] DiskManagerError),

    #[error("Log record error: {0}")]
    RecordError(#[from] LogRecordError),

    #[error("Log record of {size} bytes exceeds the log buffer capacity {capacity}")]
    RecordTooLarge { size: usize, capacity: usize },
}

pub type Result<T> = std::result::Result<T, LogError>;

/// Configuration for the log manager
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Capacity of each of the two log buffers, in bytes
    pub log_buffer_size: usize,

    /// How long the background flusher sleeps between unsolicited flushes
    pub flush_timeout: Duration,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_buffer_size: 64 * 1024,
            flush_timeout: Duration::from_millis(300),
        }
    }
}

/// Counters and the two buffers, all behind one state latch. `log_buffer`
/// is the append side; `flush_buffer` is owned by the flusher while a write
/// is in flight.
struct LogState {
    log_buffer: Vec<u8>,
    log_buffer_size: usize,
    log_buffer_last_lsn: Lsn,
    flush_buffer: Vec<u8>,
    flush_buffer_size: usize,
    next_lsn: Lsn,
    persistent_lsn: Lsn,
}

struct LogInner {
    config: LogConfig,
    disk_manager: Arc<DiskManager>,
    /// Serializes appenders, fixing the serialization order of records
    append_latch: Mutex<()>,
    state: Mutex<LogState>,
    /// Wakes the background flusher
    flush_cv: Condvar,
    /// Wakes appenders blocked on a full buffer and flush waiters
    flushed_cv: Condvar,
    flush_thread_on: AtomicBool,
}

/// Write-ahead log manager with a double-buffered background flusher.
///
/// Appenders serialize records into `log_buffer`; the flusher swaps the two
/// buffers under the state latch, performs the blocking write with no latch
/// held, then publishes `persistent_lsn`. A flush is triggered when the
/// buffer fills, when a caller asks for one, or on a timer.
pub struct LogManager {
    inner: Arc<LogInner>,
    flush_thread: Mutex<Option<JoinHandle<()>>>,
}

impl LogManager {
    pub fn new(disk_manager: Arc<DiskManager>, config: LogConfig) -> Self {
        let state = LogState {
            log_buffer: vec![0; config.log_buffer_size],
            log_buffer_size: 0,
            log_buffer_last_lsn: INVALID_LSN,
            flush_buffer: vec![0; config.log_buffer_size],
            flush_buffer_size: 0,
            next_lsn: 1,
            persistent_lsn: INVALID_LSN,
        };
        Self {
            inner: Arc::new(LogInner {
                config,
                disk_manager,
                append_latch: Mutex::new(()),
                state: Mutex::new(state),
                flush_cv: Condvar::new(),
                flushed_cv: Condvar::new(),
                flush_thread_on: AtomicBool::new(false),
            }),
            flush_thread: Mutex::new(None),
        }
    }

    /// Append a record: assign its LSN and serialize it into the log
    /// buffer, blocking until the flusher has drained the buffer when there
    /// is no room. Returns the assigned LSN.
    pub fn append_log_record(&self, record: &mut LogRecord) -> Result<Lsn> {
        let inner = &*self.inner;
        let _append = inner.append_latch.lock();
        let mut state = inner.state.lock();

        let size = record.serialized_size()?;
        debug_assert!(size >= HEADER_SIZE);
        if size > state.log_buffer.len() {
            return Err(LogError::RecordTooLarge {
                size,
                capacity: state.log_buffer.len(),
            });
        }

        while state.log_buffer_size + size > state.log_buffer.len() {
            inner.flush_cv.notify_one();
            inner.flushed_cv.wait(&mut state);
        }

        record.lsn = state.next_lsn;
        state.next_lsn += 1;

        let bytes = record.serialize()?;
        let pos = state.log_buffer_size;
        state.log_buffer[pos..pos + bytes.len()].copy_from_slice(&bytes);
        state.log_buffer_size += bytes.len();
        state.log_buffer_last_lsn = record.lsn;

        Ok(record.lsn)
    }

    /// Start the background flush thread; no-op if it is already running
    pub fn run_flush_thread(&self) {
        if self.inner.flush_thread_on.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = self.inner.clone();
        let handle = std::thread::spawn(move || background_flush(inner));
        *self.flush_thread.lock() = Some(handle);
    }

    /// Stop and join the background flush thread, flushing pending records
    pub fn stop_flush_thread(&self) {
        if !self.inner.flush_thread_on.swap(false, Ordering::SeqCst) {
            return;
        }
        // Wake the flusher so it does not sit out its timeout before exiting
        self.inner.flush_cv.notify_all();
        if let Some(handle) = self.flush_thread.lock().take() {
            let _ = handle.join();
        }
    }

    /// Wake the background flusher
    pub fn trigger_flush(&self) {
        self.inner.flush_cv.notify_one();
    }

    /// Block until both log buffers are drained, so that every record
    /// appended before this call is durable on return
    pub fn wait_until_flush_finished(&self) {
        let mut state = self.inner.state.lock();
        while state.log_buffer_size != 0 || state.flush_buffer_size != 0 {
            self.inner.flushed_cv.wait(&mut state);
        }
    }

    /// Largest LSN known to be durable on disk
    pub fn persistent_lsn(&self) -> Lsn {
        self.inner.state.lock().persistent_lsn
    }

    /// LSN that will be assigned to the next appended record
    pub fn next_lsn(&self) -> Lsn {
        self.inner.state.lock().next_lsn
    }

    /// Force the log durable at least up to `lsn`. Used by the buffer pool
    /// before writing back a dirty page whose LSN is past the durable prefix.
    pub fn flush_till_lsn(&self, lsn: Lsn) -> Result<()> {
        if lsn == INVALID_LSN {
            return Ok(());
        }
        while self.persistent_lsn() < lsn {
            self.trigger_flush();
            self.wait_until_flush_finished();
        }
        Ok(())
    }
}

impl Drop for LogManager {
    fn drop(&mut self) {
        self.stop_flush_thread();
    }
}

/// One cycle: wait for work (or a timeout tick), swap the buffers under the
/// state latch, write the flush buffer with no latch held, then reacquire to
/// publish `persistent_lsn` and release the flush buffer.
fn background_flush(inner: Arc<LogInner>) {
    loop {
        let mut state = inner.state.lock();
        if state.log_buffer_size == 0 {
            if !inner.flush_thread_on.load(Ordering::SeqCst) {
                break;
            }
            inner
                .flush_cv
                .wait_for(&mut state, inner.config.flush_timeout);
            if state.log_buffer_size == 0 {
                continue;
            }
        }

        let state_ref = &mut *state;
        std::mem::swap(&mut state_ref.log_buffer, &mut state_ref.flush_buffer);
        state.flush_buffer_size = state.log_buffer_size;
        let last_lsn = state.log_buffer_last_lsn;
        state.log_buffer_size = 0;
        // The append side is empty again; unblock writers during the I/O
        inner.flushed_cv.notify_all();

        let len = state.flush_buffer_size;
        let buffer = std::mem::take(&mut state.flush_buffer);
        drop(state);

        let write_result = inner.disk_manager.write_log(&buffer[..len]);

        let mut state = inner.state.lock();
        state.flush_buffer = buffer;
        state.flush_buffer_size = 0;
        match write_result {
            Ok(()) => {
                state.persistent_lsn = last_lsn;
                debug!("flushed log up to lsn {}", last_lsn);
            }
            Err(e) => error!("log flush failed: {}", e),
        }
        inner.flushed_cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::Rid;
    use tempfile::NamedTempFile;

    fn create_log_manager(buffer_size: usize) -> (LogManager, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let disk = Arc::new(DiskManager::new(file.path()).unwrap());
        let config = LogConfig {
            log_buffer_size: buffer_size,
            flush_timeout: Duration::from_millis(50),
        };
        (LogManager::new(disk, config), file)
    }

    #[test]
    fn test_lsn_assignment_is_serial() {
        let (log_manager, _file) = create_log_manager(4096);

        let mut first = LogRecord::new_begin(1);
        let mut second = LogRecord::new_commit(1, 0);
        let lsn1 = log_manager.append_log_record(&mut first).unwrap();
        let lsn2 = log_manager.append_log_record(&mut second).unwrap();

        assert_eq!(lsn1, 1);
        assert_eq!(lsn2, 2);
        assert_eq!(first.lsn, lsn1);
    }

    #[test]
    fn test_flush_publishes_persistent_lsn() {
        let (log_manager, _file) = create_log_manager(4096);
        log_manager.run_flush_thread();

        let mut last_lsn = 0;
        for i in 0..10 {
            let mut record = LogRecord::new_insert(1, last_lsn, Rid::new(2, i), vec![i as u8; 16]);
            last_lsn = log_manager.append_log_record(&mut record).unwrap();
        }

        log_manager.trigger_flush();
        log_manager.wait_until_flush_finished();
        assert_eq!(log_manager.persistent_lsn(), last_lsn);

        log_manager.stop_flush_thread();
    }

    #[test]
    fn test_full_buffer_blocks_then_drains() {
        // Buffer fits only a couple of records, forcing appenders to block
        // on the flusher repeatedly
        let (log_manager, file) = create_log_manager(128);
        log_manager.run_flush_thread();

        let mut last_lsn = 0;
        for i in 0..100u32 {
            let mut record =
                LogRecord::new_insert(1, last_lsn, Rid::new(3, i), vec![0xAB; 24]);
            last_lsn = log_manager.append_log_record(&mut record).unwrap();
        }
        log_manager.trigger_flush();
        log_manager.wait_until_flush_finished();
        assert_eq!(log_manager.persistent_lsn(), last_lsn);
        log_manager.stop_flush_thread();

        // All 100 records made it to the log file, in LSN order
        let disk = DiskManager::new(file.path()).unwrap();
        let size = disk.log_size().unwrap() as usize;
        let mut bytes = vec![0u8; size];
        assert!(disk.read_log(&mut bytes, 0).unwrap());

        let mut offset = 0;
        let mut expected_lsn = 1;
        while offset < size {
            let (record, used) = LogRecord::deserialize(&bytes[offset..]).unwrap();
            assert_eq!(record.lsn, expected_lsn);
            expected_lsn += 1;
            offset += used;
        }
        assert_eq!(expected_lsn - 1, last_lsn);
    }

    #[test]
    fn test_oversized_record_rejected() {
        let (log_manager, _file) = create_log_manager(64);
        let mut record = LogRecord::new_insert(1, 0, Rid::new(1, 1), vec![0; 256]);
        assert!(matches!(
            log_manager.append_log_record(&mut record),
            Err(LogError::RecordTooLarge { .. })
        ));
    }
}
