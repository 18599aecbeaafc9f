use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::types::{Lsn, PageId, Rid, TxnId, INVALID_LSN};

/// Error type for log record encoding and decoding
#[derive(Error, Debug)]
pub enum LogRecordError {
    #[error("Failed to serialize log record: {0}")]
    SerializationError(String),

    #[error("Failed to deserialize log record: {0}")]
    DeserializationError(String),

    #[error("Log record header does not match its payload")]
    InvalidFormat,
}

pub type Result<T> = std::result::Result<T, LogRecordError>;

/// Fixed record header: size, lsn, prev_lsn, txn_id and type, five LE u32s
pub const HEADER_SIZE: usize = 20;

/// Types of log records produced by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecordType {
    Begin,
    Commit,
    Abort,
    Insert,
    MarkDelete,
    ApplyDelete,
    RollbackDelete,
    Update,
    NewPage,
}

impl LogRecordType {
    fn as_u32(self) -> u32 {
        match self {
            LogRecordType::Begin => 1,
            LogRecordType::Commit => 2,
            LogRecordType::Abort => 3,
            LogRecordType::Insert => 4,
            LogRecordType::MarkDelete => 5,
            LogRecordType::ApplyDelete => 6,
            LogRecordType::RollbackDelete => 7,
            LogRecordType::Update => 8,
            LogRecordType::NewPage => 9,
        }
    }

    fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(LogRecordType::Begin),
            2 => Some(LogRecordType::Commit),
            3 => Some(LogRecordType::Abort),
            4 => Some(LogRecordType::Insert),
            5 => Some(LogRecordType::MarkDelete),
            6 => Some(LogRecordType::ApplyDelete),
            7 => Some(LogRecordType::RollbackDelete),
            8 => Some(LogRecordType::Update),
            9 => Some(LogRecordType::NewPage),
            _ => None,
        }
    }
}

/// Type-specific payload of a log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogRecordBody {
    Begin,
    Commit,
    Abort,
    Insert { rid: Rid, tuple: Vec<u8> },
    MarkDelete { rid: Rid, tuple: Vec<u8> },
    ApplyDelete { rid: Rid, tuple: Vec<u8> },
    RollbackDelete { rid: Rid, tuple: Vec<u8> },
    Update { rid: Rid, old_tuple: Vec<u8>, new_tuple: Vec<u8> },
    NewPage { prev_page_id: PageId },
}

impl LogRecordBody {
    pub fn record_type(&self) -> LogRecordType {
        match self {
            LogRecordBody::Begin => LogRecordType::Begin,
            LogRecordBody::Commit => LogRecordType::Commit,
            LogRecordBody::Abort => LogRecordType::Abort,
            LogRecordBody::Insert { .. } => LogRecordType::Insert,
            LogRecordBody::MarkDelete { .. } => LogRecordType::MarkDelete,
            LogRecordBody::ApplyDelete { .. } => LogRecordType::ApplyDelete,
            LogRecordBody::RollbackDelete { .. } => LogRecordType::RollbackDelete,
            LogRecordBody::Update { .. } => LogRecordType::Update,
            LogRecordBody::NewPage { .. } => LogRecordType::NewPage,
        }
    }
}

/// A single write-ahead log record. `lsn` is assigned by the log manager at
/// append time; `prev_lsn` links to the transaction's previous record.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub prev_lsn: Lsn,
    pub body: LogRecordBody,
}

impl LogRecord {
    pub fn new(txn_id: TxnId, prev_lsn: Lsn, body: LogRecordBody) -> Self {
        Self {
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            body,
        }
    }

    pub fn new_begin(txn_id: TxnId) -> Self {
        Self::new(txn_id, INVALID_LSN, LogRecordBody::Begin)
    }

    pub fn new_commit(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordBody::Commit)
    }

    pub fn new_abort(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordBody::Abort)
    }

    pub fn new_insert(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Vec<u8>) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordBody::Insert { rid, tuple })
    }

    pub fn new_mark_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Vec<u8>) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordBody::MarkDelete { rid, tuple })
    }

    pub fn new_apply_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Vec<u8>) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordBody::ApplyDelete { rid, tuple })
    }

    pub fn new_rollback_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Vec<u8>) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordBody::RollbackDelete { rid, tuple })
    }

    pub fn new_update(
        txn_id: TxnId,
        prev_lsn: Lsn,
        rid: Rid,
        old_tuple: Vec<u8>,
        new_tuple: Vec<u8>,
    ) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordBody::Update {
                rid,
                old_tuple,
                new_tuple,
            },
        )
    }

    pub fn new_new_page(txn_id: TxnId, prev_lsn: Lsn, prev_page_id: PageId) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordBody::NewPage { prev_page_id })
    }

    pub fn record_type(&self) -> LogRecordType {
        self.body.record_type()
    }

    /// Total on-disk size of the record: fixed header plus encoded payload
    pub fn serialized_size(&self) -> Result<usize> {
        let payload = bincode::serialized_size(&self.body)
            .map_err(|e| LogRecordError::SerializationError(e.to_string()))?;
        Ok(HEADER_SIZE + payload as usize)
    }

    /// Encode the record as header + bincode payload
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(&self.body)
            .map_err(|e| LogRecordError::SerializationError(e.to_string()))?;

        let total = HEADER_SIZE + payload.len();
        let mut buf = vec![0u8; total];
        LittleEndian::write_u32(&mut buf[0..4], total as u32);
        LittleEndian::write_u32(&mut buf[4..8], self.lsn);
        LittleEndian::write_u32(&mut buf[8..12], self.prev_lsn);
        LittleEndian::write_u32(&mut buf[12..16], self.txn_id);
        LittleEndian::write_u32(&mut buf[16..20], self.record_type().as_u32());
        buf[HEADER_SIZE..].copy_from_slice(&payload);
        Ok(buf)
    }

    /// Decode one record from the front of the buffer, returning the record
    /// and the number of bytes it occupied
    pub fn deserialize(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < HEADER_SIZE {
            return Err(LogRecordError::DeserializationError(
                "buffer shorter than record header".to_string(),
            ));
        }

        let total = LittleEndian::read_u32(&buf[0..4]) as usize;
        if total < HEADER_SIZE || total > buf.len() {
            return Err(LogRecordError::DeserializationError(format!(
                "record size {} out of bounds",
                total
            )));
        }

        let lsn = LittleEndian::read_u32(&buf[4..8]);
        let prev_lsn = LittleEndian::read_u32(&buf[8..12]);
        let txn_id = LittleEndian::read_u32(&buf[12..16]);
        let type_code = LittleEndian::read_u32(&buf[16..20]);
        let record_type =
            LogRecordType::from_u32(type_code).ok_or(LogRecordError::InvalidFormat)?;

        let body: LogRecordBody = bincode::deserialize(&buf[HEADER_SIZE..total])
            .map_err(|e| LogRecordError::DeserializationError(e.to_string()))?;
        if body.record_type() != record_type {
            return Err(LogRecordError::InvalidFormat);
        }

        Ok((
            Self {
                lsn,
                txn_id,
                prev_lsn,
                body,
            },
            total,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut record = LogRecord::new_insert(7, 3, Rid::new(4, 2), vec![1, 2, 3]);
        record.lsn = 11;

        let bytes = record.serialize().unwrap();
        assert_eq!(bytes.len(), record.serialized_size().unwrap());

        let (decoded, consumed) = LogRecord::deserialize(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_decode_consecutive_records(){
        let mut first = LogRecord::new_begin(1);
        first.lsn = 1;
        let mut second = LogRecord::new_new_page(1, 1, 9);
        second.lsn = 2;

        let mut bytes = first.serialize().unwrap();
        bytes.extend(second.serialize().unwrap());

        let (a, used) = LogRecord::deserialize(&bytes).unwrap();
        let (b, _) = LogRecord::deserialize(&bytes[used..]).unwrap();
        assert_eq!(a.record_type(), LogRecordType::Begin);
        assert_eq!(b.record_type(), LogRecordType::NewPage);
        assert_eq!(b.prev_lsn, 1);
    }

    #[test]
    fn test_reject_mismatched_header() {
        let mut record = LogRecord::new_commit(1, 5);
        record.lsn = 6;
        let mut bytes = record.serialize().unwrap();
        // Corrupt the type field so it disagrees with the payload
        LittleEndian::write_u32(&mut bytes[16..20], 3);
        assert!(LogRecord::deserialize(&bytes).is_err());
    }
}
