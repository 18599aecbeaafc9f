use thiserror::Error;

use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum BTreeError {
    /// No free frame was available for an index page; the in-flight
    /// operation is aborted and its latches and pins are released
    #[error("Out of memory: no free frame for an index page")]
    OutOfMemory,

    #[error("Index corruption: {0}")]
    Corruption(String),

    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),
}

impl BTreeError {
    /// Fetch and allocation failures surface as out-of-memory per the
    /// index's failure contract; everything else passes through
    pub(crate) fn from_buffer_pool(error: BufferPoolError) -> Self {
        match error {
            BufferPoolError::NoFreeFrames => BTreeError::OutOfMemory,
            other => BTreeError::BufferPool(other),
        }
    }
}
