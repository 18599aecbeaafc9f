pub mod header;
pub mod latch;

pub use header::HeaderPage;
pub use latch::{LatchMode, PageLatch};
