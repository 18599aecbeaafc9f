use std::cmp::Ordering;
use std::fmt::Debug;

use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::Rid;

/// A fixed-width key type storable in index pages. Every key of a given
/// type occupies exactly `ENCODED_LEN` bytes in the page's entry array.
pub trait IndexKey: Clone + Debug + Send + Sync + 'static {
    const ENCODED_LEN: usize;

    fn encode(&self, buf: &mut [u8]);
    fn decode(buf: &[u8]) -> Self;
}

/// A fixed-width value type storable in leaf entries
pub trait IndexValue: Clone + Debug + PartialEq + Send + Sync + 'static {
    const ENCODED_LEN: usize;

    fn encode(&self, buf: &mut [u8]);
    fn decode(buf: &[u8]) -> Self;
}

/// Three-way comparison over keys: the seam through which callers supply
/// ordering semantics to the tree
pub trait KeyComparator<K>: Clone + Send + Sync {
    fn compare(&self, lhs: &K, rhs: &K) -> Ordering;
}

/// Comparator for keys with a natural order
#[derive(Debug, Clone, Copy, Default)]
pub struct OrdComparator;

impl<K: Ord> KeyComparator<K> for OrdComparator {
    fn compare(&self, lhs: &K, rhs: &K) -> Ordering {
        lhs.cmp(rhs)
    }
}

macro_rules! integer_index_key {
    ($ty:ty, $len:expr, $write:ident, $read:ident) => {
        impl IndexKey for $ty {
            const ENCODED_LEN: usize = $len;

            fn encode(&self, buf: &mut [u8]) {
                LittleEndian::$write(&mut buf[..$len], *self);
            }

            fn decode(buf: &[u8]) -> Self {
                LittleEndian::$read(&buf[..$len])
            }
        }
    };
}

integer_index_key!(i32, 4, write_i32, read_i32);
integer_index_key!(i64, 8, write_i64, read_i64);
integer_index_key!(u32, 4, write_u32, read_u32);
integer_index_key!(u64, 8, write_u64, read_u64);

impl IndexValue for Rid {
    const ENCODED_LEN: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.page_id);
        LittleEndian::write_u32(&mut buf[4..8], self.slot_num);
    }

    fn decode(buf: &[u8]) -> Self {
        Rid {
            page_id: LittleEndian::read_u32(&buf[0..4]),
            slot_num: LittleEndian::read_u32(&buf[4..8]),
        }
    }
}

impl IndexValue for u64 {
    const ENCODED_LEN: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(&mut buf[..8], *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_u64(&buf[..8])
    }
}
