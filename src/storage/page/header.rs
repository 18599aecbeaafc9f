use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, PAGE_SIZE};

/// Record layout: 32-byte name (zero padded) followed by a u32 root page id
const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;
/// First 4 bytes of the page hold the record count
const COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;

const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// View over the header page: an ordered list of (index name, root page id)
/// records. Every index registers its root here and updates the record
/// whenever the root moves.
pub struct HeaderPage;

impl HeaderPage {
    /// Append a new record. Returns false when the name is too long, the
    /// page is full, or a record with this name already exists.
    pub fn insert_record(page: &mut Page, name: &str, root_page_id: PageId) -> bool {
        if name.len() > NAME_SIZE {
            return false;
        }
        let count = Self::record_count(page);
        if count >= MAX_RECORDS || Self::find_record(page, name).is_some() {
            return false;
        }

        let offset = RECORDS_OFFSET + count * RECORD_SIZE;
        page.data[offset..offset + NAME_SIZE].fill(0);
        page.data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        LittleEndian::write_u32(&mut page.data[offset + NAME_SIZE..offset + RECORD_SIZE], root_page_id);
        LittleEndian::write_u32(&mut page.data[COUNT_OFFSET..COUNT_OFFSET + 4], (count + 1) as u32);
        true
    }

    /// Update the root page id of an existing record. Returns false when no
    /// record with this name exists.
    pub fn update_record(page: &mut Page, name: &str, root_page_id: PageId) -> bool {
        match Self::find_record(page, name) {
            Some(index) => {
                let offset = RECORDS_OFFSET + index * RECORD_SIZE;
                LittleEndian::write_u32(
                    &mut page.data[offset + NAME_SIZE..offset + RECORD_SIZE],
                    root_page_id,
                );
                true
            }
            None => false,
        }
    }

    /// Look up the root page id registered under the given name
    pub fn get_root_id(page: &Page, name: &str) -> Option<PageId> {
        Self::find_record(page, name).map(|index| {
            let offset = RECORDS_OFFSET + index * RECORD_SIZE;
            LittleEndian::read_u32(&page.data[offset + NAME_SIZE..offset + RECORD_SIZE])
        })
    }

    pub fn record_count(page: &Page) -> usize {
        LittleEndian::read_u32(&page.data[COUNT_OFFSET..COUNT_OFFSET + 4]) as usize
    }

    fn find_record(page: &Page, name: &str) -> Option<usize> {
        if name.len() > NAME_SIZE {
            return None;
        }
        let count = Self::record_count(page);
        let mut padded = [0u8; NAME_SIZE];
        padded[..name.len()].copy_from_slice(name.as_bytes());

        (0..count).find(|&i| {
            let offset = RECORDS_OFFSET + i * RECORD_SIZE;
            page.data[offset..offset + NAME_SIZE] == padded
        })
    }
}
