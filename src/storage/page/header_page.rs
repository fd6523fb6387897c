use crate::common::{OxbowError, PageId, Result, PAGE_SIZE};

const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;

const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;

/// Maximum number of named records the header page can hold.
pub const MAX_HEADER_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// HeaderPage is the well-known page at `HEADER_PAGE_ID` holding named
/// root-pointer records, so an index can find its root page across
/// reopenings. Each record is a NUL-padded 32-byte name followed by a
/// page ID.
pub struct HeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    /// Clears every record. A zeroed page is already a valid empty header,
    /// so this is only needed when recycling a non-empty buffer.
    pub fn init(&mut self) {
        self.data.fill(0);
    }

    pub fn record_count(&self) -> usize {
        read_record_count(self.data)
    }

    /// Returns the page ID recorded under `name`, if any.
    pub fn get_record(&self, name: &str) -> Result<Option<PageId>> {
        let name = encode_name(name)?;
        Ok(find_record(self.data, &name).map(|i| record_page_id(self.data, i)))
    }

    /// Adds a new record. Returns false if the name is already present.
    pub fn insert_record(&mut self, name: &str, page_id: PageId) -> Result<bool> {
        let encoded = encode_name(name)?;
        if find_record(self.data, &encoded).is_some() {
            return Ok(false);
        }

        let count = self.record_count();
        if count >= MAX_HEADER_RECORDS {
            return Err(OxbowError::HeaderFull);
        }

        let offset = record_offset(count);
        self.data[offset..offset + NAME_SIZE].copy_from_slice(&encoded);
        self.data[offset + NAME_SIZE..offset + RECORD_SIZE]
            .copy_from_slice(&page_id.as_u32().to_le_bytes());
        self.set_record_count(count + 1);
        Ok(true)
    }

    /// Rewrites the page ID of an existing record. Returns false if the
    /// name is not present.
    pub fn update_record(&mut self, name: &str, page_id: PageId) -> Result<bool> {
        let encoded = encode_name(name)?;
        let Some(index) = find_record(self.data, &encoded) else {
            return Ok(false);
        };

        let offset = record_offset(index) + NAME_SIZE;
        self.data[offset..offset + 4].copy_from_slice(&page_id.as_u32().to_le_bytes());
        Ok(true)
    }

    /// Removes a record, compacting the tail. Returns false if the name is
    /// not present.
    pub fn delete_record(&mut self, name: &str) -> Result<bool> {
        let encoded = encode_name(name)?;
        let Some(index) = find_record(self.data, &encoded) else {
            return Ok(false);
        };

        let count = self.record_count();
        self.data.copy_within(
            record_offset(index + 1)..record_offset(count),
            record_offset(index),
        );
        self.set_record_count(count - 1);
        Ok(true)
    }

    fn set_record_count(&mut self, count: usize) {
        self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
            .copy_from_slice(&(count as u32).to_le_bytes());
    }
}

/// Read-only view over the header page.
pub struct HeaderPageRef<'a> {
    data: &'a [u8],
}

impl<'a> HeaderPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        read_record_count(self.data)
    }

    pub fn get_record(&self, name: &str) -> Result<Option<PageId>> {
        let name = encode_name(name)?;
        Ok(find_record(self.data, &name).map(|i| record_page_id(self.data, i)))
    }
}

fn read_record_count(data: &[u8]) -> usize {
    let bytes: [u8; 4] = data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
        .try_into()
        .unwrap();
    u32::from_le_bytes(bytes) as usize
}

fn record_offset(index: usize) -> usize {
    RECORDS_OFFSET + index * RECORD_SIZE
}

fn record_page_id(data: &[u8], index: usize) -> PageId {
    let offset = record_offset(index) + NAME_SIZE;
    let bytes: [u8; 4] = data[offset..offset + 4].try_into().unwrap();
    PageId::new(u32::from_le_bytes(bytes))
}

fn find_record(data: &[u8], encoded_name: &[u8; NAME_SIZE]) -> Option<usize> {
    (0..read_record_count(data)).find(|&i| {
        let offset = record_offset(i);
        &data[offset..offset + NAME_SIZE] == encoded_name
    })
}

fn encode_name(name: &str) -> Result<[u8; NAME_SIZE]> {
    let bytes = name.as_bytes();
    if bytes.len() > NAME_SIZE {
        return Err(OxbowError::NameTooLong(name.to_string()));
    }
    let mut encoded = [0u8; NAME_SIZE];
    encoded[..bytes.len()].copy_from_slice(bytes);
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_page_insert_and_get() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);

        assert_eq!(header.record_count(), 0);
        assert!(header.insert_record("orders_pk", PageId::new(7)).unwrap());
        assert!(header.insert_record("users_pk", PageId::new(9)).unwrap());
        assert_eq!(header.record_count(), 2);

        assert_eq!(
            header.get_record("orders_pk").unwrap(),
            Some(PageId::new(7))
        );
        assert_eq!(header.get_record("users_pk").unwrap(), Some(PageId::new(9)));
        assert_eq!(header.get_record("missing").unwrap(), None);
    }

    #[test]
    fn test_header_page_duplicate_insert_rejected() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);

        assert!(header.insert_record("idx", PageId::new(1)).unwrap());
        assert!(!header.insert_record("idx", PageId::new(2)).unwrap());
        assert_eq!(header.get_record("idx").unwrap(), Some(PageId::new(1)));
    }

    #[test]
    fn test_header_page_update() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);

        assert!(!header.update_record("idx", PageId::new(2)).unwrap());
        header.insert_record("idx", PageId::new(1)).unwrap();
        assert!(header.update_record("idx", PageId::new(2)).unwrap());
        assert_eq!(header.get_record("idx").unwrap(), Some(PageId::new(2)));
    }

    #[test]
    fn test_header_page_delete_compacts() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);

        header.insert_record("a", PageId::new(1)).unwrap();
        header.insert_record("b", PageId::new(2)).unwrap();
        header.insert_record("c", PageId::new(3)).unwrap();

        assert!(header.delete_record("b").unwrap());
        assert_eq!(header.record_count(), 2);
        assert_eq!(header.get_record("a").unwrap(), Some(PageId::new(1)));
        assert_eq!(header.get_record("b").unwrap(), None);
        assert_eq!(header.get_record("c").unwrap(), Some(PageId::new(3)));
    }

    #[test]
    fn test_header_page_name_too_long() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);

        let long = "x".repeat(NAME_SIZE + 1);
        assert!(matches!(
            header.insert_record(&long, PageId::new(1)),
            Err(OxbowError::NameTooLong(_))
        ));
    }

    #[test]
    fn test_header_page_ref_view() {
        let mut data = [0u8; PAGE_SIZE];
        HeaderPage::new(&mut data)
            .insert_record("idx", PageId::new(5))
            .unwrap();

        let view = HeaderPageRef::new(&data);
        assert_eq!(view.record_count(), 1);
        assert_eq!(view.get_record("idx").unwrap(), Some(PageId::new(5)));
    }

    #[test]
    fn test_header_page_full() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);

        for i in 0..MAX_HEADER_RECORDS {
            assert!(header
                .insert_record(&format!("idx_{}", i), PageId::new(i as u32))
                .unwrap());
        }
        assert!(matches!(
            header.insert_record("one_more", PageId::new(0)),
            Err(OxbowError::HeaderFull)
        ));
    }
}
