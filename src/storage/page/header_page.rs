use crate::common::{PageId, PAGE_SIZE};

const COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;

/// Bytes reserved for an index name inside a record (null padded).
const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;

/// Maximum number of records the header page can hold.
pub const MAX_HEADER_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// The header page holds a small registry mapping index names to their root
/// page ids. It lives at HEADER_PAGE_ID and is updated by the B+ tree every
/// time its root changes.
///
/// Layout: record count, then fixed-size (name, root_page_id) records.
pub struct HeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn init(&mut self) {
        self.data.fill(0);
    }

    pub fn record_count(&self) -> usize {
        HeaderPageRef::new(self.data).record_count()
    }

    pub fn get_record(&self, name: &str) -> Option<PageId> {
        HeaderPageRef::new(self.data).get_record(name)
    }

    /// Registers a new index. Returns false if the name already exists or the
    /// name does not fit; false also when the page is out of record slots.
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        if name.len() > NAME_SIZE || self.find_record(name).is_some() {
            return false;
        }
        let count = self.record_count();
        if count >= MAX_HEADER_RECORDS {
            return false;
        }

        self.write_record(count, name, root_page_id);
        self.set_record_count(count + 1);
        true
    }

    /// Points an existing index at a new root. Returns false if the name is
    /// not registered.
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        match self.find_record(name) {
            Some(index) => {
                let offset = RECORDS_OFFSET + index * RECORD_SIZE + NAME_SIZE;
                self.data[offset..offset + 4].copy_from_slice(&root_page_id.as_u32().to_le_bytes());
                true
            }
            None => false,
        }
    }

    fn find_record(&self, name: &str) -> Option<usize> {
        HeaderPageRef::new(self.data).find_record(name)
    }

    fn set_record_count(&mut self, count: usize) {
        self.data[COUNT_OFFSET..COUNT_OFFSET + 4].copy_from_slice(&(count as u32).to_le_bytes());
    }

    fn write_record(&mut self, index: usize, name: &str, root_page_id: PageId) {
        let offset = RECORDS_OFFSET + index * RECORD_SIZE;
        self.data[offset..offset + NAME_SIZE].fill(0);
        self.data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        self.data[offset + NAME_SIZE..offset + RECORD_SIZE]
            .copy_from_slice(&root_page_id.as_u32().to_le_bytes());
    }
}

/// Read-only view of the header page.
pub struct HeaderPageRef<'a> {
    data: &'a [u8],
}

impl<'a> HeaderPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        let bytes: [u8; 4] = self.data[COUNT_OFFSET..COUNT_OFFSET + 4].try_into().unwrap();
        u32::from_le_bytes(bytes) as usize
    }

    pub fn get_record(&self, name: &str) -> Option<PageId> {
        self.find_record(name).map(|index| {
            let offset = RECORDS_OFFSET + index * RECORD_SIZE + NAME_SIZE;
            let bytes: [u8; 4] = self.data[offset..offset + 4].try_into().unwrap();
            PageId::new(u32::from_le_bytes(bytes))
        })
    }

    fn find_record(&self, name: &str) -> Option<usize> {
        if name.len() > NAME_SIZE {
            return None;
        }
        let count = self.record_count();
        for index in 0..count {
            let offset = RECORDS_OFFSET + index * RECORD_SIZE;
            let stored = &self.data[offset..offset + NAME_SIZE];
            let end = stored.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
            if &stored[..end] == name.as_bytes() {
                return Some(index);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::INVALID_PAGE_ID;

    #[test]
    fn test_header_page_insert_and_get() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);
        header.init();

        assert!(header.insert_record("orders_pk", PageId::new(7)));
        assert!(header.insert_record("users_pk", PageId::new(12)));
        assert_eq!(header.record_count(), 2);

        assert_eq!(header.get_record("orders_pk"), Some(PageId::new(7)));
        assert_eq!(header.get_record("users_pk"), Some(PageId::new(12)));
        assert_eq!(header.get_record("missing"), None);
    }

    #[test]
    fn test_header_page_duplicate_insert_rejected() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);
        header.init();

        assert!(header.insert_record("idx", PageId::new(1)));
        assert!(!header.insert_record("idx", PageId::new(2)));
        assert_eq!(header.get_record("idx"), Some(PageId::new(1)));
    }

    #[test]
    fn test_header_page_update() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);
        header.init();

        assert!(!header.update_record("idx", PageId::new(2)));
        assert!(header.insert_record("idx", PageId::new(1)));
        assert!(header.update_record("idx", INVALID_PAGE_ID));
        assert_eq!(header.get_record("idx"), Some(INVALID_PAGE_ID));
    }

    #[test]
    fn test_header_page_full() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);
        header.init();

        for i in 0..MAX_HEADER_RECORDS {
            assert!(header.insert_record(&format!("idx_{}", i), PageId::new(i as u32)));
        }
        assert!(!header.insert_record("one_too_many", PageId::new(0)));
    }
}
