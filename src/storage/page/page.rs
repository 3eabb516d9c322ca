//! Page - the fixed-size unit of storage.
//!
//! A [`Page`] is the raw byte image of one block. Its size is chosen when the
//! database file is created and never changes afterwards, so pages are
//! heap-allocated rather than fixed-size arrays.

use super::page_header::PageHeader;

/// The raw image of one block, exactly `page_size` bytes.
///
/// This is the unit of I/O between the [`DiskManager`](crate::storage::DiskManager),
/// the node codec and the recovery journal. The buffer pool caches decoded
/// nodes, not pages.
///
/// # Clone Implementation
/// `Page` does NOT implement `Clone` in production code; copying a block
/// should be explicit. A `#[cfg(test)]` Clone is provided for tests.
///
/// # Example
/// ```
/// use bptreedb::storage::page::Page;
///
/// let mut page = Page::new(4096);
/// page.as_mut_slice()[20] = 0xFF;
/// assert_eq!(page.as_slice()[20], 0xFF);
/// assert_eq!(page.len(), 4096);
/// ```
pub struct Page {
    data: Box<[u8]>,
}

impl Page {
    /// Create a new zeroed page of `page_size` bytes.
    ///
    /// # Panics
    /// Panics if `page_size` cannot hold a [`PageHeader`].
    pub fn new(page_size: usize) -> Self {
        assert!(page_size >= PageHeader::SIZE, "page too small for header");
        Self {
            data: vec![0u8; page_size].into_boxed_slice(),
        }
    }

    /// Wrap an existing block image.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        assert!(bytes.len() >= PageHeader::SIZE, "page too small for header");
        Self {
            data: bytes.into_boxed_slice(),
        }
    }

    /// Get immutable slice of page data.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Get mutable slice of page data.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Size of the page in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Pages are never empty; present for clippy's `len_without_is_empty`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Zero out the entire page.
    pub fn reset(&mut self) {
        self.data.fill(0);
    }

    /// Bytes after the header.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data[PageHeader::SIZE..]
    }

    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data[PageHeader::SIZE..]
    }

    /// Read the page header.
    pub fn header(&self) -> PageHeader {
        PageHeader::from_bytes(&self.data)
    }

    /// Write a page header.
    pub fn set_header(&mut self, header: &PageHeader) {
        header.write_to(&mut self.data);
    }

    /// Compute and store checksum in the header.
    ///
    /// Call this after all modifications to the page are complete.
    pub fn update_checksum(&mut self) {
        let checksum = PageHeader::compute_checksum(&self.data);
        self.data[PageHeader::OFFSET_CHECKSUM..PageHeader::OFFSET_CHECKSUM + 4]
            .copy_from_slice(&checksum.to_le_bytes());
    }

    /// Verify the page checksum is valid.
    pub fn verify_checksum(&self) -> bool {
        self.header().verify_checksum(&self.data)
    }
}

// Clone only available in tests - forces explicit copying in production
#[cfg(test)]
impl Clone for Page {
    fn clone(&self) -> Self {
        Page::from_bytes(self.data.to_vec())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::PageType;

    #[test]
    fn test_page_new_is_zeroed() {
        let page = Page::new(512);
        assert_eq!(page.len(), 512);
        assert!(page.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    #[should_panic(expected = "page too small for header")]
    fn test_page_too_small() {
        Page::new(8);
    }

    #[test]
    fn test_payload_starts_after_header() {
        let mut page = Page::new(512);
        page.payload_mut()[0] = 0xAB;
        assert_eq!(page.as_slice()[PageHeader::SIZE], 0xAB);
        assert_eq!(page.payload().len(), 512 - PageHeader::SIZE);
    }

    #[test]
    fn test_checksum_roundtrip() {
        let mut page = Page::new(1024);
        page.set_header(&PageHeader::new(PageType::BTreeLeaf));
        page.payload_mut()[10] = 0x42;
        page.update_checksum();
        assert!(page.verify_checksum());

        page.payload_mut()[10] = 0x43;
        assert!(!page.verify_checksum());
    }

    #[test]
    fn test_zeroed_page_fails_checksum() {
        // An allocated block that was never written must not look valid.
        let page = Page::new(512);
        assert!(!page.verify_checksum());
    }

    #[test]
    fn test_page_reset() {
        let mut page = Page::new(512);
        page.as_mut_slice()[0] = 0xFF;
        page.as_mut_slice()[100] = 0xAB;

        page.reset();

        assert_eq!(page.as_slice()[0], 0);
        assert_eq!(page.as_slice()[100], 0);
    }
}
