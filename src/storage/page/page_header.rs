//! Page header and type definitions.
//!
//! Every block starts with a [`PageHeader`] containing:
//! - [`PageType`] discriminator
//! - Key count of the node stored in the block
//! - CRC32 checksum for integrity
//! - A link to another block (next leaf / next free block)
//! - The length of the payload that follows the header

use crate::common::PageId;

/// Type of page stored on disk.
///
/// Uses `#[repr(u8)]` to guarantee a 1-byte representation for serialization.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    /// Uninitialized or corrupted page.
    #[default]
    Invalid = 0,
    /// Block 0: file-level metadata.
    Superblock = 1,
    /// B+ tree internal (non-leaf) node.
    BTreeInternal = 2,
    /// B+ tree leaf node.
    BTreeLeaf = 3,
    /// Block on the persisted free list.
    Free = 4,
}

impl PageType {
    /// Convert from u8, returning Invalid for unknown values.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => PageType::Superblock,
            2 => PageType::BTreeInternal,
            3 => PageType::BTreeLeaf,
            4 => PageType::Free,
            _ => PageType::Invalid,
        }
    }
}

/// Metadata stored at the beginning of every block.
///
/// # Layout (16 bytes)
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       1     page_type (PageType as u8)
/// 1       1     reserved, always 0
/// 2       2     key_count (little-endian)
/// 4       4     checksum (CRC32, little-endian)
/// 8       4     link (PageId, little-endian)
/// 12      4     payload_len (little-endian)
/// ```
///
/// # Checksum
/// The checksum is computed over the entire block with the checksum field
/// itself set to zero. This allows verification without special handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    /// Type of this page.
    pub page_type: PageType,
    /// Number of keys in the node (0 for non-node pages).
    pub key_count: u16,
    /// CRC32 checksum of the block contents.
    pub checksum: u32,
    /// Next leaf for leaves, next free block for free pages, INVALID otherwise.
    pub link: PageId,
    /// Bytes of payload following the header.
    pub payload_len: u32,
}

impl Default for PageHeader {
    fn default() -> Self {
        Self::new(PageType::Invalid)
    }
}

impl PageHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 16;

    /// Offset of each field within the header.
    pub const OFFSET_PAGE_TYPE: usize = 0;
    pub const OFFSET_KEY_COUNT: usize = 2;
    pub const OFFSET_CHECKSUM: usize = 4;
    pub const OFFSET_LINK: usize = 8;
    pub const OFFSET_PAYLOAD_LEN: usize = 12;

    /// Create a new header with the given page type.
    pub fn new(page_type: PageType) -> Self {
        Self {
            page_type,
            key_count: 0,
            checksum: 0,
            link: PageId::INVALID,
            payload_len: 0,
        }
    }

    /// Read a header from the beginning of a byte slice.
    ///
    /// # Panics
    /// Panics if `data.len() < PageHeader::SIZE`.
    pub fn from_bytes(data: &[u8]) -> Self {
        assert!(data.len() >= Self::SIZE, "buffer too small for PageHeader");

        let read_u32 = |offset: usize| {
            u32::from_le_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ])
        };

        Self {
            page_type: PageType::from_u8(data[Self::OFFSET_PAGE_TYPE]),
            key_count: u16::from_le_bytes([
                data[Self::OFFSET_KEY_COUNT],
                data[Self::OFFSET_KEY_COUNT + 1],
            ]),
            checksum: read_u32(Self::OFFSET_CHECKSUM),
            link: PageId::new(read_u32(Self::OFFSET_LINK)),
            payload_len: read_u32(Self::OFFSET_PAYLOAD_LEN),
        }
    }

    /// Write this header to the beginning of a byte slice.
    ///
    /// # Panics
    /// Panics if `data.len() < PageHeader::SIZE`.
    pub fn write_to(&self, data: &mut [u8]) {
        assert!(data.len() >= Self::SIZE, "buffer too small for PageHeader");

        data[Self::OFFSET_PAGE_TYPE] = self.page_type as u8;
        data[Self::OFFSET_PAGE_TYPE + 1] = 0;
        data[Self::OFFSET_KEY_COUNT..Self::OFFSET_KEY_COUNT + 2]
            .copy_from_slice(&self.key_count.to_le_bytes());
        data[Self::OFFSET_CHECKSUM..Self::OFFSET_CHECKSUM + 4]
            .copy_from_slice(&self.checksum.to_le_bytes());
        data[Self::OFFSET_LINK..Self::OFFSET_LINK + 4].copy_from_slice(&self.link.to_le_bytes());
        data[Self::OFFSET_PAYLOAD_LEN..Self::OFFSET_PAYLOAD_LEN + 4]
            .copy_from_slice(&self.payload_len.to_le_bytes());
    }

    /// Compute the CRC32 checksum of a block.
    ///
    /// The checksum field (bytes 4-7) is fed as zeros so the checksum doesn't
    /// include itself.
    pub fn compute_checksum(page_data: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&page_data[..Self::OFFSET_CHECKSUM]);
        hasher.update(&[0u8; 4]);
        hasher.update(&page_data[Self::OFFSET_CHECKSUM + 4..]);
        hasher.finalize()
    }

    /// Verify that the stored checksum matches the computed checksum.
    pub fn verify_checksum(&self, page_data: &[u8]) -> bool {
        self.checksum == Self::compute_checksum(page_data)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_type_from_u8() {
        assert_eq!(PageType::from_u8(0), PageType::Invalid);
        assert_eq!(PageType::from_u8(1), PageType::Superblock);
        assert_eq!(PageType::from_u8(2), PageType::BTreeInternal);
        assert_eq!(PageType::from_u8(3), PageType::BTreeLeaf);
        assert_eq!(PageType::from_u8(4), PageType::Free);
        assert_eq!(PageType::from_u8(255), PageType::Invalid);
    }

    #[test]
    fn test_page_header_default_links_nowhere() {
        let header = PageHeader::default();
        assert_eq!(header.page_type, PageType::Invalid);
        assert_eq!(header.link, PageId::INVALID);
        assert_eq!(header.key_count, 0);
    }

    #[test]
    fn test_page_header_roundtrip() {
        let original = PageHeader {
            page_type: PageType::BTreeLeaf,
            key_count: 17,
            checksum: 0xDEADBEEF,
            link: PageId::new(9),
            payload_len: 1234,
        };

        let mut buffer = [0u8; PageHeader::SIZE];
        original.write_to(&mut buffer);

        assert_eq!(PageHeader::from_bytes(&buffer), original);
    }

    #[test]
    fn test_page_header_byte_layout() {
        let header = PageHeader {
            page_type: PageType::BTreeInternal,
            key_count: 0x0201,
            checksum: 0x04030201,
            link: PageId::new(0x08070605),
            payload_len: 0x0C0B0A09,
        };

        let mut buffer = [0xFFu8; PageHeader::SIZE];
        header.write_to(&mut buffer);

        assert_eq!(buffer[0], 2); // PageType::BTreeInternal
        assert_eq!(buffer[1], 0); // reserved
        assert_eq!(buffer[2], 0x01); // key_count LSB
        assert_eq!(buffer[3], 0x02);
        assert_eq!(buffer[4], 0x01); // checksum LSB
        assert_eq!(buffer[7], 0x04);
        assert_eq!(buffer[8], 0x05); // link LSB
        assert_eq!(buffer[12], 0x09); // payload_len LSB
        assert_eq!(buffer[15], 0x0C);
    }

    #[test]
    fn test_checksum_ignores_checksum_field() {
        let mut page_data = [0u8; 512];
        page_data[100] = 0xAB;

        let checksum1 = PageHeader::compute_checksum(&page_data);
        page_data[4..8].copy_from_slice(&[0xFF; 4]);
        let checksum2 = PageHeader::compute_checksum(&page_data);

        assert_eq!(checksum1, checksum2);
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut page_data = [0u8; 512];
        page_data[300] = 0x11;

        let header = PageHeader {
            checksum: PageHeader::compute_checksum(&page_data),
            ..PageHeader::new(PageType::BTreeLeaf)
        };
        assert!(header.verify_checksum(&page_data));

        page_data[300] = 0x12;
        assert!(!header.verify_checksum(&page_data));
    }
}
