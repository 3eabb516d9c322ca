//! Page identifier type.

use std::fmt;

/// Identifies a fixed-size block in the backing file.
///
/// Block 0 is always the superblock; tree nodes live in blocks `1..`.
/// Using `u32` allows for 4 billion blocks per file.
///
/// # Example
/// ```
/// use bptreedb::PageId;
///
/// let page_id = PageId::new(42);
/// assert!(page_id.is_valid());
/// assert_eq!(page_id.0, 42);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u32);

impl PageId {
    /// Invalid/sentinel page ID.
    ///
    /// Marks "no next leaf" at the end of the leaf chain and the end of the
    /// on-disk free list.
    pub const INVALID: PageId = PageId(u32::MAX);

    /// The reserved superblock.
    pub const SUPERBLOCK: PageId = PageId(0);

    /// Create a new PageId.
    #[inline]
    pub fn new(id: u32) -> Self {
        PageId(id)
    }

    /// Check if this page ID is valid (not the sentinel value).
    #[inline]
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// Whether this ID can hold a tree node (valid and not the superblock).
    #[inline]
    pub fn is_node_page(&self) -> bool {
        self.is_valid() && *self != Self::SUPERBLOCK
    }

    /// Byte offset of this block in a file of `page_size` blocks.
    #[inline]
    pub fn offset(&self, page_size: usize) -> u64 {
        self.0 as u64 * page_size as u64
    }

    #[inline]
    pub(crate) fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub(crate) fn from_le_slice(bytes: &[u8]) -> Self {
        PageId(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "Page(INVALID)")
        } else {
            write!(f, "Page({})", self.0)
        }
    }
}
