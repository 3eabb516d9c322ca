//! Superblock - file-level metadata stored in block 0.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;

use crate::common::config::{FORMAT_VERSION, MAX_PAGE_SIZE, MIN_PAGE_SIZE};
use crate::common::{Error, PageId, Result};
use crate::storage::page::{Page, PageHeader, PageType};

const MAGIC: [u8; 8] = *b"BPTREEDB";

const H: usize = PageHeader::SIZE;
const SB_MAGIC: Range<usize> = H..H + 8;
const SB_FORMAT_VERSION: Range<usize> = H + 8..H + 12;
const SB_PAGE_SIZE: Range<usize> = H + 12..H + 16;
const SB_ORDER: Range<usize> = H + 16..H + 20;
const SB_KEY_LEN: Range<usize> = H + 20..H + 24;
const SB_MAX_VALUE_LEN: Range<usize> = H + 24..H + 28;
const SB_ROOT: Range<usize> = H + 28..H + 32;
const SB_FREE_HEAD: Range<usize> = H + 32..H + 36;
const SB_PAGE_COUNT: Range<usize> = H + 36..H + 40;
const SB_EPOCH: Range<usize> = H + 40..H + 48;
const SB_ENTRY_COUNT: Range<usize> = H + 48..H + 56;

/// Bytes of block 0 that hold the superblock. Always fits in `MIN_PAGE_SIZE`.
pub const SUPERBLOCK_LEN: usize = H + 56;

/// Database metadata stored in block 0.
///
/// The superblock is the durable root pointer: a checkpoint publishes a new
/// tree by rewriting it, and recovery trusts whatever it names.
///
/// # Layout (after the 16-byte page header)
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 16      8     magic "BPTREEDB"
/// 24      4     format_version
/// 28      4     page_size
/// 32      4     order
/// 36      4     key_len
/// 40      4     max_value_len
/// 44      4     root
/// 48      4     free_list_head
/// 52      4     page_count
/// 56      8     checkpoint_epoch
/// 64      8     entry_count
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    pub format_version: u32,
    pub page_size: u32,
    /// Max children per internal node.
    pub order: u32,
    /// Encoded width of the key type.
    pub key_len: u32,
    pub max_value_len: u32,
    /// Root of the tree as of the last checkpoint.
    pub root: PageId,
    /// Head of the persisted free-block chain.
    pub free_list_head: PageId,
    /// Number of blocks in the file, including block 0.
    pub page_count: u32,
    /// Number of completed checkpoints.
    pub checkpoint_epoch: u64,
    /// Live keys in the tree as of the last checkpoint.
    pub entry_count: u64,
}

impl Superblock {
    /// Superblock for a freshly created, empty file.
    pub fn new(page_size: usize, order: usize, key_len: usize, max_value_len: usize) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            page_size: page_size as u32,
            order: order as u32,
            key_len: key_len as u32,
            max_value_len: max_value_len as u32,
            root: PageId::INVALID,
            free_list_head: PageId::INVALID,
            page_count: 1,
            checkpoint_epoch: 0,
            entry_count: 0,
        }
    }

    /// Serialize into a full block image with a valid checksum.
    pub fn to_page(&self) -> Page {
        let mut page = Page::new(self.page_size as usize);
        page.set_header(&PageHeader::new(PageType::Superblock));

        let data = page.as_mut_slice();
        data[SB_MAGIC].copy_from_slice(&MAGIC);
        data[SB_FORMAT_VERSION].copy_from_slice(&self.format_version.to_le_bytes());
        data[SB_PAGE_SIZE].copy_from_slice(&self.page_size.to_le_bytes());
        data[SB_ORDER].copy_from_slice(&self.order.to_le_bytes());
        data[SB_KEY_LEN].copy_from_slice(&self.key_len.to_le_bytes());
        data[SB_MAX_VALUE_LEN].copy_from_slice(&self.max_value_len.to_le_bytes());
        data[SB_ROOT].copy_from_slice(&self.root.to_le_bytes());
        data[SB_FREE_HEAD].copy_from_slice(&self.free_list_head.to_le_bytes());
        data[SB_PAGE_COUNT].copy_from_slice(&self.page_count.to_le_bytes());
        data[SB_EPOCH].copy_from_slice(&self.checkpoint_epoch.to_le_bytes());
        data[SB_ENTRY_COUNT].copy_from_slice(&self.entry_count.to_le_bytes());

        page.update_checksum();
        page
    }

    /// Parse and validate block 0.
    pub fn from_page(page: &Page) -> Result<Self> {
        let header = page.header();
        if header.page_type != PageType::Superblock {
            return Err(Error::corrupt(0, "block 0 is not a superblock"));
        }
        if !page.verify_checksum() {
            return Err(Error::corrupt(0, "superblock checksum mismatch"));
        }

        let data = page.as_slice();
        Self::check_magic(data)?;

        let sb = Self {
            format_version: read_u32(data, SB_FORMAT_VERSION),
            page_size: read_u32(data, SB_PAGE_SIZE),
            order: read_u32(data, SB_ORDER),
            key_len: read_u32(data, SB_KEY_LEN),
            max_value_len: read_u32(data, SB_MAX_VALUE_LEN),
            root: PageId::new(read_u32(data, SB_ROOT)),
            free_list_head: PageId::new(read_u32(data, SB_FREE_HEAD)),
            page_count: read_u32(data, SB_PAGE_COUNT),
            checkpoint_epoch: read_u64(data, SB_EPOCH),
            entry_count: read_u64(data, SB_ENTRY_COUNT),
        };

        if sb.format_version != FORMAT_VERSION {
            return Err(Error::IncompatibleFormat(format!(
                "format version {} (expected {})",
                sb.format_version, FORMAT_VERSION
            )));
        }
        if sb.page_size as usize != page.len() {
            return Err(Error::corrupt(0, "superblock page size disagrees with block"));
        }
        if sb.page_count == 0 || (sb.root.is_valid() && sb.root.0 >= sb.page_count) {
            return Err(Error::corrupt(0, "superblock root outside of file"));
        }
        Ok(sb)
    }

    /// Read the block size from the first bytes of a file.
    ///
    /// Block 0 has to be read before its size is known, so only the prefix
    /// is inspected here; the checksum is verified once the full block is read.
    pub fn peek_page_size(prefix: &[u8]) -> Result<usize> {
        if prefix.len() < SUPERBLOCK_LEN {
            return Err(Error::corrupt(0, "file too short for a superblock"));
        }
        Self::check_magic(prefix)?;

        let page_size = read_u32(prefix, SB_PAGE_SIZE) as usize;
        if !page_size.is_power_of_two() || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(Error::corrupt(0, format!("implausible page size {}", page_size)));
        }
        Ok(page_size)
    }

    /// Read and validate block 0 of an open database file.
    pub fn read_from(file: &mut File) -> Result<Self> {
        let too_short = |_| Error::corrupt(0, "file too short for a superblock");

        let mut prefix = vec![0u8; MIN_PAGE_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut prefix).map_err(too_short)?;
        let page_size = Self::peek_page_size(&prefix)?;

        let mut block = vec![0u8; page_size];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut block).map_err(too_short)?;
        Self::from_page(&Page::from_bytes(block))
    }

    fn check_magic(data: &[u8]) -> Result<()> {
        if data[SB_MAGIC] != MAGIC {
            return Err(Error::IncompatibleFormat("bad magic number".to_string()));
        }
        Ok(())
    }
}

fn read_u32(data: &[u8], range: Range<usize>) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[range]);
    u32::from_le_bytes(buf)
}

fn read_u64(data: &[u8], range: Range<usize>) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[range]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Superblock {
        Superblock {
            root: PageId::new(7),
            free_list_head: PageId::new(3),
            page_count: 12,
            checkpoint_epoch: 5,
            entry_count: 99,
            ..Superblock::new(4096, 4, 8, 64)
        }
    }

    #[test]
    fn test_superblock_roundtrip() {
        let sb = sample();
        let page = sb.to_page();
        assert_eq!(page.len(), 4096);
        assert_eq!(Superblock::from_page(&page).unwrap(), sb);
    }

    #[test]
    fn test_superblock_fits_smallest_page() {
        assert!(SUPERBLOCK_LEN <= MIN_PAGE_SIZE);
    }

    #[test]
    fn test_peek_page_size() {
        let page = Superblock::new(8192, 4, 8, 64).to_page();
        let size = Superblock::peek_page_size(&page.as_slice()[..MIN_PAGE_SIZE]).unwrap();
        assert_eq!(size, 8192);
    }

    #[test]
    fn test_read_from_file() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sb.db");
        let sb = sample();
        std::fs::File::create(&path)
            .unwrap()
            .write_all(sb.to_page().as_slice())
            .unwrap();

        let mut file = std::fs::File::open(&path).unwrap();
        assert_eq!(Superblock::read_from(&mut file).unwrap(), sb);
    }

    #[test]
    fn test_read_from_short_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.db");
        std::fs::write(&path, b"BPTREEDB").unwrap();

        let mut file = std::fs::File::open(&path).unwrap();
        assert!(matches!(
            Superblock::read_from(&mut file),
            Err(Error::CorruptPage { page_id: 0, .. })
        ));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut page = sample().to_page();
        page.as_mut_slice()[SB_MAGIC.start] = b'X';
        page.update_checksum();
        assert!(matches!(
            Superblock::from_page(&page),
            Err(Error::IncompatibleFormat(_))
        ));
    }

    #[test]
    fn test_corrupted_superblock_rejected() {
        let mut page = sample().to_page();
        page.as_mut_slice()[SB_ROOT.start] ^= 0xFF;
        assert!(matches!(
            Superblock::from_page(&page),
            Err(Error::CorruptPage { page_id: 0, .. })
        ));
    }
}
