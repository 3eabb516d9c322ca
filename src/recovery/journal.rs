//! Rollback journal - original images of blocks overwritten since the last
//! checkpoint.
//!
//! # File Layout
//! ```text
//! ┌──────────────────────┬─────────────────────┬─────────────────────┬─────
//! │ Header (32 bytes)    │ Record              │ Record              │ ...
//! │ magic, page_size,    │ page_id u32         │                     │
//! │ durable_page_count,  │ crc32 u32           │                     │
//! │ epoch, crc32         │ image [page_size]   │                     │
//! └──────────────────────┴─────────────────────┴─────────────────────┴─────
//! ```
//!
//! An empty journal is the commit marker: once a checkpoint has made the new
//! superblock durable the journal is truncated to zero bytes. A non-empty
//! journal found at open means the last epoch never committed, and replaying
//! it restores every block to its last checkpointed image.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::common::{Error, PageId, Result};
use crate::storage::page::Page;

const MAGIC: [u8; 8] = *b"BPTJRNL\0";

/// Size of the journal header in bytes.
pub const JOURNAL_HEADER_LEN: usize = 32;

/// Per-record prefix: page id plus CRC32.
const RECORD_PREFIX_LEN: usize = 8;

/// Header describing the checkpoint a journal rolls back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalHeader {
    pub page_size: u32,
    /// Block count of the last committed image; anything past it is discarded.
    pub durable_page_count: u32,
    pub epoch: u64,
}

impl JournalHeader {
    fn to_bytes(self) -> [u8; JOURNAL_HEADER_LEN] {
        let mut buf = [0u8; JOURNAL_HEADER_LEN];
        buf[0..8].copy_from_slice(&MAGIC);
        buf[8..12].copy_from_slice(&self.page_size.to_le_bytes());
        buf[12..16].copy_from_slice(&self.durable_page_count.to_le_bytes());
        buf[16..24].copy_from_slice(&self.epoch.to_le_bytes());
        let crc = crc32fast::hash(&buf[..24]);
        buf[24..28].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Parse a header, returning `None` if it is torn or not a journal.
    fn from_bytes(buf: &[u8; JOURNAL_HEADER_LEN]) -> Option<Self> {
        if buf[0..8] != MAGIC {
            return None;
        }
        let crc = u32::from_le_bytes([buf[24], buf[25], buf[26], buf[27]]);
        if crc != crc32fast::hash(&buf[..24]) {
            return None;
        }
        let mut epoch = [0u8; 8];
        epoch.copy_from_slice(&buf[16..24]);
        Some(Self {
            page_size: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            durable_page_count: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            epoch: u64::from_le_bytes(epoch),
        })
    }
}

/// Outcome of replaying a journal into the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplayOutcome {
    /// Blocks restored to their checkpointed image.
    pub restored_pages: usize,
    /// Block count the data file was truncated to, if a valid header was found.
    pub truncated_to: Option<u32>,
}

/// Append-only journal owned by the [`DiskManager`](crate::storage::DiskManager).
pub struct Journal {
    path: PathBuf,
    file: File,
    page_size: usize,
    /// Bytes written in the current epoch.
    len: u64,
    /// Blocks whose original image is already in the journal.
    protected: HashSet<PageId>,
}

impl Journal {
    /// Journal path for a database file: `<db path>-journal`.
    pub fn path_for(db_path: &Path) -> PathBuf {
        let mut name = OsString::from(db_path.as_os_str());
        name.push("-journal");
        PathBuf::from(name)
    }

    /// Open (or create) the journal for a database.
    ///
    /// # Errors
    /// Returns `Error::IncompatibleFormat` if the journal still holds records:
    /// recovery must replay it before the database is opened.
    pub fn open(db_path: &Path, page_size: usize) -> Result<Self> {
        let path = Self::path_for(db_path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if file.metadata()?.len() != 0 {
            return Err(Error::IncompatibleFormat(format!(
                "unreplayed journal at {}",
                path.display()
            )));
        }

        Ok(Self {
            path,
            file,
            page_size,
            len: 0,
            protected: HashSet::new(),
        })
    }

    /// Whether the original image of `page_id` is already saved this epoch.
    #[inline]
    pub fn is_protected(&self, page_id: PageId) -> bool {
        self.protected.contains(&page_id)
    }

    /// Number of blocks saved this epoch.
    #[inline]
    pub fn protected_count(&self) -> usize {
        self.protected.len()
    }

    /// Append the original image of `page_id`.
    ///
    /// The header is written lazily with the first record of an epoch. The
    /// record is not durable until [`sync`](Self::sync) returns.
    pub fn append(&mut self, page_id: PageId, original: &Page, header: JournalHeader) -> Result<()> {
        debug_assert_eq!(original.len(), self.page_size);

        self.file.seek(SeekFrom::Start(self.len))?;
        if self.len == 0 {
            self.file.write_all(&header.to_bytes())?;
            self.len = JOURNAL_HEADER_LEN as u64;
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&page_id.to_le_bytes());
        hasher.update(original.as_slice());
        let crc = hasher.finalize();

        let mut prefix = [0u8; RECORD_PREFIX_LEN];
        prefix[0..4].copy_from_slice(&page_id.to_le_bytes());
        prefix[4..8].copy_from_slice(&crc.to_le_bytes());
        self.file.write_all(&prefix)?;
        self.file.write_all(original.as_slice())?;

        self.len += (RECORD_PREFIX_LEN + self.page_size) as u64;
        self.protected.insert(page_id);

        debug!(page_id = page_id.0, epoch = header.epoch, "journal.append");
        Ok(())
    }

    /// Make appended records durable.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Truncate the journal to zero bytes: the commit point of a checkpoint.
    pub fn reset(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        self.len = 0;
        self.protected.clear();
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Roll the data file back to the image recorded in a journal.
    ///
    /// A missing or empty journal is a no-op. A torn header means no block was
    /// overwritten yet (records are synced before any in-place write), so the
    /// journal is simply discarded. Records are applied until the first one
    /// that fails its checksum. Afterwards the data file is truncated to the
    /// checkpointed block count and the journal is emptied.
    pub fn replay(db_path: &Path, data_file: &mut File) -> Result<ReplayOutcome> {
        let path = Self::path_for(db_path);
        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ReplayOutcome::default()),
            Err(e) => return Err(e.into()),
        };
        if file.metadata()?.len() == 0 {
            return Ok(ReplayOutcome::default());
        }

        let mut reader = BufReader::new(&file);
        let mut header_buf = [0u8; JOURNAL_HEADER_LEN];
        let header = match read_full(&mut reader, &mut header_buf)? {
            true => JournalHeader::from_bytes(&header_buf),
            false => None,
        };
        let header = match header {
            Some(header) => header,
            None => {
                warn!(path = %path.display(), "journal.replay.torn_header_discarded");
                file.set_len(0)?;
                file.sync_all()?;
                return Ok(ReplayOutcome::default());
            }
        };

        let page_size = header.page_size as usize;
        let mut prefix = [0u8; RECORD_PREFIX_LEN];
        let mut image = vec![0u8; page_size];
        let mut restored_pages = 0;

        loop {
            if !read_full(&mut reader, &mut prefix)? || !read_full(&mut reader, &mut image)? {
                break;
            }
            let page_id = PageId::from_le_slice(&prefix[0..4]);
            let crc = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);

            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&prefix[0..4]);
            hasher.update(&image);
            if hasher.finalize() != crc {
                warn!(page_id = page_id.0, "journal.replay.torn_record");
                break;
            }

            data_file.seek(SeekFrom::Start(page_id.offset(page_size)))?;
            data_file.write_all(&image)?;
            restored_pages += 1;
        }

        let durable_len = header.durable_page_count as u64 * page_size as u64;
        data_file.set_len(durable_len)?;
        data_file.sync_all()?;

        drop(reader);
        file.set_len(0)?;
        file.sync_all()?;

        info!(
            restored_pages,
            durable_page_count = header.durable_page_count,
            epoch = header.epoch,
            "journal.replay.complete"
        );

        Ok(ReplayOutcome {
            restored_pages,
            truncated_to: Some(header.durable_page_count),
        })
    }
}

/// `read_exact` that reports a short read as `false` instead of an error.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}
