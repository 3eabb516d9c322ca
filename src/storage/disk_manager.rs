//! Disk Manager - the page store.
//!
//! The [`DiskManager`] handles all direct file operations:
//! - Reading and writing fixed-size blocks (with checksum validation)
//! - Allocating and freeing block IDs (free list)
//! - Journaling original block images before in-place overwrites
//! - Publishing a new root through the superblock at checkpoint

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::common::{Error, PageId, Result};
use crate::recovery::{Journal, JournalHeader};
use crate::storage::page::{Page, PageHeader, PageType};
use crate::storage::Superblock;

/// Transient read failures are retried this many times before surfacing.
pub const READ_RETRIES: usize = 3;

/// Manages disk I/O for a single database file.
///
/// # File Layout
/// ```text
/// ┌────────────┬─────────┬─────────┬─────────┬─────────┐
/// │ Block 0    │ Block 1 │ Block 2 │  ...    │ Block N │
/// │ superblock │ node    │ node    │         │ free    │
/// └────────────┴─────────┴─────────┴─────────┴─────────┘
/// Offset:  0   page_size  2×page_size  ...   N×page_size
/// ```
///
/// # Thread Safety
/// `DiskManager` is **single-threaded**. The buffer pool serializes access
/// through a `Mutex`.
///
/// # Durability
/// Writes are not synced individually. Blocks that belong to the last
/// checkpoint are journaled (and the journal synced) before their first
/// overwrite in an epoch; [`sync`](Self::sync) and [`commit`](Self::commit)
/// are the durability points.
pub struct DiskManager {
    file: File,
    path: PathBuf,
    page_size: usize,
    /// Last committed superblock; `page_count` in here is the durable count.
    superblock: Superblock,
    /// Current number of blocks, including uncommitted growth.
    page_count: u32,
    /// Free block IDs (LIFO).
    free_list: Vec<PageId>,
    free_set: HashSet<PageId>,
    journal: Journal,
    max_pages: u32,
}

impl DiskManager {
    /// Create a new database file holding only a superblock.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be created.
    pub fn create<P: AsRef<Path>>(path: P, superblock: Superblock, max_pages: Option<u32>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        let page_size = superblock.page_size as usize;
        file.write_all(superblock.to_page().as_slice())?;
        file.sync_all()?;

        let journal = Journal::open(&path, page_size)?;
        info!(path = %path.display(), page_size, "store.create");

        Ok(Self {
            file,
            path,
            page_size,
            page_count: superblock.page_count,
            superblock,
            free_list: Vec::new(),
            free_set: HashSet::new(),
            journal,
            max_pages: max_pages.unwrap_or(u32::MAX - 1),
        })
    }

    /// Open an existing database file.
    ///
    /// Recovery must already have replayed any journal.
    ///
    /// # Errors
    /// Returns an error if the file doesn't exist, the superblock is invalid,
    /// or the persisted free list is damaged.
    pub fn open<P: AsRef<Path>>(path: P, max_pages: Option<u32>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let superblock = Superblock::read_from(&mut file)?;
        let page_size = superblock.page_size as usize;

        let file_len = file.metadata()?.len();
        if file_len < superblock.page_count as u64 * page_size as u64 {
            return Err(Error::corrupt(
                0,
                format!(
                    "file holds {} bytes but superblock counts {} pages",
                    file_len, superblock.page_count
                ),
            ));
        }

        let journal = Journal::open(&path, page_size)?;

        let mut dm = Self {
            file,
            path,
            page_size,
            page_count: superblock.page_count,
            superblock,
            free_list: Vec::new(),
            free_set: HashSet::new(),
            journal,
            max_pages: max_pages.unwrap_or(u32::MAX - 1),
        };
        dm.load_free_list()?;

        info!(
            path = %dm.path.display(),
            page_size,
            page_count = dm.page_count,
            free_pages = dm.free_list.len(),
            epoch = dm.superblock.checkpoint_epoch,
            "store.open"
        );
        Ok(dm)
    }

    // ========================================================================
    // Block I/O
    // ========================================================================

    /// Read a block from disk and validate its checksum.
    ///
    /// # Errors
    /// - `Error::PageNotFound` if the block is unallocated
    /// - `Error::CorruptPage` if the checksum doesn't match
    pub fn read_page(&mut self, page_id: PageId) -> Result<Page> {
        self.check_allocated(page_id)?;

        let page = self.read_raw(page_id)?;
        if !page.verify_checksum() {
            return Err(Error::corrupt(page_id.0, "checksum mismatch"));
        }
        Ok(page)
    }

    /// Write a block in place.
    ///
    /// If the block belongs to the last checkpoint and hasn't been journaled
    /// this epoch, its current image is journaled (and synced) first.
    ///
    /// # Errors
    /// Returns `Error::PageNotFound` if the block is unallocated.
    pub fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<()> {
        self.check_allocated(page_id)?;
        self.protect(&[page_id])?;
        self.write_raw(page_id, page)
    }

    /// Journal the current images of `page_ids` ahead of a batch of writes,
    /// with a single journal sync.
    pub fn protect(&mut self, page_ids: &[PageId]) -> Result<()> {
        let durable = self.superblock.page_count;
        let header = JournalHeader {
            page_size: self.page_size as u32,
            durable_page_count: durable,
            epoch: self.superblock.checkpoint_epoch,
        };

        let mut appended = false;
        for &page_id in page_ids {
            if page_id.0 >= durable || self.journal.is_protected(page_id) {
                continue;
            }
            let original = self.read_raw(page_id)?;
            self.journal.append(page_id, &original, header)?;
            appended = true;
        }

        if appended {
            self.journal.sync()?;
        }
        Ok(())
    }

    /// Flush file contents to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Allocate a block.
    ///
    /// Reuses a freed block if one exists, otherwise extends the file by one
    /// zeroed block. The caller must write the block before it is read back.
    ///
    /// # Errors
    /// Returns `Error::OutOfSpace` if the file is at its block cap.
    pub fn allocate_page(&mut self) -> Result<PageId> {
        if let Some(page_id) = self.free_list.pop() {
            self.free_set.remove(&page_id);
            debug!(page_id = page_id.0, "store.allocate.reuse");
            return Ok(page_id);
        }

        if self.page_count >= self.max_pages {
            return Err(Error::OutOfSpace {
                page_count: self.page_count,
            });
        }

        let page_id = PageId::new(self.page_count);
        self.file
            .set_len(PageId::new(self.page_count + 1).offset(self.page_size))?;
        self.page_count += 1;

        debug!(page_id = page_id.0, "store.allocate.extend");
        Ok(page_id)
    }

    /// Return a block to the free list.
    ///
    /// The caller guarantees nothing references the block any more.
    ///
    /// # Errors
    /// - `Error::InvalidPageId` for the superblock or a block already free
    /// - `Error::PageNotFound` for a block past the end of the file
    pub fn free_page(&mut self, page_id: PageId) -> Result<()> {
        if !page_id.is_node_page() || self.free_set.contains(&page_id) {
            return Err(Error::InvalidPageId(page_id.0));
        }
        if page_id.0 >= self.page_count {
            return Err(Error::PageNotFound(page_id.0));
        }

        self.free_list.push(page_id);
        self.free_set.insert(page_id);
        debug!(page_id = page_id.0, "store.free");
        Ok(())
    }

    /// Whether `page_id` is currently on the free list.
    pub fn is_free(&self, page_id: PageId) -> bool {
        self.free_set.contains(&page_id)
    }

    // ========================================================================
    // Checkpoint
    // ========================================================================

    /// Publish `root` as the durable tree.
    ///
    /// Writes the free list as a chain of free blocks, then a new superblock,
    /// then empties the journal. The empty journal is the commit marker: a
    /// crash at any earlier point rolls back to the previous checkpoint.
    ///
    /// All dirty tree pages must already have been written.
    pub fn commit(&mut self, root: PageId, entry_count: u64) -> Result<()> {
        // The chain runs from the top of the stack down, so the head is the
        // next block `allocate_page` hands out.
        let free: Vec<PageId> = self.free_list.iter().rev().copied().collect();
        self.protect(&free)?;
        for (i, &page_id) in free.iter().enumerate() {
            let next = free.get(i + 1).copied().unwrap_or(PageId::INVALID);
            let image = self.free_page_image(next);
            self.write_raw(page_id, &image)?;
        }
        self.file.sync_data()?;

        let superblock = Superblock {
            root,
            free_list_head: free.first().copied().unwrap_or(PageId::INVALID),
            page_count: self.page_count,
            checkpoint_epoch: self.superblock.checkpoint_epoch + 1,
            entry_count,
            ..self.superblock.clone()
        };
        self.protect(&[PageId::SUPERBLOCK])?;
        self.write_raw(PageId::SUPERBLOCK, &superblock.to_page())?;
        self.file.sync_all()?;

        let journaled = self.journal.protected_count();
        self.journal.reset()?;

        info!(
            root = root.0,
            entry_count,
            page_count = superblock.page_count,
            free_pages = free.len(),
            journaled,
            epoch = superblock.checkpoint_epoch,
            "store.commit"
        );
        self.superblock = superblock;
        Ok(())
    }

    // ========================================================================
    // Info
    // ========================================================================

    /// Last committed superblock.
    #[inline]
    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Get the number of blocks in the database, including block 0.
    #[inline]
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Number of blocks on the free list.
    #[inline]
    pub fn free_page_count(&self) -> usize {
        self.free_list.len()
    }

    /// Get the total size of the database file in bytes.
    #[inline]
    pub fn file_size(&self) -> u64 {
        PageId::new(self.page_count).offset(self.page_size)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ========================================================================
    // Internal
    // ========================================================================

    fn check_allocated(&self, page_id: PageId) -> Result<()> {
        if page_id.0 >= self.page_count || self.free_set.contains(&page_id) {
            return Err(Error::PageNotFound(page_id.0));
        }
        Ok(())
    }

    /// Read a block without validating it, retrying transient failures.
    fn read_raw(&mut self, page_id: PageId) -> Result<Page> {
        let mut page = Page::new(self.page_size);
        let offset = page_id.offset(self.page_size);

        let mut attempt = 0;
        loop {
            let result = self
                .file
                .seek(SeekFrom::Start(offset))
                .and_then(|_| self.file.read_exact(page.as_mut_slice()));

            match result {
                Ok(()) => return Ok(page),
                Err(e) if is_transient(e.kind()) && attempt < READ_RETRIES => {
                    attempt += 1;
                    warn!(page_id = page_id.0, attempt, error = %e, "store.read.retry");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn write_raw(&mut self, page_id: PageId, page: &Page) -> Result<()> {
        debug_assert_eq!(page.len(), self.page_size);
        self.file.seek(SeekFrom::Start(page_id.offset(self.page_size)))?;
        self.file.write_all(page.as_slice())?;
        Ok(())
    }

    fn free_page_image(&self, next: PageId) -> Page {
        let mut page = Page::new(self.page_size);
        page.set_header(&PageHeader {
            link: next,
            ..PageHeader::new(PageType::Free)
        });
        page.update_checksum();
        page
    }

    /// Rebuild the in-memory free list from the persisted chain.
    fn load_free_list(&mut self) -> Result<()> {
        let mut next = self.superblock.free_list_head;
        let mut chain = Vec::new();

        while next.is_valid() {
            if !next.is_node_page() || next.0 >= self.page_count || self.free_set.contains(&next) {
                return Err(Error::corrupt(
                    next.0,
                    "free list points outside the file or loops",
                ));
            }
            let page = self.read_page(next)?;
            let header = page.header();
            if header.page_type != PageType::Free {
                return Err(Error::corrupt(next.0, "free list entry is not a free page"));
            }
            self.free_set.insert(next);
            chain.push(next);
            next = header.link;
        }

        // The head was the top of the stack.
        chain.reverse();
        self.free_list = chain;
        Ok(())
    }
}

fn is_transient(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock
    )
}
