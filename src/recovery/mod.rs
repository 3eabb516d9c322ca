//! Recovery and durability.
//!
//! Durability is checkpoint based. Between checkpoints, writes go to the
//! data file in place, but any block that belongs to the last checkpoint is
//! first copied to the rollback [`Journal`]. A checkpoint publishes a new
//! root in the superblock and empties the journal.
//!
//! After an unclean shutdown, [`recover`] rolls the file back to the last
//! checkpoint and drops any blocks appended since. [`sweep`] reclaims blocks
//! that are allocated but unreachable from the root.

mod journal;
pub mod sweep;

use std::fs::OpenOptions;
use std::path::Path;

use tracing::info;

use crate::common::Result;
use crate::storage::Superblock;

pub use journal::{Journal, JournalHeader, ReplayOutcome, JOURNAL_HEADER_LEN};
pub use sweep::SweepReport;

/// What [`recover`] had to do to bring a file back to its last checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecoveryReport {
    /// Blocks restored from the journal.
    pub restored_pages: usize,
    /// A journal with a valid header was replayed.
    pub rolled_back: bool,
    /// Blocks past the checkpointed end of file that were cut off.
    pub truncated_pages: u64,
}

impl RecoveryReport {
    /// Whether the file was touched at all.
    pub fn performed(&self) -> bool {
        self.rolled_back || self.restored_pages > 0 || self.truncated_pages > 0
    }
}

/// Bring a database file back to its last checkpoint.
///
/// Replays the rollback journal if one is present, then truncates the data
/// file to the block count recorded in the superblock.
///
/// # Errors
/// Returns an error if the file is missing, the superblock is invalid, or
/// an I/O operation fails.
pub fn recover(db_path: &Path) -> Result<RecoveryReport> {
    let mut file = OpenOptions::new().read(true).write(true).open(db_path)?;

    let outcome = Journal::replay(db_path, &mut file)?;
    let superblock = Superblock::read_from(&mut file)?;

    let page_size = superblock.page_size as u64;
    let durable_len = superblock.page_count as u64 * page_size;
    let file_len = file.metadata()?.len();

    let mut truncated_pages = 0;
    if file_len > durable_len {
        truncated_pages = (file_len - durable_len).div_ceil(page_size);
        file.set_len(durable_len)?;
        file.sync_all()?;
    }

    let report = RecoveryReport {
        restored_pages: outcome.restored_pages,
        rolled_back: outcome.truncated_to.is_some(),
        truncated_pages,
    };
    if report.performed() {
        info!(
            restored_pages = report.restored_pages,
            truncated_pages,
            epoch = superblock.checkpoint_epoch,
            "recovery.complete"
        );
    }
    Ok(report)
}
