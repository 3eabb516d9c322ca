//! Error types for bptreedb.

use thiserror::Error;

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
pub type Result<T> = std::result::Result<T, Error>;

/// All recoverable errors surfaced by the storage core.
///
/// Structural invariant violations inside a mutation are not represented here:
/// they indicate a defect and panic before anything reaches disk.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the backing file or the journal.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested key is not in the tree.
    #[error("Key not found")]
    KeyNotFound,

    /// The requested page is unallocated (past the end of the file or on the free list).
    #[error("Page {0} not found")]
    PageNotFound(u32),

    /// Checksum or structural validation failed for a page.
    #[error("Page {page_id} is corrupt: {reason}")]
    CorruptPage { page_id: u32, reason: String },

    /// The backing file cannot grow any further.
    #[error("Out of space: backing file is capped at {page_count} pages")]
    OutOfSpace { page_count: u32 },

    /// Every frame is pinned, so nothing can be evicted.
    ///
    /// Callers should release handles and retry.
    #[error("Buffer pool exhausted: all {pool_size} frames are pinned")]
    PoolExhausted { pool_size: usize },

    /// A page ID that can never be freed or addressed (superblock, double free).
    #[error("Invalid page ID: {0}")]
    InvalidPageId(u32),

    /// Value payload exceeds the slot size recorded at creation.
    #[error("Value too large: {len} bytes (max {max})")]
    ValueTooLarge { len: usize, max: usize },

    /// Rejected configuration passed to `open`.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The file on disk was written with an incompatible layout.
    #[error("Incompatible format: {0}")]
    IncompatibleFormat(String),

    /// Reported by the verification probe when the tree breaks an invariant.
    #[error("Tree invariant violated: {0}")]
    TreeInvariant(String),
}

impl Error {
    /// Whether this is either flavour of "not found" (key or page).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KeyNotFound | Error::PageNotFound(_))
    }

    pub(crate) fn corrupt(page_id: u32, reason: impl Into<String>) -> Self {
        Error::CorruptPage {
            page_id,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::PageNotFound(42);
        assert_eq!(format!("{}", err), "Page 42 not found");

        let err = Error::PoolExhausted { pool_size: 8 };
        assert_eq!(
            format!("{}", err),
            "Buffer pool exhausted: all 8 frames are pinned"
        );

        let err = Error::corrupt(7, "checksum mismatch");
        assert_eq!(format!("{}", err), "Page 7 is corrupt: checksum mismatch");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();

        match err {
            Error::Io(_) => {} // Success
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_is_not_found() {
        assert!(Error::KeyNotFound.is_not_found());
        assert!(Error::PageNotFound(3).is_not_found());
        assert!(!Error::OutOfSpace { page_count: 1 }.is_not_found());
    }

    #[test]
    fn test_io_error_has_source() {
        use std::error::Error as _;

        let err: Error = std::io::Error::new(std::io::ErrorKind::Other, "disk gone").into();
        assert!(err.source().is_some());
        assert!(Error::KeyNotFound.source().is_none());
    }
}
