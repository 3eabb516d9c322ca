//! Configuration constants and the `open` configuration surface.

use super::error::{Error, Result};

/// Default size of a block in bytes (4KB).
///
/// Matches the OS page size on most systems. The size is fixed when a file is
/// created and recorded in its superblock.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Smallest accepted block size.
pub const MIN_PAGE_SIZE: usize = 512;

/// Largest accepted block size.
pub const MAX_PAGE_SIZE: usize = 65536;

/// Default number of resident pages in the buffer pool.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Floor for the pool size. `open` raises it further once ORDER is known; see
/// [`NodeCodec::min_cache_capacity`](crate::index::btree::NodeCodec::min_cache_capacity).
pub const MIN_CACHE_CAPACITY: usize = 8;

/// Default largest value payload, in bytes.
pub const DEFAULT_MAX_VALUE_LEN: usize = 64;

/// Smallest ORDER for which split and merge keep every node non-empty.
pub const MIN_ORDER: usize = 3;

/// On-disk format version written to the superblock.
pub const FORMAT_VERSION: u32 = 1;

/// Options recognized by [`Database::open`](crate::Database::open).
///
/// # Example
/// ```
/// use bptreedb::Config;
///
/// let config = Config::default().with_order(4).with_cache_capacity(32);
/// assert_eq!(config.order, Some(4));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Block size in bytes. Only used when a new file is created.
    pub page_size: usize,
    /// Maximum number of resident pages.
    pub cache_capacity: usize,
    /// Create the file if it does not exist.
    pub create_if_missing: bool,
    /// Explicit ORDER (max children per internal node). `None` picks the largest
    /// ORDER whose nodes fit in one block.
    pub order: Option<usize>,
    /// Largest value payload accepted by `insert`.
    pub max_value_len: usize,
    /// Optional cap on the number of blocks in the backing file.
    pub max_pages: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            create_if_missing: true,
            order: None,
            max_value_len: DEFAULT_MAX_VALUE_LEN,
            max_pages: None,
        }
    }
}

impl Config {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.cache_capacity = cache_capacity;
        self
    }

    pub fn with_create_if_missing(mut self, create_if_missing: bool) -> Self {
        self.create_if_missing = create_if_missing;
        self
    }

    pub fn with_order(mut self, order: usize) -> Self {
        self.order = Some(order);
        self
    }

    pub fn with_max_value_len(mut self, max_value_len: usize) -> Self {
        self.max_value_len = max_value_len;
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    /// Check the options that do not depend on the key type.
    ///
    /// Whether `order` fits in a block is checked later, once the key width is
    /// known.
    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two()
            || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size)
        {
            return Err(Error::InvalidConfig(format!(
                "page_size must be a power of two in [{}, {}], got {}",
                MIN_PAGE_SIZE, MAX_PAGE_SIZE, self.page_size
            )));
        }
        if self.cache_capacity < MIN_CACHE_CAPACITY {
            return Err(Error::InvalidConfig(format!(
                "cache_capacity must be at least {}, got {}",
                MIN_CACHE_CAPACITY, self.cache_capacity
            )));
        }
        if let Some(order) = self.order {
            if order < MIN_ORDER {
                return Err(Error::InvalidConfig(format!(
                    "order must be at least {}, got {}",
                    MIN_ORDER, order
                )));
            }
        }
        if self.max_value_len > u16::MAX as usize {
            return Err(Error::InvalidConfig(format!(
                "max_value_len must fit in 16 bits, got {}",
                self.max_value_len
            )));
        }
        if let Some(max_pages) = self.max_pages {
            // Superblock plus an empty root leaf.
            if max_pages < 2 {
                return Err(Error::InvalidConfig(format!(
                    "max_pages must allow at least 2 pages, got {}",
                    max_pages
                )));
            }
        }
        Ok(())
    }
}
