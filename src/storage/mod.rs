//! Storage layer - disk I/O and block formats.
//!
//! This module handles persistent storage:
//! - [`DiskManager`] - Block I/O, allocation and checkpoint commit
//! - [`Superblock`] - File metadata in block 0
//! - [`page`] - Block images and headers

mod disk_manager;
pub mod page;
mod superblock;

pub use disk_manager::{DiskManager, READ_RETRIES};
pub use superblock::{Superblock, SUPERBLOCK_LEN};
