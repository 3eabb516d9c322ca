//! Buffer pool management.
//!
//! The buffer pool is the in-memory cache between the tree and the page
//! store. It manages a fixed pool of frames, each holding one decoded node.
//!
//! # Components
//! - [`BufferPoolManager`] - The node cache
//! - [`Frame`] - A slot in the buffer pool holding a node + metadata
//! - [`PageReadGuard`] / [`PageWriteGuard`] - RAII pin + latch guards
//! - [`BufferPoolStats`] - Performance statistics
//! - [`replacer`] - Eviction policy

mod buffer_pool_manager;
mod frame;
mod page_guard;
pub mod replacer;
mod stats;

pub use buffer_pool_manager::BufferPoolManager;
pub use frame::{Frame, FrameId};
pub use page_guard::{PageReadGuard, PageWriteGuard};
pub use stats::{BufferPoolStats, StatsSnapshot};
