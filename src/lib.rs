//! bptreedb - a persistent, disk-backed B+ tree.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Database<K> (db)                         │
//! │            open / close / checkpoint / flush_all                │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │           B+ Tree Engine (index::btree)                  │   │
//! │  │   search · insert · delete · range_scan · verify         │   │
//! │  │        latch crabbing over pinned node guards            │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Buffer Pool (buffer/)                       │   │
//! │  │   BufferPoolManager + Frame + LRU replacer + Stats       │   │
//! │  │        frames cache decoded nodes (NodeCodec)            │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Page Store (storage/)                       │   │
//! │  │   DiskManager + Superblock + Page + free list            │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↕                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │         Recovery (recovery/)                             │   │
//! │  │   rollback journal + recover() + reachability sweep      │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, Error, Config)
//! - [`storage`] - Block I/O, superblock and page formats
//! - [`buffer`] - Buffer pool, guards and eviction
//! - [`index`] - The B+ tree
//! - [`recovery`] - Rollback journal and crash recovery
//!
//! # Quick Start
//! ```no_run
//! use bptreedb::{Config, Database};
//!
//! let db = Database::<u32>::open("my_index.db", Config::default().with_order(32))?;
//! db.insert(1, b"one".to_vec())?;
//! for entry in db.range_scan(..) {
//!     let (key, value) = entry?;
//!     println!("{key} => {value:?}");
//! }
//! db.close()?;
//! # Ok::<(), bptreedb::Error>(())
//! ```

pub mod buffer;
pub mod common;
mod db;
pub mod index;
pub mod recovery;
pub mod storage;

pub use common::{Config, Error, PageId, Result};
pub use db::Database;

pub use buffer::StatsSnapshot;
pub use index::btree::{BTreeKey, RangeScan, TreeStats};
pub use recovery::{RecoveryReport, SweepReport};
