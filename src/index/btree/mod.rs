//! Disk-resident B+ tree.
//!
//! - [`key`] - Fixed-width key encoding
//! - [`node`] - In-memory node forms and their split/borrow/merge steps
//! - [`codec`] - Node ⇄ block translation and ORDER-derived capacities
//! - [`tree`] - Search, insert, delete and scans with latch crabbing
//! - [`verify`] - Structural invariant checker

pub mod codec;
mod iterator;
pub mod key;
pub mod node;
mod tree;
mod verify;

pub use codec::NodeCodec;
pub use iterator::RangeScan;
pub use key::BTreeKey;
pub use node::{InternalNode, LeafNode, Node};
pub use tree::BPlusTree;
pub use verify::TreeStats;
