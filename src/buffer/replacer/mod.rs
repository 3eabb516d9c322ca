//! Eviction policy implementations (replacers).
//!
//! - [`LruReplacer`] - Least Recently Used among unpinned frames

mod lru;

pub use lru::LruReplacer;
