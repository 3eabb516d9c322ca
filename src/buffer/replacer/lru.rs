//! LRU (Least Recently Used) replacement policy.

use std::collections::{BTreeMap, HashMap};

use crate::buffer::FrameId;

/// Evicts the evictable frame whose last access is oldest.
///
/// Every access stamps the frame with a monotonically increasing tick.
/// Evictable frames are kept ordered by that tick, so eviction is
/// `O(log n)` and never scans pinned frames.
#[derive(Debug, Default)]
pub struct LruReplacer {
    tick: u64,
    /// Last access tick of every tracked frame.
    last_access: HashMap<FrameId, u64>,
    /// Evictable frames keyed by last access tick.
    evictable: BTreeMap<u64, FrameId>,
}

impl LruReplacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a frame was accessed, making it the most recently used.
    pub fn record_access(&mut self, frame_id: FrameId) {
        self.tick += 1;
        let tick = self.tick;
        if let Some(old) = self.last_access.insert(frame_id, tick) {
            if self.evictable.remove(&old).is_some() {
                self.evictable.insert(tick, frame_id);
            }
        }
    }

    /// Mark a tracked frame as evictable (pin count dropped to 0) or not.
    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        let Some(&tick) = self.last_access.get(&frame_id) else {
            return;
        };
        if evictable {
            self.evictable.insert(tick, frame_id);
        } else {
            self.evictable.remove(&tick);
        }
    }

    /// Select the least recently used evictable frame and stop tracking it.
    ///
    /// Returns `None` if every tracked frame is pinned.
    pub fn evict(&mut self) -> Option<FrameId> {
        let (_, frame_id) = self.evictable.pop_first()?;
        self.last_access.remove(&frame_id);
        Some(frame_id)
    }

    /// Stop tracking a frame.
    pub fn remove(&mut self, frame_id: FrameId) {
        if let Some(tick) = self.last_access.remove(&frame_id) {
            self.evictable.remove(&tick);
        }
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.evictable.len()
    }
}
