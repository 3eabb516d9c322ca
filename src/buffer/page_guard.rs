//! RAII guards for node access.
//!
//! These guards pair a pin with the node latch:
//! - [`PageReadGuard`] - Shared latch (multiple allowed)
//! - [`PageWriteGuard`] - Exclusive latch (marks dirty on mutable access)
//!
//! On drop the latch is released first and the pin second, so a frame with
//! pin count 0 is never latched and eviction can latch it without waiting.

use std::ops::{Deref, DerefMut};

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::buffer::buffer_pool_manager::BufferPoolManager;
use crate::buffer::FrameId;
use crate::common::PageId;
use crate::index::btree::{BTreeKey, Node};

/// Guard for shared access to a cached node.
///
/// # Example
/// ```ignore
/// let guard = bpm.fetch_page_read(page_id)?;
/// let count = guard.key_count();  // Deref to &Node<K>
/// // guard drops here: latch released, page unpinned
/// ```
pub struct PageReadGuard<'a, K: BTreeKey> {
    bpm: &'a BufferPoolManager<K>,
    frame_id: FrameId,
    page_id: PageId,
    /// Always `Some` until drop.
    lock: Option<RwLockReadGuard<'a, Node<K>>>,
}

impl<'a, K: BTreeKey> PageReadGuard<'a, K> {
    pub(crate) fn new(
        bpm: &'a BufferPoolManager<K>,
        frame_id: FrameId,
        page_id: PageId,
        lock: RwLockReadGuard<'a, Node<K>>,
    ) -> Self {
        Self {
            bpm,
            frame_id,
            page_id,
            lock: Some(lock),
        }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }
}

impl<K: BTreeKey> Deref for PageReadGuard<'_, K> {
    type Target = Node<K>;

    #[inline]
    fn deref(&self) -> &Node<K> {
        match &self.lock {
            Some(lock) => &**lock,
            None => unreachable!("read guard used after release"),
        }
    }
}

impl<K: BTreeKey> Drop for PageReadGuard<'_, K> {
    fn drop(&mut self) {
        drop(self.lock.take());
        self.bpm.unpin_page_internal(self.frame_id);
    }
}

/// Guard for exclusive access to a cached node.
///
/// Any mutable access marks the page dirty.
///
/// # Example
/// ```ignore
/// let mut guard = bpm.fetch_page_write(page_id)?;
/// guard.leaf_mut().insert(key, value);  // DerefMut marks dirty
/// ```
pub struct PageWriteGuard<'a, K: BTreeKey> {
    bpm: &'a BufferPoolManager<K>,
    frame_id: FrameId,
    page_id: PageId,
    /// Always `Some` until drop.
    lock: Option<RwLockWriteGuard<'a, Node<K>>>,
}

impl<'a, K: BTreeKey> PageWriteGuard<'a, K> {
    pub(crate) fn new(
        bpm: &'a BufferPoolManager<K>,
        frame_id: FrameId,
        page_id: PageId,
        lock: RwLockWriteGuard<'a, Node<K>>,
    ) -> Self {
        Self {
            bpm,
            frame_id,
            page_id,
            lock: Some(lock),
        }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Mark the page dirty without touching it.
    #[inline]
    pub fn mark_dirty(&self) {
        self.bpm.frame(self.frame_id).mark_dirty();
    }
}

impl<K: BTreeKey> Deref for PageWriteGuard<'_, K> {
    type Target = Node<K>;

    #[inline]
    fn deref(&self) -> &Node<K> {
        match &self.lock {
            Some(lock) => &**lock,
            None => unreachable!("write guard used after release"),
        }
    }
}

impl<K: BTreeKey> DerefMut for PageWriteGuard<'_, K> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Node<K> {
        self.bpm.frame(self.frame_id).mark_dirty();
        match &mut self.lock {
            Some(lock) => &mut **lock,
            None => unreachable!("write guard used after release"),
        }
    }
}

impl<K: BTreeKey> Drop for PageWriteGuard<'_, K> {
    fn drop(&mut self) {
        drop(self.lock.take());
        self.bpm.unpin_page_internal(self.frame_id);
    }
}
