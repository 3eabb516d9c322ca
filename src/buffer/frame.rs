//! Frame - a slot in the buffer pool.
//!
//! A [`Frame`] holds a decoded [`Node`] plus metadata needed for buffer
//! management:
//! - Which page is loaded (if any)
//! - Pin count for reference counting
//! - Dirty flag for write-back tracking
//! - Whether the page was freed while still pinned

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::PageId;
use crate::index::btree::{BTreeKey, Node};

/// Index of a frame in the buffer pool (0 to pool_size-1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub usize);

impl FrameId {
    #[inline]
    pub fn new(id: usize) -> Self {
        Self(id)
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({})", self.0)
    }
}

/// A frame in the buffer pool.
///
/// # Thread Safety
/// - `node`: `RwLock`, the node latch taken by tree descents
/// - `page_id`: `Mutex`, only changed while the pool's state lock is held
/// - `pin_count`, `is_dirty`, `pending_free`: atomics
pub struct Frame<K> {
    node: RwLock<Node<K>>,
    page_id: Mutex<Option<PageId>>,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
    /// Freed by the tree while pinned; released on the last unpin.
    pending_free: AtomicBool,
}

impl<K: BTreeKey> Frame<K> {
    /// Create a new empty frame.
    pub fn new() -> Self {
        Self {
            node: RwLock::new(Node::empty_leaf()),
            page_id: Mutex::new(None),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            pending_free: AtomicBool::new(false),
        }
    }

    // ========================================================================
    // Node latch
    // ========================================================================

    #[inline]
    pub fn node(&self) -> RwLockReadGuard<'_, Node<K>> {
        self.node.read()
    }

    #[inline]
    pub fn node_mut(&self) -> RwLockWriteGuard<'_, Node<K>> {
        self.node.write()
    }

    /// Non-blocking shared latch.
    #[inline]
    pub fn try_node(&self) -> Option<RwLockReadGuard<'_, Node<K>>> {
        self.node.try_read()
    }

    // ========================================================================
    // Page ID
    // ========================================================================

    #[inline]
    pub fn page_id(&self) -> Option<PageId> {
        *self.page_id.lock()
    }

    #[inline]
    pub fn set_page_id(&self, page_id: Option<PageId>) {
        *self.page_id.lock() = page_id;
    }

    // ========================================================================
    // Pin count
    // ========================================================================

    /// Increment the pin count. Returns the new pin count.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement the pin count. Returns the new pin count.
    ///
    /// # Panics
    /// Panics if pin count is already 0.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let old = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        assert!(old > 0, "pin count underflow");
        old - 1
    }

    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    // ========================================================================
    // Flags
    // ========================================================================

    #[inline]
    pub fn mark_dirty(&self) {
        self.is_dirty.store(true, Ordering::Release);
    }

    #[inline]
    pub fn clear_dirty(&self) {
        self.is_dirty.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    #[inline]
    pub fn mark_pending_free(&self) {
        self.pending_free.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_pending_free(&self) -> bool {
        self.pending_free.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.page_id().is_none()
    }

    #[inline]
    pub fn is_evictable(&self) -> bool {
        self.page_id().is_some() && !self.is_pinned()
    }

    /// Load `node` as the contents of `page_id`.
    pub fn install(&self, page_id: PageId, node: Node<K>) {
        *self.node.write() = node;
        self.set_page_id(Some(page_id));
        self.is_dirty.store(false, Ordering::Release);
        self.pending_free.store(false, Ordering::Release);
    }

    /// Reset the frame to empty state.
    pub fn reset(&self) {
        *self.node.write() = Node::empty_leaf();
        self.set_page_id(None);
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.pending_free.store(false, Ordering::Release);
    }
}

impl<K: BTreeKey> Default for Frame<K> {
    fn default() -> Self {
        Self::new()
    }
}
