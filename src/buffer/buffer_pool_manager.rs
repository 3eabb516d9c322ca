//! Buffer Pool Manager - the node caching layer.
//!
//! The [`BufferPoolManager`] provides:
//! - Caching of decoded nodes between disk and the tree
//! - Pin-based reference counting
//! - LRU eviction with synchronous write-back of dirty victims
//! - Deferred frees for pages still pinned by another caller

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::buffer::replacer::LruReplacer;
use crate::buffer::{BufferPoolStats, Frame, FrameId, PageReadGuard, PageWriteGuard};
use crate::common::{Error, PageId, Result};
use crate::index::btree::{BTreeKey, Node, NodeCodec};
use crate::storage::DiskManager;

/// Bookkeeping protected by the pool's state lock.
struct PoolState {
    /// Maps page IDs to frame IDs.
    page_table: HashMap<PageId, FrameId>,
    /// Stack of free frame IDs (LIFO for cache locality).
    free_list: Vec<FrameId>,
    replacer: LruReplacer,
}

/// Manages a pool of frames caching decoded tree nodes.
///
/// # Architecture
/// ```text
/// ┌─────────────────────────────────────────────────────────────┐
/// │                 BufferPoolManager<K>                        │
/// │  ┌──────────────────────────┐  ┌─────────────────────────┐  │
/// │  │ state: Mutex<PoolState>  │  │ frames: Vec<Frame<K>>   │  │
/// │  │  page_table PageId → Fid │─▶│ [Frame0] [Frame1] ...   │  │
/// │  │  free_list, LruReplacer  │  │ each: RwLock<Node<K>>   │  │
/// │  └──────────────────────────┘  └─────────────────────────┘  │
/// │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐       │
/// │  │disk_manager  │  │  NodeCodec   │  │    stats     │       │
/// │  │   Mutex      │  │              │  │   atomics    │       │
/// │  └──────────────┘  └──────────────┘  └──────────────┘       │
/// └─────────────────────────────────────────────────────────────┘
/// ```
///
/// # Thread Safety
/// - `state`: one `Mutex`, so pin, unpin, eviction and whole cache misses
///   are serialized
/// - `disk_manager`: `Mutex`, single-threaded I/O
/// - `frames`: fixed size, each frame latches its own node
///
/// Lock order is node latch, then state, then disk manager. The pool only
/// latches a frame while holding the state lock when its pin count is 0,
/// and guards release the latch before unpinning, so that latch is free.
pub struct BufferPoolManager<K: BTreeKey> {
    frames: Vec<Frame<K>>,
    state: Mutex<PoolState>,
    disk_manager: Mutex<DiskManager>,
    codec: NodeCodec,
    stats: BufferPoolStats,
    pool_size: usize,
}

impl<K: BTreeKey> BufferPoolManager<K> {
    /// Create a new buffer pool manager.
    ///
    /// # Panics
    /// Panics if `pool_size` is 0.
    pub fn new(pool_size: usize, disk_manager: DiskManager, codec: NodeCodec) -> Self {
        assert!(pool_size > 0, "pool_size must be > 0");

        let frames = (0..pool_size).map(|_| Frame::new()).collect();
        let free_list = (0..pool_size).rev().map(FrameId::new).collect();

        Self {
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
                replacer: LruReplacer::new(),
            }),
            disk_manager: Mutex::new(disk_manager),
            codec,
            stats: BufferPoolStats::new(),
            pool_size,
        }
    }

    // ========================================================================
    // Public API: Fetch pages
    // ========================================================================

    /// Fetch a node for reading (shared latch).
    ///
    /// # Errors
    /// - `Error::PageNotFound` if the page is unallocated or being freed
    /// - `Error::CorruptPage` if the block fails validation
    /// - `Error::PoolExhausted` if every frame is pinned
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<PageReadGuard<'_, K>> {
        let frame_id = self.pin_page(page_id)?;
        let lock = self.frames[frame_id.0].node();
        Ok(PageReadGuard::new(self, frame_id, page_id, lock))
    }

    /// Fetch a node for writing (exclusive latch).
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<PageWriteGuard<'_, K>> {
        let frame_id = self.pin_page(page_id)?;
        let lock = self.frames[frame_id.0].node_mut();
        Ok(PageWriteGuard::new(self, frame_id, page_id, lock))
    }

    /// Pin a node and try to latch it without blocking.
    ///
    /// Returns `Ok(None)` if a writer holds the latch; the pin is released.
    pub fn try_fetch_page_read(&self, page_id: PageId) -> Result<Option<PageReadGuard<'_, K>>> {
        let frame_id = self.pin_page(page_id)?;
        match self.frames[frame_id.0].try_node() {
            Some(lock) => Ok(Some(PageReadGuard::new(self, frame_id, page_id, lock))),
            None => {
                self.unpin_page_internal(frame_id);
                Ok(None)
            }
        }
    }

    // ========================================================================
    // Public API: Create and free pages
    // ========================================================================

    /// Allocate a block and cache `node` as its contents.
    ///
    /// The page starts dirty and pinned by the returned guard.
    ///
    /// # Errors
    /// - `Error::PoolExhausted` if every frame is pinned
    /// - `Error::OutOfSpace` if the page store cannot grow
    pub fn new_page(&self, node: Node<K>) -> Result<PageWriteGuard<'_, K>> {
        let mut state = self.state.lock();
        let frame_id = self.get_free_frame(&mut state)?;

        let allocated = self.disk_manager.lock().allocate_page();
        let page_id = match allocated {
            Ok(page_id) => page_id,
            Err(e) => {
                state.free_list.push(frame_id);
                return Err(e);
            }
        };

        let frame = &self.frames[frame_id.0];
        frame.install(page_id, node);
        frame.mark_dirty();
        frame.pin();
        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);
        drop(state);

        let lock = frame.node_mut();
        Ok(PageWriteGuard::new(self, frame_id, page_id, lock))
    }

    /// Release a page's block id.
    ///
    /// A resident, unpinned page is dropped from the cache without being
    /// written. If the page is still pinned, the free is deferred until the
    /// last pin drops; until then fetches of it fail with `PageNotFound`.
    ///
    /// # Errors
    /// Returns `Error::InvalidPageId` for a page already being freed, plus
    /// anything [`DiskManager::free_page`] reports.
    pub fn free_page(&self, page_id: PageId) -> Result<()> {
        let mut state = self.state.lock();
        let resident = state.page_table.get(&page_id).copied();
        if let Some(frame_id) = resident {
            let frame = &self.frames[frame_id.0];
            if frame.is_pending_free() {
                return Err(Error::InvalidPageId(page_id.0));
            }
            if frame.is_pinned() {
                frame.mark_pending_free();
                debug!(page_id = page_id.0, "pool.free.deferred");
                return Ok(());
            }
            self.release_frame(&mut state, frame_id, page_id);
        }
        drop(state);

        self.disk_manager.lock().free_page(page_id)
    }

    // ========================================================================
    // Public API: Flush pages
    // ========================================================================

    /// Write a page back if it is resident and dirty.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let frame_id = {
            let mut state = self.state.lock();
            let resident = state.page_table.get(&page_id).copied();
            match resident {
                Some(frame_id) if !self.frames[frame_id.0].is_pending_free() => {
                    self.frames[frame_id.0].pin();
                    state.replacer.set_evictable(frame_id, false);
                    frame_id
                }
                _ => return Ok(()),
            }
        };

        let result = self.flush_frame(frame_id, page_id);
        self.unpin_page_internal(frame_id);
        result
    }

    /// Write back every dirty page and sync the data file.
    ///
    /// Checkpointed blocks among them are journaled in one batch first.
    /// Callers must ensure no node is mid-mutation.
    pub fn flush_all_pages(&self) -> Result<()> {
        let batch: Vec<(PageId, FrameId)> = {
            let mut guard = self.state.lock();
            let PoolState {
                page_table,
                replacer,
                ..
            } = &mut *guard;

            let mut batch = Vec::new();
            for (&page_id, &frame_id) in page_table.iter() {
                let frame = &self.frames[frame_id.0];
                if frame.is_dirty() && !frame.is_pending_free() {
                    frame.pin();
                    replacer.set_evictable(frame_id, false);
                    batch.push((page_id, frame_id));
                }
            }
            batch
        };

        let result = self.write_batch(&batch);
        for &(_, frame_id) in &batch {
            self.unpin_page_internal(frame_id);
        }

        debug!(pages = batch.len(), "pool.flush_all");
        result
    }

    // ========================================================================
    // Public API: Stats and info
    // ========================================================================

    pub fn stats(&self) -> &BufferPoolStats {
        &self.stats
    }

    pub fn codec(&self) -> &NodeCodec {
        &self.codec
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.lock().free_list.len()
    }

    /// Number of resident pages.
    pub fn page_count(&self) -> usize {
        self.state.lock().page_table.len()
    }

    /// Pin count of a resident page, `None` if it isn't cached.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|fid| self.frames[fid.0].pin_count())
    }

    /// Total pins currently held across the pool.
    pub fn total_pins(&self) -> u32 {
        self.frames.iter().map(|f| f.pin_count()).sum()
    }

    /// Run `f` with exclusive access to the page store.
    pub fn with_disk_manager<R>(&self, f: impl FnOnce(&mut DiskManager) -> R) -> R {
        f(&mut self.disk_manager.lock())
    }

    // ========================================================================
    // Internal: Called by guards on drop
    // ========================================================================

    #[inline]
    pub(crate) fn frame(&self, frame_id: FrameId) -> &Frame<K> {
        &self.frames[frame_id.0]
    }

    /// Drop one pin. At zero the frame becomes evictable, or completes a
    /// deferred free.
    pub(crate) fn unpin_page_internal(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        let frame = &self.frames[frame_id.0];
        if frame.unpin() > 0 {
            return;
        }

        match frame.page_id() {
            Some(page_id) if frame.is_pending_free() => {
                self.release_frame(&mut state, frame_id, page_id);
                drop(state);
                if let Err(e) = self.disk_manager.lock().free_page(page_id) {
                    error!(page_id = page_id.0, error = %e, "pool.free.deferred_failed");
                }
            }
            _ => state.replacer.set_evictable(frame_id, true),
        }
    }

    // ========================================================================
    // Internal: Core fetch logic
    // ========================================================================

    /// Pin `page_id` into a frame, loading it on a miss.
    fn pin_page(&self, page_id: PageId) -> Result<FrameId> {
        let mut state = self.state.lock();

        if let Some(frame_id) = state.page_table.get(&page_id).copied() {
            let frame = &self.frames[frame_id.0];
            if frame.is_pending_free() {
                return Err(Error::PageNotFound(page_id.0));
            }
            frame.pin();
            state.replacer.record_access(frame_id);
            state.replacer.set_evictable(frame_id, false);
            BufferPoolStats::bump(&self.stats.cache_hits);
            return Ok(frame_id);
        }

        BufferPoolStats::bump(&self.stats.cache_misses);
        let frame_id = self.get_free_frame(&mut state)?;
        let node = match self.load(page_id) {
            Ok(node) => node,
            Err(e) => {
                state.free_list.push(frame_id);
                return Err(e);
            }
        };

        let frame = &self.frames[frame_id.0];
        frame.install(page_id, node);
        frame.pin();
        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);
        Ok(frame_id)
    }

    fn load(&self, page_id: PageId) -> Result<Node<K>> {
        let page = self.disk_manager.lock().read_page(page_id)?;
        BufferPoolStats::bump(&self.stats.pages_read);
        self.codec.decode(page_id, &page)
    }

    // ========================================================================
    // Internal: Frame allocation and eviction
    // ========================================================================

    /// Get a free frame, evicting the least recently used page if necessary.
    fn get_free_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        if let Some(frame_id) = state.free_list.pop() {
            return Ok(frame_id);
        }

        let Some(frame_id) = state.replacer.evict() else {
            BufferPoolStats::bump(&self.stats.exhausted);
            return Err(Error::PoolExhausted {
                pool_size: self.pool_size,
            });
        };

        let frame = &self.frames[frame_id.0];
        let Some(old_page_id) = frame.page_id() else {
            return Ok(frame_id);
        };

        if frame.is_dirty() {
            let page = self.codec.encode::<K>(&frame.node());
            if let Err(e) = self.disk_manager.lock().write_page(old_page_id, &page) {
                // Keep the page resident and evictable.
                state.replacer.record_access(frame_id);
                state.replacer.set_evictable(frame_id, true);
                return Err(e);
            }
            BufferPoolStats::bump(&self.stats.pages_written);
            BufferPoolStats::bump(&self.stats.write_backs);
        }

        state.page_table.remove(&old_page_id);
        frame.reset();
        BufferPoolStats::bump(&self.stats.evictions);
        debug!(frame_id = frame_id.0, page_id = old_page_id.0, "pool.evict");
        Ok(frame_id)
    }

    /// Drop a resident page from the cache without writing it.
    fn release_frame(&self, state: &mut PoolState, frame_id: FrameId, page_id: PageId) {
        state.page_table.remove(&page_id);
        state.replacer.remove(frame_id);
        self.frames[frame_id.0].reset();
        state.free_list.push(frame_id);
    }

    /// Write one pinned frame back if it is dirty.
    fn flush_frame(&self, frame_id: FrameId, page_id: PageId) -> Result<()> {
        let frame = &self.frames[frame_id.0];
        let node = frame.node();
        if frame.is_dirty() {
            let page = self.codec.encode::<K>(&node);
            self.disk_manager.lock().write_page(page_id, &page)?;
            frame.clear_dirty();
            BufferPoolStats::bump(&self.stats.pages_written);
        }
        Ok(())
    }

    fn write_batch(&self, batch: &[(PageId, FrameId)]) -> Result<()> {
        let ids: Vec<PageId> = batch.iter().map(|&(page_id, _)| page_id).collect();
        self.disk_manager.lock().protect(&ids)?;
        for &(page_id, frame_id) in batch {
            self.flush_frame(frame_id, page_id)?;
        }
        self.disk_manager.lock().sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Superblock;
    use tempfile::tempdir;

    const PS: usize = 512;

    /// Helper to create a BPM with a temporary database file.
    fn create_test_bpm(pool_size: usize) -> (BufferPoolManager<u32>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let dm = DiskManager::create(&path, Superblock::new(PS, 4, 4, 16), None).unwrap();
        let codec = NodeCodec::new(PS, 4, 16, 4).unwrap();
        (BufferPoolManager::new(pool_size, dm, codec), dir)
    }

    fn leaf(key: u32) -> Node<u32> {
        let mut node = Node::empty_leaf();
        node.leaf_mut().insert(key, vec![key as u8]);
        node
    }

    fn first_key(bpm: &BufferPoolManager<u32>, page_id: PageId) -> u32 {
        *bpm.fetch_page_read(page_id).unwrap().first_key().unwrap()
    }

    #[test]
    fn test_new_page() {
        let (bpm, _dir) = create_test_bpm(10);

        let guard = bpm.new_page(leaf(1)).unwrap();
        assert_eq!(guard.page_id(), PageId::new(1));
        drop(guard);

        let guard = bpm.new_page(leaf(2)).unwrap();
        assert_eq!(guard.page_id(), PageId::new(2));
    }

    #[test]
    fn test_fetch_page_write() {
        let (bpm, _dir) = create_test_bpm(10);
        let page_id = bpm.new_page(leaf(1)).unwrap().page_id();

        {
            let mut guard = bpm.fetch_page_write(page_id).unwrap();
            guard.leaf_mut().insert(0, vec![]);
        }

        assert_eq!(first_key(&bpm, page_id), 0);
    }

    #[test]
    fn test_cache_hit() {
        let (bpm, _dir) = create_test_bpm(10);
        let page_id = bpm.new_page(leaf(1)).unwrap().page_id();

        first_key(&bpm, page_id);
        first_key(&bpm, page_id);

        let snapshot = bpm.stats().snapshot();
        assert_eq!(snapshot.cache_hits, 2);
        assert_eq!(snapshot.cache_misses, 0);
    }

    #[test]
    fn test_dirty_page_written_back_on_eviction() {
        let (bpm, _dir) = create_test_bpm(1);

        let first = bpm.new_page(leaf(42)).unwrap().page_id();
        // Evicts the first page, writing it back.
        let second = bpm.new_page(leaf(7)).unwrap().page_id();

        assert_eq!(first_key(&bpm, first), 42);
        assert_eq!(first_key(&bpm, second), 7);

        let snapshot = bpm.stats().snapshot();
        assert!(snapshot.evictions >= 2);
        assert!(snapshot.write_backs >= 2);
        assert_eq!(snapshot.cache_misses, 2);
    }

    #[test]
    fn test_lru_victim_selection() {
        let (bpm, _dir) = create_test_bpm(2);

        let a = bpm.new_page(leaf(1)).unwrap().page_id();
        let b = bpm.new_page(leaf(2)).unwrap().page_id();
        // Touch `a` so `b` is the least recently used.
        first_key(&bpm, a);
        bpm.new_page(leaf(3)).unwrap();

        assert!(bpm.pin_count(a).is_some());
        assert!(bpm.pin_count(b).is_none());
    }

    #[test]
    fn test_pool_exhausted() {
        let (bpm, _dir) = create_test_bpm(2);

        let _g1 = bpm.new_page(leaf(1)).unwrap();
        let _g2 = bpm.new_page(leaf(2)).unwrap();

        assert!(matches!(
            bpm.new_page(leaf(3)),
            Err(Error::PoolExhausted { pool_size: 2 })
        ));
        assert_eq!(bpm.stats().snapshot().exhausted, 1);
        // The failed allocation did not consume a block id.
        assert_eq!(bpm.with_disk_manager(|dm| dm.page_count()), 3);
    }

    #[test]
    fn test_pin_count_tracking() {
        let (bpm, _dir) = create_test_bpm(10);
        let page_id = bpm.new_page(leaf(1)).unwrap().page_id();
        assert_eq!(bpm.pin_count(page_id), Some(0));

        let g1 = bpm.fetch_page_read(page_id).unwrap();
        let g2 = bpm.fetch_page_read(page_id).unwrap();
        assert_eq!(bpm.pin_count(page_id), Some(2));
        drop(g1);
        drop(g2);
        assert_eq!(bpm.pin_count(page_id), Some(0));
        assert_eq!(bpm.total_pins(), 0);
    }

    #[test]
    fn test_try_fetch_under_write_latch() {
        let (bpm, _dir) = create_test_bpm(10);
        let page_id = bpm.new_page(leaf(1)).unwrap().page_id();

        let writer = bpm.fetch_page_write(page_id).unwrap();
        assert!(bpm.try_fetch_page_read(page_id).unwrap().is_none());
        assert_eq!(bpm.pin_count(page_id), Some(1));
        drop(writer);

        assert!(bpm.try_fetch_page_read(page_id).unwrap().is_some());
    }

    #[test]
    fn test_free_unpinned_page() {
        let (bpm, _dir) = create_test_bpm(10);
        let page_id = bpm.new_page(leaf(1)).unwrap().page_id();

        bpm.free_page(page_id).unwrap();
        assert_eq!(bpm.page_count(), 0);
        assert_eq!(bpm.free_frame_count(), 10);
        assert!(matches!(
            bpm.fetch_page_read(page_id),
            Err(Error::PageNotFound(_))
        ));
        // Block id is reused.
        assert_eq!(bpm.new_page(leaf(2)).unwrap().page_id(), page_id);
    }

    #[test]
    fn test_free_pinned_page_is_deferred() {
        let (bpm, _dir) = create_test_bpm(10);
        let page_id = bpm.new_page(leaf(1)).unwrap().page_id();

        let reader = bpm.fetch_page_read(page_id).unwrap();
        bpm.free_page(page_id).unwrap();
        assert!(!bpm.with_disk_manager(|dm| dm.is_free(page_id)));
        assert!(matches!(
            bpm.fetch_page_read(page_id),
            Err(Error::PageNotFound(_))
        ));
        assert!(matches!(bpm.free_page(page_id), Err(Error::InvalidPageId(_))));

        drop(reader);
        assert!(bpm.with_disk_manager(|dm| dm.is_free(page_id)));
        assert_eq!(bpm.page_count(), 0);
    }

    #[test]
    fn test_flush_page_and_flush_all() {
        let (bpm, _dir) = create_test_bpm(10);
        let ids: Vec<PageId> = (0..5)
            .map(|i| bpm.new_page(leaf(i)).unwrap().page_id())
            .collect();

        bpm.flush_page(ids[0]).unwrap();
        assert_eq!(bpm.stats().snapshot().pages_written, 1);

        bpm.flush_all_pages().unwrap();
        assert_eq!(bpm.stats().snapshot().pages_written, 5);
        assert_eq!(bpm.total_pins(), 0);

        // Clean pages are not written again.
        bpm.flush_all_pages().unwrap();
        assert_eq!(bpm.stats().snapshot().pages_written, 5);
    }

    #[test]
    fn test_corrupt_block_reported() {
        let (bpm, _dir) = create_test_bpm(10);
        // Allocated but never written: fails its checksum.
        let page_id = bpm.with_disk_manager(|dm| dm.allocate_page()).unwrap();
        assert!(matches!(
            bpm.fetch_page_read(page_id),
            Err(Error::CorruptPage { .. })
        ));
        assert_eq!(bpm.free_frame_count(), 10);
    }

    #[test]
    fn test_concurrent_reads() {
        use std::sync::Arc;
        use std::thread;

        let (bpm, _dir) = create_test_bpm(4);
        let bpm = Arc::new(bpm);
        let ids: Vec<PageId> = (0..8)
            .map(|i| bpm.new_page(leaf(i)).unwrap().page_id())
            .collect();

        let mut handles = vec![];
        for t in 0..4 {
            let bpm = Arc::clone(&bpm);
            let ids = ids.clone();
            handles.push(thread::spawn(move || {
                for round in 0..50 {
                    let i = (t + round) % ids.len();
                    let guard = bpm.fetch_page_read(ids[i]).unwrap();
                    assert_eq!(*guard.first_key().unwrap(), i as u32);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(bpm.total_pins(), 0);
    }
}
