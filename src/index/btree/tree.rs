//! B+ tree engine.
//!
//! # Latching
//! ```text
//!  root latch (RwLock<PageId>)
//!       │  read: search / scan       write: insert / delete
//!       ▼
//!  ┌─────────┐   crab: latch child, then release parent
//!  │  root   │   writers keep every ancestor that might split or merge
//!  └────┬────┘   and drop them as soon as a node is safe
//!       ▼
//!  ┌─────────┐   ┌─────────┐
//!  │  leaf   │──▶│  leaf   │   scans move right with try-latches only
//!  └─────────┘   └─────────┘
//! ```
//!
//! Latches are only ever taken top-down, or left-to-right without blocking,
//! so descents cannot deadlock. Every fallible step of a mutation (fetching
//! siblings, reserving split pages) happens before the first node changes:
//! an error leaves the tree untouched.

use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockWriteGuard};
use tracing::{debug, error, info};

use crate::buffer::{BufferPoolManager, PageWriteGuard};
use crate::common::{Error, PageId, Result};
use crate::index::btree::iterator::RangeScan;
use crate::index::btree::key::BTreeKey;
use crate::index::btree::node::{InternalNode, Node};
use crate::index::btree::verify::{self, TreeStats};
use crate::index::btree::NodeCodec;
use crate::recovery::sweep::{self, SweepReport};

/// A concurrent B+ tree over a buffer pool.
///
/// # Thread Safety
/// All operations take `&self`. Tree operations share the checkpoint gate;
/// [`checkpoint`](Self::checkpoint), [`flush_all`](Self::flush_all),
/// [`verify`](Self::verify) and [`sweep`](Self::sweep) take it exclusively,
/// so they always see a tree with no mutation in flight.
pub struct BPlusTree<K: BTreeKey> {
    pool: BufferPoolManager<K>,
    root: RwLock<PageId>,
    entries: AtomicU64,
    gate: RwLock<()>,
}

/// Write-latched path from the highest unsafe node down to a leaf.
struct WritePath<'a, K: BTreeKey> {
    /// Held only if the root itself may split or collapse.
    root_latch: Option<RwLockWriteGuard<'a, PageId>>,
    ancestors: Vec<PageWriteGuard<'a, K>>,
    /// `slots[i]` is the child of `ancestors[i]` the descent took.
    slots: Vec<usize>,
    leaf: PageWriteGuard<'a, K>,
}

/// How one underflowing node is repaired.
enum Rebalance<'a, K: BTreeKey> {
    BorrowLeft(PageWriteGuard<'a, K>),
    BorrowRight(PageWriteGuard<'a, K>),
    /// Fold the node into its left sibling.
    MergeIntoLeft(PageWriteGuard<'a, K>),
    /// Fold the right sibling into the node.
    MergeRight(PageWriteGuard<'a, K>),
}

/// Entries copied out of one leaf for a scan.
pub(crate) struct ScanBatch<K> {
    pub(crate) entries: Vec<(K, Vec<u8>)>,
    /// No leaf after this batch can hold keys in range.
    pub(crate) exhausted: bool,
}

impl<K: BTreeKey> BPlusTree<K> {
    /// Wrap a pool whose tree is rooted at `root` and holds `entries` keys.
    pub fn new(pool: BufferPoolManager<K>, root: PageId, entries: u64) -> Self {
        Self {
            pool,
            root: RwLock::new(root),
            entries: AtomicU64::new(entries),
            gate: RwLock::new(()),
        }
    }

    pub fn pool(&self) -> &BufferPoolManager<K> {
        &self.pool
    }

    pub fn codec(&self) -> &NodeCodec {
        self.pool.codec()
    }

    /// Current root block.
    pub fn root(&self) -> PageId {
        *self.root.read()
    }

    /// Number of live keys.
    pub fn len(&self) -> u64 {
        self.entries.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========================================================================
    // Point operations
    // ========================================================================

    /// Look up `key`.
    ///
    /// # Errors
    /// Returns `Error::KeyNotFound` if the key is absent.
    pub fn search(&self, key: &K) -> Result<Vec<u8>> {
        let _gate = self.gate.read();
        let root = self.root.read();
        let mut guard = self.pool.fetch_page_read(*root)?;
        drop(root);

        loop {
            let child = match &*guard {
                Node::Leaf(leaf) => {
                    return leaf.get(key).map(<[u8]>::to_vec).ok_or(Error::KeyNotFound);
                }
                Node::Internal(node) => node.child_for(key),
            };
            guard = self.pool.fetch_page_read(child)?;
        }
    }

    /// Insert or overwrite `key`, returning the previous value.
    ///
    /// # Errors
    /// - `Error::ValueTooLarge` if `value` exceeds the configured maximum
    /// - `Error::PoolExhausted` / `Error::OutOfSpace` if pages for a split
    ///   cannot be obtained; the tree is unchanged
    pub fn insert(&self, key: K, value: Vec<u8>) -> Result<Option<Vec<u8>>> {
        let codec = *self.pool.codec();
        codec.check_value(&value)?;

        let _gate = self.gate.read();
        let mut path = self.descend_for_write(&key, |node, _| match node {
            Node::Leaf(leaf) => leaf.len() < codec.max_leaf_entries() || leaf.get(&key).is_some(),
            Node::Internal(node) => node.keys.len() < codec.max_internal_keys(),
        })?;

        let exists = path.leaf.as_leaf().and_then(|leaf| leaf.get(&key)).is_some();
        if exists || path.leaf.key_count() < codec.max_leaf_entries() {
            let old = path.leaf.leaf_mut().insert(key, value);
            if old.is_none() {
                self.entries.fetch_add(1, Ordering::AcqRel);
            }
            return Ok(old);
        }

        // The leaf splits, and so does every held ancestor except a safe top
        // one. Holding the root latch means the root splits too.
        let grows = path.root_latch.is_some();
        let splits = 1 + path.ancestors.len() - usize::from(!grows);
        let mut reserved = self.reserve_pages(splits + usize::from(grows))?;

        let WritePath {
            mut root_latch,
            mut ancestors,
            mut slots,
            leaf: mut child,
        } = path;

        child.leaf_mut().insert(key, value);
        self.entries.fetch_add(1, Ordering::AcqRel);

        let mut right = take_reserved(&mut reserved);
        let (mut separator, right_node) = child.split();
        child.leaf_mut().next = right.page_id();
        *right = right_node;
        let mut right_id = right.page_id();
        drop(right);

        while let Some(mut parent) = ancestors.pop() {
            let slot = match slots.pop() {
                Some(slot) => slot,
                None => panic!("descent path lost a slot"),
            };
            drop(child);

            parent.internal_mut().insert_child(slot, separator, right_id);
            if parent.key_count() <= codec.max_internal_keys() {
                debug_assert!(reserved.is_empty());
                return Ok(None);
            }

            let mut sibling = take_reserved(&mut reserved);
            let (up, sibling_node) = parent.split();
            *sibling = sibling_node;
            separator = up;
            right_id = sibling.page_id();
            child = parent;
        }

        let mut new_root = take_reserved(&mut reserved);
        *new_root = Node::Internal(InternalNode {
            keys: vec![separator],
            children: vec![child.page_id(), right_id],
        });
        match root_latch.as_mut() {
            Some(root) => **root = new_root.page_id(),
            None => panic!("root split without holding the root latch"),
        }
        debug!(root = new_root.page_id().0, "tree.root.grow");
        debug_assert!(reserved.is_empty());
        Ok(None)
    }

    /// Remove `key`, returning its value.
    ///
    /// # Errors
    /// Returns `Error::KeyNotFound` if the key is absent; nothing changes.
    pub fn delete(&self, key: &K) -> Result<Vec<u8>> {
        let codec = *self.pool.codec();

        let _gate = self.gate.read();
        let mut path = self.descend_for_write(key, |node, at_root| match node {
            Node::Leaf(leaf) => at_root || leaf.len() > codec.min_leaf_entries(),
            Node::Internal(node) if at_root => node.keys.len() > 1,
            Node::Internal(node) => node.keys.len() > codec.min_internal_keys(),
        })?;

        if path.leaf.as_leaf().and_then(|leaf| leaf.get(key)).is_none() {
            return Err(Error::KeyNotFound);
        }

        let plan = self.plan_rebalance(&path, &codec)?;

        let old = match path.leaf.leaf_mut().remove(key) {
            Some(value) => value,
            None => unreachable!("key vanished under a write latch"),
        };
        self.entries.fetch_sub(1, Ordering::AcqRel);

        let freed = apply_rebalance(&mut path, plan);
        drop(path);

        for page_id in freed {
            if let Err(e) = self.pool.free_page(page_id) {
                error!(page_id = page_id.0, error = %e, "tree.free_failed");
            }
        }
        Ok(old)
    }

    /// Lazily iterate over the entries whose keys fall in `range`, in order.
    pub fn range_scan<R: std::ops::RangeBounds<K>>(&self, range: R) -> RangeScan<'_, K> {
        RangeScan::new(self, range.start_bound().cloned(), range.end_bound().cloned())
    }

    // ========================================================================
    // Durability and maintenance
    // ========================================================================

    /// Write every dirty page back and sync, without publishing the root.
    pub fn flush_all(&self) -> Result<()> {
        let _gate = self.gate.write();
        self.pool.flush_all_pages()
    }

    /// Make the current tree the durable one.
    pub fn checkpoint(&self) -> Result<()> {
        let _gate = self.gate.write();
        self.pool.flush_all_pages()?;
        let root = *self.root.read();
        let entries = self.len();
        self.pool.with_disk_manager(|dm| dm.commit(root, entries))
    }

    /// Check every structural invariant and report the tree's shape.
    ///
    /// # Errors
    /// Returns `Error::TreeInvariant` describing the first violation found.
    pub fn verify(&self) -> Result<TreeStats> {
        let _gate = self.gate.write();
        verify::verify_tree(&self.pool, *self.root.read(), self.len())
    }

    /// Free every allocated block that the tree does not reach.
    pub fn sweep(&self) -> Result<SweepReport> {
        let _gate = self.gate.write();
        self.pool.flush_all_pages()?;

        let root = *self.root.read();
        let reachable = sweep::reachable_pages(root, |page_id| {
            let guard = self.pool.fetch_page_read(page_id)?;
            Ok((*guard).clone())
        })?;
        let leaked = self
            .pool
            .with_disk_manager(|dm| sweep::leaked_pages(dm.page_count(), &reachable, |p| dm.is_free(p)));
        for &page_id in &leaked {
            self.pool.free_page(page_id)?;
        }

        if !leaked.is_empty() {
            info!(reclaimed = leaked.len(), reachable = reachable.len(), "tree.sweep");
        }
        Ok(SweepReport {
            reachable: reachable.len(),
            reclaimed: leaked,
        })
    }

    // ========================================================================
    // Internal: descent
    // ========================================================================

    /// Pessimistic write descent toward `key`.
    ///
    /// `is_safe(node, at_root)` says whether the operation can finish inside
    /// `node` without touching its parent; once it holds, the root latch and
    /// all ancestors are released.
    fn descend_for_write<F>(&self, key: &K, is_safe: F) -> Result<WritePath<'_, K>>
    where
        F: Fn(&Node<K>, bool) -> bool,
    {
        let root_latch = self.root.write();
        let mut current = self.pool.fetch_page_write(*root_latch)?;
        let mut root_latch = Some(root_latch);
        let mut ancestors = Vec::new();
        let mut slots = Vec::new();
        let mut at_root = true;

        loop {
            if is_safe(&*current, at_root) {
                root_latch = None;
                ancestors.clear();
                slots.clear();
            }

            let child = match &*current {
                Node::Leaf(_) => break,
                Node::Internal(node) => {
                    let slot = node.child_slot(key);
                    slots.push(slot);
                    node.children[slot]
                }
            };
            let next = self.pool.fetch_page_write(child)?;
            ancestors.push(std::mem::replace(&mut current, next));
            at_root = false;
        }

        Ok(WritePath {
            root_latch,
            ancestors,
            slots,
            leaf: current,
        })
    }

    /// Allocate `count` pages for splits, all or nothing.
    fn reserve_pages(&self, count: usize) -> Result<Vec<PageWriteGuard<'_, K>>> {
        let mut pages = Vec::with_capacity(count);
        for _ in 0..count {
            match self.pool.new_page(Node::empty_leaf()) {
                Ok(guard) => pages.push(guard),
                Err(e) => {
                    let ids: Vec<PageId> = pages.iter().map(|g| g.page_id()).collect();
                    drop(pages);
                    for page_id in ids {
                        if let Err(free_err) = self.pool.free_page(page_id) {
                            error!(page_id = page_id.0, error = %free_err, "tree.reserve.release_failed");
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(pages)
    }

    /// Decide, bottom-up, how each node that will underflow is repaired,
    /// latching the siblings involved.
    ///
    /// Borrow from the left sibling if it has a surplus, else from the right;
    /// otherwise merge with the left sibling, else with the right.
    fn plan_rebalance<'a>(
        &'a self,
        path: &WritePath<'a, K>,
        codec: &NodeCodec,
    ) -> Result<Vec<Rebalance<'a, K>>> {
        let mut plan = Vec::new();
        let mut level = path.ancestors.len();
        let mut count_after = path.leaf.key_count() - 1;
        let mut min = codec.min_leaf_entries();

        while level > 0 && count_after < min {
            let parent = match path.ancestors[level - 1].as_internal() {
                Some(parent) => parent,
                None => panic!("leaf above another node on the descent path"),
            };
            let slot = path.slots[level - 1];

            let mut left = None;
            if slot > 0 {
                let sibling = self.pool.fetch_page_write(parent.children[slot - 1])?;
                if sibling.key_count() > min {
                    plan.push(Rebalance::BorrowLeft(sibling));
                    return Ok(plan);
                }
                left = Some(sibling);
            }

            let mut right = None;
            if slot + 1 < parent.children.len() {
                let sibling = self.pool.fetch_page_write(parent.children[slot + 1])?;
                if sibling.key_count() > min {
                    plan.push(Rebalance::BorrowRight(sibling));
                    return Ok(plan);
                }
                right = Some(sibling);
            }

            plan.push(match (left, right) {
                (Some(left), _) => Rebalance::MergeIntoLeft(left),
                (None, Some(right)) => Rebalance::MergeRight(right),
                (None, None) => panic!("non-root node without siblings"),
            });

            count_after = parent.keys.len() - 1;
            min = codec.min_internal_keys();
            level -= 1;
        }
        Ok(plan)
    }

    // ========================================================================
    // Internal: scans
    // ========================================================================

    /// Copy the next run of in-range entries strictly after `lower`.
    ///
    /// Returns `Ok(None)` if a leaf latch was contended while moving along
    /// the leaf chain; the caller retries from the root.
    pub(crate) fn collect_batch(
        &self,
        lower: &Bound<K>,
        upper: &Bound<K>,
    ) -> Result<Option<ScanBatch<K>>> {
        let _gate = self.gate.read();
        let root = self.root.read();
        let mut guard = self.pool.fetch_page_read(*root)?;
        drop(root);

        loop {
            let child = match &*guard {
                Node::Leaf(_) => break,
                Node::Internal(node) => match lower {
                    Bound::Unbounded => node.children[0],
                    Bound::Included(key) | Bound::Excluded(key) => node.child_for(key),
                },
            };
            guard = self.pool.fetch_page_read(child)?;
        }

        loop {
            let next = {
                let leaf = match guard.as_leaf() {
                    Some(leaf) => leaf,
                    None => panic!("leaf chain reached an internal node"),
                };
                let start = match lower {
                    Bound::Unbounded => 0,
                    Bound::Included(key) => leaf.keys.partition_point(|k| k < key),
                    Bound::Excluded(key) => leaf.keys.partition_point(|k| k <= key),
                };

                let mut entries = Vec::new();
                for i in start..leaf.len() {
                    if past_upper(&leaf.keys[i], upper) {
                        return Ok(Some(ScanBatch {
                            entries,
                            exhausted: true,
                        }));
                    }
                    entries.push((leaf.keys[i].clone(), leaf.values[i].clone()));
                }

                if !entries.is_empty() || !leaf.next.is_valid() {
                    return Ok(Some(ScanBatch {
                        entries,
                        exhausted: !leaf.next.is_valid(),
                    }));
                }
                leaf.next
            };

            match self.pool.try_fetch_page_read(next)? {
                Some(next_guard) => guard = next_guard,
                None => return Ok(None),
            }
        }
    }
}

fn past_upper<K: Ord>(key: &K, upper: &Bound<K>) -> bool {
    match upper {
        Bound::Unbounded => false,
        Bound::Included(end) => key > end,
        Bound::Excluded(end) => key >= end,
    }
}

fn take_reserved<'a, K: BTreeKey>(reserved: &mut Vec<PageWriteGuard<'a, K>>) -> PageWriteGuard<'a, K> {
    match reserved.pop() {
        Some(guard) => guard,
        None => panic!("split page was not reserved"),
    }
}

/// Apply a rebalance plan after the leaf entry is gone. Returns the blocks
/// to free once every latch is released.
fn apply_rebalance<'a, K: BTreeKey>(path: &mut WritePath<'a, K>, plan: Vec<Rebalance<'a, K>>) -> Vec<PageId> {
    let depth = path.ancestors.len();
    let mut level = depth;
    let mut freed = Vec::new();

    for fix in plan {
        let slot = path.slots[level - 1];
        let (upper, lower) = path.ancestors.split_at_mut(level);
        let parent = match upper.last_mut() {
            Some(parent) => parent.internal_mut(),
            None => panic!("rebalance above the held path"),
        };
        let node: &mut Node<K> = if level == depth {
            &mut *path.leaf
        } else {
            &mut *lower[0]
        };

        match fix {
            Rebalance::BorrowLeft(mut left) => {
                Node::borrow_from_left(&mut *left, node, &mut parent.keys[slot - 1]);
            }
            Rebalance::BorrowRight(mut right) => {
                Node::borrow_from_right(node, &mut *right, &mut parent.keys[slot]);
            }
            Rebalance::MergeIntoLeft(mut left) => {
                let (separator, removed) = parent.remove_right_of(slot - 1);
                let contents = std::mem::replace(node, Node::empty_leaf());
                Node::merge(&mut *left, contents, separator);
                freed.push(removed);
            }
            Rebalance::MergeRight(mut right) => {
                let (separator, removed) = parent.remove_right_of(slot);
                let contents = std::mem::replace(&mut *right, Node::empty_leaf());
                Node::merge(node, contents, separator);
                freed.push(removed);
            }
        }
        level -= 1;
    }

    // An internal root left with a single child is replaced by that child.
    if let (Some(root_latch), Some(root)) = (path.root_latch.as_mut(), path.ancestors.first()) {
        if root.key_count() == 0 {
            if let Some(only_child) = root.as_internal().map(|node| node.children[0]) {
                **root_latch = only_child;
                freed.push(root.page_id());
                debug!(root = only_child.0, "tree.root.collapse");
            }
        }
    }
    freed
}
