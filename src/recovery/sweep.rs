//! Reachability sweep - return leaked blocks to the free list.
//!
//! A block is live if it is the root or a descendant of it. Any other block
//! that is not already free is a leak: it was written but never linked into
//! a committed tree. The sweep walks the tree and frees the rest.

use std::collections::HashSet;

use tracing::info;

use crate::common::{Error, PageId, Result};
use crate::index::btree::{BTreeKey, Node, NodeCodec};
use crate::storage::DiskManager;

/// Result of a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SweepReport {
    /// Blocks reachable from the root.
    pub reachable: usize,
    /// Blocks returned to the free list.
    pub reclaimed: Vec<PageId>,
}

/// Collect every block reachable from `root`, loading nodes with `load`.
///
/// # Errors
/// Returns `Error::CorruptPage` if a block is referenced twice, plus any
/// error from `load`.
pub fn reachable_pages<K, F>(root: PageId, mut load: F) -> Result<HashSet<PageId>>
where
    K: BTreeKey,
    F: FnMut(PageId) -> Result<Node<K>>,
{
    let mut seen = HashSet::new();
    if !root.is_valid() {
        return Ok(seen);
    }

    let mut stack = vec![root];
    while let Some(page_id) = stack.pop() {
        if !seen.insert(page_id) {
            return Err(Error::corrupt(page_id.0, "block referenced twice"));
        }
        if let Node::Internal(node) = load(page_id)? {
            stack.extend(node.children.iter().rev());
        }
    }
    Ok(seen)
}

/// Allocated blocks that are neither reachable nor free.
pub fn leaked_pages(
    page_count: u32,
    reachable: &HashSet<PageId>,
    is_free: impl Fn(PageId) -> bool,
) -> Vec<PageId> {
    (1..page_count)
        .map(PageId::new)
        .filter(|page_id| !reachable.contains(page_id) && !is_free(*page_id))
        .collect()
}

/// Sweep a page store directly, before a buffer pool is attached.
pub fn sweep_store<K: BTreeKey>(
    dm: &mut DiskManager,
    codec: &NodeCodec,
    root: PageId,
) -> Result<SweepReport> {
    let reachable = reachable_pages::<K, _>(root, |page_id| {
        let page = dm.read_page(page_id)?;
        codec.decode(page_id, &page)
    })?;

    let leaked = leaked_pages(dm.page_count(), &reachable, |page_id| dm.is_free(page_id));
    for &page_id in &leaked {
        dm.free_page(page_id)?;
    }

    if !leaked.is_empty() {
        info!(reclaimed = leaked.len(), reachable = reachable.len(), "sweep.complete");
    }
    Ok(SweepReport {
        reachable: reachable.len(),
        reclaimed: leaked,
    })
}
