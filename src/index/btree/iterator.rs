//! Range scan iterator.

use std::collections::VecDeque;
use std::ops::Bound;

use tracing::warn;

use crate::common::Result;
use crate::index::btree::key::BTreeKey;
use crate::index::btree::tree::BPlusTree;

/// Lazy, ascending iterator over a key range.
///
/// Entries are copied out one leaf at a time; no latch or pin is held
/// between calls to `next`. Each refill restarts strictly after the last key
/// returned, so concurrent splits and merges never cause an entry to be
/// yielded twice. Keys inserted or removed during the scan may or may not be
/// observed.
///
/// # Example
/// ```ignore
/// for entry in tree.range_scan(10..=20) {
///     let (key, value) = entry?;
/// }
/// ```
pub struct RangeScan<'a, K: BTreeKey> {
    tree: &'a BPlusTree<K>,
    lower: Bound<K>,
    upper: Bound<K>,
    buffer: VecDeque<(K, Vec<u8>)>,
    done: bool,
}

impl<'a, K: BTreeKey> RangeScan<'a, K> {
    pub(crate) fn new(tree: &'a BPlusTree<K>, lower: Bound<K>, upper: Bound<K>) -> Self {
        let done = is_empty_range(&lower, &upper);
        Self {
            tree,
            lower,
            upper,
            buffer: VecDeque::new(),
            done,
        }
    }

    fn refill(&mut self) -> Result<()> {
        loop {
            match self.tree.collect_batch(&self.lower, &self.upper)? {
                Some(batch) => {
                    if let Some((last, _)) = batch.entries.last() {
                        self.lower = Bound::Excluded(last.clone());
                    }
                    self.done = batch.exhausted || batch.entries.is_empty();
                    self.buffer.extend(batch.entries);
                    return Ok(());
                }
                // A writer holds the next leaf; let it finish.
                None => {
                    warn!(after = ?self.lower, "scan.restart");
                    std::thread::yield_now();
                }
            }
        }
    }
}

impl<K: BTreeKey> Iterator for RangeScan<'_, K> {
    type Item = Result<(K, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.done {
            if let Err(e) = self.refill() {
                self.done = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

fn is_empty_range<K: Ord>(lower: &Bound<K>, upper: &Bound<K>) -> bool {
    match (lower, upper) {
        (Bound::Included(lo), Bound::Included(hi)) => lo > hi,
        (Bound::Included(lo), Bound::Excluded(hi))
        | (Bound::Excluded(lo), Bound::Included(hi))
        | (Bound::Excluded(lo), Bound::Excluded(hi)) => lo >= hi,
        _ => false,
    }
}
