//! Structural invariant checker.

use crate::buffer::BufferPoolManager;
use crate::common::{Error, PageId, Result};
use crate::index::btree::key::BTreeKey;
use crate::index::btree::node::Node;

/// Shape of a tree that passed verification.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TreeStats {
    /// Levels, counting the leaf level. A lone root leaf has height 1.
    pub height: usize,
    pub leaf_count: usize,
    pub internal_count: usize,
    pub entries: u64,
    /// Entries per leaf, in key order.
    pub leaf_fill: Vec<usize>,
    pub root_key_count: usize,
}

impl TreeStats {
    pub fn node_count(&self) -> usize {
        self.leaf_count + self.internal_count
    }
}

/// Walk the tree under `root` and check every invariant.
///
/// Pins one node at a time, so it works with any pool size. The caller
/// must exclude concurrent mutation.
pub(crate) fn verify_tree<K: BTreeKey>(
    pool: &BufferPoolManager<K>,
    root: PageId,
    expected_entries: u64,
) -> Result<TreeStats> {
    let mut walk = Walk {
        pool,
        leaves: Vec::new(),
        leaf_depth: None,
        stats: TreeStats::default(),
    };
    walk.visit(root, None, None, 0)?;

    for pair in walk.leaves.windows(2) {
        if pair[0].1 != pair[1].0 {
            return Err(violation(format!(
                "leaf {} links to {}, expected {}",
                pair[0].0, pair[0].1, pair[1].0
            )));
        }
    }
    if let Some(&(last, next)) = walk.leaves.last() {
        if next.is_valid() {
            return Err(violation(format!("last leaf {} links to {}", last, next)));
        }
    }
    if walk.stats.entries != expected_entries {
        return Err(violation(format!(
            "tree holds {} entries, counter says {}",
            walk.stats.entries, expected_entries
        )));
    }

    walk.stats.height = walk.leaf_depth.map_or(0, |depth| depth + 1);
    Ok(walk.stats)
}

struct Walk<'p, K: BTreeKey> {
    pool: &'p BufferPoolManager<K>,
    /// `(leaf, next)` in key order.
    leaves: Vec<(PageId, PageId)>,
    leaf_depth: Option<usize>,
    stats: TreeStats,
}

impl<K: BTreeKey> Walk<'_, K> {
    /// Every key of `page_id` must satisfy `lower <= key < upper`.
    fn visit(&mut self, page_id: PageId, lower: Option<&K>, upper: Option<&K>, depth: usize) -> Result<()> {
        let node = {
            let guard = self.pool.fetch_page_read(page_id)?;
            (*guard).clone()
        };
        let codec = *self.pool.codec();
        let is_root = depth == 0;
        let count = node.key_count();

        if count > codec.max_keys(&node) {
            return Err(violation(format!("{} holds {} keys, above capacity", page_id, count)));
        }
        if !is_root && count < codec.min_keys(&node) {
            return Err(violation(format!("{} holds {} keys, below minimum", page_id, count)));
        }

        let keys = match &node {
            Node::Leaf(leaf) => &leaf.keys,
            Node::Internal(internal) => &internal.keys,
        };
        if keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(violation(format!("{} keys are not strictly increasing", page_id)));
        }
        let below = lower.is_some_and(|lo| keys.first().is_some_and(|k| k < lo));
        let above = upper.is_some_and(|hi| keys.last().is_some_and(|k| k >= hi));
        if below || above {
            return Err(violation(format!("{} has keys outside its parent's bounds", page_id)));
        }

        match &node {
            Node::Leaf(leaf) => {
                match self.leaf_depth {
                    None => self.leaf_depth = Some(depth),
                    Some(expected) if expected != depth => {
                        return Err(violation(format!(
                            "leaf {} at depth {}, others at {}",
                            page_id, depth, expected
                        )));
                    }
                    Some(_) => {}
                }
                if is_root {
                    self.stats.root_key_count = leaf.len();
                }
                self.stats.leaf_count += 1;
                self.stats.entries += leaf.len() as u64;
                self.stats.leaf_fill.push(leaf.len());
                self.leaves.push((page_id, leaf.next));
            }
            Node::Internal(internal) => {
                if internal.children.len() != internal.keys.len() + 1 {
                    return Err(violation(format!(
                        "{} has {} keys but {} children",
                        page_id,
                        internal.keys.len(),
                        internal.children.len()
                    )));
                }
                if is_root {
                    if internal.keys.is_empty() {
                        return Err(violation(format!("internal root {} has no keys", page_id)));
                    }
                    self.stats.root_key_count = internal.keys.len();
                }
                self.stats.internal_count += 1;

                for (i, &child) in internal.children.iter().enumerate() {
                    let lo = if i == 0 { lower } else { Some(&internal.keys[i - 1]) };
                    let hi = internal.keys.get(i).or(upper);
                    self.visit(child, lo, hi, depth + 1)?;
                }
            }
        }
        Ok(())
    }
}

fn violation(message: String) -> Error {
    Error::TreeInvariant(message)
}
