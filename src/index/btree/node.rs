//! In-memory node model.
//!
//! Nodes are what the buffer pool caches: a frame holds a decoded [`Node`],
//! and the codec turns it into a block image only on write-back. Children
//! and leaf links are [`PageId`]s, so the tree is an arena addressed by block
//! id with no pointers between nodes.

use crate::common::PageId;

/// A tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node<K> {
    Internal(InternalNode<K>),
    Leaf(LeafNode<K>),
}

/// `children[i]` covers keys in `[keys[i-1], keys[i])`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalNode<K> {
    pub keys: Vec<K>,
    pub children: Vec<PageId>,
}

/// Sorted entries plus the link to the next leaf in key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode<K> {
    pub keys: Vec<K>,
    pub values: Vec<Vec<u8>>,
    pub next: PageId,
}

impl<K: Ord + Clone> Node<K> {
    /// A leaf with no entries and no successor.
    pub fn empty_leaf() -> Self {
        Node::Leaf(LeafNode {
            keys: Vec::new(),
            values: Vec::new(),
            next: PageId::INVALID,
        })
    }

    /// Entries in a leaf, separators in an internal node.
    #[inline]
    pub fn key_count(&self) -> usize {
        match self {
            Node::Internal(node) => node.keys.len(),
            Node::Leaf(node) => node.keys.len(),
        }
    }

    /// Smallest key stored in the node, if any.
    pub fn first_key(&self) -> Option<&K> {
        match self {
            Node::Internal(node) => node.keys.first(),
            Node::Leaf(node) => node.keys.first(),
        }
    }

    pub fn as_leaf(&self) -> Option<&LeafNode<K>> {
        match self {
            Node::Leaf(node) => Some(node),
            Node::Internal(_) => None,
        }
    }

    pub fn as_internal(&self) -> Option<&InternalNode<K>> {
        match self {
            Node::Internal(node) => Some(node),
            Node::Leaf(_) => None,
        }
    }

    /// # Panics
    /// Panics if the node is internal.
    pub fn leaf_mut(&mut self) -> &mut LeafNode<K> {
        match self {
            Node::Leaf(node) => node,
            Node::Internal(_) => panic!("expected a leaf node"),
        }
    }

    /// # Panics
    /// Panics if the node is a leaf.
    pub fn internal_mut(&mut self) -> &mut InternalNode<K> {
        match self {
            Node::Internal(node) => node,
            Node::Leaf(_) => panic!("expected an internal node"),
        }
    }

    /// Split an overflowing node in place, returning the separator to push
    /// into the parent and the new right sibling.
    ///
    /// For leaves the caller links `self.next` to the sibling's block.
    pub fn split(&mut self) -> (K, Node<K>) {
        match self {
            Node::Leaf(node) => {
                let (separator, right) = node.split();
                (separator, Node::Leaf(right))
            }
            Node::Internal(node) => {
                let (separator, right) = node.split();
                (separator, Node::Internal(right))
            }
        }
    }

    /// Move the last entry of `left` to the front of `node`. `separator` is
    /// the parent key between the two and is updated in place.
    ///
    /// # Panics
    /// Panics if the nodes are of different kinds.
    pub fn borrow_from_left(left: &mut Node<K>, node: &mut Node<K>, separator: &mut K) {
        match (left, node) {
            (Node::Leaf(left), Node::Leaf(node)) => {
                let (key, value) = left.pop_last();
                node.keys.insert(0, key);
                node.values.insert(0, value);
                *separator = node.keys[0].clone();
            }
            (Node::Internal(left), Node::Internal(node)) => {
                let (key, child) = left.pop_last();
                let down = std::mem::replace(separator, key);
                node.keys.insert(0, down);
                node.children.insert(0, child);
            }
            _ => panic!("sibling nodes of different kinds"),
        }
    }

    /// Move the first entry of `right` to the end of `node`, updating the
    /// parent `separator` between them.
    ///
    /// # Panics
    /// Panics if the nodes are of different kinds.
    pub fn borrow_from_right(node: &mut Node<K>, right: &mut Node<K>, separator: &mut K) {
        match (node, right) {
            (Node::Leaf(node), Node::Leaf(right)) => {
                node.keys.push(right.keys.remove(0));
                node.values.push(right.values.remove(0));
                *separator = right.keys[0].clone();
            }
            (Node::Internal(node), Node::Internal(right)) => {
                let key = right.keys.remove(0);
                let child = right.children.remove(0);
                let down = std::mem::replace(separator, key);
                node.keys.push(down);
                node.children.push(child);
            }
            _ => panic!("sibling nodes of different kinds"),
        }
    }

    /// Fold `right` into `left`. `separator` is the parent key between them;
    /// internal nodes pull it down, leaves drop it.
    ///
    /// # Panics
    /// Panics if the nodes are of different kinds.
    pub fn merge(left: &mut Node<K>, right: Node<K>, separator: K) {
        match (left, right) {
            (Node::Leaf(left), Node::Leaf(right)) => {
                left.keys.extend(right.keys);
                left.values.extend(right.values);
                left.next = right.next;
            }
            (Node::Internal(left), Node::Internal(right)) => {
                left.keys.push(separator);
                left.keys.extend(right.keys);
                left.children.extend(right.children);
            }
            _ => panic!("sibling nodes of different kinds"),
        }
    }
}

impl<K: Ord + Clone> LeafNode<K> {
    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<&[u8]> {
        self.keys
            .binary_search(key)
            .ok()
            .map(|i| self.values[i].as_slice())
    }

    /// Insert in sorted position, or overwrite an existing key in place and
    /// return the previous value.
    pub fn insert(&mut self, key: K, value: Vec<u8>) -> Option<Vec<u8>> {
        match self.keys.binary_search(&key) {
            Ok(i) => Some(std::mem::replace(&mut self.values[i], value)),
            Err(i) => {
                self.keys.insert(i, key);
                self.values.insert(i, value);
                None
            }
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<Vec<u8>> {
        let i = self.keys.binary_search(key).ok()?;
        self.keys.remove(i);
        Some(self.values.remove(i))
    }

    /// Left keeps the lower half; the right half's first key is the separator.
    fn split(&mut self) -> (K, LeafNode<K>) {
        let mid = self.keys.len() / 2;
        let right = LeafNode {
            keys: self.keys.split_off(mid),
            values: self.values.split_off(mid),
            next: self.next,
        };
        (right.keys[0].clone(), right)
    }

    fn pop_last(&mut self) -> (K, Vec<u8>) {
        match (self.keys.pop(), self.values.pop()) {
            (Some(key), Some(value)) => (key, value),
            _ => panic!("borrow from an empty leaf"),
        }
    }
}

impl<K: Ord + Clone> InternalNode<K> {
    /// Index of the child covering `key`. Ties go right.
    #[inline]
    pub fn child_slot(&self, key: &K) -> usize {
        self.keys.partition_point(|k| k <= key)
    }

    #[inline]
    pub fn child_for(&self, key: &K) -> PageId {
        self.children[self.child_slot(key)]
    }

    /// Record that `children[slot]` split into itself and `right`.
    pub fn insert_child(&mut self, slot: usize, separator: K, right: PageId) {
        self.keys.insert(slot, separator);
        self.children.insert(slot + 1, right);
    }

    /// Drop `children[slot + 1]` and the separator to its left, returning both.
    pub fn remove_right_of(&mut self, slot: usize) -> (K, PageId) {
        let separator = self.keys.remove(slot);
        (separator, self.children.remove(slot + 1))
    }

    /// The median key moves up and belongs to neither half.
    fn split(&mut self) -> (K, InternalNode<K>) {
        let mid = self.keys.len() / 2;
        let right_keys = self.keys.split_off(mid + 1);
        let right_children = self.children.split_off(mid + 1);
        let median = match self.keys.pop() {
            Some(key) => key,
            None => panic!("split of an internal node without keys"),
        };
        (
            median,
            InternalNode {
                keys: right_keys,
                children: right_children,
            },
        )
    }

    fn pop_last(&mut self) -> (K, PageId) {
        match (self.keys.pop(), self.children.pop()) {
            (Some(key), Some(child)) => (key, child),
            _ => panic!("borrow from an empty internal node"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(keys: &[u32]) -> Node<u32> {
        Node::Leaf(LeafNode {
            keys: keys.to_vec(),
            values: keys.iter().map(|k| vec![*k as u8]).collect(),
            next: PageId::INVALID,
        })
    }

    fn internal(keys: &[u32], children: &[u32]) -> Node<u32> {
        Node::Internal(InternalNode {
            keys: keys.to_vec(),
            children: children.iter().map(|&c| PageId::new(c)).collect(),
        })
    }

    #[test]
    fn test_child_slot_ties_go_right() {
        let node = internal(&[10, 20], &[1, 2, 3]);
        let node = node.as_internal().unwrap();
        assert_eq!(node.child_slot(&5), 0);
        assert_eq!(node.child_slot(&10), 1);
        assert_eq!(node.child_slot(&19), 1);
        assert_eq!(node.child_slot(&20), 2);
        assert_eq!(node.child_slot(&99), 2);
    }

    #[test]
    fn test_leaf_insert_overwrite_and_remove() {
        let mut node = leaf(&[1, 3]);
        let leaf = node.leaf_mut();
        assert_eq!(leaf.insert(2, b"x".to_vec()), None);
        assert_eq!(leaf.keys, vec![1, 2, 3]);
        assert_eq!(leaf.insert(2, b"y".to_vec()), Some(b"x".to_vec()));
        assert_eq!(leaf.get(&2), Some(&b"y"[..]));
        assert_eq!(leaf.remove(&2), Some(b"y".to_vec()));
        assert_eq!(leaf.remove(&2), None);
    }

    #[test]
    fn test_leaf_split_midpoint() {
        let mut node = leaf(&[1, 2, 3, 4]);
        let (sep, right) = node.split();
        assert_eq!(sep, 3);
        assert_eq!(node.as_leaf().unwrap().keys, vec![1, 2]);
        assert_eq!(right.as_leaf().unwrap().keys, vec![3, 4]);
    }

    #[test]
    fn test_internal_split_moves_median_up() {
        let mut node = internal(&[10, 20, 30, 40], &[1, 2, 3, 4, 5]);
        let (sep, right) = node.split();
        assert_eq!(sep, 30);
        assert_eq!(node, internal(&[10, 20], &[1, 2, 3]));
        assert_eq!(right, internal(&[40], &[4, 5]));
    }

    #[test]
    fn test_leaf_borrow_updates_separator() {
        let mut left = leaf(&[1, 2, 3]);
        let mut node = leaf(&[5]);
        let mut sep = 5;
        Node::borrow_from_left(&mut left, &mut node, &mut sep);
        assert_eq!(sep, 3);
        assert_eq!(node.as_leaf().unwrap().keys, vec![3, 5]);

        let mut right = leaf(&[7, 8, 9]);
        let mut sep = 7;
        Node::borrow_from_right(&mut node, &mut right, &mut sep);
        assert_eq!(sep, 8);
        assert_eq!(node.as_leaf().unwrap().keys, vec![3, 5, 7]);
    }

    #[test]
    fn test_internal_borrow_rotates_through_parent() {
        let mut left = internal(&[10, 20], &[1, 2, 3]);
        let mut node = internal(&[40], &[4, 5]);
        let mut sep = 30;
        Node::borrow_from_left(&mut left, &mut node, &mut sep);
        assert_eq!(sep, 20);
        assert_eq!(left, internal(&[10], &[1, 2]));
        assert_eq!(node, internal(&[30, 40], &[3, 4, 5]));

        let mut right = internal(&[60, 70], &[6, 7, 8]);
        let mut sep = 50;
        Node::borrow_from_right(&mut node, &mut right, &mut sep);
        assert_eq!(sep, 60);
        assert_eq!(node, internal(&[30, 40, 50], &[3, 4, 5, 6]));
        assert_eq!(right, internal(&[70], &[7, 8]));
    }

    #[test]
    fn test_merge() {
        let mut left = leaf(&[1, 2]);
        if let Node::Leaf(l) = &mut left {
            l.next = PageId::new(5);
        }
        let mut right = leaf(&[4]);
        if let Node::Leaf(r) = &mut right {
            r.next = PageId::new(9);
        }
        Node::merge(&mut left, right, 4);
        let merged = left.as_leaf().unwrap();
        assert_eq!(merged.keys, vec![1, 2, 4]);
        assert_eq!(merged.next, PageId::new(9));

        let mut left = internal(&[10], &[1, 2]);
        Node::merge(&mut left, internal(&[30], &[3, 4]), 20);
        assert_eq!(left, internal(&[10, 20, 30], &[1, 2, 3, 4]));
    }

    #[test]
    #[should_panic(expected = "sibling nodes of different kinds")]
    fn test_mixed_merge_panics() {
        let mut left = leaf(&[1]);
        Node::merge(&mut left, internal(&[5], &[1, 2]), 3);
    }
}
