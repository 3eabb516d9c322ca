//! Node codec - [`Node`] to block image and back.
//!
//! # Block Layout
//! ```text
//! Leaf:
//! ┌────────────┬──────────────────────────────┬─────┬──────────┐
//! │ Header     │ key | u16 len | value        │ ... │ zero pad │
//! │ (16 bytes) │ × key_count                  │     │          │
//! └────────────┴──────────────────────────────┴─────┴──────────┘
//!
//! Internal:
//! ┌────────────┬───────────┬──────────────────┬─────┬──────────┐
//! │ Header     │ child0    │ key | child u32  │ ... │ zero pad │
//! │ (16 bytes) │ u32       │ × key_count      │     │          │
//! └────────────┴───────────┴──────────────────┴─────┴──────────┘
//! ```
//!
//! The header carries the node kind, key count, checksum, leaf link and the
//! number of payload bytes used. Encoding is deterministic: the pad is always
//! zero, so equal nodes produce byte-identical blocks.

use crate::common::config::{MIN_CACHE_CAPACITY, MIN_ORDER};
use crate::common::{Error, PageId, Result};
use crate::index::btree::key::BTreeKey;
use crate::index::btree::node::{InternalNode, LeafNode, Node};
use crate::storage::page::{Page, PageHeader, PageType};

const VALUE_LEN_SIZE: usize = 2;
const CHILD_SIZE: usize = 4;

/// Encodes and decodes nodes for one tree shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeCodec {
    page_size: usize,
    key_len: usize,
    max_value_len: usize,
    order: usize,
}

impl NodeCodec {
    /// # Errors
    /// Returns `Error::InvalidConfig` if `order` is below the minimum or a
    /// full node at that order would not fit in a block.
    pub fn new(page_size: usize, key_len: usize, max_value_len: usize, order: usize) -> Result<Self> {
        let max = Self::max_order(page_size, key_len, max_value_len);
        if order < MIN_ORDER || order > max {
            return Err(Error::InvalidConfig(format!(
                "order {} outside of [{}, {}] for {}-byte pages",
                order, MIN_ORDER, max, page_size
            )));
        }
        Ok(Self {
            page_size,
            key_len,
            max_value_len,
            order,
        })
    }

    /// Codec for key type `K`, using the largest order that fits when `order`
    /// is `None`.
    pub fn for_key<K: BTreeKey>(page_size: usize, max_value_len: usize, order: Option<usize>) -> Result<Self> {
        let order = order.unwrap_or_else(|| Self::max_order(page_size, K::ENCODED_LEN, max_value_len));
        Self::new(page_size, K::ENCODED_LEN, max_value_len, order)
    }

    /// Largest order whose fullest leaf and fullest internal node both fit.
    pub fn max_order(page_size: usize, key_len: usize, max_value_len: usize) -> usize {
        let payload = page_size.saturating_sub(PageHeader::SIZE);
        let leaf_slot = key_len + VALUE_LEN_SIZE + max_value_len;
        let internal_slot = key_len + CHILD_SIZE;

        let leaf_bound = payload / leaf_slot + 1;
        let internal_bound = payload.saturating_sub(CHILD_SIZE) / internal_slot + 1;
        leaf_bound.min(internal_bound).min(u16::MAX as usize)
    }

    #[inline]
    pub fn order(&self) -> usize {
        self.order
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    #[inline]
    pub fn key_len(&self) -> usize {
        self.key_len
    }

    #[inline]
    pub fn max_value_len(&self) -> usize {
        self.max_value_len
    }

    /// A leaf holding more entries than this must split.
    #[inline]
    pub fn max_leaf_entries(&self) -> usize {
        self.order - 1
    }

    /// A non-root leaf holding fewer entries than this has underflowed.
    #[inline]
    pub fn min_leaf_entries(&self) -> usize {
        self.order / 2
    }

    /// An internal node holding more keys than this must split.
    #[inline]
    pub fn max_internal_keys(&self) -> usize {
        self.order - 1
    }

    /// A non-root internal node holding fewer keys than this has underflowed.
    #[inline]
    pub fn min_internal_keys(&self) -> usize {
        (self.order + 1) / 2 - 1
    }

    /// Largest key count allowed for the node's kind.
    #[inline]
    pub fn max_keys<K>(&self, node: &Node<K>) -> usize {
        match node {
            Node::Leaf(_) => self.max_leaf_entries(),
            Node::Internal(_) => self.max_internal_keys(),
        }
    }

    #[inline]
    pub fn min_keys<K>(&self, node: &Node<K>) -> usize {
        match node {
            Node::Leaf(_) => self.min_leaf_entries(),
            Node::Internal(_) => self.min_internal_keys(),
        }
    }

    /// # Errors
    /// Returns `Error::ValueTooLarge` if `value` exceeds the slot size.
    pub fn check_value(&self, value: &[u8]) -> Result<()> {
        if value.len() > self.max_value_len {
            return Err(Error::ValueTooLarge {
                len: value.len(),
                max: self.max_value_len,
            });
        }
        Ok(())
    }

    /// Tallest tree that fits in `max_blocks` blocks, superblock included,
    /// when every node holds its minimum.
    pub fn max_height(&self, max_blocks: u32) -> usize {
        let budget = u64::from(max_blocks.saturating_sub(1));
        let fanout = self.min_internal_keys() as u64 + 1;
        let mut height = 1;
        let mut nodes: u64 = 1;
        // The root needs only two children; every level below it fans out
        // at least `fanout` ways.
        let mut level: u64 = 2;
        while nodes.saturating_add(level) <= budget {
            nodes += level;
            level = level.saturating_mul(fanout);
            height += 1;
        }
        height
    }

    /// Smallest pool in which a lone insert or delete never runs out of
    /// frames, however tall the tree grows within `max_pages`.
    ///
    /// An insert pins its path, one split page per level and a new root:
    /// `2 * height + 1` frames. A delete pins its path plus at most two
    /// siblings at a time, which is never more.
    pub fn min_cache_capacity(&self, max_pages: Option<u32>) -> usize {
        let height = self.max_height(max_pages.unwrap_or(u32::MAX));
        (2 * height + 1).max(MIN_CACHE_CAPACITY)
    }

    /// # Errors
    /// Returns `Error::InvalidConfig` if a pool of `cache_capacity` frames
    /// could be left unable to serve a single operation.
    pub fn check_cache_capacity(&self, cache_capacity: usize, max_pages: Option<u32>) -> Result<()> {
        let needed = self.min_cache_capacity(max_pages);
        if cache_capacity < needed {
            return Err(Error::InvalidConfig(format!(
                "cache_capacity {} is below {}, the frames one operation may pin at order {}",
                cache_capacity, needed, self.order
            )));
        }
        Ok(())
    }

    /// Serialize a node into one block.
    ///
    /// # Panics
    /// Panics if the node holds more keys than its capacity; callers split
    /// before a node can be written.
    pub fn encode<K: BTreeKey>(&self, node: &Node<K>) -> Page {
        let count = node.key_count();
        assert!(
            count <= self.max_keys(node),
            "node with {} keys exceeds capacity {}",
            count,
            self.max_keys(node)
        );

        let mut page = Page::new(self.page_size);
        let kl = self.key_len;
        let (page_type, link, used) = {
            let buf = page.payload_mut();
            match node {
                Node::Leaf(leaf) => {
                    let mut pos = 0;
                    for (key, value) in leaf.keys.iter().zip(&leaf.values) {
                        key.encode(&mut buf[pos..pos + kl]);
                        pos += kl;
                        buf[pos..pos + VALUE_LEN_SIZE].copy_from_slice(&(value.len() as u16).to_le_bytes());
                        pos += VALUE_LEN_SIZE;
                        buf[pos..pos + value.len()].copy_from_slice(value);
                        pos += value.len();
                    }
                    (PageType::BTreeLeaf, leaf.next, pos)
                }
                Node::Internal(internal) => {
                    buf[0..CHILD_SIZE].copy_from_slice(&internal.children[0].to_le_bytes());
                    let mut pos = CHILD_SIZE;
                    for (key, child) in internal.keys.iter().zip(&internal.children[1..]) {
                        key.encode(&mut buf[pos..pos + kl]);
                        pos += kl;
                        buf[pos..pos + CHILD_SIZE].copy_from_slice(&child.to_le_bytes());
                        pos += CHILD_SIZE;
                    }
                    (PageType::BTreeInternal, PageId::INVALID, pos)
                }
            }
        };

        page.set_header(&PageHeader {
            page_type,
            key_count: count as u16,
            checksum: 0,
            link,
            payload_len: used as u32,
        });
        page.update_checksum();
        page
    }

    /// Parse and validate a block.
    ///
    /// # Errors
    /// Returns `Error::CorruptPage` on a checksum mismatch or any structural
    /// problem: unknown kind, key count over capacity, truncated entries,
    /// keys out of order, or invalid child ids.
    pub fn decode<K: BTreeKey>(&self, page_id: PageId, page: &Page) -> Result<Node<K>> {
        let corrupt = |reason: &str| Error::corrupt(page_id.0, reason);

        if page.len() != self.page_size {
            return Err(corrupt("block size mismatch"));
        }
        if !page.verify_checksum() {
            return Err(corrupt("checksum mismatch"));
        }

        let header = page.header();
        let count = header.key_count as usize;
        let used = header.payload_len as usize;
        let payload = page.payload();
        if used > payload.len() {
            return Err(corrupt("payload length exceeds block"));
        }
        let buf = &payload[..used];
        let kl = self.key_len;

        let node = match header.page_type {
            PageType::BTreeLeaf => {
                if count > self.max_leaf_entries() {
                    return Err(corrupt("leaf key count exceeds capacity"));
                }
                let mut keys = Vec::with_capacity(count);
                let mut values = Vec::with_capacity(count);
                let mut pos = 0;
                for _ in 0..count {
                    let key_end = pos + kl;
                    let len_end = key_end + VALUE_LEN_SIZE;
                    if len_end > buf.len() {
                        return Err(corrupt("truncated leaf entry"));
                    }
                    let key = K::decode(&buf[pos..key_end]);
                    let len = u16::from_le_bytes([buf[key_end], buf[key_end + 1]]) as usize;
                    if len > self.max_value_len || len_end + len > buf.len() {
                        return Err(corrupt("leaf value length out of bounds"));
                    }
                    keys.push(key);
                    values.push(buf[len_end..len_end + len].to_vec());
                    pos = len_end + len;
                }
                if pos != buf.len() {
                    return Err(corrupt("trailing bytes in leaf payload"));
                }
                Node::Leaf(LeafNode {
                    keys,
                    values,
                    next: header.link,
                })
            }
            PageType::BTreeInternal => {
                if count == 0 || count > self.max_internal_keys() {
                    return Err(corrupt("internal key count out of range"));
                }
                if buf.len() != CHILD_SIZE + count * (kl + CHILD_SIZE) {
                    return Err(corrupt("internal payload length mismatch"));
                }
                let mut keys = Vec::with_capacity(count);
                let mut children = Vec::with_capacity(count + 1);
                children.push(PageId::from_le_slice(&buf[0..CHILD_SIZE]));
                let mut pos = CHILD_SIZE;
                for _ in 0..count {
                    keys.push(K::decode(&buf[pos..pos + kl]));
                    pos += kl;
                    children.push(PageId::from_le_slice(&buf[pos..pos + CHILD_SIZE]));
                    pos += CHILD_SIZE;
                }
                if children.iter().any(|c| !c.is_valid() || !c.is_node_page()) {
                    return Err(corrupt("internal node has an invalid child"));
                }
                Node::Internal(InternalNode { keys, children })
            }
            _ => return Err(corrupt("block is not a tree node")),
        };

        let strictly_increasing = match &node {
            Node::Leaf(leaf) => leaf.keys.windows(2).all(|w| w[0] < w[1]),
            Node::Internal(internal) => internal.keys.windows(2).all(|w| w[0] < w[1]),
        };
        if !strictly_increasing {
            return Err(corrupt("keys are not strictly increasing"));
        }
        Ok(node)
    }
}
