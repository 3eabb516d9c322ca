//! Database handle - the open/close lifecycle around one tree file.

use std::io;
use std::ops::RangeBounds;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::buffer::{BufferPoolManager, StatsSnapshot};
use crate::common::{Config, Error, Result};
use crate::index::btree::{BPlusTree, BTreeKey, Node, NodeCodec, RangeScan, TreeStats};
use crate::recovery::{self, sweep, RecoveryReport, SweepReport};
use crate::storage::{DiskManager, Superblock};

/// An open B+ tree file.
///
/// All operations take `&self` and may be called from many threads.
/// Mutations become durable at [`checkpoint`](Self::checkpoint) or
/// [`close`](Self::close). Dropping the handle without closing it behaves
/// like a crash: the next [`open`](Self::open) rolls back to the last
/// checkpoint.
///
/// # Example
/// ```no_run
/// use bptreedb::{Config, Database};
///
/// let db = Database::<u64>::open("index.db", Config::default())?;
/// db.insert(7, b"seven".to_vec())?;
/// assert_eq!(db.search(&7)?, b"seven");
/// db.close()?;
/// # Ok::<(), bptreedb::Error>(())
/// ```
pub struct Database<K: BTreeKey> {
    tree: BPlusTree<K>,
    path: PathBuf,
    recovery: Option<RecoveryReport>,
    closed: bool,
}

impl<K: BTreeKey> Database<K> {
    /// Open the tree stored at `path`, creating it if allowed.
    ///
    /// An existing file is first rolled back to its last checkpoint. Its
    /// recorded page size, ORDER and value limit take precedence over
    /// `config`.
    ///
    /// # Errors
    /// - `Error::InvalidConfig` if `config` is rejected, including a
    ///   `cache_capacity` too small for the tree's ORDER
    /// - `Error::Io` with `NotFound` if the file is missing and
    ///   `create_if_missing` is false
    /// - `Error::IncompatibleFormat` if the file was written for another key
    ///   width or layout
    pub fn open<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();

        if path.exists() {
            Self::open_existing(path, &config)
        } else if config.create_if_missing {
            Self::create(path, &config)
        } else {
            Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            )))
        }
    }

    fn create(path: PathBuf, config: &Config) -> Result<Self> {
        let codec = NodeCodec::for_key::<K>(config.page_size, config.max_value_len, config.order)?;
        codec.check_cache_capacity(config.cache_capacity, config.max_pages)?;
        let superblock = Superblock::new(
            codec.page_size(),
            codec.order(),
            codec.key_len(),
            codec.max_value_len(),
        );
        let dm = DiskManager::create(&path, superblock, config.max_pages)?;
        let pool = BufferPoolManager::new(config.cache_capacity, dm, codec);

        let root = pool.new_page(Node::empty_leaf())?.page_id();
        let tree = BPlusTree::new(pool, root, 0);
        tree.checkpoint()?;

        info!(
            path = %path.display(),
            page_size = codec.page_size(),
            order = codec.order(),
            "db.create"
        );
        Ok(Self {
            tree,
            path,
            recovery: None,
            closed: false,
        })
    }

    fn open_existing(path: PathBuf, config: &Config) -> Result<Self> {
        let report = recovery::recover(&path)?;
        let mut dm = DiskManager::open(&path, config.max_pages)?;
        let sb = dm.superblock().clone();

        if sb.key_len as usize != K::ENCODED_LEN {
            return Err(Error::IncompatibleFormat(format!(
                "file stores {}-byte keys, key type encodes {} bytes",
                sb.key_len,
                K::ENCODED_LEN
            )));
        }
        let codec = NodeCodec::new(
            sb.page_size as usize,
            sb.key_len as usize,
            sb.max_value_len as usize,
            sb.order as usize,
        )
        .map_err(|e| Error::IncompatibleFormat(e.to_string()))?;
        codec.check_cache_capacity(config.cache_capacity, config.max_pages)?;

        // Blocks allocated after the restored checkpoint are no longer linked
        // from anywhere.
        if report.performed() {
            sweep::sweep_store::<K>(&mut dm, &codec, sb.root)?;
        }

        let pool = BufferPoolManager::new(config.cache_capacity, dm, codec);
        let tree = if sb.root.is_valid() {
            BPlusTree::new(pool, sb.root, sb.entry_count)
        } else {
            // Created, but never checkpointed with a root.
            let root = pool.new_page(Node::empty_leaf())?.page_id();
            let tree = BPlusTree::new(pool, root, 0);
            tree.checkpoint()?;
            tree
        };

        info!(
            path = %path.display(),
            root = tree.root().0,
            entries = tree.len(),
            epoch = sb.checkpoint_epoch,
            recovered = report.performed(),
            "db.open"
        );
        Ok(Self {
            tree,
            path,
            recovery: Some(report),
            closed: false,
        })
    }

    /// Checkpoint and release the file.
    pub fn close(mut self) -> Result<()> {
        self.tree.checkpoint()?;
        self.closed = true;
        info!(path = %self.path.display(), entries = self.tree.len(), "db.close");
        Ok(())
    }

    /// Make every mutation so far durable.
    pub fn checkpoint(&self) -> Result<()> {
        self.tree.checkpoint()
    }

    /// Write all dirty pages back without publishing a new root.
    pub fn flush_all(&self) -> Result<()> {
        self.tree.flush_all()
    }

    pub fn search(&self, key: &K) -> Result<Vec<u8>> {
        self.tree.search(key)
    }

    pub fn insert(&self, key: K, value: Vec<u8>) -> Result<Option<Vec<u8>>> {
        self.tree.insert(key, value)
    }

    pub fn delete(&self, key: &K) -> Result<Vec<u8>> {
        self.tree.delete(key)
    }

    pub fn range_scan<R: RangeBounds<K>>(&self, range: R) -> RangeScan<'_, K> {
        self.tree.range_scan(range)
    }

    pub fn len(&self) -> u64 {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn verify(&self) -> Result<TreeStats> {
        self.tree.verify()
    }

    pub fn sweep(&self) -> Result<SweepReport> {
        self.tree.sweep()
    }

    pub fn pool_stats(&self) -> StatsSnapshot {
        self.tree.pool().stats().snapshot()
    }

    pub fn page_size(&self) -> usize {
        self.tree.codec().page_size()
    }

    pub fn order(&self) -> usize {
        self.tree.codec().order()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// What recovery did when this handle opened an existing file.
    pub fn recovery(&self) -> Option<&RecoveryReport> {
        self.recovery.as_ref()
    }

    /// Blocks in the backing file, including the superblock.
    pub fn page_count(&self) -> u32 {
        self.tree.pool().with_disk_manager(|dm| dm.page_count())
    }
}

impl<K: BTreeKey> Drop for Database<K> {
    fn drop(&mut self) {
        if !self.closed {
            warn!(path = %self.path.display(), "db.drop_without_close");
        }
    }
}
