//! Integration tests for the buffer pool manager.
//!
//! These tests verify cross-component behavior that unit tests don't cover.

use bptreedb::buffer::BufferPoolManager;
use bptreedb::common::PageId;
use bptreedb::index::btree::{LeafNode, Node, NodeCodec};
use bptreedb::storage::{DiskManager, Superblock};
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

const PS: usize = 512;

fn codec() -> NodeCodec {
    NodeCodec::new(PS, 4, 16, 4).unwrap()
}

fn create_bpm(pool_size: usize) -> (BufferPoolManager<u32>, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");
    let dm = DiskManager::create(&path, Superblock::new(PS, 4, 4, 16), None).unwrap();
    (BufferPoolManager::new(pool_size, dm, codec()), dir)
}

fn leaf(keys: &[u32]) -> Node<u32> {
    Node::Leaf(LeafNode {
        keys: keys.to_vec(),
        values: keys.iter().map(|k| k.to_le_bytes().to_vec()).collect(),
        next: PageId::INVALID,
    })
}

/// Test data persistence across multiple eviction cycles.
#[test]
fn test_data_persistence_across_evictions() {
    let (bpm, _dir) = create_bpm(2);

    // Create 5 pages (forces evictions)
    let page_ids: Vec<PageId> = (0u32..5)
        .map(|i| bpm.new_page(leaf(&[i, i * 3 + 1])).unwrap().page_id())
        .collect();

    // Read all back - verifies evicted pages were written
    for (i, &pid) in page_ids.iter().enumerate() {
        let guard = bpm.fetch_page_read(pid).unwrap();
        let i = i as u32;
        assert_eq!(guard.as_leaf().unwrap().keys, vec![i, i * 3 + 1]);
    }
    assert!(bpm.stats().snapshot().write_backs >= 3);
}

/// Test flush and reload across pool instances.
#[test]
fn test_flush_and_reload() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");
    let pid;

    // First session: create, write and commit
    {
        let dm = DiskManager::create(&path, Superblock::new(PS, 4, 4, 16), None).unwrap();
        let bpm = BufferPoolManager::new(10, dm, codec());

        pid = bpm.new_page(leaf(&[7, 8, 9])).unwrap().page_id();
        bpm.flush_all_pages().unwrap();
        bpm.with_disk_manager(|dm| dm.commit(pid, 3)).unwrap();
    }

    // Second session: verify data
    {
        let dm = DiskManager::open(&path, None).unwrap();
        assert_eq!(dm.superblock().root, pid);
        let bpm = BufferPoolManager::<u32>::new(10, dm, codec());

        let guard = bpm.fetch_page_read(pid).unwrap();
        assert_eq!(guard.as_leaf().unwrap().keys, vec![7, 8, 9]);
    }
}

/// Test concurrent writers to different pages.
#[test]
fn test_concurrent_writers() {
    let (bpm, _dir) = create_bpm(10);
    let bpm = Arc::new(bpm);

    let page_ids: Vec<PageId> = (0..5)
        .map(|_| bpm.new_page(Node::empty_leaf()).unwrap().page_id())
        .collect();

    let mut handles = vec![];

    for (i, pid) in page_ids.iter().enumerate() {
        let bpm_clone = Arc::clone(&bpm);
        let pid = *pid;

        handles.push(thread::spawn(move || {
            for j in 0..50u32 {
                let mut guard = bpm_clone.fetch_page_write(pid).unwrap();
                guard.leaf_mut().insert(j, vec![i as u8]);
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    for (i, &pid) in page_ids.iter().enumerate() {
        let guard = bpm.fetch_page_read(pid).unwrap();
        let node = guard.as_leaf().unwrap();
        assert_eq!(node.len(), 50);
        assert_eq!(node.get(&49), Some(&[i as u8][..]));
    }
    assert_eq!(bpm.total_pins(), 0);
}

/// Test concurrent readers and writers sharing a small pool.
#[test]
fn test_concurrent_mixed_under_eviction() {
    let (bpm, _dir) = create_bpm(4);
    let bpm = Arc::new(bpm);

    let page_ids: Vec<PageId> = (0..12u32)
        .map(|i| bpm.new_page(leaf(&[i])).unwrap().page_id())
        .collect();
    let page_ids = Arc::new(page_ids);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let bpm = Arc::clone(&bpm);
            let page_ids = Arc::clone(&page_ids);
            thread::spawn(move || {
                for round in 0..100usize {
                    let idx = (t * 7 + round) % page_ids.len();
                    let pid = page_ids[idx];
                    // Another thread may hold the other frames; retry on backpressure.
                    loop {
                        match bpm.fetch_page_read(pid) {
                            Ok(guard) => {
                                assert_eq!(guard.first_key(), Some(&(idx as u32)));
                                break;
                            }
                            Err(bptreedb::Error::PoolExhausted { .. }) => thread::yield_now(),
                            Err(e) => panic!("unexpected error {e}"),
                        }
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(bpm.total_pins(), 0);
}

/// Test stats accuracy under load.
#[test]
fn test_stats_accuracy() {
    let (bpm, _dir) = create_bpm(2);

    let pid = bpm.new_page(leaf(&[1])).unwrap().page_id();

    // Multiple fetches = cache hits
    for _ in 0..5 {
        let _ = bpm.fetch_page_read(pid).unwrap();
    }

    let stats = bpm.stats().snapshot();
    assert!(stats.cache_hits >= 5);

    // Force eviction
    let _ = bpm.new_page(leaf(&[2])).unwrap();
    let _ = bpm.new_page(leaf(&[3])).unwrap();

    let stats = bpm.stats().snapshot();
    assert!(stats.evictions >= 1);
}
