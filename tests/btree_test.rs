//! End-to-end tree behavior through the `Database` handle.

use bptreedb::index::btree::NodeCodec;
use bptreedb::{Config, Database, Error};
use tempfile::tempdir;

fn order4() -> Config {
    Config::default()
        .with_page_size(512)
        .with_order(4)
        .with_max_value_len(16)
        .with_cache_capacity(64)
}

fn entries(db: &Database<u32>, range: std::ops::RangeInclusive<u32>) -> Vec<(u32, Vec<u8>)> {
    db.range_scan(range).collect::<Result<_, _>>().unwrap()
}

#[test]
fn test_letters_scenario() {
    let dir = tempdir().unwrap();
    let db = Database::<u32>::open(dir.path().join("t.db"), order4()).unwrap();

    for (i, letter) in ["a", "b", "c", "d", "e", "f"].iter().enumerate() {
        db.insert(i as u32 + 1, letter.as_bytes().to_vec()).unwrap();
    }
    assert_eq!(db.search(&3).unwrap(), b"c");
    assert!(matches!(db.search(&10), Err(Error::KeyNotFound)));

    db.insert(7, b"g".to_vec()).unwrap();
    let expected: Vec<(u32, Vec<u8>)> = ["a", "b", "c", "d", "e", "f", "g"]
        .iter()
        .enumerate()
        .map(|(i, v)| (i as u32 + 1, v.as_bytes().to_vec()))
        .collect();
    assert_eq!(entries(&db, 1..=7), expected);
    db.close().unwrap();
}

#[test]
fn test_first_split_shape() {
    let dir = tempdir().unwrap();
    let db = Database::<u32>::open(dir.path().join("t.db"), order4()).unwrap();

    for key in [10, 20, 30, 40] {
        db.insert(key, vec![key as u8]).unwrap();
    }
    let stats = db.verify().unwrap();
    assert_eq!(stats.height, 2);
    assert_eq!(stats.leaf_count, 2);
    assert_eq!(stats.internal_count, 1);
    assert_eq!(stats.leaf_fill, vec![2, 2]);
    assert_eq!(stats.root_key_count, 1);

    // Separator ties descend right.
    assert_eq!(entries(&db, 30..=30), vec![(30, vec![30])]);
    db.close().unwrap();
}

#[test]
fn test_every_key_found_after_bulk_insert() {
    let dir = tempdir().unwrap();
    let db = Database::<u32>::open(dir.path().join("t.db"), order4()).unwrap();

    let keys: Vec<u32> = (0..1000).map(|i| (i * 7919) % 1000).collect();
    for &key in &keys {
        db.insert(key, format!("{}", key).into_bytes()).unwrap();
    }
    for &key in &keys {
        assert_eq!(db.search(&key).unwrap(), format!("{}", key).into_bytes());
    }
    assert!(matches!(db.search(&1000), Err(Error::KeyNotFound)));

    let scanned: Vec<u32> = db.range_scan(..).map(|r| r.unwrap().0).collect();
    assert_eq!(scanned, (0..1000).collect::<Vec<_>>());
    assert_eq!(db.verify().unwrap().entries, 1000);
    db.close().unwrap();
}

#[test]
fn test_overwrite_keeps_single_entry() {
    let dir = tempdir().unwrap();
    let db = Database::<u32>::open(dir.path().join("t.db"), order4()).unwrap();

    for key in 0..20 {
        db.insert(key, b"old".to_vec()).unwrap();
    }
    assert_eq!(db.insert(5, b"new".to_vec()).unwrap(), Some(b"old".to_vec()));
    assert_eq!(db.search(&5).unwrap(), b"new");
    assert_eq!(db.len(), 20);
    db.close().unwrap();
}

#[test]
fn test_delete_is_idempotent() {
    let dir = tempdir().unwrap();
    let db = Database::<u32>::open(dir.path().join("t.db"), order4()).unwrap();

    for key in 0..30 {
        db.insert(key, vec![1]).unwrap();
    }
    assert_eq!(db.delete(&12).unwrap(), vec![1]);
    let before = db.verify().unwrap();
    assert!(matches!(db.delete(&12), Err(Error::KeyNotFound)));
    assert!(matches!(db.delete(&99), Err(Error::KeyNotFound)));
    assert_eq!(db.verify().unwrap(), before);
    assert!(matches!(db.search(&12), Err(Error::KeyNotFound)));
    db.close().unwrap();
}

#[test]
fn test_drain_and_refill_reuses_blocks() {
    let dir = tempdir().unwrap();
    let db = Database::<u32>::open(dir.path().join("t.db"), order4()).unwrap();

    for key in 0..300 {
        db.insert(key, vec![0; 8]).unwrap();
    }
    let grown = db.page_count();
    for key in 0..300 {
        db.delete(&key).unwrap();
    }
    assert!(db.is_empty());
    assert_eq!(db.verify().unwrap().height, 1);

    for key in 0..300 {
        db.insert(key, vec![0; 8]).unwrap();
    }
    assert_eq!(db.page_count(), grown);
    db.close().unwrap();
}

#[test]
fn test_reopen_sees_closed_state() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.db");

    let db = Database::<u64>::open(&path, order4()).unwrap();
    for key in 0..500u64 {
        db.insert(key * 3, key.to_le_bytes().to_vec()).unwrap();
    }
    for key in (0..500u64).step_by(2) {
        db.delete(&(key * 3)).unwrap();
    }
    db.close().unwrap();

    let db = Database::<u64>::open(&path, order4()).unwrap();
    assert_eq!(db.len(), 250);
    assert_eq!(db.search(&3).unwrap(), 1u64.to_le_bytes());
    assert!(matches!(db.search(&0), Err(Error::KeyNotFound)));
    db.verify().unwrap();
    db.close().unwrap();
}

#[test]
fn test_byte_array_keys() {
    let dir = tempdir().unwrap();
    let db = Database::<[u8; 8]>::open(dir.path().join("t.db"), order4()).unwrap();

    for word in ["pear", "apple", "fig", "kiwi", "banana"] {
        let mut key = [0u8; 8];
        key[..word.len()].copy_from_slice(word.as_bytes());
        db.insert(key, word.as_bytes().to_vec()).unwrap();
    }
    let values: Vec<Vec<u8>> = db.range_scan(..).map(|r| r.unwrap().1).collect();
    assert_eq!(
        values,
        vec![b"apple".to_vec(), b"banana".to_vec(), b"fig".to_vec(), b"kiwi".to_vec(), b"pear".to_vec()]
    );
    db.close().unwrap();
}

#[test]
fn test_value_limit_enforced() {
    let dir = tempdir().unwrap();
    let db = Database::<u32>::open(dir.path().join("t.db"), order4()).unwrap();

    db.insert(1, vec![7; 16]).unwrap();
    assert!(matches!(
        db.insert(2, vec![7; 17]),
        Err(Error::ValueTooLarge { len: 17, max: 16 })
    ));
    assert_eq!(db.len(), 1);
    db.close().unwrap();
}

#[test]
fn test_out_of_space_leaves_tree_valid() {
    let dir = tempdir().unwrap();
    let db = Database::<u32>::open(dir.path().join("t.db"), order4().with_max_pages(6)).unwrap();

    let mut inserted = 0;
    for key in 0..100 {
        match db.insert(key, vec![1]) {
            Ok(_) => inserted += 1,
            Err(Error::OutOfSpace { .. }) => break,
            Err(e) => panic!("unexpected error {e}"),
        }
    }
    assert!(inserted < 100);
    assert_eq!(db.len(), inserted);
    db.verify().unwrap();

    // Deleting frees blocks, so inserts work again.
    for key in 0..inserted as u32 / 2 {
        db.delete(&key).unwrap();
    }
    db.insert(1000, vec![1]).unwrap();
    db.verify().unwrap();
    db.close().unwrap();
}

#[test]
fn test_smallest_accepted_pool_keeps_growing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.db");
    let config = Config::default()
        .with_page_size(512)
        .with_order(3)
        .with_max_value_len(8);

    // Too few frames for one insert on the tallest order-3 tree.
    assert!(matches!(
        Database::<u32>::open(&path, config.clone().with_cache_capacity(8)),
        Err(Error::InvalidConfig(_))
    ));
    assert!(!path.exists());

    let floor = NodeCodec::new(512, 4, 8, 3).unwrap().min_cache_capacity(None);
    assert!(matches!(
        Database::<u32>::open(&path, config.clone().with_cache_capacity(floor - 1)),
        Err(Error::InvalidConfig(_))
    ));

    let db = Database::<u32>::open(&path, config.with_cache_capacity(floor)).unwrap();
    for key in 0..5000u32 {
        db.insert(key, key.to_le_bytes().to_vec()).unwrap();
    }
    assert!(db.verify().unwrap().height >= 8);

    for key in (0..5000u32).step_by(3) {
        db.delete(&key).unwrap();
    }
    assert_eq!(db.len(), 5000 - 1667);
    db.verify().unwrap();
    assert_eq!(db.search(&4999).unwrap(), 4999u32.to_le_bytes());
    db.close().unwrap();
}

#[test]
fn test_largest_fitting_order_by_default() {
    let dir = tempdir().unwrap();
    let config = Config::default().with_page_size(4096).with_max_value_len(64);
    let db = Database::<u64>::open(dir.path().join("t.db"), config).unwrap();
    assert!(db.order() > 32);

    for key in 0..5000u64 {
        db.insert(key, vec![0; 64]).unwrap();
    }
    assert!(db.verify().unwrap().height <= 3);
    db.close().unwrap();
}
