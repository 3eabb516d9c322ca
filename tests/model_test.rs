//! Random operation sequences checked against `BTreeMap`.

use std::collections::BTreeMap;

use bptreedb::{Config, Database, Error};
use proptest::prelude::*;
use tempfile::tempdir;

#[derive(Debug, Clone)]
enum Op {
    Insert(u16, u8),
    Delete(u16),
    Search(u16),
    Checkpoint,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        5 => (0u16..256, any::<u8>()).prop_map(|(k, v)| Op::Insert(k, v)),
        3 => (0u16..256).prop_map(Op::Delete),
        2 => (0u16..256).prop_map(Op::Search),
        1 => Just(Op::Checkpoint),
    ]
}

fn value(key: u16, tag: u8) -> Vec<u8> {
    vec![tag; 1 + (key % 7) as usize]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_matches_btreemap(order in 3usize..8, ops in prop::collection::vec(op(), 1..400)) {
        let dir = tempdir().unwrap();
        let config = Config::default()
            .with_page_size(512)
            .with_order(order)
            .with_max_value_len(8)
            .with_cache_capacity(64);
        let db = Database::<u32>::open(dir.path().join("m.db"), config).unwrap();
        let mut model: BTreeMap<u32, Vec<u8>> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(k, tag) => {
                    let key = u32::from(k);
                    let previous = db.insert(key, value(k, tag)).unwrap();
                    prop_assert_eq!(previous, model.insert(key, value(k, tag)));
                }
                Op::Delete(k) => {
                    let key = u32::from(k);
                    match (db.delete(&key), model.remove(&key)) {
                        (Ok(got), Some(expected)) => prop_assert_eq!(got, expected),
                        (Err(Error::KeyNotFound), None) => {}
                        (got, expected) => prop_assert!(false, "delete {}: {:?} vs {:?}", key, got, expected),
                    }
                }
                Op::Search(k) => {
                    let key = u32::from(k);
                    match (db.search(&key), model.get(&key)) {
                        (Ok(got), Some(expected)) => prop_assert_eq!(&got, expected),
                        (Err(Error::KeyNotFound), None) => {}
                        (got, expected) => prop_assert!(false, "search {}: {:?} vs {:?}", key, got, expected),
                    }
                }
                Op::Checkpoint => db.checkpoint().unwrap(),
            }
        }

        let stats = db.verify().unwrap();
        prop_assert_eq!(stats.entries, model.len() as u64);

        let scanned: Vec<(u32, Vec<u8>)> = db.range_scan(..).collect::<Result<_, _>>().unwrap();
        let expected: Vec<(u32, Vec<u8>)> = model.clone().into_iter().collect();
        prop_assert_eq!(scanned, expected);

        let bounded: Vec<u32> = db.range_scan(40..=200).map(|r| r.unwrap().0).collect();
        let expected: Vec<u32> = model.range(40..=200).map(|(k, _)| *k).collect();
        prop_assert_eq!(bounded, expected);

        db.close().unwrap();
    }
}
