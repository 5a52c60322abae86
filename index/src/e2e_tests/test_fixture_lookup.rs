//! Lookups across the three-node fixture tree stored on disk.

use crate::e2e_tests::helpers::*;
use crate::storage::btree::{LookupResult, ROOT_NODE_ID, SearchResult};
use crate::testing::{LEAF_KEYS, SECOND_LEAF_KEYS};

#[test]
fn test_lookup_in_second_leaf() {
    let index = TestIndex::with_fixture_tree();
    let mut tree = index.open();

    let found = tree.lookup(b"truth").expect("should look up");
    assert_eq!(
        found,
        LookupResult {
            leaf: 3,
            result: SearchResult::exact(2)
        }
    );

    let found = tree.lookup(b"tooth").expect("should look up");
    assert_eq!(found.leaf, 3);
    assert!(!found.result.found);
    assert_eq!(found.result.index, 2);
}

#[test]
fn test_every_key_is_found() {
    let index = TestIndex::with_fixture_tree();
    let mut tree = index.open();

    for (leaf, keys) in [(2, LEAF_KEYS), (3, SECOND_LEAF_KEYS)] {
        for (i, key) in keys.iter().enumerate() {
            let found = tree.lookup(key.as_bytes()).expect("should look up");
            assert_eq!(found.leaf, leaf, "lookup {key}");
            assert_eq!(found.result, SearchResult::exact(i), "lookup {key}");
        }
    }
}

#[test]
fn test_lookup_loads_only_the_path() {
    let index = TestIndex::with_fixture_tree();
    let mut tree = index.open();

    tree.lookup(b"strut").expect("should look up");
    assert_eq!(tree.resident_count(), 2);
    assert!(tree.rnode(2).is_none());
    assert_eq!(tree.rnode(3).and_then(|n| n.parent()), Some(ROOT_NODE_ID));
    assert_eq!(tree.error_count(), 0);

    tree.destroy().expect("should destroy");
}
