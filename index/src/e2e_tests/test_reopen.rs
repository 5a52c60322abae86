//! A tree written through the store answers the same after reopening.

use crate::e2e_tests::helpers::*;
use crate::storage::btree::ROOT_NODE_ID;

const PER_LEAF: usize = 16;

#[test]
fn test_lookups_survive_reopen() {
    let index = TestIndex::new();
    let keys = random_keys(2024, 150);

    let mut tree = index.open();
    let leaves = build_two_level_tree(&mut tree, &keys, PER_LEAF);
    assert_eq!(leaves.len(), keys.len().div_ceil(PER_LEAF));

    let mut before = Vec::new();
    for key in &keys {
        before.push(tree.lookup(key).expect("should look up"));
    }
    tree.destroy().expect("should destroy");

    let mut reopened = index.open();
    for (i, key) in keys.iter().enumerate() {
        let found = reopened.lookup(key).expect("should look up");
        assert_eq!(found, before[i], "key {key:?}");
        assert_eq!(
            (found.leaf, found.result),
            expected_position(&keys, &leaves, PER_LEAF, key)
        );

        let leaf = reopened.rnode_mut(found.leaf).expect("leaf is resident");
        assert_eq!(
            leaf.entry_payload(found.result.index).expect("should read payload"),
            &payload_for(i)
        );
    }
    assert_eq!(reopened.error_count(), 0);
}

#[test]
fn test_missing_keys_after_reopen() {
    let index = TestIndex::new();
    let keys = random_keys(7, 80);

    let mut tree = index.open();
    let leaves = build_two_level_tree(&mut tree, &keys, PER_LEAF);
    tree.destroy().expect("should destroy");

    let mut reopened = index.open();
    // Letters past 'f' never occur in the key set.
    for missing in [&b""[..], b"a", b"ag", b"cz", b"fffffffffff", b"g", b"zz"] {
        let found = reopened.lookup(missing).expect("should look up");
        let expected = expected_position(&keys, &leaves, PER_LEAF, missing);
        assert_eq!((found.leaf, found.result), expected, "key {missing:?}");
    }
}

#[test]
fn test_new_ids_follow_existing_nodes() {
    let index = TestIndex::new();
    let keys = random_keys(11, 40);

    let mut tree = index.open();
    let leaves = build_two_level_tree(&mut tree, &keys, PER_LEAF);
    tree.destroy().expect("should destroy");

    let mut reopened = index.open();
    let last = *leaves.last().expect("at least one leaf");
    assert_eq!(reopened.allocate_node().expect("should allocate").id(), last + 1);
    assert!(reopened.rnode(ROOT_NODE_ID).is_none());
}

#[test]
fn test_evict_and_reload_through_directory() {
    let index = TestIndex::with_fixture_tree();
    let mut tree = index.open();

    let before = tree.get_node(2).expect("should load").buffer().to_vec();
    tree.evict(2).expect("should evict");
    assert!(tree.rnode(2).is_none());

    let after = tree.get_node(2).expect("should reload");
    assert_eq!(after.buffer(), before.as_slice());
    assert!(!after.is_dirty());
}
