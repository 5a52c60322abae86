//! Damaged node files are detected and contained.

use crate::e2e_tests::helpers::*;
use crate::storage::btree::{BtreeError, Corruption};
use crate::testing::{LEAF_TRAILER_OFFSETS, root_node_bytes, second_leaf_node_bytes};

#[test]
fn test_corrupt_leaf_fails_lookup() {
    let index = TestIndex::with_fixture_tree();
    let mut bytes = second_leaf_node_bytes();
    // Entry 1's first key offset points far past the node.
    bytes[LEAF_TRAILER_OFFSETS[1] + 1] = 0x40;
    index.write_node_file(3, &bytes);

    let mut tree = index.open();
    let err = tree.lookup(b"truth").expect_err("should fail");
    assert!(matches!(
        err,
        BtreeError::Corrupt {
            node: 3,
            kind: Corruption::KeySegmentOutOfBounds { entry: 1 }
        }
    ));
    assert!(err.to_string().contains("code 9"));
    assert_eq!(tree.error_count(), 1);

    // The corrupt node stays resident; its sibling still works.
    assert!(tree.rnode(3).is_some_and(|n| n.is_corrupt()));
    assert_eq!(tree.lookup(b"d").expect("should look up").leaf, 2);
}

#[test]
fn test_repaired_file_heals_after_eviction() {
    let index = TestIndex::with_fixture_tree();
    index.write_node_file(3, &[0x05, 0x3a, 0xde, 0x78, 0x01, 0x00, 0x00]);

    let mut tree = index.open();
    assert!(matches!(
        tree.lookup(b"truth"),
        Err(BtreeError::Corrupt {
            node: 3,
            kind: Corruption::TooShort
        })
    ));

    tree.evict(3).expect("should evict");
    index.write_node_file(3, &second_leaf_node_bytes());
    assert_eq!(tree.lookup(b"truth").expect("should look up").leaf, 3);
}

#[test]
fn test_small_read_limit_loads_whole_nodes() {
    let mut index = TestIndex::with_fixture_tree();
    // Smaller than every node, and not a whole number of units.
    index.config.node_read_limit = 44;

    let mut tree = index.open();
    assert_eq!(tree.lookup(b"d").expect("should look up").leaf, 2);
    assert_eq!(tree.lookup(b"truth").expect("should look up").leaf, 3);
    assert!(tree.rnode(1).is_some_and(|n| !n.is_corrupt()));
    assert_eq!(tree.error_count(), 0);
}

#[test]
fn test_truncated_file_is_detected() {
    let index = TestIndex::with_fixture_tree();
    // The 64-byte root cut to a length that is not a whole unit.
    index.write_node_file(1, &root_node_bytes()[..44]);

    let mut tree = index.open();
    assert!(matches!(
        tree.lookup(b"d"),
        Err(BtreeError::Corrupt {
            node: 1,
            kind: Corruption::Misaligned
        })
    ));
    assert_eq!(tree.error_count(), 1);
}
