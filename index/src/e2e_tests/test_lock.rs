//! Only one tree at a time may hold an index directory.

use crate::e2e_tests::helpers::*;
use crate::storage::btree::{Btree, BtreeError};
use crate::storage::{LOCK_FILE_NAME, NodeStoreError};

#[test]
fn test_second_open_is_refused() {
    let index = TestIndex::with_fixture_tree();
    let tree = index.open();

    let err = Btree::open(&index.config).expect_err("should be locked");
    assert!(matches!(
        err,
        BtreeError::Store(NodeStoreError::LockHeld(ref path)) if path.ends_with(LOCK_FILE_NAME)
    ));

    tree.destroy().expect("should destroy");
    let mut reopened = index.open();
    assert!(reopened.lookup(b"odd").is_ok());
}

#[test]
fn test_drop_releases_lock() {
    let index = TestIndex::new();
    {
        let _tree = index.open();
        assert!(index.path().join(LOCK_FILE_NAME).exists());
    }
    assert!(!index.path().join(LOCK_FILE_NAME).exists());
    let _tree = index.open();
}

#[test]
fn test_stale_lock_file_blocks_open() {
    let index = TestIndex::new();
    std::fs::write(index.path().join(LOCK_FILE_NAME), b"4242").expect("should write lock");

    assert!(matches!(
        Btree::open(&index.config),
        Err(BtreeError::Store(NodeStoreError::LockHeld(_)))
    ));
    // A refused open leaves the other holder's lock alone.
    assert_eq!(
        std::fs::read(index.path().join(LOCK_FILE_NAME)).expect("should read lock"),
        b"4242"
    );
}

#[test]
fn test_open_missing_directory() {
    let index = TestIndex::new();
    let mut config = index.config.clone();
    config.directory = index.path().join("not-created");

    assert!(matches!(
        Btree::open(&config),
        Err(BtreeError::Store(NodeStoreError::Io(_)))
    ));
}
