//! Shared fixtures for unit and end-to-end tests.
//!
//! The node fixtures are written out byte by byte so that tests pin the wire
//! format rather than whatever the encoder happens to produce.

#![cfg(test)]

use std::sync::Once;

use crate::storage::SimulatedStore;

/// Keys of [`leaf_node_bytes`], in entry order.
pub const LEAF_KEYS: [&str; 3] = ["d", "goodstuff", "odd"];

/// Keys of [`second_leaf_node_bytes`], in entry order.
pub const SECOND_LEAF_KEYS: [&str; 3] = ["rut", "strut", "truth"];

/// Trailer offsets of the three entries in either leaf fixture.
pub const LEAF_TRAILER_OFFSETS: [usize; 3] = [32, 56, 80];

const HEADER_LEAF: [u8; 8] = [0x05, 0x3a, 0xde, 0x78, 0x01, 0x00, 0x00, 0x00];
const HEADER_ROOT: [u8; 8] = [0x05, 0x3a, 0xde, 0x78, 0x01, b'R', 0x01, 0x00];

/// Leaf holding "d", "goodstuff" and "odd" over the pool "goodstuffed".
///
/// "odd" is stitched together from "od" and "d", both borrowed from
/// "goodstuff". Each entry is an 8-byte zero payload plus a trailer.
pub fn leaf_node_bytes() -> Vec<u8> {
    let mut bytes = HEADER_LEAF.to_vec();
    bytes.extend_from_slice(b"goodstuffed\0\0\0\0\0");
    // "d"
    bytes.extend_from_slice(&[0; 8]);
    bytes.extend_from_slice(&[0, 0, 0, 11, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 3]);
    // "goodstuff"
    bytes.extend_from_slice(&[0; 8]);
    bytes.extend_from_slice(&[0, 0, 0, 8, 0, 9, 0, 0, 0, 0, 0, 0, 0, 1, 0, 3]);
    // "od" + "d"
    bytes.extend_from_slice(&[0; 8]);
    bytes.extend_from_slice(&[0, 0, 0, 10, 0, 2, 0, 0, 0, 11, 0, 1, 0, 2, 0, 3]);
    bytes
}

/// Leaf holding "rut", "strut" and "truth" over the pool "struthiomimus".
///
/// "rut" uses only the second key segment.
pub fn second_leaf_node_bytes() -> Vec<u8> {
    let mut bytes = HEADER_LEAF.to_vec();
    bytes.extend_from_slice(b"struthiomimus\0\0\0");
    // "rut"
    bytes.extend_from_slice(&[0; 8]);
    bytes.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0, 0, 10, 0, 3, 0, 0, 0, 3]);
    // "strut"
    bytes.extend_from_slice(&[0; 8]);
    bytes.extend_from_slice(&[0, 0, 0, 8, 0, 5, 0, 0, 0, 0, 0, 0, 0, 1, 0, 3]);
    // "truth"
    bytes.extend_from_slice(&[0; 8]);
    bytes.extend_from_slice(&[0, 0, 0, 9, 0, 5, 0, 0, 0, 0, 0, 0, 0, 2, 0, 3]);
    bytes
}

/// Level-1 root with separators "" -> node 2 and "ru" -> node 3.
pub fn root_node_bytes() -> Vec<u8> {
    let mut bytes = HEADER_ROOT.to_vec();
    bytes.extend_from_slice(b"ru\0\0\0\0\0\0");
    // "" -> 2
    bytes.extend_from_slice(&[0xcc, 0, 0, 0, 0, 0, 0, 2]);
    bytes.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 3]);
    // "ru" -> 3
    bytes.extend_from_slice(&[0xcc, 0, 0, 0, 0, 0, 0, 3]);
    bytes.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0, 0, 8, 0, 2, 0, 1, 1, 3]);
    bytes
}

/// Fault-free simulated store holding the three-node fixture tree:
/// [`root_node_bytes`] as node 1 over the two leaf fixtures as nodes 2 and 3.
pub fn fixture_store() -> SimulatedStore {
    let mut store = SimulatedStore::new(0);
    store.put_file(1, root_node_bytes());
    store.put_file(2, leaf_node_bytes());
    store.put_file(3, second_leaf_node_bytes());
    store
}

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness.
///
/// Honors `RUST_LOG`; defaults to debug output for this crate.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "btree_index=debug".into()),
            )
            .with_test_writer()
            .try_init();
    });
}
