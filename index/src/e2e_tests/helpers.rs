//! Common helpers for end-to-end tests.

use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use crate::config::IndexConfig;
use crate::storage::btree::{Btree, NodeBuilder, NodeId, ROOT_NODE_ID, SearchResult};
use crate::testing::{init_tracing, leaf_node_bytes, root_node_bytes, second_leaf_node_bytes};

/// A scratch index directory, removed on drop.
pub struct TestIndex {
    dir: TempDir,
    pub config: IndexConfig,
}

impl TestIndex {
    /// Create an empty index directory.
    #[must_use]
    pub fn new() -> Self {
        init_tracing();
        #[allow(clippy::expect_used)]
        let dir = tempfile::tempdir().expect("Failed to create index directory");
        let config = IndexConfig {
            directory: dir.path().to_path_buf(),
            ..IndexConfig::default()
        };
        Self { dir, config }
    }

    /// Create an index directory holding the three-node fixture tree.
    #[must_use]
    pub fn with_fixture_tree() -> Self {
        let index = Self::new();
        index.write_node_file(1, &root_node_bytes());
        index.write_node_file(2, &leaf_node_bytes());
        index.write_node_file(3, &second_leaf_node_bytes());
        index
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Overwrite node `id`'s file directly.
    pub fn write_node_file(&self, id: NodeId, bytes: &[u8]) {
        #[allow(clippy::expect_used)]
        std::fs::write(self.dir.path().join(id.to_string()), bytes)
            .expect("Failed to write node file");
    }

    /// Open a tree on the directory.
    pub fn open(&self) -> Btree {
        #[allow(clippy::expect_used)]
        Btree::open(&self.config).expect("Failed to open index")
    }
}

/// `count` distinct sorted keys over a small alphabet.
pub fn random_keys(seed: u64, count: usize) -> Vec<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut keys = std::collections::BTreeSet::new();
    while keys.len() < count {
        let len = rng.random_range(1..10);
        let key: Vec<u8> = (0..len).map(|_| rng.random_range(b'a'..=b'f')).collect();
        keys.insert(key);
    }
    keys.into_iter().collect()
}

/// The payload stored for the key at `position` in the sorted key list.
pub fn payload_for(position: usize) -> [u8; 8] {
    (position as u64).to_be_bytes()
}

/// Build a two-level tree over sorted `keys` with `per_leaf` keys per leaf.
///
/// Returns the leaf ids in key order.
pub fn build_two_level_tree(tree: &mut Btree, keys: &[Vec<u8>], per_leaf: usize) -> Vec<NodeId> {
    #[allow(clippy::expect_used)]
    let mut root = NodeBuilder::internal(1).expect("level 1 is internal").root();
    let mut leaves = Vec::new();

    for (chunk_index, chunk) in keys.chunks(per_leaf).enumerate() {
        #[allow(clippy::expect_used)]
        let mut leaf = NodeBuilder::leaf(8).expect("8-byte payloads");
        for (offset, key) in chunk.iter().enumerate() {
            #[allow(clippy::expect_used)]
            leaf.push_leaf(key, &payload_for(chunk_index * per_leaf + offset))
                .expect("keys are sorted");
        }

        #[allow(clippy::expect_used)]
        let node = tree.allocate_node().expect("Failed to allocate leaf");
        node.buffer_mut().extend_from_slice(&leaf.finish());
        let separator: &[u8] = if chunk_index == 0 { b"" } else { &chunk[0] };
        #[allow(clippy::expect_used)]
        root.push_child(separator, node.id()).expect("separators are sorted");
        leaves.push(node.id());
    }

    #[allow(clippy::expect_used)]
    tree.get_node(ROOT_NODE_ID)
        .expect("Failed to get root")
        .reload(&root.finish());
    leaves
}

/// Where `key` is expected in a tree built by [`build_two_level_tree`].
pub fn expected_position(
    keys: &[Vec<u8>],
    leaves: &[NodeId],
    per_leaf: usize,
    key: &[u8],
) -> (NodeId, SearchResult) {
    let (position, found) = match keys.binary_search_by(|k| k.as_slice().cmp(key)) {
        Ok(i) => (i, true),
        Err(i) => (i, false),
    };
    // Keys below a leaf's first key belong to the previous leaf.
    let chunk = if found {
        position / per_leaf
    } else {
        position.saturating_sub(1) / per_leaf
    };
    let index = position - chunk * per_leaf;
    (leaves[chunk], SearchResult { index, found })
}
