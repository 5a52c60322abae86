//! The resident-node table.
//!
//! A [`Btree`] owns every node currently in memory, keyed by id, and
//! mediates all traffic with its [`NodeStore`]. There is at most one resident
//! [`Node`] per id: asking for the same id twice yields the same node.
//!
//! A tree without a store is purely in memory; nodes it has not seen start
//! out empty.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::config::IndexConfig;
use crate::storage::btree::layout::{NULL_NODE_ID, NodeId, ROOT_NODE_ID};
use crate::storage::btree::node::{Corruption, Node, NodeError, NodeState};
use crate::storage::directory::DirectoryStore;
use crate::storage::io::{NodeStore, NodeStoreError};

/// First id handed out by [`Btree::allocate_node`] on an empty tree.
const FIRST_ALLOCATED_ID: NodeId = ROOT_NODE_ID + 1;

/// Errors that can occur during tree operations.
#[derive(Debug)]
pub enum BtreeError {
    /// A node failed validation.
    Corrupt { node: NodeId, kind: Corruption },
    /// A node accessor rejected the request.
    Node { node: NodeId, error: NodeError },
    /// The backing store failed.
    Store(NodeStoreError),
    /// Every node id is in use.
    IdsExhausted,
}

impl BtreeError {
    /// Attribute a node accessor error to node `node`.
    #[must_use]
    pub const fn from_node(node: NodeId, error: NodeError) -> Self {
        match error {
            NodeError::Corrupt(kind) => Self::Corrupt { node, kind },
            error => Self::Node { node, error },
        }
    }
}

impl std::fmt::Display for BtreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Corrupt { node, kind } => {
                write!(f, "node {node} is corrupt (code {}): {kind}", kind.code())
            }
            Self::Node { node, error } => write!(f, "node {node}: {error}"),
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::IdsExhausted => write!(f, "node ids exhausted"),
        }
    }
}

impl std::error::Error for BtreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Node { error, .. } => Some(error),
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<NodeStoreError> for BtreeError {
    fn from(e: NodeStoreError) -> Self {
        Self::Store(e)
    }
}

/// An on-disk B-tree: resident nodes plus their backing store.
pub struct Btree {
    nodes: HashMap<NodeId, Node>,
    next_node_id: NodeId,
    store: Option<Box<dyn NodeStore>>,
    node_read_limit: usize,
    /// Load and validation failures seen so far.
    errors: u64,
}

impl Default for Btree {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Btree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Btree")
            .field("resident", &self.nodes.len())
            .field("next_node_id", &self.next_node_id)
            .field("bound", &self.store.is_some())
            .field("errors", &self.errors)
            .finish()
    }
}

impl Btree {
    /// Create an in-memory tree with no backing store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            next_node_id: FIRST_ALLOCATED_ID,
            store: None,
            node_read_limit: IndexConfig::DEFAULT_NODE_READ_LIMIT,
            errors: 0,
        }
    }

    /// Create a tree backed by `store`.
    ///
    /// Node loads fetch at most `node_read_limit` bytes per read, repeating
    /// until the whole file is in memory. New ids start past the highest id
    /// already in the store.
    pub fn with_store(
        store: Box<dyn NodeStore>,
        node_read_limit: usize,
    ) -> Result<Self, BtreeError> {
        let max_id = store.max_node_id()?;
        let next_node_id = max_id
            .checked_add(1)
            .ok_or(BtreeError::IdsExhausted)?
            .max(FIRST_ALLOCATED_ID);
        Ok(Self {
            nodes: HashMap::new(),
            next_node_id,
            store: Some(store),
            node_read_limit,
            errors: 0,
        })
    }

    /// Lock the configured directory and open a tree on it.
    pub fn open(config: &IndexConfig) -> Result<Self, BtreeError> {
        let store = DirectoryStore::open(&config.directory)?;
        tracing::info!(directory = %config.directory.display(), "opened index");
        Self::with_store(Box::new(store), config.node_read_limit)
    }

    /// Whether the tree has a backing store.
    #[must_use]
    pub const fn is_bound(&self) -> bool {
        self.store.is_some()
    }

    /// The resident node for `id`, loading or creating it if needed.
    ///
    /// A node loaded from the store is validated right away. A node that
    /// fails validation stays resident in the corrupt state and reports the
    /// problem on use. Store failures are returned and leave nothing
    /// resident. The null id gets an empty node that never touches the store.
    pub fn get_node(&mut self, id: NodeId) -> Result<&mut Node, BtreeError> {
        match self.nodes.entry(id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let node = Self::load(
                    self.store.as_deref_mut(),
                    id,
                    self.node_read_limit,
                    &mut self.errors,
                )?;
                Ok(entry.insert(node))
            }
        }
    }

    /// Like [`Btree::get_node`], but also validates a resident node that
    /// has not been checked yet, failing if it is corrupt.
    pub fn validated_node(&mut self, id: NodeId) -> Result<&mut Node, BtreeError> {
        let node = self.get_node(id)?;
        match node.state() {
            NodeState::Valid { .. } => {}
            NodeState::Corrupt(kind) => return Err(BtreeError::Corrupt { node: id, kind }),
            NodeState::Unvalidated => {
                if let Err(e) = node.validate() {
                    self.errors += 1;
                    return Err(BtreeError::from_node(id, e));
                }
            }
        }
        self.get_node(id)
    }

    /// The resident node for `id`, without loading.
    #[must_use]
    pub fn rnode(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn rnode_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Mark resident node `id` corrupt and count the failure.
    pub fn mark_corrupt(&mut self, id: NodeId, kind: Corruption) {
        if let Some(node) = self.nodes.get_mut(&id) {
            if !node.is_corrupt() {
                self.errors += 1;
            }
            node.mark_corrupt(kind);
        }
    }

    /// Make a node with a fresh, unused id resident.
    pub fn allocate_node(&mut self) -> Result<&mut Node, BtreeError> {
        let mut id = self.next_node_id;
        while self.nodes.contains_key(&id) {
            id = id.checked_add(1).ok_or(BtreeError::IdsExhausted)?;
        }
        self.next_node_id = id.checked_add(1).ok_or(BtreeError::IdsExhausted)?;
        tracing::debug!(node = id, "allocated node");
        self.get_node(id)
    }

    /// Write every resident node that has bytes past its watermark.
    pub fn flush(&mut self) -> Result<(), BtreeError> {
        let Some(store) = self.store.as_deref_mut() else {
            return Ok(());
        };
        let mut written = 0;
        for node in self
            .nodes
            .values_mut()
            .filter(|node| node.id() != NULL_NODE_ID && node.is_dirty())
        {
            store.node_write(node)?;
            written += 1;
        }
        tracing::debug!(written, "flushed index");
        Ok(())
    }

    /// Write `id` if dirty, close it and drop it from memory.
    ///
    /// Evicting a node that is not resident does nothing. On a store failure
    /// the node stays resident.
    pub fn evict(&mut self, id: NodeId) -> Result<(), BtreeError> {
        let Some(node) = self.nodes.get_mut(&id) else {
            return Ok(());
        };
        if let Some(store) = self.store.as_deref_mut()
            && id != NULL_NODE_ID
        {
            if node.is_dirty() {
                store.node_write(node)?;
            }
            store.node_close(node)?;
        }
        self.nodes.remove(&id);
        tracing::debug!(node = id, "evicted node");
        Ok(())
    }

    /// Flush, close every node and release the store.
    ///
    /// The store is released even when the flush fails; the flush error is
    /// reported afterwards.
    pub fn destroy(mut self) -> Result<(), BtreeError> {
        let flushed = self.flush();
        if let Some(mut store) = self.store.take() {
            for node in self.nodes.values().filter(|node| node.id() != NULL_NODE_ID) {
                if let Err(e) = store.node_close(node) {
                    tracing::warn!(node = node.id(), "failed to close node: {e}");
                }
            }
            store.destroy()?;
        }
        self.nodes.clear();
        flushed
    }

    /// Number of resident nodes.
    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of load and validation failures since the tree was created.
    #[must_use]
    pub const fn error_count(&self) -> u64 {
        self.errors
    }

    fn load(
        store: Option<&mut (dyn NodeStore + 'static)>,
        id: NodeId,
        limit: usize,
        errors: &mut u64,
    ) -> Result<Node, BtreeError> {
        let mut node = Node::new(id);
        let Some(store) = store.filter(|_| id != NULL_NODE_ID) else {
            return Ok(node);
        };

        if let Err(e) = store.node_open(&node) {
            *errors += 1;
            return Err(e.into());
        }
        if let Err(e) = Self::read_whole(store, &mut node, limit) {
            *errors += 1;
            if let Err(close) = store.node_close(&node) {
                tracing::warn!(node = id, "failed to close node after read error: {close}");
            }
            return Err(e.into());
        }

        if node.validate().is_err() {
            *errors += 1;
        }
        tracing::debug!(node = id, len = node.len(), level = node.level(), "loaded node");
        Ok(node)
    }

    /// Read `node` in chunks of at most `limit` bytes until end of file.
    fn read_whole(
        store: &mut dyn NodeStore,
        node: &mut Node,
        limit: usize,
    ) -> Result<(), NodeStoreError> {
        while store.node_read(node, limit)? > 0 {}
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::storage::SimulatedStore;
    use crate::storage::btree::NodeBuilder;
    use crate::storage::btree::layout::NodeHeader;
    use crate::storage::btree::node::SearchResult;
    use crate::storage::simulated::FaultConfig;
    use crate::testing::{fixture_store, init_tracing, leaf_node_bytes};

    #[test]
    fn test_new_tree() {
        let tree = Btree::new();
        assert!(!tree.is_bound());
        assert_eq!(tree.resident_count(), 0);
        assert!(tree.rnode(ROOT_NODE_ID).is_none());
    }

    #[test]
    fn test_null_and_root_are_distinct() {
        let mut tree = Btree::new();
        tree.get_node(0).expect("should create").buffer_mut().push(0);
        assert!(tree.get_node(1).expect("should create").is_empty());
        assert_eq!(tree.resident_count(), 2);

        assert_eq!(tree.rnode(0).map(Node::buffer), Some(&[0][..]));
        assert_eq!(tree.rnode(1).map(Node::id), Some(1));
        assert!(tree.rnode(2).is_none());
        tree.destroy().expect("should destroy");
    }

    #[test]
    fn test_null_node_never_reaches_store() {
        let mut tree = Btree::with_store(Box::new(SimulatedStore::new(5)), 8192)
            .expect("should bind");
        let node = tree.get_node(0).expect("should create");
        assert!(node.is_empty());
        node.buffer_mut().extend_from_slice(&leaf_node_bytes());

        tree.flush().expect("should flush");
        tree.evict(0).expect("should evict");
        assert!(tree.rnode(0).is_none());
        assert_eq!(tree.error_count(), 0);
        tree.destroy().expect("should destroy");
    }

    #[test]
    fn test_get_node_identity() {
        let mut tree = Btree::new();
        let node = tree.get_node(5).expect("should create");
        assert!(node.is_empty());
        node.buffer_mut().extend_from_slice(b"marker");

        assert_eq!(tree.get_node(5).expect("should exist").buffer(), b"marker");
        assert!(tree.get_node(6).expect("should create").is_empty());
        assert_eq!(tree.resident_count(), 2);
        assert_eq!(tree.rnode(5).map(Node::id), Some(5));
        assert!(tree.rnode(7).is_none());
    }

    #[test]
    fn test_allocate_node() {
        let mut tree = Btree::new();
        assert_eq!(tree.allocate_node().expect("should allocate").id(), 2);
        tree.get_node(3).expect("should create");
        assert_eq!(tree.allocate_node().expect("should allocate").id(), 4);
    }

    #[test]
    fn test_with_store_continues_ids() {
        let mut store = SimulatedStore::new(1);
        store.put_file(7, leaf_node_bytes());
        let mut tree = Btree::with_store(Box::new(store), 8192).expect("should bind");
        assert_eq!(tree.allocate_node().expect("should allocate").id(), 8);

        let mut empty = Btree::with_store(Box::new(SimulatedStore::new(1)), 8192)
            .expect("should bind");
        assert_eq!(empty.allocate_node().expect("should allocate").id(), 2);
    }

    #[test]
    fn test_get_node_loads_and_validates() {
        init_tracing();
        let mut tree = Btree::with_store(Box::new(fixture_store()), 8192).expect("should bind");

        let root = tree.get_node(ROOT_NODE_ID).expect("should load");
        assert!(matches!(root.state(), NodeState::Valid { .. }));
        assert!(root.is_root());
        assert_eq!(root.clean(), root.len());

        let leaf = tree.get_node(2).expect("should load");
        assert_eq!(leaf.nent(), 3);
        assert_eq!(tree.error_count(), 0);
    }

    #[test]
    fn test_corrupt_node_stays_resident() {
        let mut bytes = leaf_node_bytes();
        bytes[0] ^= 0xff;
        let mut store = SimulatedStore::new(1);
        store.put_file(2, bytes);
        let mut tree = Btree::with_store(Box::new(store), 8192).expect("should bind");

        let node = tree.get_node(2).expect("load itself succeeds");
        assert_eq!(node.corruption(), Some(Corruption::BadMagic));
        assert_eq!(tree.error_count(), 1);

        let err = tree.validated_node(2).expect_err("should report corruption");
        assert!(matches!(
            err,
            BtreeError::Corrupt {
                node: 2,
                kind: Corruption::BadMagic
            }
        ));
    }

    #[test]
    fn test_store_error_propagates() {
        let config = FaultConfig {
            read_error_rate: 1.0,
            ..FaultConfig::no_faults()
        };
        let mut tree = Btree::with_store(Box::new(SimulatedStore::with_config(3, config)), 8192)
            .expect("should bind");

        let err = tree.get_node(2).expect_err("read should fail");
        assert!(matches!(err, BtreeError::Store(NodeStoreError::InjectedFault(_))));
        assert!(tree.rnode(2).is_none());
        assert_eq!(tree.error_count(), 1);

        // The failed load closed its handle, so a retry can reopen.
        let err = tree.get_node(2).expect_err("read should fail again");
        assert!(matches!(err, BtreeError::Store(NodeStoreError::InjectedFault(_))));
    }

    #[test]
    fn test_validated_node_checks_edits() {
        let mut tree = Btree::new();
        tree.get_node(2)
            .expect("should create")
            .buffer_mut()
            .extend_from_slice(&leaf_node_bytes());
        assert_eq!(tree.validated_node(2).expect("should validate").nent(), 3);

        tree.get_node(2).expect("resident").buffer_mut().truncate(12);
        assert!(matches!(
            tree.validated_node(2),
            Err(BtreeError::Corrupt {
                node: 2,
                kind: Corruption::Misaligned
            })
        ));
        assert_eq!(tree.error_count(), 1);
    }

    #[test]
    fn test_evict_and_reload_round_trip() {
        let mut tree = Btree::with_store(Box::new(SimulatedStore::new(9)), 8192)
            .expect("should bind");

        let node = tree.allocate_node().expect("should allocate");
        let id = node.id();
        node.buffer_mut().extend_from_slice(&leaf_node_bytes());
        assert!(node.is_dirty());

        tree.evict(id).expect("should evict");
        assert!(tree.rnode(id).is_none());
        tree.evict(id).expect("evicting twice is a no-op");

        let reloaded = tree.get_node(id).expect("should reload");
        assert_eq!(reloaded.buffer(), leaf_node_bytes().as_slice());
        assert!(!reloaded.is_dirty());
        assert_eq!(reloaded.nent(), 3);
    }

    #[test]
    fn test_reload_node_larger_than_read_limit() {
        init_tracing();
        let mut leaf = NodeBuilder::leaf(8).expect("8-byte payloads");
        for i in 0..500u64 {
            leaf.push_leaf(format!("k{i:05}").as_bytes(), &i.to_be_bytes())
                .expect("keys are sorted");
        }
        let bytes = leaf.finish();
        assert!(bytes.len() > IndexConfig::DEFAULT_NODE_READ_LIMIT);

        let mut tree = Btree::with_store(
            Box::new(SimulatedStore::new(9)),
            IndexConfig::DEFAULT_NODE_READ_LIMIT,
        )
        .expect("should bind");
        let id = tree.allocate_node().expect("should allocate").id();
        tree.get_node(id)
            .expect("resident")
            .buffer_mut()
            .extend_from_slice(&bytes);
        tree.evict(id).expect("should evict");

        let reloaded = tree.validated_node(id).expect("should reload");
        assert_eq!(reloaded.buffer(), bytes.as_slice());
        assert_eq!(reloaded.nent(), 500);
        assert_eq!(
            reloaded.search(b"k00499").expect("should search"),
            SearchResult::exact(499)
        );
    }

    #[test]
    fn test_reload_in_small_chunks() {
        let mut store = SimulatedStore::new(1);
        store.put_file(2, leaf_node_bytes());
        let mut tree = Btree::with_store(Box::new(store), 5).expect("should bind");

        let leaf = tree.get_node(2).expect("should load");
        assert_eq!(leaf.buffer(), leaf_node_bytes().as_slice());
        assert!(matches!(leaf.state(), NodeState::Valid { .. }));
        assert_eq!(tree.error_count(), 0);
    }

    #[test]
    fn test_flush_writes_dirty_nodes() {
        let mut tree = Btree::with_store(Box::new(SimulatedStore::new(9)), 8192)
            .expect("should bind");
        let header = NodeHeader::new(0, false).to_bytes();

        for _ in 0..3 {
            tree.allocate_node()
                .expect("should allocate")
                .buffer_mut()
                .extend_from_slice(&header);
        }
        tree.flush().expect("should flush");
        for id in 2..5 {
            assert!(!tree.rnode(id).expect("resident").is_dirty());
        }
    }

    #[test]
    fn test_destroy_releases_directory() {
        init_tracing();
        let dir = tempdir().expect("should create temp dir");
        let config = IndexConfig {
            directory: dir.path().to_path_buf(),
            node_read_limit: 8192,
        };

        let mut tree = Btree::open(&config).expect("should open");
        tree.get_node(ROOT_NODE_ID)
            .expect("should create")
            .buffer_mut()
            .extend_from_slice(&NodeHeader::new(0, true).to_bytes());

        assert!(matches!(
            Btree::open(&config),
            Err(BtreeError::Store(NodeStoreError::LockHeld(_)))
        ));

        tree.destroy().expect("should destroy");
        assert_eq!(
            std::fs::read(dir.path().join("1")).expect("root persisted"),
            NodeHeader::new(0, true).to_bytes()
        );

        let mut reopened = Btree::open(&config).expect("should reopen");
        assert!(reopened.get_node(ROOT_NODE_ID).expect("should load").is_root());
    }
}
