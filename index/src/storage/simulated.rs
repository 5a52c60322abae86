//! Simulated in-memory node store for deterministic testing.
//!
//! Node files are kept in memory and share the watermark logic of the real
//! store. Faults are injected from a seeded RNG:
//! - Read and write errors
//! - Bit flips in bytes returned by a read

use std::collections::{HashMap, HashSet};
use std::io::Cursor;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::btree::layout::NodeId;
use crate::storage::btree::node::Node;
use crate::storage::io::{NodeStore, NodeStoreError, read_node, write_node};

/// Configuration for fault injection.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultConfig {
    /// Probability of a read error (0.0 - 1.0).
    pub read_error_rate: f64,
    /// Probability of a write error (0.0 - 1.0).
    pub write_error_rate: f64,
    /// Probability of flipping bits in a read (0.0 - 1.0).
    pub corruption_rate: f64,
}

impl FaultConfig {
    /// No faults at all.
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// High fault rates for stress testing.
    #[must_use]
    pub const fn high_faults() -> Self {
        Self {
            read_error_rate: 0.1,
            write_error_rate: 0.1,
            corruption_rate: 0.1,
        }
    }
}

/// Statistics about simulated store operations.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedStoreStats {
    /// Number of node reads.
    pub reads: u64,
    /// Number of node writes.
    pub writes: u64,
    /// Number of injected read errors.
    pub injected_read_errors: u64,
    /// Number of injected write errors.
    pub injected_write_errors: u64,
    /// Number of reads returned with flipped bits.
    pub corrupted_reads: u64,
}

/// In-memory node store.
///
/// Not thread-safe; the tree runs single-threaded.
#[derive(Debug)]
pub struct SimulatedStore {
    /// Node files, kept across close.
    files: HashMap<NodeId, Cursor<Vec<u8>>>,
    /// Nodes with an open handle.
    open: HashSet<NodeId>,

    fault_config: FaultConfig,
    rng: StdRng,
    stats: SimulatedStoreStats,
}

impl SimulatedStore {
    /// Create a fault-free store with the given seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, FaultConfig::default())
    }

    /// Create a store with custom fault configuration.
    ///
    /// The same seed produces the same sequence of faults.
    #[must_use]
    pub fn with_config(seed: u64, fault_config: FaultConfig) -> Self {
        Self {
            files: HashMap::new(),
            open: HashSet::new(),
            fault_config,
            rng: StdRng::seed_from_u64(seed),
            stats: SimulatedStoreStats::default(),
        }
    }

    /// Seed the backing file of node `id`.
    pub fn put_file(&mut self, id: NodeId, bytes: Vec<u8>) {
        self.files.insert(id, Cursor::new(bytes));
    }

    /// Current contents of node `id`'s backing file.
    #[must_use]
    pub fn file(&self, id: NodeId) -> Option<&[u8]> {
        self.files.get(&id).map(|c| c.get_ref().as_slice())
    }

    #[must_use]
    pub const fn stats(&self) -> &SimulatedStoreStats {
        &self.stats
    }

    /// Update the fault configuration.
    pub const fn set_fault_config(&mut self, config: FaultConfig) {
        self.fault_config = config;
    }

    fn should_inject_fault(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        self.rng.random::<f64>() < rate
    }

    /// Flip 1-8 distinct random bits in `bytes`.
    fn corrupt_bytes(&mut self, bytes: &mut [u8]) {
        if bytes.is_empty() {
            return;
        }
        let num_flips = self.rng.random_range(1..=8);
        let mut flips = HashSet::new();
        while flips.len() < num_flips {
            let offset = self.rng.random_range(0..bytes.len());
            let bit = self.rng.random_range(0..8u8);
            flips.insert((offset, bit));
        }
        for (offset, bit) in flips {
            bytes[offset] ^= 1 << bit;
        }
    }

    fn check_open(&self, id: NodeId) -> Result<(), NodeStoreError> {
        if self.open.contains(&id) {
            Ok(())
        } else {
            Err(NodeStoreError::NotOpen(id))
        }
    }
}

impl NodeStore for SimulatedStore {
    fn node_open(&mut self, node: &Node) -> Result<(), NodeStoreError> {
        let id = node.id();
        if id == 0 {
            return Err(NodeStoreError::InvalidNodeId(id));
        }
        if !self.open.insert(id) {
            return Err(NodeStoreError::AlreadyOpen(id));
        }
        self.files.entry(id).or_default();
        Ok(())
    }

    fn node_write(&mut self, node: &mut Node) -> Result<(), NodeStoreError> {
        self.check_open(node.id())?;
        self.stats.writes += 1;

        if self.should_inject_fault(self.fault_config.write_error_rate) {
            self.stats.injected_write_errors += 1;
            tracing::debug!(node = node.id(), "injecting write error");
            return Err(NodeStoreError::InjectedFault(
                "simulated write error".to_string(),
            ));
        }

        let file = self.files.entry(node.id()).or_default();
        write_node(file, node)?;
        Ok(())
    }

    fn node_read(&mut self, node: &mut Node, limit: usize) -> Result<usize, NodeStoreError> {
        self.check_open(node.id())?;
        self.stats.reads += 1;

        if self.should_inject_fault(self.fault_config.read_error_rate) {
            self.stats.injected_read_errors += 1;
            tracing::debug!(node = node.id(), "injecting read error");
            return Err(NodeStoreError::InjectedFault(
                "simulated read error".to_string(),
            ));
        }

        let base = node.clean().min(node.len());
        let file = self.files.entry(node.id()).or_default();
        let read = read_node(file, node, limit)?;

        if read > 0 && self.should_inject_fault(self.fault_config.corruption_rate) {
            self.stats.corrupted_reads += 1;
            tracing::debug!(node = node.id(), "injecting bit flips");
            let mut fresh = node.buffer()[base..].to_vec();
            self.corrupt_bytes(&mut fresh);
            node.buffer_mut()[base..].copy_from_slice(&fresh);
        }
        Ok(read)
    }

    fn node_close(&mut self, node: &Node) -> Result<(), NodeStoreError> {
        if self.open.remove(&node.id()) {
            Ok(())
        } else {
            Err(NodeStoreError::NotOpen(node.id()))
        }
    }

    fn max_node_id(&self) -> Result<NodeId, NodeStoreError> {
        Ok(self.files.keys().copied().max().unwrap_or(0))
    }

    fn destroy(mut self: Box<Self>) -> Result<(), NodeStoreError> {
        self.open.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::leaf_node_bytes;

    #[test]
    fn test_simulated_store_basic() {
        let mut store = SimulatedStore::new(42);
        let mut node = Node::from_bytes(3, leaf_node_bytes());

        store.node_open(&node).expect("should open");
        store.node_write(&mut node).expect("should write");
        assert_eq!(store.file(3), Some(leaf_node_bytes().as_slice()));
        store.node_close(&node).expect("should close");

        let mut reloaded = Node::new(3);
        store.node_open(&reloaded).expect("should reopen");
        store.node_read(&mut reloaded, 8192).expect("should read");
        assert_eq!(reloaded.buffer(), leaf_node_bytes().as_slice());

        assert_eq!(store.stats().reads, 1);
        assert_eq!(store.stats().writes, 1);
        assert_eq!(store.max_node_id().expect("should report"), 3);
    }

    #[test]
    fn test_simulated_store_requires_open() {
        let mut store = SimulatedStore::new(1);
        let mut node = Node::new(5);
        assert!(matches!(
            store.node_read(&mut node, 10),
            Err(NodeStoreError::NotOpen(5))
        ));
        store.node_open(&node).expect("should open");
        assert!(matches!(
            store.node_open(&node),
            Err(NodeStoreError::AlreadyOpen(5))
        ));
        assert!(matches!(
            store.node_open(&Node::new(0)),
            Err(NodeStoreError::InvalidNodeId(0))
        ));
    }

    #[test]
    fn test_simulated_store_fault_injection() {
        let config = FaultConfig {
            read_error_rate: 1.0,
            write_error_rate: 1.0,
            corruption_rate: 0.0,
        };
        let mut store = SimulatedStore::with_config(42, config);
        let mut node = Node::from_bytes(2, leaf_node_bytes());
        store.node_open(&node).expect("should open");

        assert!(matches!(
            store.node_write(&mut node),
            Err(NodeStoreError::InjectedFault(_))
        ));
        assert_eq!(node.clean(), 0);
        assert!(matches!(
            store.node_read(&mut node, 8192),
            Err(NodeStoreError::InjectedFault(_))
        ));
        assert_eq!(store.stats().injected_write_errors, 1);
        assert_eq!(store.stats().injected_read_errors, 1);
    }

    #[test]
    fn test_simulated_store_faults_can_be_lifted() {
        let config = FaultConfig {
            read_error_rate: 1.0,
            ..FaultConfig::no_faults()
        };
        let mut store = SimulatedStore::with_config(11, config);
        store.put_file(2, leaf_node_bytes());
        let mut node = Node::new(2);
        store.node_open(&node).expect("should open");
        assert!(store.node_read(&mut node, 8192).is_err());

        store.set_fault_config(FaultConfig::no_faults());
        assert_eq!(store.node_read(&mut node, 8192).expect("should read"), leaf_node_bytes().len());
        assert_eq!(store.node_read(&mut node, 8192).expect("should read"), 0);
        assert_eq!(node.buffer(), leaf_node_bytes().as_slice());
    }

    #[test]
    fn test_simulated_store_corruption() {
        let config = FaultConfig {
            corruption_rate: 1.0,
            ..FaultConfig::no_faults()
        };
        let mut store = SimulatedStore::with_config(7, config);
        store.put_file(2, leaf_node_bytes());

        let mut node = Node::new(2);
        store.node_open(&node).expect("should open");
        store.node_read(&mut node, 8192).expect("should read");

        assert_eq!(store.stats().corrupted_reads, 1);
        assert_eq!(node.len(), leaf_node_bytes().len());
        assert_ne!(node.buffer(), leaf_node_bytes().as_slice());
        // The backing file itself is untouched.
        assert_eq!(store.file(2), Some(leaf_node_bytes().as_slice()));
    }

    #[test]
    fn test_simulated_store_deterministic() {
        let run = |seed| {
            let mut store = SimulatedStore::with_config(seed, FaultConfig::high_faults());
            store.put_file(2, leaf_node_bytes());
            let mut outcomes = Vec::new();
            for _ in 0..50 {
                let mut node = Node::new(2);
                store.node_open(&node).expect("should open");
                let ok = store.node_read(&mut node, 8192).is_ok();
                outcomes.push((ok, node.buffer().to_vec()));
                store.node_close(&node).expect("should close");
            }
            outcomes
        };

        assert_eq!(run(12345), run(12345));
    }
}
