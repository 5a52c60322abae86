//! Lookups against a store that injects faults.

use crate::storage::btree::{Btree, BtreeError, LookupResult};
use crate::storage::{FaultConfig, NodeStoreError, SimulatedStore};
use crate::testing::{leaf_node_bytes, root_node_bytes, second_leaf_node_bytes};

const KEYS: [&str; 6] = ["d", "goodstuff", "odd", "rut", "strut", "truth"];

fn faulty_store(seed: u64) -> SimulatedStore {
    let mut store = SimulatedStore::with_config(seed, FaultConfig::high_faults());
    store.put_file(1, root_node_bytes());
    store.put_file(2, leaf_node_bytes());
    store.put_file(3, second_leaf_node_bytes());
    store
}

/// Look every key up in a fresh tree per round.
fn run(seed: u64) -> (Vec<Result<LookupResult, String>>, u64) {
    let mut outcomes = Vec::new();
    let mut errors = 0;
    for round in 0..20 {
        let store = faulty_store(seed + round);
        let mut tree = Btree::with_store(Box::new(store), 8192).expect("should bind");
        for key in KEYS {
            outcomes.push(tree.lookup(key.as_bytes()).map_err(|e| e.to_string()));
        }
        errors += tree.error_count();
    }
    (outcomes, errors)
}

#[test]
fn test_faults_are_reported_not_panics() {
    let (outcomes, errors) = run(99);
    assert!(outcomes.iter().any(Result::is_err), "high fault rates should fail some lookups");
    assert!(outcomes.iter().any(Result::is_ok), "some lookups should get through");
    assert!(errors > 0);
}

#[test]
fn test_fault_sequence_is_deterministic() {
    assert_eq!(run(4242), run(4242));
}

#[test]
fn test_read_errors_surface_as_store_errors() {
    let config = FaultConfig {
        read_error_rate: 1.0,
        ..FaultConfig::no_faults()
    };
    let mut store = SimulatedStore::with_config(1, config);
    store.put_file(1, root_node_bytes());
    let mut tree = Btree::with_store(Box::new(store), 8192).expect("should bind");

    assert!(matches!(
        tree.lookup(b"truth"),
        Err(BtreeError::Store(NodeStoreError::InjectedFault(_)))
    ));
    assert!(tree.rnode(1).is_none());
}
