//! On-disk B-tree name index.
//!
//! Maps names (arbitrary byte strings) to fixed-size repository payloads.
//! The tree is read through [`Btree::lookup`]; nodes are produced by
//! [`NodeBuilder`].
//!
//! # Structure
//!
//! - Node 1 is the root; id 0 never names a node
//! - Internal nodes (level > 0): sorted separator keys, each with a child id
//! - Leaves (level 0): sorted keys, each with an opaque payload
//!
//! See [`layout`] for the byte format of a node.
//!
//! # Usage
//!
//! ```
//! use btree_index::storage::btree::{Btree, NodeBuilder, ROOT_NODE_ID};
//!
//! let mut leaf = NodeBuilder::leaf(8).unwrap().root();
//! leaf.push_leaf(b"alpha", &[0; 8]).unwrap();
//! leaf.push_leaf(b"beta", &[1; 8]).unwrap();
//!
//! let mut tree = Btree::new();
//! tree.get_node(ROOT_NODE_ID).unwrap().reload(&leaf.finish());
//!
//! let found = tree.lookup(b"beta").unwrap();
//! assert_eq!(found.leaf, ROOT_NODE_ID);
//! assert!(found.result.found);
//! assert_eq!(found.result.index, 1);
//! ```

pub mod layout;
pub mod node;

mod builder;
mod lookup;
mod tree;

pub use builder::{EncodeError, NodeBuilder};
pub use layout::{NodeId, ROOT_NODE_ID};
pub use lookup::LookupResult;
pub use node::{Corruption, Node, NodeError, NodeState, SearchResult};
pub use tree::{Btree, BtreeError};
