//! Storage for the repository name index.
//!
//! The index is a B-tree whose nodes each live in their own file inside one
//! locked directory.
//!
//! # Layout
//!
//! ```text
//! <directory>/
//!   .lock   pid of the process holding the index
//!   1       root node
//!   2..N    other nodes, named by decimal id
//! ```

pub mod btree;

mod directory;
mod io;
mod simulated;

pub use directory::{DirectoryStore, LOCK_FILE_NAME};
pub use io::{NodeFile, NodeStore, NodeStoreError, read_node, write_node};
pub use simulated::{FaultConfig, SimulatedStore, SimulatedStoreStats};
