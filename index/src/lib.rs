// Read path of a content-addressed repository's name index:
// 1. A name comes in
// 2. Start at the root node (id 1), loading it from disk if needed
// 3. Validate the node, binary-search its keys
// 4. Internal node: follow the child for the matching key range, repeat
// 5. Leaf: report the leaf and the key's position
//
// System components:
//  - Node codec (wire format, validation, search)
//  - Node store (one file per node, directory lock)
//  - Tree (resident nodes, id allocation, lookup)

pub mod config;
pub mod storage;

mod e2e_tests;
mod testing;

pub use config::{ConfigError, IndexConfig};
pub use storage::btree::{Btree, BtreeError, LookupResult, SearchResult};
