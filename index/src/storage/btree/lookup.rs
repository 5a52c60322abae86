//! Root-to-leaf key lookup.

use crate::storage::btree::layout::{NodeId, ROOT_NODE_ID};
use crate::storage::btree::node::{Corruption, SearchResult};
use crate::storage::btree::tree::{Btree, BtreeError};

/// Where a key lives, or would be inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupResult {
    /// The leaf reached by the descent.
    pub leaf: NodeId,
    /// Position of the key within the leaf.
    pub result: SearchResult,
}

impl LookupResult {
    /// The leaf position packed as `2 * index + found`.
    #[must_use]
    pub const fn encoded(&self) -> usize {
        self.result.encoded()
    }
}

impl Btree {
    /// Find the leaf responsible for `key` and the key's position in it.
    ///
    /// Every node on the path is validated before it is searched, and each
    /// child records the node it was reached from as its parent. Internal
    /// nodes route a key to the entry with the greatest separator not above
    /// it; keys below the first separator go to the leftmost child.
    pub fn lookup(&mut self, key: &[u8]) -> Result<LookupResult, BtreeError> {
        let mut id = ROOT_NODE_ID;
        loop {
            let node = self.validated_node(id)?;
            let result = node.search(key).map_err(|e| BtreeError::from_node(id, e))?;
            let level = node.level();
            if level == 0 {
                return Ok(LookupResult { leaf: id, result });
            }

            let entry = (result.index + usize::from(result.found)).saturating_sub(1);
            let child_id = node
                .child_id(entry)
                .map_err(|e| BtreeError::from_node(id, e))?;

            let child = self.validated_node(child_id)?;
            if child.level().checked_add(1) != Some(level) {
                self.mark_corrupt(id, Corruption::ChildLevelMismatch { child: child_id });
                return Err(BtreeError::Corrupt {
                    node: id,
                    kind: Corruption::ChildLevelMismatch { child: child_id },
                });
            }
            child.set_parent(Some(id));
            tracing::debug!(parent = id, child = child_id, entry, "descending");
            id = child_id;
        }
    }
}
