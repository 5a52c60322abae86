//! Node persistence abstraction.
//!
//! A [`NodeStore`] moves node buffers between memory and one backing file per
//! node. The tree uses real per-node files through
//! [`DirectoryStore`](crate::storage::DirectoryStore) and an in-memory
//! [`SimulatedStore`](crate::storage::SimulatedStore) with fault injection in
//! tests.
//!
//! # Watermark
//!
//! Each node carries a clean watermark: the number of leading buffer bytes
//! known to match the backing file. Writes only send bytes past the
//! watermark; reads only fetch bytes past it. Both implementations share the
//! watermark logic in [`write_node`] and [`read_node`] so they cannot drift
//! apart.

// File offsets are u64; node buffers are addressed with usize.
#![allow(clippy::cast_possible_truncation)]

use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use crate::storage::btree::layout::NodeId;
use crate::storage::btree::node::Node;

/// Errors that can occur during node store operations.
#[derive(Debug)]
pub enum NodeStoreError {
    /// I/O error.
    Io(std::io::Error),
    /// Another store holds the directory lock.
    LockHeld(PathBuf),
    /// The node already has an open file handle.
    AlreadyOpen(NodeId),
    /// The node has no open file handle.
    NotOpen(NodeId),
    /// Node id 0 never names a node.
    InvalidNodeId(NodeId),
    /// Injected fault for simulation.
    InjectedFault(String),
}

impl std::fmt::Display for NodeStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::LockHeld(path) => write!(f, "index lock held: {}", path.display()),
            Self::AlreadyOpen(id) => write!(f, "node {id} is already open"),
            Self::NotOpen(id) => write!(f, "node {id} is not open"),
            Self::InvalidNodeId(id) => write!(f, "invalid node id {id}"),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
        }
    }
}

impl std::error::Error for NodeStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for NodeStoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Persistence backend for B-tree nodes.
///
/// # Implementation Notes
///
/// Implementations must ensure:
/// - `node_write` followed by a full `node_read` reproduces the buffer
/// - `node_close` leaves the node's buffer and watermark untouched
/// - `destroy` releases every resource, including any directory lock
pub trait NodeStore {
    /// Open (creating if needed) the backing file of `node`.
    fn node_open(&mut self, node: &Node) -> Result<(), NodeStoreError>;

    /// Persist the bytes of `node` past its clean watermark.
    fn node_write(&mut self, node: &mut Node) -> Result<(), NodeStoreError>;

    /// Read up to `limit` bytes of `node`'s file starting at its watermark.
    /// Returns the number of bytes read; 0 means the buffer covers the file.
    fn node_read(&mut self, node: &mut Node, limit: usize) -> Result<usize, NodeStoreError>;

    /// Drop the open file handle of `node`.
    fn node_close(&mut self, node: &Node) -> Result<(), NodeStoreError>;

    /// Highest node id with a backing file, or 0 when there is none.
    fn max_node_id(&self) -> Result<NodeId, NodeStoreError>;

    /// Close everything and release the store.
    fn destroy(self: Box<Self>) -> Result<(), NodeStoreError>;
}

/// A seekable byte container backing one node.
pub trait NodeFile: Read + Write + Seek {
    /// Current length in bytes.
    fn byte_len(&mut self) -> std::io::Result<u64>;

    /// Shrink the file to `len` bytes.
    fn truncate_to(&mut self, len: u64) -> std::io::Result<()>;
}

impl NodeFile for std::fs::File {
    fn byte_len(&mut self) -> std::io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len)
    }
}

impl NodeFile for Cursor<Vec<u8>> {
    fn byte_len(&mut self) -> std::io::Result<u64> {
        Ok(self.get_ref().len() as u64)
    }

    fn truncate_to(&mut self, len: u64) -> std::io::Result<()> {
        self.get_mut().truncate(len as usize);
        Ok(())
    }
}

/// Write `node`'s unpersisted bytes to `file`.
///
/// With the watermark inside the buffer, `buf[clean..]` lands at file offset
/// `clean`, any stale file tail past the buffer is cut off and the watermark
/// moves to the buffer end. A buffer shorter than its watermark writes
/// nothing and keeps the watermark.
pub fn write_node<F: NodeFile>(file: &mut F, node: &mut Node) -> std::io::Result<()> {
    let clean = node.clean();
    let len = node.len();
    if len < clean {
        tracing::debug!(node = node.id(), len, clean, "buffer behind watermark, skipping write");
        return Ok(());
    }

    file.seek(SeekFrom::Start(clean as u64))?;
    file.write_all(&node.buffer()[clean..])?;
    if file.byte_len()? > len as u64 {
        file.truncate_to(len as u64)?;
    }
    node.set_clean(len);
    Ok(())
}

/// Refill `node` from `file`, reading at most `limit` bytes.
///
/// Bytes past the watermark are unpersisted and are replaced by the file's
/// content. A read from offset 0 is a full reload and clears corruption.
/// Returns the number of bytes read.
pub fn read_node<F: NodeFile>(file: &mut F, node: &mut Node, limit: usize) -> std::io::Result<usize> {
    let base = node.clean().min(node.len());
    let file_len = file.byte_len()?;

    let buf = if base == 0 {
        node.clear_for_reload()
    } else {
        let buf = node.buffer_mut();
        buf.truncate(base);
        buf
    };

    let mut read = 0;
    if (base as u64) < file_len {
        file.seek(SeekFrom::Start(base as u64))?;
        read = Read::take(&mut *file, limit as u64).read_to_end(buf)?;
    }
    node.set_clean(node.len());
    Ok(read)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::btree::node::NodeState;
    use crate::testing::leaf_node_bytes;

    #[test]
    fn test_node_store_error_display() {
        let e = NodeStoreError::LockHeld(PathBuf::from("/tmp/index/.lock"));
        assert!(e.to_string().contains("/tmp/index/.lock"));

        let e = NodeStoreError::InjectedFault("test fault".to_string());
        assert!(e.to_string().contains("test fault"));

        let e = NodeStoreError::from(std::io::Error::other("disk gone"));
        assert!(std::error::Error::source(&e).is_some());
    }

    #[test]
    fn test_watermark_write_and_read() {
        let mut file = Cursor::new(Vec::new());
        let mut node = Node::from_bytes(4, b"smoke".to_vec());

        write_node(&mut file, &mut node).expect("should write");
        assert_eq!(node.clean(), 5);
        assert_eq!(file.get_ref(), b"smoke");

        node.reload(b"garbage");
        assert_eq!(read_node(&mut file, &mut node, 500_000).expect("should read"), 5);
        assert_eq!(node.buffer(), b"smoke");
        assert_eq!(node.clean(), 5);

        node.buffer_mut().push(b'r');
        write_node(&mut file, &mut node).expect("should write");
        assert_eq!(file.get_ref(), b"smoker");
        assert_eq!(node.clean(), 6);

        // Only the bytes past the watermark are fetched.
        node.buffer_mut().truncate(5);
        node.buffer_mut().push(b'd');
        node.set_clean(5);
        read_node(&mut file, &mut node, 1000).expect("should read");
        assert_eq!(node.buffer(), b"smoker");
    }

    #[test]
    fn test_write_behind_watermark_is_noop() {
        let mut file = Cursor::new(b"smoker".to_vec());
        let mut node = Node::from_bytes(4, b"smoker".to_vec());
        node.set_clean(6);

        node.buffer_mut().truncate(5);
        write_node(&mut file, &mut node).expect("should not fail");
        assert_eq!(node.clean(), 6);
        assert_eq!(file.get_ref(), b"smoker");
    }

    #[test]
    fn test_write_truncates_stale_tail() {
        let mut file = Cursor::new(b"smokestack".to_vec());
        let mut node = Node::from_bytes(4, b"smoke".to_vec());
        node.set_clean(3);

        write_node(&mut file, &mut node).expect("should write");
        assert_eq!(file.get_ref(), b"smoke");
    }

    #[test]
    fn test_read_discards_unflushed_tail() {
        let mut file = Cursor::new(Vec::new());
        let mut node = Node::from_bytes(4, b"abc".to_vec());
        write_node(&mut file, &mut node).expect("should write");

        node.buffer_mut().extend_from_slice(b"unflushed");
        read_node(&mut file, &mut node, 64).expect("should read");
        assert_eq!(node.buffer(), b"abc");
        assert_eq!(node.clean(), 3);
    }

    #[test]
    fn test_read_respects_limit() {
        let mut file = Cursor::new(leaf_node_bytes());
        let mut node = Node::new(2);
        assert_eq!(read_node(&mut file, &mut node, 10).expect("should read"), 10);
        assert_eq!(node.len(), 10);
        assert_eq!(node.clean(), 10);

        read_node(&mut file, &mut node, 1000).expect("should read");
        assert_eq!(node.buffer(), leaf_node_bytes().as_slice());
        node.validate().expect("should validate");
    }

    #[test]
    fn test_read_from_offset_zero_clears_corruption() {
        let mut file = Cursor::new(leaf_node_bytes());
        let mut node = Node::from_bytes(2, vec![1, 2, 3]);
        node.validate().expect_err("should be corrupt");

        read_node(&mut file, &mut node, 8192).expect("should read");
        assert_eq!(node.state(), NodeState::Unvalidated);
        node.validate().expect("should validate");
    }

    #[test]
    fn test_read_past_end_of_file() {
        let mut file = Cursor::new(b"ab".to_vec());
        let mut node = Node::from_bytes(4, b"abcd".to_vec());
        node.set_clean(4);

        assert_eq!(read_node(&mut file, &mut node, 64).expect("should not fail"), 0);
        assert_eq!(node.buffer(), b"abcd");
    }
}
