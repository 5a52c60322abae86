//! Directory-backed node store.
//!
//! Every node lives in its own file named by its decimal id. A `.lock` file
//! holding the owner's pid keeps a second store from opening the same
//! directory; it is removed by [`NodeStore::destroy`] or when the store is
//! dropped.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::storage::btree::layout::NodeId;
use crate::storage::btree::node::Node;
use crate::storage::io::{NodeStore, NodeStoreError, read_node, write_node};

/// Name of the lock file inside the index directory.
pub const LOCK_FILE_NAME: &str = ".lock";

/// Node store keeping one file per node in a locked directory.
#[derive(Debug)]
pub struct DirectoryStore {
    directory: PathBuf,
    lock_path: PathBuf,
    files: HashMap<NodeId, File>,
    locked: bool,
}

impl DirectoryStore {
    /// Lock `directory` and open a store on it.
    ///
    /// The directory must already exist. Fails with
    /// [`NodeStoreError::LockHeld`] if another store holds the lock.
    pub fn open(directory: impl AsRef<Path>) -> Result<Self, NodeStoreError> {
        let directory = directory.as_ref().to_path_buf();
        let lock_path = directory.join(LOCK_FILE_NAME);

        let mut lock = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::warn!(path = %lock_path.display(), "index directory is locked");
                return Err(NodeStoreError::LockHeld(lock_path));
            }
            Err(e) => return Err(NodeStoreError::Io(e)),
        };

        if let Err(e) = write!(lock, "{}", std::process::id()) {
            if let Err(cleanup) = std::fs::remove_file(&lock_path) {
                tracing::warn!(path = %lock_path.display(), "failed to remove index lock: {cleanup}");
            }
            return Err(NodeStoreError::Io(e));
        }

        tracing::info!(directory = %directory.display(), "acquired index lock");
        Ok(Self {
            directory,
            lock_path,
            files: HashMap::new(),
            locked: true,
        })
    }

    /// The directory this store manages.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the file backing node `id`.
    #[must_use]
    pub fn node_path(&self, id: NodeId) -> PathBuf {
        self.directory.join(id.to_string())
    }

    /// Number of nodes with an open file handle.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.files.len()
    }

    fn file_mut(&mut self, id: NodeId) -> Result<&mut File, NodeStoreError> {
        self.files.get_mut(&id).ok_or(NodeStoreError::NotOpen(id))
    }

    /// Close every handle and remove the lock file.
    fn release(&mut self) -> std::io::Result<()> {
        self.files.clear();
        if !self.locked {
            return Ok(());
        }
        self.locked = false;
        std::fs::remove_file(&self.lock_path)?;
        tracing::info!(directory = %self.directory.display(), "released index lock");
        Ok(())
    }
}

impl NodeStore for DirectoryStore {
    fn node_open(&mut self, node: &Node) -> Result<(), NodeStoreError> {
        let id = node.id();
        if id == 0 {
            return Err(NodeStoreError::InvalidNodeId(id));
        }
        if self.files.contains_key(&id) {
            return Err(NodeStoreError::AlreadyOpen(id));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.node_path(id))?;
        self.files.insert(id, file);
        Ok(())
    }

    fn node_write(&mut self, node: &mut Node) -> Result<(), NodeStoreError> {
        let file = self.file_mut(node.id())?;
        write_node(file, node)?;
        tracing::debug!(node = node.id(), len = node.len(), "wrote node");
        Ok(())
    }

    fn node_read(&mut self, node: &mut Node, limit: usize) -> Result<usize, NodeStoreError> {
        let file = self.file_mut(node.id())?;
        let read = read_node(file, node, limit)?;
        tracing::debug!(node = node.id(), read, len = node.len(), "read node");
        Ok(read)
    }

    fn node_close(&mut self, node: &Node) -> Result<(), NodeStoreError> {
        self.files
            .remove(&node.id())
            .map(drop)
            .ok_or(NodeStoreError::NotOpen(node.id()))
    }

    fn max_node_id(&self) -> Result<NodeId, NodeStoreError> {
        let mut max = 0;
        for entry in std::fs::read_dir(&self.directory)? {
            let entry = entry?;
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<NodeId>().ok())
            {
                max = max.max(id);
            }
        }
        Ok(max)
    }

    fn destroy(mut self: Box<Self>) -> Result<(), NodeStoreError> {
        self.release()?;
        Ok(())
    }
}

impl Drop for DirectoryStore {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(path = %self.lock_path.display(), "failed to release index lock: {e}");
        }
    }
}
