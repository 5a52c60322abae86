//! Encoding nodes from sorted keys.
//!
//! Neighboring keys in a node share a lot of bytes, so keys are not stored
//! one after another. Each entry references up to two runs of the key-byte
//! pool: a key already present in the pool costs nothing, and otherwise the
//! longest prefix found in the pool is reused and only the rest is appended.

use crate::storage::btree::layout::{
    EntryTrailer, InternalPayload, KeySegment, NodeHeader, NodeId, SIZE_UNIT,
};

/// Largest entry the one-byte `entsz` field can describe.
const MAX_ENTRY_BYTES: usize = u8::MAX as usize * SIZE_UNIT;

#[derive(Debug)]
struct PendingEntry {
    segments: [KeySegment; 2],
    entdx: u16,
    payload: Vec<u8>,
}

/// Builds the encoded bytes of a single node.
///
/// Keys must be pushed in strictly increasing byte order.
#[derive(Debug)]
pub struct NodeBuilder {
    level: u8,
    root: bool,
    payload_len: usize,
    pool: Vec<u8>,
    entries: Vec<PendingEntry>,
    last_key: Option<Vec<u8>>,
}

impl NodeBuilder {
    /// Builder for a leaf whose entries carry `payload_len` opaque bytes.
    pub fn leaf(payload_len: usize) -> Result<Self, EncodeError> {
        if payload_len % SIZE_UNIT != 0 {
            return Err(EncodeError::PayloadAlignment(payload_len));
        }
        if payload_len + EntryTrailer::SIZE > MAX_ENTRY_BYTES {
            return Err(EncodeError::EntryTooLarge(payload_len + EntryTrailer::SIZE));
        }
        Ok(Self::with_level(0, payload_len))
    }

    /// Builder for an internal node at `level` (must be at least 1).
    pub const fn internal(level: u8) -> Result<Self, EncodeError> {
        if level == 0 {
            return Err(EncodeError::WrongLevel);
        }
        Ok(Self::with_level(level, InternalPayload::SIZE))
    }

    const fn with_level(level: u8, payload_len: usize) -> Self {
        Self {
            level,
            root: false,
            payload_len,
            pool: Vec::new(),
            entries: Vec::new(),
            last_key: None,
        }
    }

    /// Mark the node as the tree root.
    #[must_use]
    pub const fn root(mut self) -> Self {
        self.root = true;
        self
    }

    /// Number of entries pushed so far.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::len() is not const-stable
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::is_empty() is not const-stable
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a leaf entry.
    pub fn push_leaf(&mut self, key: &[u8], payload: &[u8]) -> Result<(), EncodeError> {
        if self.level != 0 {
            return Err(EncodeError::WrongLevel);
        }
        if payload.len() != self.payload_len {
            return Err(EncodeError::PayloadSize {
                expected: self.payload_len,
                actual: payload.len(),
            });
        }
        self.push(key, payload.to_vec())
    }

    /// Append an internal entry whose subtree holds keys from `key` up to
    /// the next entry's key.
    pub fn push_child(&mut self, key: &[u8], child: NodeId) -> Result<(), EncodeError> {
        if self.level == 0 {
            return Err(EncodeError::WrongLevel);
        }
        if child == 0 {
            return Err(EncodeError::NullChild);
        }
        self.push(key, InternalPayload::new(child).to_bytes().to_vec())
    }

    /// Produce the encoded node.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        let entry_bytes = self.payload_len + EntryTrailer::SIZE;
        let pool_len = self.pool.len().next_multiple_of(SIZE_UNIT);
        let mut bytes = Vec::with_capacity(
            NodeHeader::SIZE + pool_len + entry_bytes * self.entries.len(),
        );

        bytes.extend_from_slice(&NodeHeader::new(self.level, self.root).to_bytes());
        bytes.extend_from_slice(&self.pool);
        bytes.resize(NodeHeader::SIZE + pool_len, 0);

        // Checked against MAX_ENTRY_BYTES when the builder was created.
        let entsz = u8::try_from(entry_bytes / SIZE_UNIT).unwrap_or(u8::MAX);
        for entry in self.entries {
            bytes.extend_from_slice(&entry.payload);
            let trailer = EntryTrailer {
                segments: entry.segments,
                entdx: entry.entdx,
                level: self.level,
                entsz,
            };
            bytes.extend_from_slice(&trailer.to_bytes());
        }
        bytes
    }

    fn push(&mut self, key: &[u8], payload: Vec<u8>) -> Result<(), EncodeError> {
        let index = self.entries.len();
        if self.last_key.as_deref().is_some_and(|last| key <= last) {
            return Err(EncodeError::KeyOrder { index });
        }
        if u16::try_from(key.len()).is_err() {
            return Err(EncodeError::KeyTooLong(key.len()));
        }
        let entdx = u16::try_from(index).map_err(|_| EncodeError::TooManyEntries)?;

        let segments = self.place_key(key)?;
        self.entries.push(PendingEntry {
            segments,
            entdx,
            payload,
        });
        self.last_key = Some(key.to_vec());
        Ok(())
    }

    /// Reference `key` from the pool, appending whatever is missing.
    fn place_key(&mut self, key: &[u8]) -> Result<[KeySegment; 2], EncodeError> {
        if key.is_empty() {
            return Ok([KeySegment::default(); 2]);
        }
        if let Some(at) = find(&self.pool, key) {
            return Ok([segment(at, key.len())?, KeySegment::default()]);
        }
        for split in (1..key.len()).rev() {
            if let Some(at) = find(&self.pool, &key[..split]) {
                let rest = &key[split..];
                let rest_at = find(&self.pool, rest).unwrap_or_else(|| self.append(rest));
                return Ok([segment(at, split)?, segment(rest_at, rest.len())?]);
            }
        }
        let at = self.append(key);
        Ok([segment(at, key.len())?, KeySegment::default()])
    }

    fn append(&mut self, bytes: &[u8]) -> usize {
        let at = self.pool.len();
        self.pool.extend_from_slice(bytes);
        at
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn segment(pool_offset: usize, len: usize) -> Result<KeySegment, EncodeError> {
    let offset = u32::try_from(NodeHeader::SIZE + pool_offset)
        .map_err(|_| EncodeError::PoolTooLarge)?;
    let len = u16::try_from(len).map_err(|_| EncodeError::KeyTooLong(len))?;
    Ok(KeySegment { offset, len })
}

/// Errors that can occur while encoding a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Key is not greater than the previous key.
    KeyOrder { index: usize },
    /// Key does not fit a 16-bit length.
    KeyTooLong(usize),
    /// Leaf payload has the wrong length.
    PayloadSize { expected: usize, actual: usize },
    /// Leaf payload length is not a multiple of `SIZE_UNIT`.
    PayloadAlignment(usize),
    /// Entry does not fit the one-byte size field.
    EntryTooLarge(usize),
    /// More entries than a 16-bit index can address.
    TooManyEntries,
    /// Key pool does not fit 32-bit offsets.
    PoolTooLarge,
    /// Child id 0 is the null node.
    NullChild,
    /// Entry kind does not match the node level.
    WrongLevel,
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeyOrder { index } => write!(f, "key {index} is out of order"),
            Self::KeyTooLong(len) => write!(f, "key too long: {len} bytes"),
            Self::PayloadSize { expected, actual } => {
                write!(f, "payload is {actual} bytes, expected {expected}")
            }
            Self::PayloadAlignment(len) => {
                write!(f, "payload length {len} is not a multiple of {SIZE_UNIT}")
            }
            Self::EntryTooLarge(len) => write!(f, "entry too large: {len} bytes"),
            Self::TooManyEntries => write!(f, "too many entries"),
            Self::PoolTooLarge => write!(f, "key pool too large"),
            Self::NullChild => write!(f, "child id must be nonzero"),
            Self::WrongLevel => write!(f, "entry kind does not match node level"),
        }
    }
}

impl std::error::Error for EncodeError {}
