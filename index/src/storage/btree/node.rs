//! B-tree node decoding, validation and in-node search.
//!
//! A [`Node`] owns the encoded bytes of one tree node (see [`layout`]) and
//! tracks whether those bytes have been checked. Bytes loaded from disk are
//! untrusted: every accessor bounds-checks what it touches, and a structural
//! violation moves the node into [`NodeState::Corrupt`], where it stays
//! until the buffer is reloaded.
//!
//! [`layout`]: crate::storage::btree::layout

use std::cmp::Ordering;
use std::ops::Range;

use crate::storage::btree::layout::{
    EntryTrailer, INTERNAL_ENTRY_MAGIC, INTERNAL_ENTRY_SIZE, InternalPayload, NODE_MAGIC,
    NODE_VERSION, NodeHeader, NodeId, SIZE_UNIT,
};

/// Validation state of a node buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// The buffer has not been checked since it last changed.
    Unvalidated,
    /// The buffer passed validation.
    ///
    /// `free_low` is the end of the highest key byte referenced by any entry.
    Valid { free_low: usize },
    /// The buffer violates the format. Sticky until the node is reloaded.
    Corrupt(Corruption),
}

/// A structural violation found in a node buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    /// Buffer is shorter than the structures it must hold.
    TooShort,
    /// Buffer length is not a multiple of `SIZE_UNIT`.
    Misaligned,
    /// Header magic does not match.
    BadMagic,
    /// Unsupported format version.
    BadVersion,
    /// An entry's trailer lies outside the buffer.
    TrailerOutOfBounds { entry: usize },
    /// A trailer's self-check index does not match its position.
    EntryIndexMismatch { entry: usize, found: u16 },
    /// Entry size is too small or differs between entries.
    BadEntrySize { entry: usize },
    /// Trailer level differs from the header level.
    LevelMismatch { entry: usize },
    /// A key segment points outside the key-byte pool.
    KeySegmentOutOfBounds { entry: usize },
    /// Internal entry payload lacks its magic byte.
    BadInternalMagic { entry: usize },
    /// Internal entry references the null node id.
    NullChild { entry: usize },
    /// A child's level is not one less than its parent's.
    ChildLevelMismatch { child: NodeId },
}

impl Corruption {
    /// Stable nonzero code identifying which check failed.
    #[must_use]
    pub const fn code(&self) -> u16 {
        match self {
            Self::TooShort => 1,
            Self::Misaligned => 2,
            Self::BadMagic => 3,
            Self::BadVersion => 4,
            Self::TrailerOutOfBounds { .. } => 5,
            Self::EntryIndexMismatch { .. } => 6,
            Self::BadEntrySize { .. } => 7,
            Self::LevelMismatch { .. } => 8,
            Self::KeySegmentOutOfBounds { .. } => 9,
            Self::BadInternalMagic { .. } => 10,
            Self::NullChild { .. } => 11,
            Self::ChildLevelMismatch { .. } => 12,
        }
    }
}

impl std::fmt::Display for Corruption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooShort => write!(f, "buffer too short"),
            Self::Misaligned => write!(f, "length is not a multiple of {SIZE_UNIT}"),
            Self::BadMagic => write!(f, "bad header magic"),
            Self::BadVersion => write!(f, "unsupported format version"),
            Self::TrailerOutOfBounds { entry } => {
                write!(f, "trailer of entry {entry} out of bounds")
            }
            Self::EntryIndexMismatch { entry, found } => {
                write!(f, "entry {entry} carries index {found}")
            }
            Self::BadEntrySize { entry } => write!(f, "bad size for entry {entry}"),
            Self::LevelMismatch { entry } => write!(f, "level mismatch in entry {entry}"),
            Self::KeySegmentOutOfBounds { entry } => {
                write!(f, "key segment of entry {entry} out of bounds")
            }
            Self::BadInternalMagic { entry } => {
                write!(f, "bad internal entry magic in entry {entry}")
            }
            Self::NullChild { entry } => write!(f, "entry {entry} references node 0"),
            Self::ChildLevelMismatch { child } => {
                write!(f, "child node {child} has the wrong level")
            }
        }
    }
}

/// Errors returned by node accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeError {
    /// Index is not in `0..count`. Never marks the node corrupt.
    OutOfRange { index: usize, count: usize },
    /// The node is corrupt.
    Corrupt(Corruption),
    /// Operation requires an internal node.
    NotInternal,
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfRange { index, count } => {
                write!(f, "entry {index} out of range (entries: {count})")
            }
            Self::Corrupt(kind) => write!(f, "corrupt node: {kind}"),
            Self::NotInternal => write!(f, "not an internal node"),
        }
    }
}

impl std::error::Error for NodeError {}

/// Outcome of a search within one node.
///
/// `index` is the matching entry when `found`, otherwise the number of
/// entries that sort below the key (the insertion point).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchResult {
    pub index: usize,
    pub found: bool,
}

impl SearchResult {
    /// Exact match at `index`.
    #[must_use]
    pub const fn exact(index: usize) -> Self {
        Self { index, found: true }
    }

    /// No match; the key would be inserted at `index`.
    #[must_use]
    pub const fn insert_at(index: usize) -> Self {
        Self {
            index,
            found: false,
        }
    }

    /// Pack into a single value: `2 * index + found`.
    #[must_use]
    pub const fn encoded(self) -> usize {
        self.index * 2 + self.found as usize
    }

    /// Inverse of [`SearchResult::encoded`].
    #[must_use]
    pub const fn from_encoded(value: usize) -> Self {
        Self {
            index: value >> 1,
            found: value & 1 == 1,
        }
    }
}

/// One B-tree node: its id, encoded bytes and bookkeeping.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    buf: Vec<u8>,
    state: NodeState,
    clean: usize,
    parent: Option<NodeId>,
}

impl Node {
    /// Create an empty, unvalidated node.
    #[must_use]
    pub const fn new(id: NodeId) -> Self {
        Self::from_bytes(id, Vec::new())
    }

    /// Create an unvalidated node holding `bytes`.
    #[must_use]
    pub const fn from_bytes(id: NodeId, bytes: Vec<u8>) -> Self {
        Self {
            id,
            buf: bytes,
            state: NodeState::Unvalidated,
            clean: 0,
            parent: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    /// The encoded node bytes.
    #[must_use]
    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    /// Mutable access to the encoded bytes.
    ///
    /// A valid node drops back to unvalidated; a corrupt node stays corrupt.
    pub fn buffer_mut(&mut self) -> &mut Vec<u8> {
        if matches!(self.state, NodeState::Valid { .. }) {
            self.state = NodeState::Unvalidated;
        }
        &mut self.buf
    }

    /// Empty the buffer ahead of refilling it from a known-good source.
    ///
    /// This is the only way, besides [`Node::reload`], to leave the corrupt
    /// state.
    pub fn clear_for_reload(&mut self) -> &mut Vec<u8> {
        self.state = NodeState::Unvalidated;
        self.buf.clear();
        &mut self.buf
    }

    /// Replace the buffer with `bytes` from a known-good source.
    pub fn reload(&mut self, bytes: &[u8]) {
        self.clear_for_reload().extend_from_slice(bytes);
        self.clean = 0;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Number of leading buffer bytes known to be persisted.
    #[must_use]
    pub const fn clean(&self) -> usize {
        self.clean
    }

    pub const fn set_clean(&mut self, clean: usize) {
        self.clean = clean;
    }

    /// Whether the buffer holds bytes past the watermark.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.buf.len() > self.clean
    }

    /// Parent recorded during the last descent through this node.
    #[must_use]
    pub const fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub const fn set_parent(&mut self, parent: Option<NodeId>) {
        self.parent = parent;
    }

    #[must_use]
    pub const fn state(&self) -> NodeState {
        self.state
    }

    #[must_use]
    pub const fn corruption(&self) -> Option<Corruption> {
        match self.state {
            NodeState::Corrupt(kind) => Some(kind),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_corrupt(&self) -> bool {
        matches!(self.state, NodeState::Corrupt(_))
    }

    /// End of the live key bytes, once the node has been validated.
    #[must_use]
    pub const fn free_low(&self) -> Option<usize> {
        match self.state {
            NodeState::Valid { free_low } => Some(free_low),
            _ => None,
        }
    }

    /// Mark the node corrupt unless it already is.
    pub fn mark_corrupt(&mut self, kind: Corruption) {
        if !self.is_corrupt() {
            tracing::warn!(node = self.id, code = kind.code(), "node corrupt: {kind}");
            self.state = NodeState::Corrupt(kind);
        }
    }

    /// The decoded header, if the buffer is long enough to hold one.
    #[must_use]
    pub fn header(&self) -> Option<NodeHeader> {
        NodeHeader::from_bytes(&self.buf)
    }

    /// Tree level: 0 for leaves (and for an empty buffer).
    #[must_use]
    pub fn level(&self) -> u8 {
        self.header().map_or(0, |h| h.level)
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.header().is_some_and(|h| h.is_root())
    }

    /// Number of entries, read from the last trailer's self-check index.
    ///
    /// Only meaningful once the node has been validated.
    #[must_use]
    pub fn nent(&self) -> usize {
        let len = self.buf.len();
        if len < NodeHeader::SIZE + EntryTrailer::SIZE {
            return 0;
        }
        EntryTrailer::read_at(&self.buf, len - EntryTrailer::SIZE)
            .map_or(0, |t| usize::from(t.entdx) + 1)
    }

    /// Check the buffer against the node format.
    ///
    /// On success the node becomes [`NodeState::Valid`]. On the first
    /// violation it becomes [`NodeState::Corrupt`] and the violation is
    /// returned. A node that is already corrupt is not rescanned.
    pub fn validate(&mut self) -> Result<(), NodeError> {
        if let NodeState::Corrupt(kind) = self.state {
            return Err(NodeError::Corrupt(kind));
        }
        match self.scan() {
            Ok(free_low) => {
                self.state = NodeState::Valid { free_low };
                Ok(())
            }
            Err(kind) => {
                self.mark_corrupt(kind);
                Err(NodeError::Corrupt(kind))
            }
        }
    }

    /// The key of entry `index`.
    pub fn key_fetch(&mut self, index: usize) -> Result<Vec<u8>, NodeError> {
        let mut key = Vec::new();
        self.key_append(&mut key, index)?;
        Ok(key)
    }

    /// Append the key of entry `index` to `dst`.
    ///
    /// On failure `dst` is left unchanged.
    pub fn key_append(&mut self, dst: &mut Vec<u8>, index: usize) -> Result<(), NodeError> {
        let [first, second] = self.segment_ranges(index).map_err(|e| self.fail(e))?;
        dst.extend_from_slice(&self.buf[first]);
        dst.extend_from_slice(&self.buf[second]);
        Ok(())
    }

    /// Compare `key` with the key of entry `index`, byte-wise.
    pub fn compare(&mut self, key: &[u8], index: usize) -> Result<Ordering, NodeError> {
        let [first, second] = self.segment_ranges(index).map_err(|e| self.fail(e))?;
        let stored = self.buf[first].iter().chain(self.buf[second].iter());
        Ok(key.iter().cmp(stored))
    }

    /// Binary search for `key` among the node's entries.
    pub fn search(&mut self, key: &[u8]) -> Result<SearchResult, NodeError> {
        if let NodeState::Corrupt(kind) = self.state {
            return Err(NodeError::Corrupt(kind));
        }
        let mut low = 0;
        let mut high = self.nent();
        while low < high {
            let mid = low + (high - low) / 2;
            match self.compare(key, mid)? {
                Ordering::Equal => return Ok(SearchResult::exact(mid)),
                Ordering::Less => high = mid,
                Ordering::Greater => low = mid + 1,
            }
        }
        Ok(SearchResult::insert_at(low))
    }

    /// Child node referenced by internal entry `index`.
    pub fn child_id(&mut self, index: usize) -> Result<NodeId, NodeError> {
        if self.level() == 0 {
            return Err(NodeError::NotInternal);
        }
        self.internal_payload(index)
            .map(|payload| payload.child)
            .map_err(|e| self.fail(e))
    }

    /// Bytes of entry `index` that precede its trailer.
    ///
    /// For leaves this is the repository's opaque payload.
    pub fn entry_payload(&mut self, index: usize) -> Result<&[u8], NodeError> {
        let range = self.payload_range(index).map_err(|e| self.fail(e))?;
        Ok(&self.buf[range])
    }

    /// Record corruption carried by `error` and hand it back.
    fn fail(&mut self, error: NodeError) -> NodeError {
        if let NodeError::Corrupt(kind) = error {
            self.mark_corrupt(kind);
        }
        error
    }

    fn check_not_corrupt(&self) -> Result<(), NodeError> {
        match self.state {
            NodeState::Corrupt(kind) => Err(NodeError::Corrupt(kind)),
            _ => Ok(()),
        }
    }

    /// Find the trailer of entry `index`, returning its offset.
    fn locate(&self, index: usize) -> Result<(usize, EntryTrailer), NodeError> {
        let count = self.nent();
        if index >= count {
            return Err(NodeError::OutOfRange { index, count });
        }
        let len = self.buf.len();
        let out_of_bounds = NodeError::Corrupt(Corruption::TrailerOutOfBounds { entry: index });

        let last = EntryTrailer::read_at(&self.buf, len - EntryTrailer::SIZE).ok_or(out_of_bounds)?;
        let entry_bytes = last.entry_bytes();
        if entry_bytes < EntryTrailer::SIZE {
            return Err(NodeError::Corrupt(Corruption::BadEntrySize { entry: count - 1 }));
        }

        let offset = (count - 1 - index)
            .checked_mul(entry_bytes)
            .and_then(|back| len.checked_sub(back + EntryTrailer::SIZE))
            .filter(|&offset| offset >= NodeHeader::SIZE)
            .ok_or(out_of_bounds)?;
        let trailer = EntryTrailer::read_at(&self.buf, offset).ok_or(out_of_bounds)?;

        if usize::from(trailer.entdx) != index {
            return Err(NodeError::Corrupt(Corruption::EntryIndexMismatch {
                entry: index,
                found: trailer.entdx,
            }));
        }
        if trailer.entsz != last.entsz {
            return Err(NodeError::Corrupt(Corruption::BadEntrySize { entry: index }));
        }
        Ok((offset, trailer))
    }

    /// Byte ranges of the two key segments of entry `index`.
    ///
    /// Empty segments map to `0..0`.
    fn segment_ranges(&self, index: usize) -> Result<[Range<usize>; 2], NodeError> {
        self.check_not_corrupt()?;
        let (_, trailer) = self.locate(index)?;
        let mut ranges = [0..0, 0..0];
        for (slot, segment) in ranges.iter_mut().zip(trailer.segments) {
            if segment.len == 0 {
                continue;
            }
            *slot = segment
                .range()
                .filter(|r| r.start >= NodeHeader::SIZE && r.end <= self.buf.len())
                .ok_or(NodeError::Corrupt(Corruption::KeySegmentOutOfBounds {
                    entry: index,
                }))?;
        }
        Ok(ranges)
    }

    fn payload_range(&self, index: usize) -> Result<Range<usize>, NodeError> {
        self.check_not_corrupt()?;
        let (offset, trailer) = self.locate(index)?;
        let start = (offset + EntryTrailer::SIZE)
            .checked_sub(trailer.entry_bytes())
            .filter(|&start| start >= NodeHeader::SIZE)
            .ok_or(NodeError::Corrupt(Corruption::BadEntrySize { entry: index }))?;
        Ok(start..offset)
    }

    fn internal_payload(&self, index: usize) -> Result<InternalPayload, NodeError> {
        let range = self.payload_range(index)?;
        if range.len() < InternalPayload::SIZE {
            return Err(NodeError::Corrupt(Corruption::BadEntrySize { entry: index }));
        }
        let payload = InternalPayload::read_at(&self.buf, range.end - InternalPayload::SIZE)
            .ok_or(NodeError::Corrupt(Corruption::BadEntrySize { entry: index }))?;
        if payload.magic != INTERNAL_ENTRY_MAGIC {
            return Err(NodeError::Corrupt(Corruption::BadInternalMagic { entry: index }));
        }
        if payload.child == 0 {
            return Err(NodeError::Corrupt(Corruption::NullChild { entry: index }));
        }
        Ok(payload)
    }

    /// Full structural scan. Returns `free_low` on success.
    fn scan(&self) -> Result<usize, Corruption> {
        let len = self.buf.len();
        if len == 0 {
            return Ok(0);
        }
        if len < NodeHeader::SIZE {
            return Err(Corruption::TooShort);
        }
        if len % SIZE_UNIT != 0 {
            return Err(Corruption::Misaligned);
        }
        let header = NodeHeader::from_bytes(&self.buf).ok_or(Corruption::TooShort)?;
        if header.magic != NODE_MAGIC {
            return Err(Corruption::BadMagic);
        }
        if header.version != NODE_VERSION {
            return Err(Corruption::BadVersion);
        }

        let mut free_low = NodeHeader::SIZE;
        if len == NodeHeader::SIZE {
            return Ok(free_low);
        }
        let count = self.nent();
        if count == 0 {
            return Err(Corruption::TrailerOutOfBounds { entry: 0 });
        }

        // Key bytes live between the header and the first entry.
        let mut key_limit = len;
        for index in 0..count {
            let (offset, trailer) = self.locate(index).map_err(|e| match e {
                NodeError::Corrupt(kind) => kind,
                _ => Corruption::TrailerOutOfBounds { entry: index },
            })?;
            if index == 0 {
                key_limit = self
                    .payload_range(0)
                    .map_err(|_| Corruption::BadEntrySize { entry: 0 })?
                    .start;
            }
            if trailer.level != header.level {
                return Err(Corruption::LevelMismatch { entry: index });
            }

            for segment in trailer.segments {
                let start = usize::try_from(segment.offset)
                    .map_err(|_| Corruption::KeySegmentOutOfBounds { entry: index })?;
                let size = usize::from(segment.len);
                if (size != 0 && start < NodeHeader::SIZE)
                    || start > key_limit
                    || size > key_limit - start
                {
                    return Err(Corruption::KeySegmentOutOfBounds { entry: index });
                }
                if size != 0 {
                    free_low = free_low.max(start + size);
                }
            }

            if header.level > 0 {
                if trailer.entry_bytes() < INTERNAL_ENTRY_SIZE {
                    return Err(Corruption::BadEntrySize { entry: index });
                }
                let payload = InternalPayload::read_at(&self.buf, offset - InternalPayload::SIZE)
                    .ok_or(Corruption::BadEntrySize { entry: index })?;
                if payload.magic != INTERNAL_ENTRY_MAGIC {
                    return Err(Corruption::BadInternalMagic { entry: index });
                }
                if payload.child == 0 {
                    return Err(Corruption::NullChild { entry: index });
                }
            }
        }
        Ok(free_low)
    }
}
