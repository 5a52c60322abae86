//! Wire format of a B-tree node.
//!
//! A node is a single byte buffer laid out as:
//!
//! ```text
//! | header (8) | key-byte pool | entry 0 | entry 1 | ... | entry n-1 |
//! ```
//!
//! Every entry has the same size and ends with a 16-byte trailer. Internal
//! entries carry an 8-byte payload (magic + child id) immediately before the
//! trailer; leaf entries carry an opaque payload owned by the repository.
//! All multi-byte integers are big-endian.

// Field widths are fixed by the format and checked before narrowing.
#![allow(clippy::cast_possible_truncation)]

/// A node identifier.
pub type NodeId = u32;

/// The null child pointer. A node with this id can be resident but is never
/// stored.
pub const NULL_NODE_ID: NodeId = 0;

/// Id of the root node.
pub const ROOT_NODE_ID: NodeId = 1;

/// Alignment granularity of every record in the format.
pub const SIZE_UNIT: usize = 8;

/// Magic number at the start of every node.
pub const NODE_MAGIC: u32 = 0x053a_de78;

/// Current node format version.
pub const NODE_VERSION: u8 = 1;

/// Role byte marking the root node.
pub const ROOT_MARKER: u8 = b'R';

/// First byte of an internal entry's payload.
pub const INTERNAL_ENTRY_MAGIC: u8 = 0xcc;

/// Node header layout:
/// - `magic`: 4 bytes
/// - `version`: 1 byte
/// - `role`: 1 byte (`ROOT_MARKER` for the root)
/// - `level`: 1 byte (0 = leaf)
/// - `reserved`: 1 byte
///
/// Total: 8 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    pub magic: u32,
    pub version: u8,
    pub role: u8,
    pub level: u8,
}

impl NodeHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 8;

    /// Header for a fresh node at `level`.
    #[must_use]
    pub const fn new(level: u8, root: bool) -> Self {
        Self {
            magic: NODE_MAGIC,
            version: NODE_VERSION,
            role: if root { ROOT_MARKER } else { 0 },
            level,
        }
    }

    /// Serialize the header to bytes.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_be_bytes());
        buf[4] = self.version;
        buf[5] = self.role;
        buf[6] = self.level;
        // byte 7 reserved
        buf
    }

    /// Read the header from the start of a node buffer.
    ///
    /// Returns `None` if the buffer is shorter than a header.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let raw = bytes.get(..Self::SIZE)?;
        Some(Self {
            magic: read_u32(raw, 0),
            version: raw[4],
            role: raw[5],
            level: raw[6],
        })
    }

    /// Whether the role byte marks the root.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.role == ROOT_MARKER
    }
}

/// One contiguous run of key bytes inside a node buffer.
///
/// `offset` is an absolute buffer offset, so it already includes the header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeySegment {
    pub offset: u32,
    pub len: u16,
}

impl KeySegment {
    /// Byte range covered by the segment, or `None` if it overflows `usize`.
    #[must_use]
    pub fn range(self) -> Option<std::ops::Range<usize>> {
        let start = usize::try_from(self.offset).ok()?;
        let end = start.checked_add(usize::from(self.len))?;
        Some(start..end)
    }
}

/// Entry trailer layout:
/// - `koff0`: 4 bytes
/// - `ksiz0`: 2 bytes
/// - `koff1`: 4 bytes
/// - `ksiz1`: 2 bytes
/// - `entdx`: 2 bytes (the entry's own index)
/// - `level`: 1 byte
/// - `entsz`: 1 byte (entry size in `SIZE_UNIT`s)
///
/// Total: 16 bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryTrailer {
    pub segments: [KeySegment; 2],
    pub entdx: u16,
    pub level: u8,
    pub entsz: u8,
}

impl EntryTrailer {
    /// Size of the trailer in bytes.
    pub const SIZE: usize = 16;

    /// Serialize the trailer to bytes.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.segments[0].offset.to_be_bytes());
        buf[4..6].copy_from_slice(&self.segments[0].len.to_be_bytes());
        buf[6..10].copy_from_slice(&self.segments[1].offset.to_be_bytes());
        buf[10..12].copy_from_slice(&self.segments[1].len.to_be_bytes());
        buf[12..14].copy_from_slice(&self.entdx.to_be_bytes());
        buf[14] = self.level;
        buf[15] = self.entsz;
        buf
    }

    /// Read a trailer starting at `offset`.
    ///
    /// Returns `None` if the trailer does not fit in `bytes`.
    #[must_use]
    pub fn read_at(bytes: &[u8], offset: usize) -> Option<Self> {
        let raw = bytes.get(offset..offset.checked_add(Self::SIZE)?)?;
        Some(Self {
            segments: [
                KeySegment {
                    offset: read_u32(raw, 0),
                    len: read_u16(raw, 4),
                },
                KeySegment {
                    offset: read_u32(raw, 6),
                    len: read_u16(raw, 10),
                },
            ],
            entdx: read_u16(raw, 12),
            level: raw[14],
            entsz: raw[15],
        })
    }

    /// Entry size in bytes.
    #[must_use]
    pub const fn entry_bytes(&self) -> usize {
        self.entsz as usize * SIZE_UNIT
    }
}

/// Internal entry payload layout:
/// - `magic`: 1 byte (`INTERNAL_ENTRY_MAGIC`)
/// - `pad`: 3 bytes
/// - `child`: 4 bytes
///
/// Total: 8 bytes, placed directly before the entry trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalPayload {
    pub magic: u8,
    pub child: NodeId,
}

impl InternalPayload {
    /// Size of the payload in bytes.
    pub const SIZE: usize = 8;

    /// Payload pointing at `child`.
    #[must_use]
    pub const fn new(child: NodeId) -> Self {
        Self {
            magic: INTERNAL_ENTRY_MAGIC,
            child,
        }
    }

    /// Serialize the payload to bytes.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.magic;
        buf[4..8].copy_from_slice(&self.child.to_be_bytes());
        buf
    }

    /// Read a payload starting at `offset`.
    #[must_use]
    pub fn read_at(bytes: &[u8], offset: usize) -> Option<Self> {
        let raw = bytes.get(offset..offset.checked_add(Self::SIZE)?)?;
        Some(Self {
            magic: raw[0],
            child: read_u32(raw, 4),
        })
    }
}

/// Size of an internal entry: payload plus trailer.
pub const INTERNAL_ENTRY_SIZE: usize = InternalPayload::SIZE + EntryTrailer::SIZE;

fn read_u16(raw: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([raw[at], raw[at + 1]])
}

fn read_u32(raw: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]])
}
