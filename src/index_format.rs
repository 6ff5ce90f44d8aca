//! Binary index file format
//!
//! Serializes a Patricia trie to a versioned on-disk index and back.
//! Layout (all integers little-endian):
//!
//! ```text
//! [Header - 32 bytes]
//!     magic:      [u8; 8]   "IP2CCIDX"
//!     version:    u32       currently 1
//!     flags:      u32       bit0 = IPv4, bit1 = IPv6 (exactly one set)
//!     v4_offset:  u64       reserved, written as 0
//!     v6_offset:  u64       reserved, written as 0
//!
//! [Node stream - recursive pre-order, root first]
//!     edge_len:   u8        0xFF reserved as nil sentinel (never written)
//!     edge_bits:  ceil(edge_len / 8) bytes, big-endian bit order
//!     has_data:   u8
//!       country:  [u8; 2]   present when has_data != 0
//!       text_len: u16
//!       text:     UTF-8 bytes
//!     has_left:   u8
//!     has_right:  u8
//!     ... children follow, left subtree then right subtree
//!
//! [Trailer]
//!     count:      u32       stored record count, informational
//! ```
//!
//! Writers stream to a temp file and rename over the destination, so a
//! reader never sees a partial index. Reads go through `memmap2`.

use crate::error::Error;
use crate::prefix::Family;
use crate::trie::{PrefixRecord, Trie, TrieNode};
use memmap2::Mmap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Ref};

/// Magic bytes at the start of every index file
pub const INDEX_MAGIC: &[u8; 8] = b"IP2CCIDX";

/// Current index format version
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// Header flag: file contains an IPv4 trie
pub const FLAG_IPV4: u32 = 1;
/// Header flag: file contains an IPv6 trie
pub const FLAG_IPV6: u32 = 1 << 1;

/// Reserved nil marker for the edge-length byte. The v1 writer never emits
/// it; child presence is carried by the has_left/has_right flags.
const NIL_SENTINEL: u8 = 0xFF;

/// Index file header (32 bytes, little-endian)
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct IndexHeader {
    /// Magic bytes "IP2CCIDX"
    pub magic: [u8; 8],
    /// Format version
    pub version: U32,
    /// Family flags
    pub flags: U32,
    /// Reserved for a future combined-file layout
    pub v4_offset: U64,
    /// Reserved for a future combined-file layout
    pub v6_offset: U64,
}

fn family_flag(family: Family) -> u32 {
    match family {
        Family::V4 => FLAG_IPV4,
        Family::V6 => FLAG_IPV6,
    }
}

/// Serialize a trie to index-file bytes
pub fn serialize_index(trie: &Trie) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4096);

    let header = IndexHeader {
        magic: *INDEX_MAGIC,
        version: U32::new(INDEX_FORMAT_VERSION),
        flags: U32::new(family_flag(trie.family())),
        v4_offset: U64::new(0),
        v6_offset: U64::new(0),
    };
    buf.extend_from_slice(header.as_bytes());

    // Pre-order node stream: node, left subtree, right subtree.
    let mut stack: Vec<&TrieNode> = vec![&trie.root];
    while let Some(node) = stack.pop() {
        write_node(&mut buf, node);
        if let Some(right) = node.children[1].as_deref() {
            stack.push(right);
        }
        if let Some(left) = node.children[0].as_deref() {
            stack.push(left);
        }
    }

    buf.extend_from_slice(&trie.count.to_le_bytes());
    buf
}

fn write_node(buf: &mut Vec<u8>, node: &TrieNode) {
    buf.push(node.edge_len);

    let edge_bytes = (node.edge_len as usize).div_ceil(8);
    if node.edge.len() >= edge_bytes {
        buf.extend_from_slice(&node.edge[..edge_bytes]);
    } else {
        // Short edge buffers are padded with zeros.
        buf.extend_from_slice(&node.edge);
        buf.resize(buf.len() + edge_bytes - node.edge.len(), 0);
    }

    match &node.data {
        Some(record) => {
            buf.push(1);
            let mut cc = [0u8; 2];
            let raw = record.country_code.as_bytes();
            cc[..raw.len().min(2)].copy_from_slice(&raw[..raw.len().min(2)]);
            buf.extend_from_slice(&cc);

            let text = record.cidr_text.as_bytes();
            buf.extend_from_slice(&(text.len() as u16).to_le_bytes());
            buf.extend_from_slice(text);
        }
        None => buf.push(0),
    }

    buf.push(node.children[0].is_some() as u8);
    buf.push(node.children[1].is_some() as u8);
}

/// Deserialize index-file bytes into a trie of the requested family
pub fn deserialize_index(data: &[u8], family: Family) -> Result<Trie, Error> {
    let (header, rest) = Ref::<_, IndexHeader>::from_prefix(data)
        .map_err(|_| Error::TruncatedIndex("short header".to_string()))?;

    if header.magic != *INDEX_MAGIC {
        return Err(Error::BadMagic);
    }
    if header.version.get() != INDEX_FORMAT_VERSION {
        return Err(Error::UnsupportedVersion(header.version.get()));
    }
    if header.flags.get() != family_flag(family) {
        return Err(Error::FamilyMismatch);
    }

    let mut cursor = Cursor::new(rest);
    let root = read_tree(&mut cursor, family.max_bits())?;
    let count = cursor.read_u32()?;

    let mut trie = Trie::new(family);
    trie.root = root;
    trie.count = count;
    Ok(trie)
}

/// Write a trie to an index file atomically (temp file + rename)
pub fn save_index(path: &Path, trie: &Trie) -> Result<(), Error> {
    let bytes = serialize_index(trie);

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| Error::Io(format!("persist {}: {}", path.display(), e.error)))?;
    Ok(())
}

/// Load a trie from an index file via mmap
pub fn load_index(path: &Path, family: Family) -> Result<Trie, Error> {
    let file = File::open(path)
        .map_err(|e| Error::Io(format!("open {}: {}", path.display(), e)))?;
    if file.metadata()?.len() == 0 {
        return Err(Error::TruncatedIndex("empty index file".to_string()));
    }

    // Safety: index files are written atomically and never modified in
    // place afterwards; snapshots are immutable once built.
    let mmap = unsafe { Mmap::map(&file) }
        .map_err(|e| Error::Io(format!("mmap {}: {}", path.display(), e)))?;

    deserialize_index(&mmap[..], family)
}

/// Sequential reader over the node stream
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Cursor { data, pos: 0 }
    }

    fn read_u8(&mut self) -> Result<u8, Error> {
        let b = self
            .data
            .get(self.pos)
            .copied()
            .ok_or_else(|| Error::TruncatedIndex(format!("unexpected end at byte {}", self.pos)))?;
        self.pos += 1;
        Ok(b)
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], Error> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.data.len());
        let end =
            end.ok_or_else(|| Error::TruncatedIndex(format!("unexpected end at byte {}", self.pos)))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16, Error> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, Error> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// One decoded node plus its child-presence flags
struct RawNode {
    node: Box<TrieNode>,
    need: [bool; 2],
}

/// Decode frame for the iterative tree reader
struct Frame {
    node: Box<TrieNode>,
    need: [bool; 2],
    /// Next child slot to examine (0 = left, 1 = right, 2 = done)
    next: usize,
    /// Slot the in-flight child attaches to
    pending: usize,
}

impl Frame {
    fn new(raw: RawNode) -> Self {
        Frame {
            node: raw.node,
            need: raw.need,
            next: 0,
            pending: 0,
        }
    }
}

/// Read the pre-order node stream back into a tree.
///
/// Iterative so a hostile or deeply chained file cannot overflow the call
/// stack.
fn read_tree(cursor: &mut Cursor<'_>, max_bits: u8) -> Result<Box<TrieNode>, Error> {
    let first = read_node(cursor, max_bits)?;
    let mut stack = vec![Frame::new(first)];
    let mut root = None;

    while let Some(top) = stack.last_mut() {
        let mut descend = false;
        while top.next < 2 {
            let slot = top.next;
            top.next += 1;
            if top.need[slot] {
                top.pending = slot;
                descend = true;
                break;
            }
        }

        if descend {
            let child = read_node(cursor, max_bits)?;
            stack.push(Frame::new(child));
            continue;
        }

        if let Some(done) = stack.pop() {
            match stack.last_mut() {
                Some(parent) => parent.node.children[parent.pending] = Some(done.node),
                None => root = Some(done.node),
            }
        }
    }

    root.ok_or_else(|| Error::TruncatedIndex("empty node stream".to_string()))
}

fn read_node(cursor: &mut Cursor<'_>, max_bits: u8) -> Result<RawNode, Error> {
    let edge_len = cursor.read_u8()?;
    if edge_len == NIL_SENTINEL {
        return Err(Error::TruncatedIndex(
            "nil sentinel where node expected".to_string(),
        ));
    }
    if edge_len > max_bits {
        return Err(Error::TruncatedIndex(format!(
            "edge length {} exceeds {} bits",
            edge_len, max_bits
        )));
    }

    let edge = cursor.read_bytes((edge_len as usize).div_ceil(8))?.to_vec();
    let mut node = Box::new(TrieNode::new(edge, edge_len));

    if cursor.read_u8()? != 0 {
        let cc = cursor.read_bytes(2)?;
        let country_code = std::str::from_utf8(cc)
            .map_err(|_| Error::TruncatedIndex("country code is not UTF-8".to_string()))?
            .to_string();

        let text_len = cursor.read_u16()? as usize;
        let text = cursor.read_bytes(text_len)?;
        let cidr_text = std::str::from_utf8(text)
            .map_err(|_| Error::TruncatedIndex("cidr text is not UTF-8".to_string()))?
            .to_string();

        node.data = Some(PrefixRecord {
            country_code,
            cidr_text,
        });
    }

    let has_left = cursor.read_u8()? != 0;
    let has_right = cursor.read_u8()? != 0;

    Ok(RawNode {
        node,
        need: [has_left, has_right],
    })
}
