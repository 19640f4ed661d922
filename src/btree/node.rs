//! On-disk node formats of the B+-tree.
//!
//! Page 0 of an index file is the meta page; every other page is a node
//! and starts with an `is_leaf: i32` discriminant. The leftmost entry of
//! an internal page is a sentinel (4 zero key bytes, child pointer only)
//! routing keys below the first separator; in memory it is held as
//! `first_child` so search code can never compare against it.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::btree::key::IndexKey;
use crate::errors::{DbError, DbResult};
use crate::paged_file::PAGE_SIZE;
use crate::record::schema::{AttrType, Rid};

pub const META_TAG: &[u8; 12] = b"META_PAGE:  ";
pub const META_END_TAG: &[u8; 13] = b"META_PAGE_END";

/// Page 0 never holds a node, so 0 doubles as "no page" for parent and
/// next-leaf pointers.
pub const NO_PAGE: u32 = 0;

const IS_LEAF_FALSE: i32 = 0;
const IS_LEAF_TRUE: i32 = 1;

pub(crate) const INTERNAL_HEADER_SIZE: usize = 12;
pub(crate) const SENTINEL_SIZE: usize = 8;
pub(crate) const LEAF_HEADER_SIZE: usize = 16;
/// rid.page + rid.slot + deleted flag.
pub(crate) const LEAF_ENTRY_FIXED: usize = 12;

/// Meta page: root page number and whether the root is a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaPage {
    pub root: u32,
    pub root_is_leaf: bool,
}

impl MetaPage {
    pub fn encode(&self) -> DbResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(PAGE_SIZE);
        buf.extend_from_slice(META_TAG);
        buf.write_u32::<LittleEndian>(self.root)?;
        buf.write_i32::<LittleEndian>(if self.root_is_leaf { 1 } else { 0 })?;
        buf.extend_from_slice(META_END_TAG);
        buf.resize(PAGE_SIZE, 0);
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> DbResult<Self> {
        if buf.len() < META_TAG.len() + 8 + META_END_TAG.len() {
            return Err(DbError::Corrupt("meta page too short".into()));
        }
        if &buf[..META_TAG.len()] != META_TAG {
            return Err(DbError::Corrupt("bad meta page tag".into()));
        }
        let mut rdr = Cursor::new(&buf[META_TAG.len()..]);
        let root = rdr.read_u32::<LittleEndian>()?;
        let root_is_leaf = rdr.read_i32::<LittleEndian>()? != 0;
        let end_start = META_TAG.len() + 8;
        if &buf[end_start..end_start + META_END_TAG.len()] != META_END_TAG {
            return Err(DbError::Corrupt("bad meta page end tag".into()));
        }
        Ok(Self { root, root_is_leaf })
    }
}

/// A separator of an internal node: keys `>= key` (up to the next
/// separator) route to `child`.
#[derive(Debug, Clone)]
pub struct InternalEntry {
    pub key: IndexKey,
    pub child: u32,
}

#[derive(Debug, Clone)]
pub struct InternalNode {
    pub parent: u32,
    /// Sentinel child: routes keys below the first separator.
    pub first_child: u32,
    pub entries: Vec<InternalEntry>,
}

impl InternalNode {
    pub fn used_size(&self) -> usize {
        INTERNAL_HEADER_SIZE
            + SENTINEL_SIZE
            + self
                .entries
                .iter()
                .map(|e| e.key.encoded_len() + 4)
                .sum::<usize>()
    }

    /// Route `key`: the child of the last separator `<= key`, or the
    /// sentinel child when every separator is greater.
    pub fn child_for(&self, key: &IndexKey) -> u32 {
        let mut child = self.first_child;
        for entry in &self.entries {
            if entry.key.cmp_key(key) != std::cmp::Ordering::Greater {
                child = entry.child;
            } else {
                break;
            }
        }
        child
    }

    /// Every child page in order: sentinel first, then one per separator.
    pub fn children(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.entries.len() + 1);
        out.push(self.first_child);
        out.extend(self.entries.iter().map(|e| e.child));
        out
    }

    /// Insert `(key, child)` immediately after the entry pointing at
    /// `after_child`. Fails when `after_child` is not among the children,
    /// which means the parent pointer stored in a child was stale.
    pub fn insert_after_child(
        &mut self,
        after_child: u32,
        key: IndexKey,
        child: u32,
    ) -> DbResult<()> {
        let at = if after_child == self.first_child {
            0
        } else {
            self.entries
                .iter()
                .position(|e| e.child == after_child)
                .map(|i| i + 1)
                .ok_or_else(|| {
                    DbError::Corrupt(format!(
                        "page {after_child} is not a child of its recorded parent"
                    ))
                })?
        };
        self.entries.insert(at, InternalEntry { key, child });
        Ok(())
    }

    pub fn encode(&self) -> DbResult<Vec<u8>> {
        if self.used_size() > PAGE_SIZE {
            return Err(DbError::Corrupt(format!(
                "internal node overflows: {} > {PAGE_SIZE}",
                self.used_size()
            )));
        }
        let mut buf = Vec::with_capacity(PAGE_SIZE);
        buf.write_i32::<LittleEndian>(IS_LEAF_FALSE)?;
        buf.write_u32::<LittleEndian>(self.parent)?;
        buf.write_u32::<LittleEndian>(self.entries.len() as u32 + 1)?;
        // Sentinel entry: 4 zero key bytes regardless of key type.
        buf.extend_from_slice(&[0u8; 4]);
        buf.write_u32::<LittleEndian>(self.first_child)?;
        for entry in &self.entries {
            entry.key.value().encode(&mut buf)?;
            buf.write_u32::<LittleEndian>(entry.child)?;
        }
        buf.resize(PAGE_SIZE, 0);
        Ok(buf)
    }

    pub fn decode(attr_type: AttrType, buf: &[u8]) -> DbResult<Self> {
        let mut rdr = Cursor::new(buf);
        let is_leaf = rdr.read_i32::<LittleEndian>()?;
        if is_leaf != IS_LEAF_FALSE {
            return Err(DbError::Corrupt(format!(
                "expected internal page, found is_leaf={is_leaf}"
            )));
        }
        let parent = rdr.read_u32::<LittleEndian>()?;
        let count = rdr.read_u32::<LittleEndian>()? as usize;
        if count < 2 {
            return Err(DbError::Corrupt(format!(
                "internal page with {count} entries"
            )));
        }
        if INTERNAL_HEADER_SIZE + count * SENTINEL_SIZE > PAGE_SIZE {
            return Err(DbError::Corrupt(format!(
                "entry count {count} cannot fit on an internal page"
            )));
        }

        let mut offset = INTERNAL_HEADER_SIZE;
        if offset + SENTINEL_SIZE > buf.len() {
            return Err(DbError::Corrupt("internal page truncated".into()));
        }
        if buf[offset..offset + 4] != [0u8; 4] {
            return Err(DbError::Corrupt("sentinel entry has a key".into()));
        }
        let mut rdr = Cursor::new(&buf[offset + 4..offset + 8]);
        let first_child = rdr.read_u32::<LittleEndian>()?;
        offset += SENTINEL_SIZE;

        let mut entries = Vec::with_capacity(count - 1);
        for _ in 1..count {
            let (key, consumed) = IndexKey::decode_from(attr_type, &buf[offset..])?;
            offset += consumed;
            if offset + 4 > buf.len() {
                return Err(DbError::Corrupt("internal page truncated".into()));
            }
            let mut rdr = Cursor::new(&buf[offset..offset + 4]);
            let child = rdr.read_u32::<LittleEndian>()?;
            offset += 4;
            entries.push(InternalEntry { key, child });
        }

        Ok(Self {
            parent,
            first_child,
            entries,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LeafEntry {
    pub key: IndexKey,
    pub rid: Rid,
    pub deleted: bool,
}

#[derive(Debug, Clone)]
pub struct LeafNode {
    pub parent: u32,
    /// Next leaf in key order; `NO_PAGE` for the rightmost leaf.
    pub next: u32,
    pub entries: Vec<LeafEntry>,
}

impl LeafNode {
    pub fn used_size(&self) -> usize {
        LEAF_HEADER_SIZE
            + self
                .entries
                .iter()
                .map(|e| e.key.encoded_len() + LEAF_ENTRY_FIXED)
                .sum::<usize>()
    }

    /// First index whose key is strictly greater than `key`: inserting
    /// there keeps equal keys in arrival order.
    pub fn upper_bound(&self, key: &IndexKey) -> usize {
        self.entries
            .iter()
            .position(|e| e.key.cmp_key(key) == std::cmp::Ordering::Greater)
            .unwrap_or(self.entries.len())
    }

    pub fn encode(&self) -> DbResult<Vec<u8>> {
        if self.used_size() > PAGE_SIZE {
            return Err(DbError::Corrupt(format!(
                "leaf node overflows: {} > {PAGE_SIZE}",
                self.used_size()
            )));
        }
        let mut buf = Vec::with_capacity(PAGE_SIZE);
        buf.write_i32::<LittleEndian>(IS_LEAF_TRUE)?;
        buf.write_u32::<LittleEndian>(self.parent)?;
        buf.write_u32::<LittleEndian>(self.next)?;
        buf.write_u32::<LittleEndian>(self.entries.len() as u32)?;
        for entry in &self.entries {
            entry.key.value().encode(&mut buf)?;
            buf.write_u32::<LittleEndian>(entry.rid.page)?;
            buf.write_u32::<LittleEndian>(entry.rid.slot)?;
            buf.write_i32::<LittleEndian>(if entry.deleted { 1 } else { 0 })?;
        }
        buf.resize(PAGE_SIZE, 0);
        Ok(buf)
    }

    pub fn decode(attr_type: AttrType, buf: &[u8]) -> DbResult<Self> {
        let mut rdr = Cursor::new(buf);
        let is_leaf = rdr.read_i32::<LittleEndian>()?;
        if is_leaf != IS_LEAF_TRUE {
            return Err(DbError::Corrupt(format!(
                "expected leaf page, found is_leaf={is_leaf}"
            )));
        }
        let parent = rdr.read_u32::<LittleEndian>()?;
        let next = rdr.read_u32::<LittleEndian>()?;
        let count = rdr.read_u32::<LittleEndian>()? as usize;
        if LEAF_HEADER_SIZE + count * (4 + LEAF_ENTRY_FIXED) > PAGE_SIZE {
            return Err(DbError::Corrupt(format!(
                "entry count {count} cannot fit on a leaf page"
            )));
        }

        let mut offset = LEAF_HEADER_SIZE;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let (key, consumed) = IndexKey::decode_from(attr_type, &buf[offset..])?;
            offset += consumed;
            if offset + LEAF_ENTRY_FIXED > buf.len() {
                return Err(DbError::Corrupt("leaf page truncated".into()));
            }
            let mut rdr = Cursor::new(&buf[offset..offset + LEAF_ENTRY_FIXED]);
            let rid = Rid::new(
                rdr.read_u32::<LittleEndian>()?,
                rdr.read_u32::<LittleEndian>()?,
            );
            let deleted = rdr.read_i32::<LittleEndian>()? != 0;
            offset += LEAF_ENTRY_FIXED;
            entries.push(LeafEntry { key, rid, deleted });
        }

        Ok(Self {
            parent,
            next,
            entries,
        })
    }
}

/// A decoded node page.
#[derive(Debug, Clone)]
pub enum Node {
    Internal(InternalNode),
    Leaf(LeafNode),
}

impl Node {
    pub fn decode(attr_type: AttrType, buf: &[u8]) -> DbResult<Self> {
        let mut rdr = Cursor::new(buf);
        match rdr.read_i32::<LittleEndian>()? {
            IS_LEAF_FALSE => Ok(Node::Internal(InternalNode::decode(attr_type, buf)?)),
            IS_LEAF_TRUE => Ok(Node::Leaf(LeafNode::decode(attr_type, buf)?)),
            other => Err(DbError::Corrupt(format!(
                "unknown node discriminant {other}"
            ))),
        }
    }

    pub fn encode(&self) -> DbResult<Vec<u8>> {
        match self {
            Node::Internal(node) => node.encode(),
            Node::Leaf(node) => node.encode(),
        }
    }

    pub fn parent(&self) -> u32 {
        match self {
            Node::Internal(node) => node.parent,
            Node::Leaf(node) => node.parent,
        }
    }

    pub fn set_parent(&mut self, parent: u32) {
        match self {
            Node::Internal(node) => node.parent = parent,
            Node::Leaf(node) => node.parent = parent,
        }
    }
}
