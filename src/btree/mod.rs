//! Disk-resident B+-tree index.
//!
//! Page 0 is the meta page; nodes carry their parent's page number so a
//! split can propagate upward without holding references, and every
//! operation is load → mutate → persist, so no stale in-memory state can
//! survive across calls.

mod iter;
pub mod key;
pub mod node;

use std::cmp::Ordering;
use std::path::Path;

use serde_json::json;

use crate::btree::key::IndexKey;
use crate::btree::node::{
    InternalEntry, InternalNode, LeafEntry, LeafNode, MetaPage, Node, LEAF_ENTRY_FIXED,
    LEAF_HEADER_SIZE, NO_PAGE,
};
use crate::errors::{DbError, DbResult};
use crate::paged_file::{PagedFile, PAGE_SIZE};
use crate::record::schema::{Attribute, AttrType, Rid};

pub use iter::RangeScan;

/// A handle to one index file, mapping keys of a single attribute to rids.
#[derive(Debug)]
pub struct BTree {
    file: PagedFile,
}

impl BTree {
    pub fn create<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Ok(Self {
            file: PagedFile::create(path)?,
        })
    }

    pub fn destroy<P: AsRef<Path>>(path: P) -> DbResult<()> {
        PagedFile::destroy(path)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Ok(Self {
            file: PagedFile::open(path)?,
        })
    }

    pub fn close(self) -> DbResult<()> {
        self.file.close()
    }

    /// True until the first insert allocates the meta page and root leaf.
    pub fn is_empty(&self) -> bool {
        self.file.page_count() == 0
    }

    /// `(reads, writes, appends)` of the underlying paged file.
    pub fn counters(&self) -> (u32, u32, u32) {
        self.file.counters()
    }

    /// Insert `(key, rid)`. Equal keys keep their arrival order; a leaf
    /// that would overflow splits before anything is persisted.
    pub fn insert(&mut self, attr: &Attribute, key: &[u8], rid: Rid) -> DbResult<()> {
        let key = IndexKey::from_external(attr.attr_type, key)?;
        if LEAF_HEADER_SIZE + key.encoded_len() + LEAF_ENTRY_FIXED > PAGE_SIZE {
            return Err(DbError::OutOfSpace(format!(
                "key of {} bytes cannot fit on an empty leaf",
                key.encoded_len()
            )));
        }
        let entry = LeafEntry {
            key,
            rid,
            deleted: false,
        };

        if self.file.page_count() == 0 {
            return self.init_tree(entry);
        }

        let (leaf_pn, mut leaf) = self.find_leaf(attr.attr_type, &entry.key)?;
        let at = leaf.upper_bound(&entry.key);
        leaf.entries.insert(at, entry);

        if leaf.used_size() <= PAGE_SIZE {
            return self.write_node_page(leaf_pn, &Node::Leaf(leaf));
        }
        self.split_leaf(attr.attr_type, leaf_pn, leaf)
    }

    /// Lazily delete the first live entry matching `(key, rid)` exactly.
    /// The slot stays in the leaf and is suppressed by scans.
    pub fn delete(&mut self, attr: &Attribute, key: &[u8], rid: Rid) -> DbResult<()> {
        if self.file.page_count() == 0 {
            return Err(DbError::NotFound("index is empty".into()));
        }
        let key = IndexKey::from_external(attr.attr_type, key)?;
        let (leaf_pn, mut leaf) = self.find_leaf(attr.attr_type, &key)?;

        let entry = leaf
            .entries
            .iter_mut()
            .find(|e| !e.deleted && e.rid == rid && e.key.cmp_key(&key) == Ordering::Equal)
            .ok_or_else(|| DbError::NotFound(format!("no live entry ({key}, {rid})")))?;
        entry.deleted = true;
        self.write_node_page(leaf_pn, &Node::Leaf(leaf))
    }

    /// Range scan between two optional bounds, either side inclusive or
    /// exclusive.
    pub fn scan(
        &mut self,
        attr: &Attribute,
        low: Option<&[u8]>,
        high: Option<&[u8]>,
        low_inclusive: bool,
        high_inclusive: bool,
    ) -> DbResult<RangeScan<'_>> {
        let attr_type = attr.attr_type;
        if self.file.page_count() == 0 {
            return Ok(RangeScan::empty(attr_type));
        }

        let low_key = low
            .map(|b| IndexKey::from_external(attr_type, b))
            .transpose()?;
        let high_key = high
            .map(|b| IndexKey::from_external(attr_type, b))
            .transpose()?;

        let (_, first_leaf) = match &low_key {
            None => self.begin_leaf(attr_type)?,
            Some(key) => self.find_leaf(attr_type, key)?,
        };

        Ok(RangeScan::new(
            &mut self.file,
            attr_type,
            first_leaf,
            low_key.map(|k| (k, low_inclusive)),
            high_key.map(|k| (k, high_inclusive)),
        ))
    }

    /// Pre-order JSON rendering of the tree: internal nodes list their
    /// separator keys then recurse into each child; leaves list every
    /// physical slot, dead entries as `"key:[deleted]"`.
    pub fn to_string(&mut self, attr: &Attribute) -> DbResult<String> {
        if self.file.page_count() == 0 {
            return Ok("{}".to_string());
        }
        let meta = self.read_meta()?;
        Ok(self.render_node(attr.attr_type, meta.root)?.to_string())
    }

    pub fn print(&mut self, attr: &Attribute) -> DbResult<()> {
        println!("{}", self.to_string(attr)?);
        Ok(())
    }

    fn init_tree(&mut self, entry: LeafEntry) -> DbResult<()> {
        let meta = MetaPage {
            root: 1,
            root_is_leaf: true,
        };
        self.file.append_page(&meta.encode()?)?;
        let root = LeafNode {
            parent: NO_PAGE,
            next: NO_PAGE,
            entries: vec![entry],
        };
        self.file.append_page(&root.encode()?)?;
        Ok(())
    }

    fn split_leaf(&mut self, attr_type: AttrType, leaf_pn: u32, mut leaf: LeafNode) -> DbResult<()> {
        // The first right-hand entry becomes the separator pushed up, so
        // the cut sits just below the midpoint: key ⌈n/2⌉ separates.
        let mid = ((leaf.entries.len() - 1) / 2).max(1);
        let right = LeafNode {
            parent: leaf.parent,
            next: leaf.next,
            entries: leaf.entries.split_off(mid),
        };

        let right_pn = self.file.append_page(&right.encode()?)?;
        leaf.next = right_pn;
        self.write_node_page(leaf_pn, &Node::Leaf(leaf.clone()))?;

        let separator = right.entries[0].key.clone();
        self.insert_to_parent(attr_type, leaf_pn, leaf.parent, separator, right_pn)
    }

    /// Hang `right_pn` next to `left_pn` under `parent_pn`, splitting
    /// upward as long as parents overflow. A `NO_PAGE` parent means
    /// `left_pn` was the root and a new internal root is minted.
    fn insert_to_parent(
        &mut self,
        attr_type: AttrType,
        left_pn: u32,
        parent_pn: u32,
        separator: IndexKey,
        right_pn: u32,
    ) -> DbResult<()> {
        if parent_pn == NO_PAGE {
            let root = InternalNode {
                parent: NO_PAGE,
                first_child: left_pn,
                entries: vec![InternalEntry {
                    key: separator,
                    child: right_pn,
                }],
            };
            let root_pn = self.file.append_page(&root.encode()?)?;
            self.write_meta(MetaPage {
                root: root_pn,
                root_is_leaf: false,
            })?;
            self.set_parent(attr_type, left_pn, root_pn)?;
            self.set_parent(attr_type, right_pn, root_pn)?;
            return Ok(());
        }

        let mut parent = self.read_internal(attr_type, parent_pn)?;
        parent.insert_after_child(left_pn, separator, right_pn)?;

        if parent.used_size() <= PAGE_SIZE {
            return self.write_node_page(parent_pn, &Node::Internal(parent));
        }

        // Split the parent: pop the middle separator, its child seeds the
        // right page's sentinel.
        let n = parent.entries.len();
        if n < 3 {
            return Err(DbError::OutOfSpace(
                "separator keys too large to split an internal page".into(),
            ));
        }
        let mut right_entries = parent.entries.split_off(n / 2);
        let promoted = right_entries.remove(0);
        let right = InternalNode {
            parent: parent.parent,
            first_child: promoted.child,
            entries: right_entries,
        };

        let new_pn = self.file.append_page(&right.encode()?)?;
        self.write_node_page(parent_pn, &Node::Internal(parent.clone()))?;
        // Children that moved still point at parent_pn on disk.
        for child in right.children() {
            self.set_parent(attr_type, child, new_pn)?;
        }

        self.insert_to_parent(attr_type, parent_pn, parent.parent, promoted.key, new_pn)
    }

    fn set_parent(&mut self, attr_type: AttrType, page_num: u32, parent: u32) -> DbResult<()> {
        let mut node = self.read_node(attr_type, page_num)?;
        node.set_parent(parent);
        self.write_node_page(page_num, &node)
    }

    /// Descend to the leaf that owns `key`: at each internal node, the
    /// child of the last separator `<= key`, else the sentinel child.
    fn find_leaf(&mut self, attr_type: AttrType, key: &IndexKey) -> DbResult<(u32, LeafNode)> {
        let meta = self.read_meta()?;
        let mut page_num = meta.root;
        loop {
            match self.read_node(attr_type, page_num)? {
                Node::Leaf(leaf) => return Ok((page_num, leaf)),
                Node::Internal(internal) => page_num = internal.child_for(key),
            }
        }
    }

    /// Descend via sentinel children to the leftmost leaf.
    fn begin_leaf(&mut self, attr_type: AttrType) -> DbResult<(u32, LeafNode)> {
        let meta = self.read_meta()?;
        let mut page_num = meta.root;
        loop {
            match self.read_node(attr_type, page_num)? {
                Node::Leaf(leaf) => return Ok((page_num, leaf)),
                Node::Internal(internal) => page_num = internal.first_child,
            }
        }
    }

    fn render_node(&mut self, attr_type: AttrType, page_num: u32) -> DbResult<serde_json::Value> {
        match self.read_node(attr_type, page_num)? {
            Node::Leaf(leaf) => {
                let keys: Vec<serde_json::Value> = leaf
                    .entries
                    .iter()
                    .map(|e| {
                        let text = if e.deleted {
                            format!("{}:[deleted]", e.key)
                        } else {
                            format!("{}:[{}]", e.key, e.rid)
                        };
                        serde_json::Value::String(text)
                    })
                    .collect();
                Ok(json!({ "keys": keys }))
            }
            Node::Internal(internal) => {
                let keys: Vec<serde_json::Value> = internal
                    .entries
                    .iter()
                    .map(|e| serde_json::Value::String(e.key.to_string()))
                    .collect();
                let mut children = Vec::with_capacity(internal.entries.len() + 1);
                for child in internal.children() {
                    children.push(self.render_node(attr_type, child)?);
                }
                Ok(json!({ "keys": keys, "children": children }))
            }
        }
    }

    fn read_meta(&mut self) -> DbResult<MetaPage> {
        let mut buf = vec![0u8; PAGE_SIZE];
        self.file.read_page(0, &mut buf)?;
        MetaPage::decode(&buf)
    }

    fn write_meta(&mut self, meta: MetaPage) -> DbResult<()> {
        self.file.write_page(0, &meta.encode()?)
    }

    fn read_node(&mut self, attr_type: AttrType, page_num: u32) -> DbResult<Node> {
        let mut buf = vec![0u8; PAGE_SIZE];
        self.file.read_page(page_num, &mut buf)?;
        Node::decode(attr_type, &buf)
    }

    fn read_internal(&mut self, attr_type: AttrType, page_num: u32) -> DbResult<InternalNode> {
        match self.read_node(attr_type, page_num)? {
            Node::Internal(node) => Ok(node),
            Node::Leaf(_) => Err(DbError::Corrupt(format!(
                "page {page_num} should be internal but is a leaf"
            ))),
        }
    }

    fn write_node_page(&mut self, page_num: u32, node: &Node) -> DbResult<()> {
        self.file.write_page(page_num, &node.encode()?)
    }
}
