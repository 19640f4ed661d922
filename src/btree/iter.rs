//! Forward range scan over the leaf chain.

use std::collections::VecDeque;

use crate::btree::key::IndexKey;
use crate::btree::node::{LeafEntry, LeafNode, NO_PAGE};
use crate::errors::{DbError, DbResult};
use crate::paged_file::{PagedFile, PAGE_SIZE};
use crate::record::schema::{AttrType, Rid};

/// Ordered iterator over `(key, rid)` pairs between two optional bounds.
///
/// The current leaf's entries sit in a queue; when it drains, the next
/// leaf is pulled in through the `next` pointer. Tombstoned entries are
/// skipped, and the high bound ends the scan before the chain does.
/// Exhaustion is `None`, never an error.
pub struct RangeScan<'a> {
    file: Option<&'a mut PagedFile>,
    attr_type: AttrType,
    high: Option<IndexKey>,
    high_inclusive: bool,
    queue: VecDeque<LeafEntry>,
    next_leaf: u32,
    done: bool,
}

impl<'a> RangeScan<'a> {
    /// A scan over an index with no pages yet.
    pub(crate) fn empty(attr_type: AttrType) -> Self {
        Self {
            file: None,
            attr_type,
            high: None,
            high_inclusive: false,
            queue: VecDeque::new(),
            next_leaf: NO_PAGE,
            done: true,
        }
    }

    pub(crate) fn new(
        file: &'a mut PagedFile,
        attr_type: AttrType,
        first_leaf: LeafNode,
        low: Option<(IndexKey, bool)>,
        high: Option<(IndexKey, bool)>,
    ) -> Self {
        let mut queue: VecDeque<LeafEntry> = first_leaf.entries.into();
        // Only the first leaf needs trimming against the low bound; later
        // leaves hold strictly greater positions and are taken whole.
        if let Some((low_key, inclusive)) = low {
            queue.retain(|e| match e.key.cmp_key(&low_key) {
                std::cmp::Ordering::Less => false,
                std::cmp::Ordering::Equal => inclusive,
                std::cmp::Ordering::Greater => true,
            });
        }
        let (high, high_inclusive) = match high {
            Some((key, inclusive)) => (Some(key), inclusive),
            None => (None, false),
        };

        Self {
            file: Some(file),
            attr_type,
            high,
            high_inclusive,
            queue,
            next_leaf: first_leaf.next,
            done: false,
        }
    }

    pub fn close(self) {}

    fn step(&mut self) -> DbResult<Option<(Vec<u8>, Rid)>> {
        loop {
            while self.queue.front().is_some_and(|e| e.deleted) {
                self.queue.pop_front();
            }

            if self.queue.is_empty() {
                if self.next_leaf == NO_PAGE {
                    return Ok(None);
                }
                let file = self
                    .file
                    .as_deref_mut()
                    .ok_or_else(|| DbError::Corrupt("range scan has no backing file".into()))?;
                let mut buf = vec![0u8; PAGE_SIZE];
                file.read_page(self.next_leaf, &mut buf)?;
                let leaf = LeafNode::decode(self.attr_type, &buf)?;
                self.queue = leaf.entries.into();
                self.next_leaf = leaf.next;
                continue;
            }

            let head = self.queue.front().expect("queue checked non-empty");
            if let Some(high) = &self.high {
                let ord = head.key.cmp_key(high);
                let beyond = if self.high_inclusive {
                    ord == std::cmp::Ordering::Greater
                } else {
                    ord != std::cmp::Ordering::Less
                };
                if beyond {
                    return Ok(None);
                }
            }

            let entry = self.queue.pop_front().expect("queue checked non-empty");
            return Ok(Some((entry.key.to_bytes()?, entry.rid)));
        }
    }
}

impl Iterator for RangeScan<'_> {
    type Item = DbResult<(Vec<u8>, Rid)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
