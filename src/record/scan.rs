//! Filtered, projecting scan over a record file.

use crate::errors::{DbError, DbResult};
use crate::paged_file::{PagedFile, PAGE_SIZE};
use crate::record::page::{DataPage, RecordFlag};
use crate::record::schema::{
    attr_index, field_slices, Attribute, CompOp, Projection, Rid, Value,
};

/// Forward-only iterator over the live records matching a predicate.
///
/// One page is resident at a time; each match is projected and reassembled
/// with a fresh null indicator before being yielded. Exhaustion is `None`,
/// never an error.
pub struct RecordScan<'a> {
    file: &'a mut PagedFile,
    schema: &'a [Attribute],
    cond: Option<(usize, CompOp, Value)>,
    projection: Projection,
    page: Option<DataPage>,
    page_num: u32,
    slot: usize,
    done: bool,
}

impl<'a> RecordScan<'a> {
    pub(crate) fn new(
        file: &'a mut PagedFile,
        schema: &'a [Attribute],
        cond_attr: Option<&str>,
        op: CompOp,
        value: Option<&[u8]>,
        projection: Projection,
    ) -> DbResult<Self> {
        // Surface unknown projection attributes before the first page load.
        projection.resolve(schema)?;

        let cond = if op == CompOp::No {
            None
        } else {
            let name = cond_attr.ok_or_else(|| {
                DbError::BadArgument("comparison requires a condition attribute".into())
            })?;
            let raw = value.ok_or_else(|| {
                DbError::BadArgument("comparison requires a condition value".into())
            })?;
            let idx = attr_index(schema, name)?;
            let typed = Value::decode(schema[idx].attr_type, raw)?;
            Some((idx, op, typed))
        };

        Ok(Self {
            file,
            schema,
            cond,
            projection,
            page: None,
            page_num: 0,
            slot: 0,
            done: false,
        })
    }

    pub fn close(self) {}

    fn matches(&self, payload: &[u8]) -> DbResult<bool> {
        let Some((idx, op, target)) = &self.cond else {
            return Ok(true);
        };
        let fields = field_slices(self.schema, payload)?;
        match fields[*idx] {
            // A NULL condition attribute satisfies no comparison.
            None => Ok(false),
            Some(slice) => {
                let value = Value::decode(self.schema[*idx].attr_type, slice)?;
                Ok(op.matches(value.total_cmp(target)))
            }
        }
    }

    fn step(&mut self) -> DbResult<Option<(Rid, Vec<u8>)>> {
        loop {
            if self.page.is_none() {
                if self.page_num >= self.file.page_count() {
                    return Ok(None);
                }
                let mut buf = vec![0u8; PAGE_SIZE];
                self.file.read_page(self.page_num, &mut buf)?;
                self.page = Some(DataPage::decode(self.schema, &buf)?);
                self.slot = 0;
            }

            let page = self.page.as_ref().expect("page loaded above");
            while self.slot < page.records.len() {
                let record = &page.records[self.slot];
                self.slot += 1;
                if record.flag != RecordFlag::Live {
                    continue;
                }
                if !self.matches(&record.payload)? {
                    continue;
                }
                let out = self.projection.apply(self.schema, &record.payload)?;
                return Ok(Some((record.rid, out)));
            }

            self.page = None;
            self.page_num += 1;
        }
    }
}

impl Iterator for RecordScan<'_> {
    type Item = DbResult<(Rid, Vec<u8>)>;

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
