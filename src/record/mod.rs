//! Slotted record storage over a paged file.

pub mod page;
pub mod scan;
pub mod schema;

use std::path::Path;

use crate::errors::{DbError, DbResult};
use crate::paged_file::{PagedFile, PAGE_SIZE};
use crate::record::page::{DataPage, StoredRecord, DATA_PAGE_HEADER_SIZE, RECORD_HEADER_SIZE};
use crate::record::scan::RecordScan;
use crate::record::schema::{
    attr_index, decode_record, field_slices, record_size, Attribute, CompOp, Projection, Rid,
};

pub use crate::record::page::RecordFlag;

/// A handle to one file of slotted data pages.
///
/// Records enter and leave in external form (null bitmap + values in
/// schema order); the store never interprets values beyond sizing them.
#[derive(Debug)]
pub struct RecordStore {
    file: PagedFile,
}

impl RecordStore {
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

    pub fn page_count(&self) -> u32 {
        self.file.page_count()
    }

    /// `(reads, writes, appends)` of the underlying paged file.
    pub fn counters(&self) -> (u32, u32, u32) {
        self.file.counters()
    }

    /// Insert a record and return its rid. The last page is tried first,
    /// then earlier pages in order, then a fresh page is appended. Within
    /// a page the first tombstoned slot that still fits is reissued.
    pub fn insert(&mut self, schema: &[Attribute], data: &[u8]) -> DbResult<Rid> {
        let size = record_size(schema, data)?;
        if DATA_PAGE_HEADER_SIZE + RECORD_HEADER_SIZE + size > PAGE_SIZE {
            return Err(DbError::OutOfSpace(format!(
                "record of {size} bytes cannot fit on an empty page"
            )));
        }
        let payload = &data[..size];

        let page_count = self.file.page_count();
        if page_count > 0 {
            let last = page_count - 1;
            if let Some(rid) = self.try_insert_into(schema, last, payload)? {
                return Ok(rid);
            }
            for page_num in 0..last {
                if let Some(rid) = self.try_insert_into(schema, page_num, payload)? {
                    return Ok(rid);
                }
            }
        }

        let rid = Rid::new(page_count, 0);
        let mut page = DataPage::new();
        page.records.push(StoredRecord::live(rid, payload.to_vec()));
        self.file.append_page(&page.encode()?)?;
        Ok(rid)
    }

    fn try_insert_into(
        &mut self,
        schema: &[Attribute],
        page_num: u32,
        payload: &[u8],
    ) -> DbResult<Option<Rid>> {
        let mut page = self.load_page(schema, page_num)?;

        let rid = if let Some(slot) = page.first_tombstone() {
            // The tombstone's header is already accounted for.
            if page.used_size() + payload.len() > PAGE_SIZE {
                return Ok(None);
            }
            let rid = Rid::new(page_num, slot as u32);
            page.records[slot] = StoredRecord::live(rid, payload.to_vec());
            rid
        } else {
            if page.used_size() + RECORD_HEADER_SIZE + payload.len() > PAGE_SIZE {
                return Ok(None);
            }
            let rid = Rid::new(page_num, page.records.len() as u32);
            page.records.push(StoredRecord::live(rid, payload.to_vec()));
            rid
        };

        self.file.write_page(page_num, &page.encode()?)?;
        Ok(Some(rid))
    }

    /// Copy a live record's external form out of the store.
    pub fn read(&mut self, schema: &[Attribute], rid: Rid) -> DbResult<Vec<u8>> {
        let page = self.load_page(schema, rid.page)?;
        let record = page
            .records
            .get(rid.slot as usize)
            .ok_or_else(|| DbError::NotFound(format!("no slot {rid}")))?;
        match record.flag {
            RecordFlag::Live => Ok(record.payload.clone()),
            RecordFlag::Forwarded | RecordFlag::Tombstone => {
                Err(DbError::NotFound(format!("record {rid} is gone")))
            }
        }
    }

    /// Tombstone a record in place. The slot index survives so later rids
    /// on this page stay valid, and a later insert may reissue it.
    pub fn delete(&mut self, schema: &[Attribute], rid: Rid) -> DbResult<()> {
        let mut page = self.load_page(schema, rid.page)?;
        let record = page
            .records
            .get_mut(rid.slot as usize)
            .ok_or_else(|| DbError::NotFound(format!("no slot {rid}")))?;
        if record.flag != RecordFlag::Live {
            return Err(DbError::NotFound(format!("record {rid} is gone")));
        }
        *record = StoredRecord::tombstone(rid);
        self.file.write_page(rid.page, &page.encode()?)?;
        Ok(())
    }

    /// Rewrite a record. In place when the page still fits; otherwise the
    /// old slot is tombstoned and the record moves, so callers must adopt
    /// the returned rid.
    pub fn update(&mut self, schema: &[Attribute], data: &[u8], rid: Rid) -> DbResult<Rid> {
        let size = record_size(schema, data)?;
        if DATA_PAGE_HEADER_SIZE + RECORD_HEADER_SIZE + size > PAGE_SIZE {
            return Err(DbError::OutOfSpace(format!(
                "record of {size} bytes cannot fit on an empty page"
            )));
        }

        let mut page = self.load_page(schema, rid.page)?;
        let record = page
            .records
            .get_mut(rid.slot as usize)
            .ok_or_else(|| DbError::NotFound(format!("no slot {rid}")))?;
        if record.flag != RecordFlag::Live {
            return Err(DbError::NotFound(format!("record {rid} is gone")));
        }

        let grown = size as isize - record.payload.len() as isize;
        if page.used_size() as isize + grown <= PAGE_SIZE as isize {
            page.records[rid.slot as usize] = StoredRecord::live(rid, data[..size].to_vec());
            self.file.write_page(rid.page, &page.encode()?)?;
            return Ok(rid);
        }

        page.records[rid.slot as usize] = StoredRecord::tombstone(rid);
        self.file.write_page(rid.page, &page.encode()?)?;
        self.insert(schema, data)
    }

    /// Read one attribute of a record: a 1-byte null indicator followed by
    /// the encoded value.
    pub fn read_attribute(
        &mut self,
        schema: &[Attribute],
        rid: Rid,
        name: &str,
    ) -> DbResult<Vec<u8>> {
        let idx = attr_index(schema, name)?;
        let data = self.read(schema, rid)?;
        let fields = field_slices(schema, &data)?;
        match fields[idx] {
            Some(slice) => {
                let mut out = vec![0u8];
                out.extend_from_slice(slice);
                Ok(out)
            }
            None => Ok(vec![0x80]),
        }
    }

    /// Lazy forward scan over live records matching `attr op value`,
    /// yielding each match through `projection`. `CompOp::No` matches
    /// everything and ignores the condition arguments.
    pub fn scan<'a>(
        &'a mut self,
        schema: &'a [Attribute],
        cond_attr: Option<&str>,
        op: CompOp,
        value: Option<&[u8]>,
        projection: Projection,
    ) -> DbResult<RecordScan<'a>> {
        RecordScan::new(&mut self.file, schema, cond_attr, op, value, projection)
    }

    /// Render a record as a single-line JSON object in schema order.
    pub fn print_record(schema: &[Attribute], data: &[u8]) -> DbResult<String> {
        let values = decode_record(schema, data)?;
        let mut map = serde_json::Map::new();
        for (attr, value) in schema.iter().zip(values) {
            let json = match value {
                Some(v) => v.to_json(),
                None => serde_json::Value::Null,
            };
            map.insert(attr.name.clone(), json);
        }
        Ok(serde_json::Value::Object(map).to_string())
    }

    fn load_page(&mut self, schema: &[Attribute], page_num: u32) -> DbResult<DataPage> {
        let mut buf = vec![0u8; PAGE_SIZE];
        self.file.read_page(page_num, &mut buf)?;
        DataPage::decode(schema, &buf)
    }
}
