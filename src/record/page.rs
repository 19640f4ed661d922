//! Slotted data-page codec.
//!
//! Layout: `[used: u32][record_count: u32]` followed by the records in slot
//! order. Each record is `[b"Rec:"][flag: i32][rid.page: u32]
//! [rid.slot: u32][payload…]`. Tombstoned slots keep their header (so later
//! rids stay valid) but carry no payload, and their payload bytes do not
//! count toward `used`.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::errors::{DbError, DbResult};
use crate::paged_file::PAGE_SIZE;
use crate::record::schema::{self, Attribute, Rid};

pub const DATA_PAGE_HEADER_SIZE: usize = 8;
pub const RECORD_MARKER: &[u8; 4] = b"Rec:";
/// Marker + flag + rid.
pub const RECORD_HEADER_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFlag {
    Live,
    /// Reserved for records relocated to another page; never produced.
    Forwarded,
    Tombstone,
}

impl RecordFlag {
    fn from_i32(v: i32) -> DbResult<Self> {
        match v {
            0 => Ok(RecordFlag::Live),
            1 => Ok(RecordFlag::Forwarded),
            2 => Ok(RecordFlag::Tombstone),
            other => Err(DbError::Corrupt(format!("unknown record flag {other}"))),
        }
    }

    fn as_i32(self) -> i32 {
        match self {
            RecordFlag::Live => 0,
            RecordFlag::Forwarded => 1,
            RecordFlag::Tombstone => 2,
        }
    }
}

/// One slot of a data page.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub flag: RecordFlag,
    pub rid: Rid,
    pub payload: Vec<u8>,
}

impl StoredRecord {
    pub fn live(rid: Rid, payload: Vec<u8>) -> Self {
        Self {
            flag: RecordFlag::Live,
            rid,
            payload,
        }
    }

    pub fn tombstone(rid: Rid) -> Self {
        Self {
            flag: RecordFlag::Tombstone,
            rid,
            payload: Vec::new(),
        }
    }

    pub fn stored_size(&self) -> usize {
        RECORD_HEADER_SIZE + self.payload.len()
    }
}

/// A decoded data page: the slot list plus derived size accounting.
#[derive(Debug, Default)]
pub struct DataPage {
    pub records: Vec<StoredRecord>,
}

impl DataPage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes this page occupies when encoded: page header, every record
    /// header, and live payloads.
    pub fn used_size(&self) -> usize {
        DATA_PAGE_HEADER_SIZE + self.records.iter().map(StoredRecord::stored_size).sum::<usize>()
    }

    pub fn free_space(&self) -> usize {
        PAGE_SIZE.saturating_sub(self.used_size())
    }

    pub fn first_tombstone(&self) -> Option<usize> {
        self.records
            .iter()
            .position(|r| r.flag == RecordFlag::Tombstone)
    }

    /// Decode a raw page. The schema is needed to size each payload; the
    /// stored `used` count is cross-checked against the decoded slots.
    pub fn decode(schema: &[Attribute], buf: &[u8]) -> DbResult<Self> {
        let mut rdr = Cursor::new(buf);
        let used = rdr.read_u32::<LittleEndian>()? as usize;
        let count = rdr.read_u32::<LittleEndian>()? as usize;
        if DATA_PAGE_HEADER_SIZE + count * RECORD_HEADER_SIZE > PAGE_SIZE {
            return Err(DbError::Corrupt(format!(
                "record count {count} cannot fit on a page"
            )));
        }

        let mut records = Vec::with_capacity(count);
        let mut offset = DATA_PAGE_HEADER_SIZE;
        for slot in 0..count {
            if offset + RECORD_HEADER_SIZE > buf.len() {
                return Err(DbError::Corrupt(format!(
                    "record header for slot {slot} runs past the page"
                )));
            }
            if &buf[offset..offset + 4] != RECORD_MARKER {
                return Err(DbError::Corrupt(format!(
                    "bad record marker in slot {slot}"
                )));
            }
            let mut hdr = Cursor::new(&buf[offset + 4..offset + RECORD_HEADER_SIZE]);
            let flag = RecordFlag::from_i32(hdr.read_i32::<LittleEndian>()?)?;
            let rid = Rid::new(
                hdr.read_u32::<LittleEndian>()?,
                hdr.read_u32::<LittleEndian>()?,
            );
            offset += RECORD_HEADER_SIZE;

            let payload = match flag {
                RecordFlag::Live => {
                    let size = schema::record_size(schema, &buf[offset..])?;
                    let payload = buf[offset..offset + size].to_vec();
                    offset += size;
                    payload
                }
                RecordFlag::Forwarded | RecordFlag::Tombstone => Vec::new(),
            };
            records.push(StoredRecord { flag, rid, payload });
        }

        let page = Self { records };
        if page.used_size() != used {
            return Err(DbError::Corrupt(format!(
                "page size mismatch: header says {used}, decoded {}",
                page.used_size()
            )));
        }
        Ok(page)
    }

    /// Encode into a fresh page buffer.
    pub fn encode(&self) -> DbResult<Vec<u8>> {
        let used = self.used_size();
        if used > PAGE_SIZE {
            return Err(DbError::Corrupt(format!(
                "data page overflows: {used} > {PAGE_SIZE}"
            )));
        }

        let mut buf = Vec::with_capacity(PAGE_SIZE);
        buf.write_u32::<LittleEndian>(used as u32)?;
        buf.write_u32::<LittleEndian>(self.records.len() as u32)?;
        for record in &self.records {
            buf.extend_from_slice(RECORD_MARKER);
            buf.write_i32::<LittleEndian>(record.flag.as_i32())?;
            buf.write_u32::<LittleEndian>(record.rid.page)?;
            buf.write_u32::<LittleEndian>(record.rid.slot)?;
            buf.extend_from_slice(&record.payload);
        }
        buf.resize(PAGE_SIZE, 0);
        Ok(buf)
    }
}
