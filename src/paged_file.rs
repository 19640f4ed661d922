use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::errors::{DbError, DbResult};

/// Every page in a file is exactly this many bytes.
pub const PAGE_SIZE: usize = 4096;

const FILE_HEADER_LEN: usize = 5;
/// The fixed header preceding the page array: five little-endian `u32`s
/// `(reads, writes, appends, page_count, dir_count)`.
pub const FILE_HEADER_SIZE: usize = FILE_HEADER_LEN * 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct FileHeader {
    reads: u32,
    writes: u32,
    appends: u32,
    page_count: u32,
    dir_count: u32,
}

impl FileHeader {
    fn pack(&self) -> DbResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(FILE_HEADER_SIZE);
        buf.write_u32::<LittleEndian>(self.reads)?;
        buf.write_u32::<LittleEndian>(self.writes)?;
        buf.write_u32::<LittleEndian>(self.appends)?;
        buf.write_u32::<LittleEndian>(self.page_count)?;
        buf.write_u32::<LittleEndian>(self.dir_count)?;
        Ok(buf)
    }

    fn unpack(buf: &[u8]) -> DbResult<Self> {
        if buf.len() < FILE_HEADER_SIZE {
            return Err(DbError::Corrupt(format!(
                "file header too short: {} bytes",
                buf.len()
            )));
        }
        let mut rdr = std::io::Cursor::new(buf);
        Ok(Self {
            reads: rdr.read_u32::<LittleEndian>()?,
            writes: rdr.read_u32::<LittleEndian>()?,
            appends: rdr.read_u32::<LittleEndian>()?,
            page_count: rdr.read_u32::<LittleEndian>()?,
            dir_count: rdr.read_u32::<LittleEndian>()?,
        })
    }
}

/// A handle to a single file of fixed-size pages.
///
/// The handle owns the descriptor; read/write/append counters live in the
/// header and are flushed on every page allocation and on close. All page
/// I/O uses absolute positioning, the file position is never assumed.
#[derive(Debug)]
pub struct PagedFile {
    path: PathBuf,
    file: File,
    header: FileHeader,
}

impl PagedFile {
    /// Create a fresh paged file with zero pages. Fails if `path` exists.
    pub fn create<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            return Err(DbError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("file already exists: {path:?}"),
            )));
        }

        let mut file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let header = FileHeader::default();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header.pack()?)?;
        file.sync_all()?;

        Ok(Self { path, file, header })
    }

    /// Remove the backing file.
    pub fn destroy<P: AsRef<Path>>(path: P) -> DbResult<()> {
        std::fs::remove_file(path)?;
        Ok(())
    }

    /// Open an existing paged file. Fails if `path` is missing, loads the
    /// persisted counters from the header.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(DbError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("file not found: {path:?}"),
            )));
        }

        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut raw = [0u8; FILE_HEADER_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut raw)
            .map_err(|_| DbError::Corrupt("file too short to contain a header".into()))?;
        let header = FileHeader::unpack(&raw)?;

        Ok(Self { path, file, header })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_count(&self) -> u32 {
        self.header.page_count
    }

    /// Current `(reads, writes, appends)` counter values.
    pub fn counters(&self) -> (u32, u32, u32) {
        (self.header.reads, self.header.writes, self.header.appends)
    }

    fn page_offset(page_num: u32) -> u64 {
        FILE_HEADER_SIZE as u64 + page_num as u64 * PAGE_SIZE as u64
    }

    fn check_page_buf(buf: &[u8]) -> DbResult<()> {
        if buf.len() != PAGE_SIZE {
            return Err(DbError::BadArgument(format!(
                "page buffer must be {PAGE_SIZE} bytes, got {}",
                buf.len()
            )));
        }
        Ok(())
    }

    /// Read page `page_num` into `buf` (`buf` must be exactly one page).
    pub fn read_page(&mut self, page_num: u32, buf: &mut [u8]) -> DbResult<()> {
        Self::check_page_buf(buf)?;
        if page_num >= self.header.page_count {
            return Err(DbError::BadArgument(format!(
                "page {page_num} out of range (page_count={})",
                self.header.page_count
            )));
        }

        self.file.seek(SeekFrom::Start(Self::page_offset(page_num)))?;
        self.file
            .read_exact(buf)
            .map_err(|_| DbError::Corrupt(format!("short read on page {page_num}")))?;
        self.header.reads += 1;
        Ok(())
    }

    /// Overwrite page `page_num` with `buf` (`buf` must be exactly one page).
    pub fn write_page(&mut self, page_num: u32, buf: &[u8]) -> DbResult<()> {
        Self::check_page_buf(buf)?;
        if page_num >= self.header.page_count {
            return Err(DbError::BadArgument(format!(
                "page {page_num} out of range (page_count={})",
                self.header.page_count
            )));
        }

        self.file.seek(SeekFrom::Start(Self::page_offset(page_num)))?;
        self.file.write_all(buf)?;
        self.file.flush()?;
        self.header.writes += 1;
        Ok(())
    }

    /// Append `buf` as a new page and return its page number, which is the
    /// `page_count` before the call.
    pub fn append_page(&mut self, buf: &[u8]) -> DbResult<u32> {
        Self::check_page_buf(buf)?;

        let page_num = self.header.page_count;
        self.file.seek(SeekFrom::Start(Self::page_offset(page_num)))?;
        self.file.write_all(buf)?;
        self.header.page_count += 1;
        self.header.appends += 1;
        self.write_header()?;
        Ok(page_num)
    }

    fn write_header(&mut self) -> DbResult<()> {
        let raw = self.header.pack()?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&raw)?;
        self.file.flush()?;
        Ok(())
    }

    /// Flush the header (counters included) and release the descriptor.
    pub fn close(mut self) -> DbResult<()> {
        self.write_header()?;
        self.file.sync_all()?;
        Ok(())
    }
}

impl Drop for PagedFile {
    fn drop(&mut self) {
        // Handles dropped on an error path still persist their counters.
        let _ = self.write_header();
    }
}
