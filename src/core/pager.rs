
use crate::core::buffer_pool::{BufferPool, PageBuf};
use crate::core::constants::*;
use crate::core::errors::*;
use log::{debug, trace};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};

/// Database header, persisted as page 0.
///
/// Layout: magic [0..4) | version u16 [4..6) | page_size u32 [6..10) |
/// page_count u32 [10..14) | free_list u32 [14..18). `page_count` is the
/// next page index to allocate; `free_list` is the head of the chain of
/// freed pages (0 = empty), linked through the first 4 bytes of each freed
/// page.
#[derive(Debug, Clone)]
pub struct Header {
    pub magic: [u8; 4],
    pub version: u16,
    pub page_size: u32,
    pub page_count: u32,
    pub free_list: PageNum,
}

impl Header {
    pub fn new() -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            page_size: PAGE_SIZE as u32,
            page_count: 1,
            free_list: 0,
        }
    }

    fn serialize_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..10].copy_from_slice(&self.page_size.to_le_bytes());
        buf[10..14].copy_from_slice(&self.page_count.to_le_bytes());
        buf[14..18].copy_from_slice(&self.free_list.to_le_bytes());
    }

    fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < 18 {
            return Err(Error::corruption("header", 0, "header page too short"));
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&data[0..4]);
        if magic != MAGIC {
            return Err(Error::InvalidMagic);
        }

        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != VERSION {
            return Err(Error::InvalidVersion(version));
        }

        let page_size = u32::from_le_bytes(data[6..10].try_into()?);
        if page_size != PAGE_SIZE as u32 {
            return Err(Error::InvalidPageSize(page_size));
        }

        let page_count = u32::from_le_bytes(data[10..14].try_into()?);
        let free_list = u32::from_le_bytes(data[14..18].try_into()?);

        if page_count < 1 {
            return Err(Error::corruption(
                "header",
                0,
                format!("invalid page_count {}", page_count),
            ));
        }
        if free_list >= page_count {
            return Err(Error::corruption(
                "header",
                0,
                format!(
                    "free_list head {} out of range (page_count {})",
                    free_list, page_count
                ),
            ));
        }

        Ok(Self {
            magic,
            version,
            page_size,
            page_count,
            free_list,
        })
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

/// Positional page I/O over a single file, plus the page allocator.
///
/// The file handle is serialized behind a mutex; callers working on distinct
/// pages are safe against each other, but write ordering between pages is
/// whatever the filesystem provides.
pub struct Pager {
    file: Mutex<File>,
    pool: Arc<BufferPool>,
}

impl Pager {
    pub fn open(path: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        debug!("pager opened {}", path);

        Ok(Self {
            file: Mutex::new(file),
            pool: Arc::new(BufferPool::new()),
        })
    }

    pub fn file_len(&self) -> Result<u64> {
        let file = self
            .file
            .lock()
            .map_err(|_| Error::LockPoisoned { lock_name: "pager.file".to_string() })?;
        Ok(file.metadata()?.len())
    }

    /// Reads page `n` into a pooled buffer. A short read is an IO error.
    pub fn read_page(&self, page_num: PageNum) -> Result<PageBuf> {
        let mut buf = self.pool.get_unzeroed();

        let mut file = self
            .file
            .lock()
            .map_err(|_| Error::LockPoisoned { lock_name: "pager.file".to_string() })?;
        file.seek(SeekFrom::Start(page_num as u64 * PAGE_SIZE as u64))?;
        file.read_exact(&mut buf)?;

        Ok(buf)
    }

    /// Positional write of exactly one page. No fsync; durability is
    /// best-effort until `sync`.
    pub fn write_page(&self, page_num: PageNum, data: &[u8]) -> Result<()> {
        if data.len() != PAGE_SIZE {
            return Err(Error::InvalidPageSize(data.len() as u32));
        }

        let mut file = self
            .file
            .lock()
            .map_err(|_| Error::LockPoisoned { lock_name: "pager.file".to_string() })?;
        file.seek(SeekFrom::Start(page_num as u64 * PAGE_SIZE as u64))?;
        file.write_all(data)?;

        Ok(())
    }

    /// Returns a zeroed pooled page buffer.
    pub fn get_buf(&self) -> PageBuf {
        self.pool.get()
    }

    pub fn read_header(&self) -> Result<Header> {
        let buf = self.read_page(0)?;
        Header::deserialize(&buf)
    }

    pub fn write_header(&self, header: &Header) -> Result<()> {
        let mut buf = self.pool.get();
        header.serialize_into(&mut buf);
        self.write_page(0, &buf)
    }

    /// Allocates a page: pops the free-list head if there is one, otherwise
    /// extends the file. The header is persisted before returning, and a
    /// freshly extended page is zero-filled on disk.
    pub fn allocate_page(&self, header: &mut Header) -> Result<PageNum> {
        if header.free_list != 0 {
            let page_num = header.free_list;
            let buf = self.read_page(page_num)?;
            header.free_list = u32::from_le_bytes(buf[0..4].try_into()?);
            self.write_header(header)?;
            trace!("reused freed page {}", page_num);
            return Ok(page_num);
        }

        let page_num = header.page_count;
        header.page_count += 1;
        self.write_header(header)?;

        let buf = self.pool.get();
        self.write_page(page_num, &buf)?;
        trace!("allocated page {}", page_num);

        Ok(page_num)
    }

    /// Pushes a page onto the free list. The freed page's first 4 bytes hold
    /// the previous list head; the header is persisted before returning.
    pub fn free_page(&self, header: &mut Header, page_num: PageNum) -> Result<()> {
        let mut buf = self.pool.get();
        buf[0..4].copy_from_slice(&header.free_list.to_le_bytes());
        self.write_page(page_num, &buf)?;

        header.free_list = page_num;
        self.write_header(header)
    }

    pub fn sync(&self) -> Result<()> {
        let file = self
            .file
            .lock()
            .map_err(|_| Error::LockPoisoned { lock_name: "pager.file".to_string() })?;
        file.sync_all()?;
        Ok(())
    }
}
