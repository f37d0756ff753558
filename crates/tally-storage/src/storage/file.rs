//! File-backed storage with a single-page cache.

use super::{check_range, Storage};
use bytes::BytesMut;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tally_buffer::BufferPool;
use tally_common::page::page_start;
use tally_common::{Result, TallyError};
use tracing::warn;

/// The one page of file bytes held in memory.
#[derive(Default)]
struct CachedPage {
    /// File offset of the first cached byte.
    offset: u64,
    /// Cached bytes.
    buf: BytesMut,
    /// Whether `buf` holds file contents.
    valid: bool,
    /// Whether `buf` has writes not yet in the file.
    dirty: bool,
}

impl CachedPage {
    #[inline]
    fn contains(&self, offset: u64, len: usize) -> bool {
        self.valid
            && offset >= self.offset
            && offset + len as u64 <= self.offset + self.buf.len() as u64
    }
}

/// Storage backed by an open file.
///
/// At most one page is cached. An access outside the cached page writes the
/// page back if it is dirty and loads the page containing the new range; a
/// range longer than a page loads one enlarged page covering it. Sequential
/// readers go through [`Storage::read_at`], which bypasses the cache.
pub struct FileStorage {
    /// The file handle.
    file: File,
    /// Path to the file.
    path: PathBuf,
    /// File size in bytes.
    size: u64,
    /// Nominal page size.
    page_size: usize,
    /// Cached page.
    page: CachedPage,
    /// Pool the page buffer came from, if any.
    pool: Option<Arc<BufferPool>>,
}

impl FileStorage {
    /// Creates (or truncates) a file.
    pub fn create(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Self::from_file(file, path.to_path_buf(), page_size)
    }

    /// Opens an existing file.
    pub fn open(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::from_file(file, path.to_path_buf(), page_size)
    }

    /// Wraps an already open file.
    pub fn from_file(file: File, path: PathBuf, page_size: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(TallyError::invalid_parameter("page_size", 0));
        }
        let size = file.metadata()?.len();

        Ok(Self {
            file,
            path,
            size,
            page_size,
            page: CachedPage::default(),
            pool: None,
        })
    }

    /// Takes the page buffer from `pool` and returns it there on drop.
    pub fn with_pool(mut self, pool: Arc<BufferPool>) -> Result<Self> {
        self.write_back()?;
        let buf = pool.acquire();
        self.page = CachedPage {
            buf,
            ..CachedPage::default()
        };
        self.pool = Some(pool);
        Ok(self)
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the nominal page size.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Writes the cached page to the file if it is dirty.
    fn write_back(&mut self) -> Result<()> {
        if !(self.page.valid && self.page.dirty) {
            return Ok(());
        }

        self.file.seek(SeekFrom::Start(self.page.offset))?;
        self.file.write_all(&self.page.buf)?;
        self.page.dirty = false;
        Ok(())
    }

    /// Loads the page containing `[offset, offset + len)`.
    fn load_page(&mut self, offset: u64, len: usize) -> Result<()> {
        self.write_back()?;

        let start = page_start(offset, self.page_size);
        let needed = (offset + len as u64 - start) as usize;
        let page_len = needed
            .max(self.page_size)
            .min((self.size - start) as usize);

        let page = &mut self.page;
        page.valid = false;
        page.buf.clear();
        page.buf.resize(page_len, 0);
        self.file.seek(SeekFrom::Start(start))?;
        self.file.read_exact(&mut page.buf[..])?;

        page.offset = start;
        page.valid = true;
        page.dirty = false;
        Ok(())
    }

    #[inline]
    fn ensure_cached(&mut self, offset: u64, len: usize) -> Result<usize> {
        check_range(offset, len, self.size)?;
        if !self.page.contains(offset, len) {
            self.load_page(offset, len)?;
        }
        Ok((offset - self.page.offset) as usize)
    }
}

impl Storage for FileStorage {
    #[inline]
    fn size(&self) -> u64 {
        self.size
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        self.write_back()?;
        self.file.set_len(size)?;
        self.size = size;

        if self.page.offset + self.page.buf.len() as u64 > size {
            self.page.valid = false;
        }
        Ok(())
    }

    fn slice(&mut self, offset: u64, len: usize) -> Result<&[u8]> {
        let start = self.ensure_cached(offset, len)?;
        Ok(&self.page.buf[start..start + len])
    }

    fn slice_mut(&mut self, offset: u64, len: usize) -> Result<&mut [u8]> {
        let start = self.ensure_cached(offset, len)?;
        self.page.dirty = true;
        Ok(&mut self.page.buf[start..start + len])
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.size {
            return Ok(0);
        }
        self.write_back()?;

        let n = buf.len().min((self.size - offset) as usize);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf[..n])?;
        Ok(n)
    }

    fn sync(&mut self) -> Result<()> {
        self.write_back()?;
        self.file.sync_all()?;
        Ok(())
    }
}

impl Drop for FileStorage {
    fn drop(&mut self) {
        if let Err(err) = self.write_back() {
            warn!(path = %self.path.display(), %err, "failed to write back cached page");
        }
        if let Some(pool) = self.pool.take() {
            pool.release(std::mem::take(&mut self.page.buf));
        }
    }
}
