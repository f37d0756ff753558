//! Input sources and delimited record scanning.

use crate::partition::DELIMITER;
use bytes::Bytes;
use std::fs::File;
use std::ops::{ControlFlow, Range};
use std::path::{Path, PathBuf};
use tally_common::{Result, TallyError};

/// Random-access, read-only input.
///
/// Shared by every scanner, so reads take `&self`.
pub trait InputSource: Send + Sync {
    /// Returns the total size in bytes.
    fn size(&self) -> u64;

    /// Reads bytes starting at `offset` into `buf`.
    ///
    /// Returns the number of bytes read; 0 means end of input.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;
}

/// Input read from a file with positional reads.
#[derive(Debug)]
pub struct FileInput {
    file: File,
    path: PathBuf,
    size: u64,
}

impl FileInput {
    /// Opens `path` for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            file,
            path: path.to_path_buf(),
            size,
        })
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl InputSource for FileInput {
    fn size(&self) -> u64 {
        self.size
    }

    #[cfg(unix)]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        use std::os::unix::fs::FileExt;
        Ok(self.file.read_at(buf, offset)?)
    }

    #[cfg(windows)]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        use std::os::windows::fs::FileExt;
        Ok(self.file.seek_read(buf, offset)?)
    }
}

/// Input held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryInput {
    data: Bytes,
}

impl MemoryInput {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Returns the input bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }
}

impl InputSource for MemoryInput {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let Some(available) = self.data.len().checked_sub(offset as usize) else {
            return Ok(0);
        };
        let n = buf.len().min(available);
        let start = offset as usize;
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }
}

/// Reads the records of one byte range page by page.
///
/// A record is the bytes between delimiters with a trailing `\r` removed.
/// Records cut by a page boundary are reassembled; empty records are
/// skipped. The range is expected to start at a record boundary and its last
/// record may lack a delimiter.
pub struct RecordScanner<'a, I: InputSource + ?Sized> {
    source: &'a I,
    range: Range<u64>,
    page: Vec<u8>,
    /// Partial record carried over from the previous page.
    carry: Vec<u8>,
    /// Input offset of the first byte of `carry`.
    carry_offset: u64,
}

impl<'a, I: InputSource + ?Sized> RecordScanner<'a, I> {
    pub fn new(source: &'a I, range: Range<u64>, page_size: usize) -> Self {
        let page_len = page_size.max(1).min((range.end - range.start).max(1) as usize);

        Self {
            source,
            carry_offset: range.start,
            range,
            page: vec![0u8; page_len],
            carry: Vec::new(),
        }
    }

    /// Calls `visit(offset, record)` for each record in order until the range
    /// is exhausted or `visit` breaks. Returns the number of records visited.
    pub fn for_each<F>(mut self, mut visit: F) -> Result<u64>
    where
        F: FnMut(u64, &[u8]) -> Result<ControlFlow<()>>,
    {
        let mut visited = 0u64;
        let mut offset = self.range.start;

        while offset < self.range.end {
            let want = self.page.len().min((self.range.end - offset) as usize);
            let n = self.source.read_at(offset, &mut self.page[..want])?;
            if n == 0 {
                return Err(TallyError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("input ended at byte {} inside range {:?}", offset, self.range),
                )));
            }

            let chunk = &self.page[..n];
            let mut line_start = 0;
            while let Some(rel) = chunk[line_start..].iter().position(|&b| b == DELIMITER) {
                let line_end = line_start + rel;
                let flow = if self.carry.is_empty() {
                    let record = &chunk[line_start..line_end];
                    emit(offset + line_start as u64, record, &mut visit, &mut visited)?
                } else {
                    self.carry.extend_from_slice(&chunk[line_start..line_end]);
                    let flow = emit(self.carry_offset, &self.carry, &mut visit, &mut visited)?;
                    self.carry.clear();
                    flow
                };
                if flow.is_break() {
                    return Ok(visited);
                }
                line_start = line_end + 1;
            }

            if self.carry.is_empty() {
                self.carry_offset = offset + line_start as u64;
            }
            self.carry.extend_from_slice(&chunk[line_start..]);
            offset += n as u64;
        }

        if !self.carry.is_empty() {
            // Last record: the scan ends whether or not it breaks.
            let _ = emit(self.carry_offset, &self.carry, &mut visit, &mut visited)?;
        }
        Ok(visited)
    }
}

#[inline]
fn emit<F>(
    offset: u64,
    record: &[u8],
    visit: &mut F,
    visited: &mut u64,
) -> Result<ControlFlow<()>>
where
    F: FnMut(u64, &[u8]) -> Result<ControlFlow<()>>,
{
    let record = record.strip_suffix(b"\r").unwrap_or(record);
    if record.is_empty() {
        return Ok(ControlFlow::Continue(()));
    }
    *visited += 1;
    visit(offset, record)
}
