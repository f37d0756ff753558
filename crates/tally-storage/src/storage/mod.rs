//! Byte-addressable, resizable backing stores.
//!
//! Two implementations:
//! - [`VirtualStorage`]: an in-process buffer, recycled through a pool
//! - [`FileStorage`]: a real file cached one page at a time

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::VirtualStorage;

use tally_common::{Result, TallyError};

/// A resizable byte region.
///
/// `slice_mut` hands out a view that aliases the live bytes: writes through
/// it are visible to every later read of the same range.
pub trait Storage: Send {
    /// Returns the current size in bytes.
    fn size(&self) -> u64;

    /// Resizes to `size` bytes, zero-extending or shrinking.
    ///
    /// Bytes below `min(old, new)` are preserved.
    fn truncate(&mut self, size: u64) -> Result<()>;

    /// Returns a read-only view of `[offset, offset + len)`.
    fn slice(&mut self, offset: u64, len: usize) -> Result<&[u8]>;

    /// Returns a writable view of `[offset, offset + len)`.
    fn slice_mut(&mut self, offset: u64, len: usize) -> Result<&mut [u8]>;

    /// Copies bytes starting at `offset` into `buf`.
    ///
    /// Returns the number of bytes copied, which is short only at the end
    /// of the storage.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Makes all writes durable.
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Checks that `[offset, offset + len)` lies within `size` bytes.
#[inline]
pub(crate) fn check_range(offset: u64, len: usize, size: u64) -> Result<()> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(TallyError::StorageRange {
            offset,
            len: len as u64,
            size,
        }),
    }
}
