//! In-memory storage.

use super::{check_range, Storage};
use bytes::BytesMut;
use tally_common::Result;

/// Growable in-memory byte buffer.
///
/// Built from a pooled [`BytesMut`] and handed back with
/// [`VirtualStorage::into_buffer`] so the allocation outlives the structure
/// that used it.
#[derive(Debug, Default)]
pub struct VirtualStorage {
    data: BytesMut,
}

impl VirtualStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty storage with reserved capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
        }
    }

    /// Creates an empty storage reusing `buf`'s allocation.
    pub fn from_buffer(mut buf: BytesMut) -> Self {
        buf.clear();
        Self { data: buf }
    }

    /// Returns the underlying buffer.
    pub fn into_buffer(self) -> BytesMut {
        self.data
    }

    /// Returns the live bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Returns the allocated capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }
}

impl Storage for VirtualStorage {
    #[inline]
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        let size = size as usize;
        if size <= self.data.len() {
            self.data.truncate(size);
        } else {
            self.data.resize(size, 0);
        }
        Ok(())
    }

    #[inline]
    fn slice(&mut self, offset: u64, len: usize) -> Result<&[u8]> {
        check_range(offset, len, self.size())?;
        let start = offset as usize;
        Ok(&self.data[start..start + len])
    }

    #[inline]
    fn slice_mut(&mut self, offset: u64, len: usize) -> Result<&mut [u8]> {
        check_range(offset, len, self.size())?;
        let start = offset as usize;
        Ok(&mut self.data[start..start + len])
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let size = self.size();
        if offset >= size {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }
}
