//! Growable array of fixed-size records over a [`Storage`].
//!
//! Record `i` of an array occupies bytes
//! `[(offset + i) * record_size, (offset + i + 1) * record_size)` of the
//! storage. Slices share the storage handle of the array they were cut from,
//! so writes through either are visible to both.

mod iter;

pub use iter::RecordIter;

use crate::storage::Storage;
use parking_lot::Mutex;
use std::io::Write;
use std::marker::PhantomData;
use std::sync::Arc;
use tally_common::{Record, Result, TallyError};

/// Bytes copied per write call in [`RecordArray::write_to`].
const WRITE_CHUNK_SIZE: usize = 64 * 1024;

/// A length-tracked sequence of fixed-size records.
///
/// Invariant: `offset + len <= storage.size() / record_size`.
pub struct RecordArray<T: Record, S: Storage> {
    /// Shared backing store.
    storage: Arc<Mutex<S>>,
    /// Layout parameters of `T`.
    layout: T::Layout,
    /// Encoded size of one record.
    record_size: usize,
    /// Number of live records.
    len: usize,
    /// Index of record 0 within the storage.
    offset: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Record, S: Storage> RecordArray<T, S> {
    /// Creates an empty array over `storage`.
    ///
    /// Bytes already in the storage count as spare capacity.
    pub fn new(storage: S, layout: T::Layout) -> Result<Self> {
        Self::open(storage, layout, 0)
    }

    /// Opens an array whose first `len` records are already in `storage`.
    pub fn open(storage: S, layout: T::Layout, len: usize) -> Result<Self> {
        let record_size = T::encoded_size(&layout);
        if record_size == 0 {
            return Err(TallyError::invalid_parameter("record_size", 0));
        }

        let capacity = (storage.size() / record_size as u64) as usize;
        if len > capacity {
            return Err(TallyError::OutOfBounds {
                index: len as u64,
                len: capacity as u64,
            });
        }

        Ok(Self {
            storage: Arc::new(Mutex::new(storage)),
            layout,
            record_size,
            len,
            offset: 0,
            _marker: PhantomData,
        })
    }

    /// Returns the encoded size of one record.
    #[inline]
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Returns the record layout.
    #[inline]
    pub fn layout(&self) -> &T::Layout {
        &self.layout
    }

    /// Returns the number of live records.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the array holds no records.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns how many records fit without growing the storage.
    pub fn capacity(&self) -> usize {
        let total = (self.storage.lock().size() / self.record_size as u64) as usize;
        total.saturating_sub(self.offset)
    }

    #[inline]
    fn byte_offset(&self, index: usize) -> u64 {
        ((self.offset + index) * self.record_size) as u64
    }

    #[inline]
    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.len {
            return Err(TallyError::OutOfBounds {
                index: index as u64,
                len: self.len as u64,
            });
        }
        Ok(())
    }

    /// Reads record `index`.
    pub fn get(&self, index: usize) -> Result<T> {
        self.check_index(index)?;
        let mut storage = self.storage.lock();
        let bytes = storage.slice(self.byte_offset(index), self.record_size)?;
        Ok(T::decode(&self.layout, bytes))
    }

    /// Overwrites record `index`.
    pub fn set(&mut self, index: usize, value: &T) -> Result<()> {
        self.check_index(index)?;
        let mut storage = self.storage.lock();
        let bytes = storage.slice_mut(self.byte_offset(index), self.record_size)?;
        value.encode(&self.layout, bytes);
        Ok(())
    }

    /// Appends a record and returns its index.
    ///
    /// A full array doubles its capacity.
    pub fn push(&mut self, value: &T) -> Result<usize> {
        if self.len == self.capacity() {
            let target = (self.len * 2).max(1);
            self.grow(target - self.len)?;
        }

        let index = self.len;
        self.len += 1;
        self.set(index, value)?;
        Ok(index)
    }

    /// Removes and returns the last record.
    pub fn pop(&mut self) -> Result<Option<T>> {
        if self.len == 0 {
            return Ok(None);
        }
        let value = self.get(self.len - 1)?;
        self.len -= 1;
        Ok(Some(value))
    }

    /// Returns the last record.
    pub fn last(&self) -> Result<Option<T>> {
        match self.len {
            0 => Ok(None),
            n => self.get(n - 1).map(Some),
        }
    }

    /// Swaps records `a` and `b`.
    pub fn swap(&mut self, a: usize, b: usize) -> Result<()> {
        self.check_index(a)?;
        self.check_index(b)?;
        if a == b {
            return Ok(());
        }

        let first = self.get(a)?;
        let second = self.get(b)?;
        self.set(a, &second)?;
        self.set(b, &first)
    }

    /// Returns a view of records `[from, to)` that shares this array's
    /// storage.
    ///
    /// `to` may reach past `len` up to the capacity; the view's length is
    /// `to - from`.
    pub fn slice(&self, from: usize, to: usize) -> Result<Self> {
        let capacity = self.capacity();
        if from > to || to > capacity {
            return Err(TallyError::OutOfBounds {
                index: to.max(from) as u64,
                len: capacity as u64,
            });
        }

        Ok(Self {
            storage: Arc::clone(&self.storage),
            layout: self.layout,
            record_size: self.record_size,
            len: to - from,
            offset: self.offset + from,
            _marker: PhantomData,
        })
    }

    /// Ensures room for `additional` more records past the current length.
    ///
    /// Never shrinks the storage.
    pub fn grow(&mut self, additional: usize) -> Result<()> {
        let required = self.byte_offset(self.len + additional);
        let mut storage = self.storage.lock();
        if required > storage.size() {
            storage.truncate(required)?;
        }
        Ok(())
    }

    /// Resizes the storage to hold exactly `n` records past the offset.
    ///
    /// Records at index `n` and beyond are dropped.
    pub fn truncate(&mut self, n: usize) -> Result<()> {
        let size = self.byte_offset(n);
        self.storage.lock().truncate(size)?;
        self.len = self.len.min(n);
        Ok(())
    }

    /// Returns a buffered iterator over the live records.
    ///
    /// Records are read `buffer_records` at a time.
    pub fn iter(&self, buffer_records: usize) -> RecordIter<T, S> {
        RecordIter::new(
            Arc::clone(&self.storage),
            self.layout,
            self.record_size,
            self.byte_offset(0),
            self.len,
            buffer_records,
        )
    }

    /// Streams the encoded bytes of the live records to `writer`.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut offset = self.byte_offset(0);
        let end = self.byte_offset(self.len);
        let mut storage = self.storage.lock();

        while offset < end {
            let n = ((end - offset) as usize).min(WRITE_CHUNK_SIZE);
            writer.write_all(storage.slice(offset, n)?)?;
            offset += n as u64;
        }
        Ok(())
    }

    /// Flushes the storage to durable media.
    pub fn sync(&self) -> Result<()> {
        self.storage.lock().sync()
    }

    /// Recovers the storage once no other slice or iterator shares it.
    pub fn into_storage(self) -> Result<S> {
        Arc::try_unwrap(self.storage)
            .map(Mutex::into_inner)
            .map_err(|_| TallyError::Internal("record array storage is still shared".into()))
    }
}

impl<T: Record, S: Storage> std::fmt::Debug for RecordArray<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordArray")
            .field("record_size", &self.record_size)
            .field("len", &self.len)
            .field("offset", &self.offset)
            .finish()
    }
}
