//! Buffered sequential reads over a record array.

use crate::storage::Storage;
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::Arc;
use tally_common::{Record, Result, TallyError};

/// Iterator that reads records ahead in fixed-size batches.
///
/// Holds its own handle to the storage, so it outlives the array borrow it
/// was created from. Yields `Err` once and then stops if a read fails.
pub struct RecordIter<T: Record, S: Storage> {
    storage: Arc<Mutex<S>>,
    layout: T::Layout,
    record_size: usize,
    /// Byte offset of the next record not yet buffered.
    next_offset: u64,
    /// Records not yet buffered.
    remaining: usize,
    /// Read-ahead buffer.
    buf: Vec<u8>,
    /// Byte position of the next record in `buf`.
    pos: usize,
    /// Bytes of `buf` holding records.
    filled: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Record, S: Storage> RecordIter<T, S> {
    pub(crate) fn new(
        storage: Arc<Mutex<S>>,
        layout: T::Layout,
        record_size: usize,
        start: u64,
        len: usize,
        buffer_records: usize,
    ) -> Self {
        let batch = buffer_records.max(1).min(len.max(1));

        Self {
            storage,
            layout,
            record_size,
            next_offset: start,
            remaining: len,
            buf: vec![0u8; batch * record_size],
            pos: 0,
            filled: 0,
            _marker: PhantomData,
        }
    }

    /// Returns the number of records not yet yielded.
    pub fn remaining(&self) -> usize {
        self.remaining + (self.filled - self.pos) / self.record_size
    }

    fn refill(&mut self) -> Result<()> {
        let records = self.remaining.min(self.buf.len() / self.record_size);
        let want = records * self.record_size;

        let read = self
            .storage
            .lock()
            .read_at(self.next_offset, &mut self.buf[..want])?;
        if read != want {
            return Err(TallyError::Storage(format!(
                "short read at offset {}: expected {} bytes, got {}",
                self.next_offset, want, read
            )));
        }

        self.next_offset += want as u64;
        self.remaining -= records;
        self.pos = 0;
        self.filled = want;
        Ok(())
    }
}

impl<T: Record, S: Storage> Iterator for RecordIter<T, S> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos == self.filled {
            if self.remaining == 0 {
                return None;
            }
            if let Err(err) = self.refill() {
                self.remaining = 0;
                self.pos = 0;
                self.filled = 0;
                return Some(Err(err));
            }
        }

        let end = self.pos + self.record_size;
        let value = T::decode(&self.layout, &self.buf[self.pos..end]);
        self.pos = end;
        Some(Ok(value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining();
        (n, Some(n))
    }
}
