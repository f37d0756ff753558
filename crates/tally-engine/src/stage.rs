//! Stage run files.

use std::path::PathBuf;
use std::sync::Arc;
use tally_buffer::BufferPool;
use tally_common::{Key, Result};
use tally_storage::{FileStorage, RecordArray};

/// A sorted, duplicate-free run of keys persisted for one bucket.
///
/// The file holds `len` raw key records in ascending order and nothing else.
/// Stages are written once by the write pipeline and read once by the merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    /// Bucket that produced the run.
    pub bucket: usize,
    /// Position among the bucket's stages, in creation order.
    pub index: usize,
    /// Number of keys in the run.
    pub len: usize,
    /// Run file path.
    pub path: PathBuf,
}

impl Stage {
    /// Opens the run file as a record array.
    pub fn open<K: Key>(&self, page_size: usize) -> Result<RecordArray<K, FileStorage>> {
        let storage = FileStorage::open(&self.path, page_size)?;
        RecordArray::open(storage, (), self.len)
    }

    /// Opens the run file with its page buffer taken from `pool`.
    ///
    /// The buffer goes back to the pool when the array is dropped.
    pub fn open_pooled<K: Key>(
        &self,
        page_size: usize,
        pool: &Arc<BufferPool>,
    ) -> Result<RecordArray<K, FileStorage>> {
        let storage = FileStorage::open(&self.path, page_size)?.with_pool(pool.clone())?;
        RecordArray::open(storage, (), self.len)
    }

    /// Reads every key of the run into memory.
    pub fn read_all<K: Key>(&self, page_size: usize) -> Result<Vec<K>> {
        self.open::<K>(page_size)?.iter(self.len).collect()
    }
}
