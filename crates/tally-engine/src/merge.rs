//! K-way merge of sorted runs.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tally_common::{Key, Result, TallyError};

/// Merges several ascending key streams into one ascending stream.
///
/// A binary min-heap holds the head of every non-exhausted source. Ties
/// between sources are broken by source position, so the output order is
/// deterministic. After a source yields an error the merge yields the key
/// already popped, then that error, and then ends.
pub struct MergeIterator<K, I> {
    sources: Vec<I>,
    heap: BinaryHeap<Reverse<(K, usize)>>,
    error: Option<TallyError>,
}

impl<K, I> MergeIterator<K, I>
where
    K: Key,
    I: Iterator<Item = Result<K>>,
{
    /// Primes the heap with the first key of every source.
    pub fn new(sources: Vec<I>) -> Result<Self> {
        let mut merge = Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            error: None,
        };

        for source in 0..merge.sources.len() {
            if let Some(key) = merge.sources[source].next().transpose()? {
                merge.heap.push(Reverse((key, source)));
            }
        }
        Ok(merge)
    }

    /// Returns the number of sources not yet exhausted.
    pub fn live_sources(&self) -> usize {
        self.heap.len()
    }
}

impl<K, I> Iterator for MergeIterator<K, I>
where
    K: Key,
    I: Iterator<Item = Result<K>>,
{
    type Item = Result<K>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.error.take() {
            return Some(Err(err));
        }

        let Reverse((key, source)) = self.heap.pop()?;
        match self.sources[source].next() {
            Some(Ok(next)) => self.heap.push(Reverse((next, source))),
            Some(Err(err)) => {
                self.heap.clear();
                self.error = Some(err);
            }
            None => {}
        }
        Some(Ok(key))
    }
}

/// Totals of one merged stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DistinctCount {
    /// Keys read from all sources.
    pub merged: u64,
    /// Distinct keys.
    pub unique: u64,
}

/// Counts distinct keys in an ascending stream by counting value changes.
///
/// `on_batch` is called with the number of keys consumed every `batch` keys
/// and once more at the end.
pub fn count_distinct<K, I, F>(keys: I, batch: u64, mut on_batch: F) -> Result<DistinctCount>
where
    K: Key,
    I: IntoIterator<Item = Result<K>>,
    F: FnMut(u64),
{
    let batch = batch.max(1);
    let mut count = DistinctCount::default();
    let mut last: Option<K> = None;
    let mut pending = 0u64;

    for key in keys {
        let key = key?;
        count.merged += 1;
        if last != Some(key) {
            count.unique += 1;
            last = Some(key);
        }

        pending += 1;
        if pending == batch {
            on_batch(pending);
            pending = 0;
        }
    }

    if pending > 0 {
        on_batch(pending);
    }
    Ok(count)
}
