//! Read pipeline: merge each bucket's runs and count distinct keys.
//!
//! Buckets are merged in waves of at most `read_parallelism` concurrent
//! merges. Each merge owns its counters; a wave's results are summed after
//! all of its threads join.

use crate::merge::{count_distinct, MergeIterator};
use crate::progress::PipelineCounters;
use crate::stage::Stage;
use crate::writer::{first_cause, join};
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread;
use tally_buffer::{BufferPool, BufferPoolConfig, PoolStats};
use tally_common::{CountConfig, Key, Result};
use tracing::{debug, info};

/// Keys merged locally before publishing to the counters.
const COUNTER_BATCH: u64 = 4096;

/// Merge totals of one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketSummary {
    pub bucket: usize,
    /// Runs merged.
    pub stages: usize,
    /// Keys read across all runs.
    pub merged: u64,
    /// Distinct keys.
    pub unique: u64,
}

/// Merges per-bucket runs and counts distinct keys.
pub struct ReadPipeline<'a, K> {
    config: &'a CountConfig,
    counters: &'a PipelineCounters,
    /// Page buffers of open run files, shared by every wave.
    pool: Arc<BufferPool>,
    _key: PhantomData<fn() -> K>,
}

impl<'a, K: Key> ReadPipeline<'a, K> {
    pub fn new(config: &'a CountConfig, counters: &'a PipelineCounters) -> Self {
        let pool = BufferPool::new(BufferPoolConfig {
            max_buffers: config.read_parallelism.max(1),
            buffer_capacity: config.file_page_size,
        });
        Self {
            config,
            counters,
            pool: Arc::new(pool),
            _key: PhantomData,
        }
    }

    /// Returns the run file page buffer pool counters.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Merges every bucket and returns one summary per bucket, in bucket
    /// order.
    pub fn run(&self, buckets: &[Vec<Stage>]) -> Result<Vec<BucketSummary>> {
        let parallelism = self.config.read_parallelism.max(1);
        info!(
            buckets = buckets.len(),
            stages = buckets.iter().map(Vec::len).sum::<usize>(),
            parallelism,
            "read phase started"
        );

        let mut summaries = Vec::with_capacity(buckets.len());
        let mut unique = 0u64;

        for (wave, group) in buckets.chunks(parallelism).enumerate() {
            let first_bucket = wave * parallelism;
            let results: Vec<Result<BucketSummary>> = thread::scope(|scope| {
                let handles: Vec<_> = group
                    .iter()
                    .enumerate()
                    .map(|(i, stages)| {
                        scope.spawn(move || self.merge_bucket(first_bucket + i, stages))
                    })
                    .collect();
                handles.into_iter().map(join).collect()
            });

            let mut errors = Vec::new();
            for result in results {
                match result {
                    Ok(summary) => {
                        unique += summary.unique;
                        summaries.push(summary);
                    }
                    Err(err) => errors.push(err),
                }
            }
            if let Some(err) = first_cause(errors) {
                return Err(err);
            }
            debug!(wave, buckets = group.len(), unique, "merge wave finished");
        }

        let pool = self.pool.stats();
        info!(
            unique,
            pool_allocated = pool.allocated,
            pool_reused = pool.reused,
            "read phase finished"
        );
        Ok(summaries)
    }

    /// Merges one bucket's runs.
    pub fn merge_bucket(&self, bucket: usize, stages: &[Stage]) -> Result<BucketSummary> {
        let sources = stages
            .iter()
            .map(|stage| {
                Ok(stage
                    .open_pooled::<K>(self.config.file_page_size, &self.pool)?
                    .iter(self.config.iterator_buffer_records))
            })
            .collect::<Result<Vec<_>>>()?;

        let merge = MergeIterator::new(sources)?;
        let count = count_distinct(merge, COUNTER_BATCH, |n| self.counters.add_keys_merged(n))?;
        self.counters.add_unique(count.unique);

        debug!(
            bucket,
            stages = stages.len(),
            merged = count.merged,
            unique = count.unique,
            "bucket merged"
        );
        Ok(BucketSummary {
            bucket,
            stages: stages.len(),
            merged: count.merged,
            unique: count.unique,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tally_common::TallyError;
    use tempfile::tempdir;

    fn write_run(dir: &Path, bucket: usize, index: usize, keys: &[u32]) -> Stage {
        let path = dir.join(format!("stage_{}_{}", bucket, index));
        let bytes: Vec<u8> = keys.iter().flat_map(|k| k.to_be_bytes()).collect();
        std::fs::write(&path, bytes).unwrap();
        Stage {
            bucket,
            index,
            len: keys.len(),
            path,
        }
    }

    #[test]
    fn test_merge_worked_runs() {
        let dir = tempdir().unwrap();
        let config = CountConfig::new(dir.path());
        let counters = PipelineCounters::new();
        let stages = vec![
            write_run(dir.path(), 0, 0, &[10, 20]),
            write_run(dir.path(), 0, 1, &[5, 10]),
            write_run(dir.path(), 0, 2, &[20, 30]),
        ];

        let summary = ReadPipeline::<u32>::new(&config, &counters)
            .merge_bucket(0, &stages)
            .unwrap();
        assert_eq!(
            summary,
            BucketSummary {
                bucket: 0,
                stages: 3,
                merged: 6,
                unique: 4
            }
        );
        assert_eq!(counters.snapshot().keys_merged, 6);
        assert_eq!(counters.snapshot().unique, 4);
    }

    #[test]
    fn test_waves_cover_every_bucket() {
        let dir = tempdir().unwrap();
        let config = CountConfig {
            read_parallelism: 2,
            iterator_buffer_records: 1,
            ..CountConfig::new(dir.path())
        };
        let counters = PipelineCounters::new();
        let buckets = vec![
            vec![write_run(dir.path(), 0, 0, &[1, 2])],
            Vec::new(),
            vec![
                write_run(dir.path(), 2, 0, &[7]),
                write_run(dir.path(), 2, 1, &[7, 8]),
            ],
            vec![write_run(dir.path(), 3, 0, &[9])],
            Vec::new(),
        ];

        let summaries = ReadPipeline::<u32>::new(&config, &counters)
            .run(&buckets)
            .unwrap();
        let per_bucket: Vec<(usize, u64)> =
            summaries.iter().map(|s| (s.bucket, s.unique)).collect();
        assert_eq!(per_bucket, vec![(0, 2), (1, 0), (2, 2), (3, 1), (4, 0)]);
        assert_eq!(counters.snapshot().unique, 5);
    }

    #[test]
    fn test_page_buffers_reused_across_waves() {
        let dir = tempdir().unwrap();
        let config = CountConfig {
            read_parallelism: 1,
            ..CountConfig::new(dir.path())
        };
        let counters = PipelineCounters::new();
        let buckets = vec![
            vec![write_run(dir.path(), 0, 0, &[1, 2])],
            vec![write_run(dir.path(), 1, 0, &[3])],
            vec![write_run(dir.path(), 2, 0, &[4, 5])],
        ];

        let pipeline = ReadPipeline::<u32>::new(&config, &counters);
        pipeline.run(&buckets).unwrap();

        let stats = pipeline.pool_stats();
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.reused, 2);
        assert_eq!(counters.snapshot().unique, 5);
    }

    #[test]
    fn test_missing_run_file_fails() {
        let dir = tempdir().unwrap();
        let config = CountConfig::new(dir.path());
        let counters = PipelineCounters::new();
        let mut stage = write_run(dir.path(), 0, 0, &[1]);
        stage.path = dir.path().join("gone");

        let err = ReadPipeline::<u32>::new(&config, &counters)
            .run(&[vec![stage]])
            .unwrap_err();
        assert!(matches!(err, TallyError::Io(_)));
    }

    #[test]
    fn test_truncated_run_file_fails() {
        let dir = tempdir().unwrap();
        let config = CountConfig::new(dir.path());
        let counters = PipelineCounters::new();
        let mut stage = write_run(dir.path(), 0, 0, &[1, 2]);
        stage.len = 3;

        // Opening checks the recorded length against the file size
        let err = ReadPipeline::<u32>::new(&config, &counters)
            .merge_bucket(0, &[stage])
            .unwrap_err();
        assert!(matches!(err, TallyError::OutOfBounds { .. }));
    }
}
