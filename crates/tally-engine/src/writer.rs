//! Write pipeline: scan the input, route keys to buckets, and flush each
//! bucket's stage trees to sorted run files.
//!
//! ```text
//!  scanner 0 ──┐                 ┌─> bucket 0: tree ─flush─> prefix_0_0, prefix_0_1, ...
//!  scanner 1 ──┼─ bucket_of(key) ┼─> bucket 1: tree ─flush─> prefix_1_0, ...
//!  scanner R ──┘  bounded chans  └─> bucket N: tree ─flush─> ...
//! ```
//!
//! Each bucket has one consumer thread that owns its current tree. When the
//! tree reaches the stage threshold the consumer swaps in a fresh tree and
//! hands the full one to a flush thread. At most one flush per bucket runs
//! at a time: a new flush first joins the previous one.

use crate::input::{InputSource, RecordScanner};
use crate::parser::RecordParser;
use crate::partition::{bucket_of, split_ranges};
use crate::progress::PipelineCounters;
use crate::stage::Stage;
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::fs::File;
use std::io::BufWriter;
use std::ops::{ControlFlow, Range};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ScopedJoinHandle};
use tally_buffer::{BufferPool, BufferPoolConfig};
use tally_common::{CountConfig, Key, Result, TallyError};
use tally_storage::{BTree, NodeHandleCache, RecordArray, VirtualStorage};
use tracing::{debug, info};

/// Records counted locally by a scanner before publishing to the counters.
const COUNTER_BATCH: u64 = 4096;

/// Buffer size of the writer streaming a run to its file.
const RUN_WRITE_BUFFER: usize = 256 * 1024;

/// Run list and flush buffers of one bucket, guarded by its flush mutex.
struct StageSink {
    /// Pool of flush array buffers.
    pool: BufferPool,
    /// Stages written so far, in index order.
    stages: Vec<Stage>,
}

/// Partitions an input into per-bucket sorted runs.
pub struct WritePipeline<'a, P: RecordParser> {
    config: &'a CountConfig,
    parser: &'a P,
    counters: &'a PipelineCounters,
}

impl<'a, P: RecordParser> WritePipeline<'a, P> {
    pub fn new(config: &'a CountConfig, parser: &'a P, counters: &'a PipelineCounters) -> Self {
        Self {
            config,
            parser,
            counters,
        }
    }

    /// Runs the pipeline to completion and returns each bucket's stages.
    ///
    /// The first error from any thread aborts the run; scanners notice and
    /// stop early. Files of stages already flushed stay on disk.
    pub fn run<I: InputSource + ?Sized>(&self, input: &I) -> Result<Vec<Vec<Stage>>> {
        let ranges = split_ranges(input, self.config.scanner_count)?;
        let bucket_count = self.config.bucket_count;
        info!(
            input_bytes = input.size(),
            scanners = ranges.len(),
            buckets = bucket_count,
            elements_per_stage = self.config.elements_per_stage,
            "write phase started"
        );

        let (senders, receivers): (Vec<Sender<P::Key>>, Vec<Receiver<P::Key>>) = (0
            ..bucket_count)
            .map(|_| bounded(self.config.channel_capacity))
            .unzip();
        let abort = AtomicBool::new(false);
        let abort = &abort;

        let (scanned, consumed) = thread::scope(|scope| {
            let consumers: Vec<_> = receivers
                .into_iter()
                .enumerate()
                .map(|(bucket, receiver)| {
                    scope.spawn(move || {
                        let result = self.consume(bucket, receiver, abort);
                        if result.is_err() {
                            abort.store(true, Ordering::Relaxed);
                        }
                        result
                    })
                })
                .collect();

            let scanners: Vec<_> = ranges
                .into_iter()
                .map(|range| {
                    let senders = senders.clone();
                    scope.spawn(move || {
                        let result = self.scan(input, range, &senders, abort);
                        if result.is_err() {
                            abort.store(true, Ordering::Relaxed);
                        }
                        result
                    })
                })
                .collect();
            // Consumers finish once every scanner's senders are gone
            drop(senders);

            let scanned: Vec<Result<u64>> = scanners.into_iter().map(join).collect();
            let consumed: Vec<Result<Vec<Stage>>> = consumers.into_iter().map(join).collect();
            (scanned, consumed)
        });

        let mut errors = Vec::new();
        let mut records = 0;
        for result in scanned {
            match result {
                Ok(n) => records += n,
                Err(err) => errors.push(err),
            }
        }
        let mut buckets = Vec::with_capacity(bucket_count);
        for result in consumed {
            match result {
                Ok(stages) => buckets.push(stages),
                Err(err) => errors.push(err),
            }
        }
        if let Some(err) = first_cause(errors) {
            return Err(err);
        }

        info!(
            records,
            stages = buckets.iter().map(Vec::len).sum::<usize>(),
            "write phase finished"
        );
        Ok(buckets)
    }

    /// Parses one byte range and routes each key to its bucket channel.
    fn scan<I: InputSource + ?Sized>(
        &self,
        input: &I,
        range: Range<u64>,
        senders: &[Sender<P::Key>],
        abort: &AtomicBool,
    ) -> Result<u64> {
        debug!(start = range.start, end = range.end, "scanner started");
        let buckets = senders.len();
        let mut unpublished = 0u64;

        let result = RecordScanner::new(input, range, self.config.read_page_size).for_each(
            |offset, record| {
                if abort.load(Ordering::Relaxed) {
                    return Ok(ControlFlow::Break(()));
                }

                let key = self.parser.parse(offset, record)?;
                let bucket = bucket_of(key, buckets);
                senders[bucket]
                    .send(key)
                    .map_err(|_| TallyError::ChannelClosed { bucket })?;

                unpublished += 1;
                if unpublished == COUNTER_BATCH {
                    self.counters.add_records_read(unpublished);
                    unpublished = 0;
                }
                Ok(ControlFlow::Continue(()))
            },
        );

        self.counters.add_records_read(unpublished);
        result
    }

    /// Accumulates one bucket's keys into stage trees until its channel
    /// closes.
    fn consume(
        &self,
        bucket: usize,
        receiver: Receiver<P::Key>,
        abort: &AtomicBool,
    ) -> Result<Vec<Stage>> {
        let threshold = self.config.elements_per_stage;
        let tree_pool = BufferPool::new(BufferPoolConfig {
            max_buffers: self.config.pool_buffers,
            buffer_capacity: 0,
        });
        let sink = Mutex::new(StageSink {
            pool: BufferPool::new(BufferPoolConfig {
                max_buffers: self.config.pool_buffers,
                buffer_capacity: self.config.stage_buffer_bytes(<P::Key as Key>::SIZE),
            }),
            stages: Vec::new(),
        });
        let tree_pool = &tree_pool;
        let sink_ref = &sink;

        thread::scope(|scope| -> Result<()> {
            let mut pending: Option<ScopedJoinHandle<'_, Result<()>>> = None;
            let mut tree = self.new_tree(tree_pool)?;
            let mut stage = 0;
            let mut inserted = 0u64;

            for key in receiver.iter() {
                if tree.put(key)? {
                    inserted += 1;
                    if inserted == COUNTER_BATCH {
                        self.counters.add_keys_inserted(inserted);
                        inserted = 0;
                    }
                }

                if tree.count() == threshold {
                    let full = std::mem::replace(&mut tree, self.new_tree(tree_pool)?);
                    if let Some(previous) = pending.take() {
                        join(previous)?;
                    }
                    let index = stage;
                    pending = Some(scope.spawn(move || {
                        self.flush(bucket, index, full, sink_ref, tree_pool)
                    }));
                    stage += 1;
                }
            }
            self.counters.add_keys_inserted(inserted);

            if let Some(previous) = pending.take() {
                join(previous)?;
            }
            if tree.count() > 0 && !abort.load(Ordering::Relaxed) {
                self.flush(bucket, stage, tree, sink_ref, tree_pool)?;
            }
            Ok(())
        })?;

        let sink = sink.into_inner();
        let pool = sink.pool.stats();
        debug!(
            bucket,
            stages = sink.stages.len(),
            pool_allocated = pool.allocated,
            pool_reused = pool.reused,
            "bucket writer finished"
        );
        Ok(sink.stages)
    }

    fn new_tree(&self, pool: &BufferPool) -> Result<BTree<P::Key, VirtualStorage>> {
        let storage = VirtualStorage::from_buffer(pool.acquire());
        BTree::new(storage, self.config.btree_degree)
    }

    /// Writes a full tree to its run file and records the stage.
    ///
    /// Holds the bucket's flush mutex throughout.
    fn flush(
        &self,
        bucket: usize,
        index: usize,
        tree: BTree<P::Key, VirtualStorage>,
        sink: &Mutex<StageSink>,
        tree_pool: &BufferPool,
    ) -> Result<()> {
        let mut sink = sink.lock();
        let path = self.config.stage_path(bucket, index);

        let storage = VirtualStorage::from_buffer(sink.pool.acquire());
        let mut run = RecordArray::<P::Key, _>::new(storage, ())?;
        run.grow(tree.count() as usize)?;

        let mut append = |key| run.push(&key).map(drop);
        if self.config.node_cache_capacity > 0 {
            let mut cache = NodeHandleCache::new(self.config.node_cache_capacity);
            tree.scan_cached(&mut cache, &mut append)?;
        } else {
            tree.scan(&mut append)?;
        }

        let mut writer = BufWriter::with_capacity(RUN_WRITE_BUFFER, File::create(&path)?);
        run.write_to(&mut writer)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        let len = run.len();
        sink.pool.release(run.into_storage()?.into_buffer());
        tree_pool.release(tree.into_storage()?.into_buffer());
        sink.stages.push(Stage {
            bucket,
            index,
            len,
            path,
        });
        self.counters.add_stage_flushed();

        debug!(bucket, stage = index, keys = len, "stage flushed");
        Ok(())
    }
}

/// Joins a scoped thread, turning a panic into an error.
pub(crate) fn join<T>(handle: ScopedJoinHandle<'_, Result<T>>) -> Result<T> {
    handle.join().unwrap_or_else(|panic| {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(TallyError::WorkerPanicked(message))
    })
}

/// Picks the error that caused a failed run.
///
/// A closed channel only means the other side died first, so any other
/// error is preferred.
pub(crate) fn first_cause(errors: Vec<TallyError>) -> Option<TallyError> {
    let mut closed = None;
    for err in errors {
        match err {
            TallyError::ChannelClosed { .. } => {
                closed.get_or_insert(err);
            }
            err => return Some(err),
        }
    }
    closed
}
