//! Pipeline counters and periodic progress reporting.

use crossbeam_channel::{bounded, RecvTimeoutError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

/// Live counters shared by every pipeline thread.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    records_read: AtomicU64,
    keys_inserted: AtomicU64,
    stages_flushed: AtomicU64,
    keys_merged: AtomicU64,
    unique: AtomicU64,
}

/// Point-in-time copy of [`PipelineCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Records parsed from the input.
    pub records_read: u64,
    /// Keys newly inserted into a stage tree.
    pub keys_inserted: u64,
    /// Stage files written.
    pub stages_flushed: u64,
    /// Keys read back during merging.
    pub keys_merged: u64,
    /// Distinct keys counted by finished bucket merges.
    pub unique: u64,
}

impl PipelineCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            records_read: self.records_read.load(Ordering::Relaxed),
            keys_inserted: self.keys_inserted.load(Ordering::Relaxed),
            stages_flushed: self.stages_flushed.load(Ordering::Relaxed),
            keys_merged: self.keys_merged.load(Ordering::Relaxed),
            unique: self.unique.load(Ordering::Relaxed),
        }
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        for counter in [
            &self.records_read,
            &self.keys_inserted,
            &self.stages_flushed,
            &self.keys_merged,
            &self.unique,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub(crate) fn add_records_read(&self, n: u64) {
        self.records_read.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_keys_inserted(&self, n: u64) {
        self.keys_inserted.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_stage_flushed(&self) {
        self.stages_flushed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_keys_merged(&self, n: u64) {
        self.keys_merged.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_unique(&self, n: u64) {
        self.unique.fetch_add(n, Ordering::Relaxed);
    }
}

/// Receives periodic progress while a count runs.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, elapsed: Duration, counters: &CounterSnapshot);
}

impl<F> ProgressReporter for F
where
    F: Fn(Duration, &CounterSnapshot) + Send + Sync,
{
    fn report(&self, elapsed: Duration, counters: &CounterSnapshot) {
        self(elapsed, counters)
    }
}

/// Reports progress as `tracing` events at INFO level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn report(&self, elapsed: Duration, counters: &CounterSnapshot) {
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        info!(
            elapsed_secs = elapsed.as_secs(),
            records_read = counters.records_read,
            keys_inserted = counters.keys_inserted,
            stages_flushed = counters.stages_flushed,
            keys_merged = counters.keys_merged,
            unique = counters.unique,
            records_per_sec = (counters.records_read as f64 / secs) as u64,
            "progress"
        );
    }
}

/// Runs `work` on the calling thread while a background ticker reports
/// `counters` every `interval`. The ticker stops as soon as `work` returns.
pub(crate) fn with_progress<T, W>(
    interval: Duration,
    counters: &PipelineCounters,
    reporter: &dyn ProgressReporter,
    work: W,
) -> T
where
    W: FnOnce() -> T,
{
    let start = Instant::now();

    thread::scope(|scope| {
        let (stop, stopped) = bounded::<()>(0);
        scope.spawn(move || {
            while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(interval) {
                reporter.report(start.elapsed(), &counters.snapshot());
            }
        });

        let output = work();
        drop(stop);
        output
    })
}
