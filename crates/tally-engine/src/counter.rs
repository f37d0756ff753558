//! End-to-end distinct counting.

use crate::input::{FileInput, InputSource};
use crate::parser::{Ipv4Parser, RecordParser};
use crate::progress::{with_progress, CounterSnapshot, PipelineCounters, ProgressReporter};
use crate::reader::{BucketSummary, ReadPipeline};
use crate::stage::Stage;
use crate::writer::WritePipeline;
use std::path::Path;
use std::time::{Duration, Instant};
use tally_common::{CountConfig, Result};
use tracing::info;

/// Result of a complete count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountSummary {
    /// Distinct keys in the input.
    pub unique: u64,
    /// Records parsed from the input.
    pub records: u64,
    /// Per-bucket merge totals, in bucket order.
    pub buckets: Vec<BucketSummary>,
    /// Wall time of the whole run.
    pub elapsed: Duration,
}

impl CountSummary {
    /// Total number of stage files written.
    pub fn stage_count(&self) -> usize {
        self.buckets.iter().map(|b| b.stages).sum()
    }
}

/// Counts distinct keys of an input too large for memory.
///
/// Runs the write pipeline to completion, then the read pipeline. Stage
/// files are left in the work directory.
pub struct DistinctCounter<P: RecordParser> {
    config: CountConfig,
    parser: P,
    reporter: Option<Box<dyn ProgressReporter>>,
    counters: PipelineCounters,
}

impl DistinctCounter<Ipv4Parser> {
    /// Creates a counter for newline-delimited IPv4 addresses.
    pub fn ipv4(config: CountConfig) -> Result<Self> {
        Self::new(config, Ipv4Parser)
    }
}

impl<P: RecordParser> DistinctCounter<P> {
    /// Creates a counter after validating `config`.
    pub fn new(config: CountConfig, parser: P) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            parser,
            reporter: None,
            counters: PipelineCounters::new(),
        })
    }

    /// Reports progress to `reporter` every `progress_interval_ms`.
    pub fn with_reporter(mut self, reporter: impl ProgressReporter + 'static) -> Self {
        self.reporter = Some(Box::new(reporter));
        self
    }

    pub fn config(&self) -> &CountConfig {
        &self.config
    }

    /// Returns the counters of the current or last run.
    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// Partitions `input` into per-bucket sorted runs.
    pub fn write<I: InputSource + ?Sized>(&self, input: &I) -> Result<Vec<Vec<Stage>>> {
        WritePipeline::new(&self.config, &self.parser, &self.counters).run(input)
    }

    /// Merges per-bucket runs and counts distinct keys in each bucket.
    pub fn read(&self, buckets: &[Vec<Stage>]) -> Result<Vec<BucketSummary>> {
        ReadPipeline::<P::Key>::new(&self.config, &self.counters).run(buckets)
    }

    /// Counts the distinct keys of `input`.
    pub fn count<I: InputSource + ?Sized>(&self, input: &I) -> Result<CountSummary> {
        std::fs::create_dir_all(&self.config.work_dir)?;
        self.counters.reset();
        let start = Instant::now();

        let run = || -> Result<Vec<BucketSummary>> {
            let stages = self.write(input)?;
            self.read(&stages)
        };
        let buckets = match (&self.reporter, self.config.progress_interval_ms) {
            (Some(reporter), ms) if ms > 0 => {
                with_progress(Duration::from_millis(ms), &self.counters, &**reporter, run)?
            }
            _ => run()?,
        };

        let summary = CountSummary {
            unique: buckets.iter().map(|b| b.unique).sum(),
            records: self.counters.snapshot().records_read,
            buckets,
            elapsed: start.elapsed(),
        };
        info!(
            unique = summary.unique,
            records = summary.records,
            stages = summary.stage_count(),
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "count finished"
        );
        Ok(summary)
    }

    /// Counts the distinct keys of the file at `path`.
    pub fn count_file(&self, path: impl AsRef<Path>) -> Result<CountSummary> {
        let input = FileInput::open(path)?;
        self.count(&input)
    }
}
