//! Counting distinct keys in inputs larger than memory.
//!
//! The write phase splits the input into byte ranges, parses records in
//! parallel, and routes each key by value to one of N buckets. Every bucket
//! accumulates keys in a B-tree and flushes it to a sorted run file each time
//! it holds `elements_per_stage` distinct keys. The read phase merges each
//! bucket's runs with a k-way heap merge and counts value changes. Bucket
//! value ranges are disjoint, so the per-bucket counts simply add up.

pub mod counter;
pub mod generator;
pub mod input;
pub mod merge;
pub mod parser;
pub mod partition;
pub mod progress;
pub mod reader;
pub mod stage;
pub mod writer;

pub use counter::{CountSummary, DistinctCounter};
pub use generator::{generate_ipv4_file, write_ipv4_lines};
pub use input::{FileInput, InputSource, MemoryInput, RecordScanner};
pub use merge::{count_distinct, DistinctCount, MergeIterator};
pub use parser::{Ipv4Parser, RecordParser};
pub use partition::{bucket_of, bucket_range, split_ranges};
pub use progress::{CounterSnapshot, LogReporter, PipelineCounters, ProgressReporter};
pub use reader::{BucketSummary, ReadPipeline};
pub use stage::Stage;
pub use writer::WritePipeline;
