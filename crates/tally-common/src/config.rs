//! Configuration for a counting run.

use crate::error::{Result, TallyError};
use crate::key::Key;
use crate::page::{DEFAULT_FILE_PAGE_SIZE, DEFAULT_READ_PAGE_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use sysinfo::System;

/// Bytes of node header before the key array (is_leaf, padding, count).
pub const NODE_HEADER_SIZE: usize = 8;

/// Bytes per child index in a node.
pub const CHILD_INDEX_SIZE: usize = 4;

/// Configuration for the write and read pipelines.
///
/// Every count must be at least 1 and the B-tree degree at least 2;
/// [`CountConfig::validate`] checks this once before a run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountConfig {
    /// Directory where stage run files are created.
    pub work_dir: PathBuf,
    /// File name prefix for stage run files.
    pub file_prefix: String,
    /// Number of value-range buckets (N).
    pub bucket_count: usize,
    /// Number of input scanning workers (R).
    pub scanner_count: usize,
    /// Maximum number of buckets merged concurrently (P).
    pub read_parallelism: usize,
    /// B-tree degree (t). Nodes hold up to 2t-1 keys.
    pub btree_degree: usize,
    /// Distinct keys accumulated per stage before a flush.
    pub elements_per_stage: u64,
    /// Capacity of each bucket channel in keys.
    pub channel_capacity: usize,
    /// Page size used when scanning an input byte range.
    pub read_page_size: usize,
    /// Read-ahead buffer, in records, for sequential run iteration.
    pub iterator_buffer_records: usize,
    /// Page size of the persistent storage read cache.
    pub file_page_size: usize,
    /// Node cache capacity used while scanning a tree (0 = no cache).
    pub node_cache_capacity: usize,
    /// Buffers retained per pool for reuse across stages.
    pub pool_buffers: usize,
    /// Progress report interval in milliseconds (0 = disabled).
    pub progress_interval_ms: u64,
}

impl Default for CountConfig {
    fn default() -> Self {
        let cpus = num_cpus();
        Self {
            work_dir: PathBuf::from("./data"),
            file_prefix: "stage".to_string(),
            bucket_count: 16,
            scanner_count: cpus,
            read_parallelism: cpus,
            btree_degree: 100,
            elements_per_stage: 1_000_000,
            channel_capacity: 1024,
            read_page_size: DEFAULT_READ_PAGE_SIZE,
            iterator_buffer_records: 4096,
            file_page_size: DEFAULT_FILE_PAGE_SIZE,
            node_cache_capacity: 64,
            pool_buffers: 2,
            progress_interval_ms: 1000,
        }
    }
}

impl CountConfig {
    /// Creates a config with default values rooted at `work_dir`.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            ..Default::default()
        }
    }

    /// Creates a config whose stage size is derived from available RAM.
    ///
    /// Budgets 25% of available memory across all buckets, accounting for
    /// the live tree, the tree being flushed, and the flush array. Minimum
    /// 1,000 elements per stage.
    pub fn auto_sized(work_dir: impl Into<PathBuf>) -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let mut config = Self::new(work_dir);
        let budget = sys.available_memory() / 4;
        let per_element = config.bytes_per_element(4) as u64;
        let per_bucket = budget / config.bucket_count as u64;
        config.elements_per_stage = (per_bucket / per_element.max(1)).max(1_000);
        config
    }

    /// Checks that every parameter is usable.
    pub fn validate(&self) -> Result<()> {
        let counts = [
            ("bucket_count", self.bucket_count),
            ("scanner_count", self.scanner_count),
            ("read_parallelism", self.read_parallelism),
            ("channel_capacity", self.channel_capacity),
            ("read_page_size", self.read_page_size),
            ("iterator_buffer_records", self.iterator_buffer_records),
            ("file_page_size", self.file_page_size),
        ];
        for (name, value) in counts {
            if value == 0 {
                return Err(TallyError::invalid_parameter(name, value));
            }
        }
        if self.elements_per_stage == 0 {
            return Err(TallyError::invalid_parameter("elements_per_stage", 0));
        }
        if self.btree_degree < 2 {
            return Err(TallyError::invalid_parameter(
                "btree_degree",
                self.btree_degree,
            ));
        }
        if checked_node_size(self.btree_degree, <u64 as Key>::SIZE).is_none() {
            return Err(TallyError::invalid_parameter(
                "btree_degree",
                self.btree_degree,
            ));
        }
        // Child indices are u32.
        if self.max_tree_nodes() > u32::MAX as u64 {
            return Err(TallyError::ConfigError(format!(
                "elements_per_stage {} needs more than {} tree nodes at degree {}",
                self.elements_per_stage,
                u32::MAX,
                self.btree_degree
            )));
        }
        if self.file_prefix.is_empty() {
            return Err(TallyError::ConfigError(
                "file_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the run file path for a bucket's stage.
    pub fn stage_path(&self, bucket: usize, stage: usize) -> PathBuf {
        stage_path(&self.work_dir, &self.file_prefix, bucket, stage)
    }

    /// Encoded size of one B-tree node holding keys of `key_size` bytes.
    pub fn node_size(&self, key_size: usize) -> usize {
        node_size(self.btree_degree, key_size)
    }

    /// Upper bound on the nodes a full stage tree can allocate.
    ///
    /// Every node except the root holds at least t-1 keys.
    pub fn max_tree_nodes(&self) -> u64 {
        let min_keys = (self.btree_degree.max(2) - 1) as u64;
        self.elements_per_stage.div_ceil(min_keys) + 1
    }

    /// Bytes reserved up front for one stage's flush array.
    pub fn stage_buffer_bytes(&self, key_size: usize) -> usize {
        self.elements_per_stage as usize * key_size
    }

    /// Approximate resident bytes per stage element for one bucket.
    fn bytes_per_element(&self, key_size: usize) -> usize {
        let min_keys = self.btree_degree.max(2) - 1;
        let tree = self.node_size(key_size).div_ceil(min_keys);
        2 * tree + key_size
    }
}

/// Encoded size of a B-tree node of the given degree.
///
/// Layout: 8 byte header, `2t-1` keys, `2t` u32 child indices.
pub fn node_size(degree: usize, key_size: usize) -> usize {
    NODE_HEADER_SIZE + (2 * degree - 1) * key_size + 2 * degree * CHILD_INDEX_SIZE
}

/// Encoded node size, or `None` when it overflows `usize` or the key count
/// does not fit the u32 header field.
pub fn checked_node_size(degree: usize, key_size: usize) -> Option<usize> {
    let max_keys = degree.checked_mul(2)?.checked_sub(1)?;
    if max_keys > u32::MAX as usize {
        return None;
    }
    let keys = max_keys.checked_mul(key_size)?;
    let children = degree.checked_mul(2)?.checked_mul(CHILD_INDEX_SIZE)?;
    NODE_HEADER_SIZE.checked_add(keys)?.checked_add(children)
}


/// Returns the run file path `<dir>/<prefix>_<bucket>_<stage>`.
pub fn stage_path(dir: &Path, prefix: &str, bucket: usize, stage: usize) -> PathBuf {
    dir.join(format!("{}_{}_{}", prefix, bucket, stage))
}

/// Returns the number of available CPUs.
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_config_defaults() {
        let config = CountConfig::default();
        assert_eq!(config.work_dir, PathBuf::from("./data"));
        assert_eq!(config.file_prefix, "stage");
        assert_eq!(config.bucket_count, 16);
        assert!(config.scanner_count >= 1);
        assert!(config.read_parallelism >= 1);
        assert_eq!(config.btree_degree, 100);
        assert_eq!(config.elements_per_stage, 1_000_000);
        assert_eq!(config.read_page_size, DEFAULT_READ_PAGE_SIZE);
        assert_eq!(config.file_page_size, DEFAULT_FILE_PAGE_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_new_sets_work_dir() {
        let config = CountConfig::new("/tmp/tally");
        assert_eq!(config.work_dir, PathBuf::from("/tmp/tally"));
        assert_eq!(config.btree_degree, 100);
    }

    #[test]
    fn test_validate_rejects_zero_counts() {
        for field in ["bucket_count", "scanner_count", "read_parallelism"] {
            let mut config = CountConfig::default();
            match field {
                "bucket_count" => config.bucket_count = 0,
                "scanner_count" => config.scanner_count = 0,
                _ => config.read_parallelism = 0,
            }
            let err = config.validate().unwrap_err();
            assert_eq!(err.to_string(), format!("Invalid parameter: {} = 0", field));
        }

        let config = CountConfig {
            elements_per_stage: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_degree_below_two() {
        let config = CountConfig {
            btree_degree: 1,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "Invalid parameter: btree_degree = 1");

        let config = CountConfig {
            btree_degree: 2,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_oversized_degree() {
        for degree in [usize::MAX, usize::MAX / 2 + 1, 1 << 40] {
            let config = CountConfig {
                btree_degree: degree,
                ..Default::default()
            };
            let err = config.validate().unwrap_err();
            assert!(matches!(err, TallyError::InvalidParameter { .. }), "{}", err);
        }
    }

    #[test]
    fn test_checked_node_size() {
        assert_eq!(checked_node_size(2, 4), Some(node_size(2, 4)));
        assert_eq!(checked_node_size(100, 8), Some(node_size(100, 8)));
        assert_eq!(checked_node_size(0, 4), None);
        assert_eq!(checked_node_size(usize::MAX, 1), None);
    }

    #[test]
    fn test_validate_rejects_empty_prefix() {
        let config = CountConfig {
            file_prefix: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TallyError::ConfigError(_))
        ));
    }

    #[test]
    fn test_stage_path() {
        let config = CountConfig::new("/var/tally");
        assert_eq!(
            config.stage_path(3, 7),
            PathBuf::from("/var/tally/stage_3_7")
        );
    }

    #[test]
    fn test_node_size() {
        let config = CountConfig {
            btree_degree: 2,
            ..Default::default()
        };
        // header + 3 keys * 4 + 4 children * 4
        assert_eq!(config.node_size(4), 8 + 12 + 16);

        let config = CountConfig::default();
        assert_eq!(config.node_size(4), 8 + 199 * 4 + 200 * 4);
    }

    #[test]
    fn test_max_tree_nodes() {
        let config = CountConfig {
            btree_degree: 2,
            elements_per_stage: 10,
            ..Default::default()
        };
        assert_eq!(config.max_tree_nodes(), 11);

        let config = CountConfig {
            btree_degree: 100,
            elements_per_stage: 10_000_000,
            ..Default::default()
        };
        assert_eq!(config.max_tree_nodes(), 101_012);
    }

    #[test]
    fn test_buffer_sizes() {
        let config = CountConfig {
            btree_degree: 2,
            elements_per_stage: 10,
            ..Default::default()
        };
        assert_eq!(config.stage_buffer_bytes(4), 40);
        assert_eq!(config.node_size(4), 36);
    }

    #[test]
    fn test_auto_sized() {
        let config = CountConfig::auto_sized("/tmp/auto");
        assert!(config.elements_per_stage >= 1_000);
        assert!(config.validate().is_ok() || config.max_tree_nodes() > u32::MAX as u64);
    }

    #[test]
    fn test_count_config_serde_roundtrip() {
        let original = CountConfig {
            bucket_count: 8,
            btree_degree: 16,
            progress_interval_ms: 0,
            ..CountConfig::new("/data/run")
        };
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: CountConfig = serde_json::from_str(&serialized).unwrap();

        assert_eq!(original.work_dir, deserialized.work_dir);
        assert_eq!(original.bucket_count, deserialized.bucket_count);
        assert_eq!(original.btree_degree, deserialized.btree_degree);
        assert_eq!(original.progress_interval_ms, deserialized.progress_interval_ms);
    }

    #[test]
    fn test_num_cpus() {
        assert!(num_cpus() >= 1, "Should have at least 1 CPU");
    }
}
