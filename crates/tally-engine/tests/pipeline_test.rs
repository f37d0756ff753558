//! End-to-end counting tests across the write and read pipelines.

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::Path;
use tally_common::CountConfig;
use tally_engine::{generate_ipv4_file, DistinctCounter, MemoryInput, Stage};
use tempfile::tempdir;

fn small_config(dir: &Path) -> CountConfig {
    CountConfig {
        bucket_count: 1,
        scanner_count: 1,
        read_parallelism: 1,
        btree_degree: 2,
        elements_per_stage: 2,
        channel_capacity: 8,
        progress_interval_ms: 0,
        ..CountConfig::new(dir)
    }
}

fn lines(keys: &[u32]) -> String {
    keys.iter()
        .map(|&k| format!("{}\n", Ipv4Addr::from(k)))
        .collect()
}

#[test]
fn test_worked_scenario() {
    let dir = tempdir().unwrap();
    let counter = DistinctCounter::ipv4(small_config(dir.path())).unwrap();
    let input = MemoryInput::new(lines(&[10, 20, 10, 5, 30, 20]));

    let stages = counter.write(&input).unwrap();
    let runs: Vec<Vec<u32>> = stages[0]
        .iter()
        .map(|s: &Stage| s.read_all(4096).unwrap())
        .collect();
    assert_eq!(runs, vec![vec![10, 20], vec![5, 10], vec![20, 30]]);

    let buckets = counter.read(&stages).unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].merged, 6);
    assert_eq!(buckets[0].unique, 4);
}

#[test]
fn test_count_matches_worked_scenario() {
    let dir = tempdir().unwrap();
    let counter = DistinctCounter::ipv4(small_config(dir.path())).unwrap();

    let summary = counter
        .count(&MemoryInput::new(lines(&[10, 20, 10, 5, 30, 20])))
        .unwrap();
    assert_eq!(summary.unique, 4);
    assert_eq!(summary.records, 6);
    assert_eq!(summary.stage_count(), 3);
}

#[test]
fn test_empty_input() {
    let dir = tempdir().unwrap();
    let config = CountConfig {
        bucket_count: 4,
        ..small_config(dir.path())
    };
    let counter = DistinctCounter::ipv4(config).unwrap();

    let summary = counter.count(&MemoryInput::new("")).unwrap();
    assert_eq!(summary.unique, 0);
    assert_eq!(summary.stage_count(), 0);
    assert_eq!(summary.buckets.len(), 4);
    assert!(summary.buckets.iter().all(|b| b.unique == 0 && b.stages == 0));
}

#[test]
fn test_all_identical_input() {
    let dir = tempdir().unwrap();
    let counter = DistinctCounter::ipv4(small_config(dir.path())).unwrap();

    let summary = counter.count(&MemoryInput::new(lines(&[42; 100]))).unwrap();
    assert_eq!(summary.unique, 1);
    assert_eq!(summary.records, 100);
    assert_eq!(summary.stage_count(), 1);
}

#[test]
fn test_crlf_and_blank_lines() {
    let dir = tempdir().unwrap();
    let counter = DistinctCounter::ipv4(small_config(dir.path())).unwrap();

    let summary = counter
        .count(&MemoryInput::new("1.1.1.1\r\n\r\n\n2.2.2.2\r\n1.1.1.1"))
        .unwrap();
    assert_eq!(summary.unique, 2);
    assert_eq!(summary.records, 3);
}

#[test]
fn test_generated_file_round_trip() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("addresses.txt");
    let mut rng = StdRng::seed_from_u64(42);
    generate_ipv4_file(&input, 20_000, &mut rng).unwrap();

    let expected: HashSet<Ipv4Addr> = std::fs::read_to_string(&input)
        .unwrap()
        .lines()
        .map(|l| l.parse().unwrap())
        .collect();

    let config = CountConfig {
        bucket_count: 8,
        scanner_count: 3,
        read_parallelism: 3,
        btree_degree: 16,
        elements_per_stage: 1_000,
        read_page_size: 4096,
        ..CountConfig::new(dir.path().join("work"))
    };
    let summary = DistinctCounter::ipv4(config)
        .unwrap()
        .count_file(&input)
        .unwrap();

    assert_eq!(summary.records, 20_000);
    assert_eq!(summary.unique, expected.len() as u64);
    assert!(summary.stage_count() >= 8);
}

#[test]
fn test_dense_duplicates_across_buckets() {
    let dir = tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    let keys: Vec<u32> = (0..5_000)
        .map(|_| rng.random_range(0..500u32) << 23)
        .collect();
    let expected = keys.iter().collect::<HashSet<_>>().len() as u64;

    let config = CountConfig {
        bucket_count: 5,
        scanner_count: 4,
        read_parallelism: 2,
        btree_degree: 3,
        elements_per_stage: 7,
        ..small_config(dir.path())
    };
    let summary = DistinctCounter::ipv4(config)
        .unwrap()
        .count(&MemoryInput::new(lines(&keys)))
        .unwrap();
    assert_eq!(summary.unique, expected);
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_count_independent_of_layout(
        keys in prop::collection::vec(0u32..400, 0..300),
        buckets in 1usize..6,
        scanners in 1usize..5,
        parallelism in 1usize..4,
        degree in 2usize..5,
        threshold in 1u64..20,
    ) {
        let dir = tempdir().unwrap();
        // Spread keys over the whole universe so every bucket gets some
        let keys: Vec<u32> = keys.iter().map(|k| k.wrapping_mul(10_737_418)).collect();
        let expected = keys.iter().collect::<HashSet<_>>().len() as u64;

        let config = CountConfig {
            bucket_count: buckets,
            scanner_count: scanners,
            read_parallelism: parallelism,
            btree_degree: degree,
            elements_per_stage: threshold,
            ..small_config(dir.path())
        };
        let summary = DistinctCounter::ipv4(config)
            .unwrap()
            .count(&MemoryInput::new(lines(&keys)))
            .unwrap();

        prop_assert_eq!(summary.unique, expected);
        prop_assert_eq!(summary.records, keys.len() as u64);
        prop_assert_eq!(summary.buckets.len(), buckets);
    }
}
