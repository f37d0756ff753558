//! Value-range and byte-range partitioning.
//!
//! Keys are routed to buckets by value: bucket `b` of `N` owns the ordinals
//! `v` with `floor(N * v / 2^B) == b`, where `B` is the key width. Input is
//! split by byte offset into ranges that start right after a record
//! delimiter, so every record belongs to exactly one range.

use crate::input::InputSource;
use std::ops::Range;
use tally_common::{Key, Result};

/// Record delimiter.
pub const DELIMITER: u8 = b'\n';

/// Bytes probed per read while searching for a delimiter.
const PROBE_SIZE: usize = 256;

/// Returns the bucket owning `key` among `buckets` buckets.
#[inline]
pub fn bucket_of<K: Key>(key: K, buckets: usize) -> usize {
    ((buckets as u128 * key.ordinal() as u128) >> K::BITS) as usize
}

/// Returns the range of ordinals owned by `bucket`.
///
/// The ranges of buckets `0..buckets` tile `[0, 2^BITS)` without gaps or
/// overlap. A bucket may own an empty range when `buckets > 2^BITS`.
pub fn bucket_range<K: Key>(bucket: usize, buckets: usize) -> Range<u128> {
    let universe = 1u128 << K::BITS;
    let lower = |b: usize| (b as u128 * universe).div_ceil(buckets as u128);
    lower(bucket)..lower(bucket + 1)
}

/// Splits `source` into `count` contiguous byte ranges whose boundaries fall
/// right after a delimiter.
///
/// Nominal boundaries are `i * size / count`; each is moved forward past the
/// first delimiter at or after the byte preceding it. Later ranges may be
/// empty when records are long relative to the input.
pub fn split_ranges<I: InputSource + ?Sized>(source: &I, count: usize) -> Result<Vec<Range<u64>>> {
    let size = source.size();
    let count = count.max(1);

    let mut bounds = Vec::with_capacity(count + 1);
    bounds.push(0u64);
    for i in 1..count {
        let nominal = (size as u128 * i as u128 / count as u128) as u64;
        let previous = bounds[i - 1];
        let bound = if nominal == 0 {
            0
        } else {
            next_record_start(source, nominal - 1)?
        };
        bounds.push(bound.max(previous));
    }
    bounds.push(size);

    Ok(bounds.windows(2).map(|w| w[0]..w[1]).collect())
}

/// Returns the offset just past the first delimiter at or after `from`, or
/// the source size if there is none.
fn next_record_start<I: InputSource + ?Sized>(source: &I, from: u64) -> Result<u64> {
    let size = source.size();
    let mut buf = [0u8; PROBE_SIZE];
    let mut offset = from;

    while offset < size {
        let n = source.read_at(offset, &mut buf)?;
        if n == 0 {
            break;
        }
        if let Some(pos) = buf[..n].iter().position(|&b| b == DELIMITER) {
            return Ok(offset + pos as u64 + 1);
        }
        offset += n as u64;
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::MemoryInput;

    #[test]
    fn test_bucket_of_bounds() {
        assert_eq!(bucket_of(0u32, 16), 0);
        assert_eq!(bucket_of(u32::MAX, 16), 15);
        assert_eq!(bucket_of(0x1000_0000u32, 16), 1);
        assert_eq!(bucket_of(0x0FFF_FFFFu32, 16), 0);
        assert_eq!(bucket_of(u32::MAX, 1), 0);
        assert_eq!(bucket_of(u64::MAX, 3), 2);
    }

    #[test]
    fn test_bucket_ranges_tile_universe() {
        for buckets in [1, 2, 3, 7, 16, 1000] {
            let mut expected_start = 0u128;
            for bucket in 0..buckets {
                let range = bucket_range::<u32>(bucket, buckets);
                assert_eq!(range.start, expected_start);
                expected_start = range.end;

                if !range.is_empty() {
                    assert_eq!(bucket_of(range.start as u32, buckets), bucket);
                    assert_eq!(bucket_of((range.end - 1) as u32, buckets), bucket);
                }
            }
            assert_eq!(expected_start, 1u128 << 32);
        }
    }

    #[test]
    fn test_split_ranges_align_to_records() {
        let input = MemoryInput::new("1.1.1.1\n22.22.22.22\n3.3.3.3\n44.44.44.44\n");
        let ranges = split_ranges(&input, 3).unwrap();
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges.first().unwrap().start, 0);
        assert_eq!(ranges.last().unwrap().end, input.size());

        let data = input.bytes();
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        for range in &ranges {
            if range.start > 0 && range.start < input.size() {
                assert_eq!(data[range.start as usize - 1], DELIMITER);
            }
        }
    }

    #[test]
    fn test_split_ranges_on_exact_boundary() {
        // Nominal boundary 8 is already a record start
        let input = MemoryInput::new("0.0.0.1\n0.0.0.2\n");
        let ranges = split_ranges(&input, 2).unwrap();
        assert_eq!(ranges, vec![0..8, 8..16]);
    }

    #[test]
    fn test_split_ranges_more_scanners_than_records() {
        let input = MemoryInput::new("10.0.0.1\n");
        let ranges = split_ranges(&input, 4).unwrap();
        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges[0], 0..9);
        assert!(ranges[1..].iter().all(|r| r.is_empty()));
    }

    #[test]
    fn test_split_ranges_empty_input() {
        let input = MemoryInput::new("");
        let ranges = split_ranges(&input, 3).unwrap();
        assert!(ranges.iter().all(|r| r.is_empty()));
    }
}
