//! Random IPv4 input generation for tests and benchmarks.

use rand::Rng;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::Ipv4Addr;
use std::path::Path;
use tally_common::Result;

/// Write buffer size for generated files.
const GENERATOR_BUFFER: usize = 64 * 1024;

/// Writes `count` random dotted-quad addresses to `writer`, one per line.
pub fn write_ipv4_lines<W: Write, R: Rng + ?Sized>(
    writer: &mut W,
    count: u64,
    rng: &mut R,
) -> Result<()> {
    for _ in 0..count {
        writeln!(writer, "{}", Ipv4Addr::from(rng.random::<u32>()))?;
    }
    Ok(())
}

/// Creates (or truncates) `path` and fills it with `count` random addresses.
pub fn generate_ipv4_file<R: Rng + ?Sized>(
    path: impl AsRef<Path>,
    count: u64,
    rng: &mut R,
) -> Result<()> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::with_capacity(GENERATOR_BUFFER, file);
    write_ipv4_lines(&mut writer, count, rng)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{Ipv4Parser, RecordParser};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::tempdir;

    #[test]
    fn test_lines_parse_back() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut out = Vec::new();
        write_ipv4_lines(&mut out, 100, &mut rng).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 100);
        for line in lines {
            Ipv4Parser.parse(0, line.as_bytes()).unwrap();
        }
    }

    #[test]
    fn test_same_seed_same_file() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        generate_ipv4_file(&a, 50, &mut StdRng::seed_from_u64(9)).unwrap();
        generate_ipv4_file(&b, 50, &mut StdRng::seed_from_u64(9)).unwrap();

        assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());
    }
}
