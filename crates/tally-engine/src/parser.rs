//! Record parsers.

use tally_common::{Key, Result, TallyError};

/// Turns one delimited record into a key.
pub trait RecordParser: Send + Sync {
    type Key: Key;

    /// Parses `record`, which started at byte `offset` of the input.
    fn parse(&self, offset: u64, record: &[u8]) -> Result<Self::Key>;
}

/// Parses dotted-quad IPv4 addresses into big-endian `u32` keys.
///
/// Each octet is a non-empty run of decimal digits with value at most 255;
/// leading zeros are accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ipv4Parser;

impl RecordParser for Ipv4Parser {
    type Key = u32;

    fn parse(&self, offset: u64, record: &[u8]) -> Result<u32> {
        let fail = |reason: String| TallyError::Parse { offset, reason };

        let mut value = 0u32;
        let mut octets = 0;
        for part in record.split(|&b| b == b'.') {
            if octets == 4 {
                return Err(fail(format!(
                    "more than four octets in {:?}",
                    String::from_utf8_lossy(record)
                )));
            }
            let octet = parse_octet(part).ok_or_else(|| {
                fail(format!(
                    "invalid octet {:?} in {:?}",
                    String::from_utf8_lossy(part),
                    String::from_utf8_lossy(record)
                ))
            })?;
            value = (value << 8) | octet as u32;
            octets += 1;
        }

        if octets != 4 {
            return Err(fail(format!(
                "expected four octets in {:?}",
                String::from_utf8_lossy(record)
            )));
        }
        Ok(value)
    }
}

fn parse_octet(digits: &[u8]) -> Option<u8> {
    if digits.is_empty() {
        return None;
    }
    let mut value = 0u16;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value * 10 + (b - b'0') as u16;
        if value > 255 {
            return None;
        }
    }
    Some(value as u8)
}
