//! Error types for tally.

use thiserror::Error;

/// Result type alias using TallyError.
pub type Result<T> = std::result::Result<T, TallyError>;

/// Errors that can occur while counting.
///
/// Every variant is fatal to a run. A duplicate key is not an error: the
/// B-tree reports it through the return value of `put`.
#[derive(Debug, Error)]
pub enum TallyError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Storage range out of bounds: offset {offset} + {len} exceeds size {size}")]
    StorageRange { offset: u64, len: u64, size: u64 },

    #[error("Index out of bounds: {index} (len {len})")]
    OutOfBounds { index: u64, len: u64 },

    #[error("B-tree corrupted: {0}")]
    BTreeCorrupted(String),

    // Input errors
    #[error("Parse error at byte {offset}: {reason}")]
    Parse { offset: u64, reason: String },

    // Pipeline errors
    #[error("Bucket {bucket} channel closed")]
    ChannelClosed { bucket: usize },

    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TallyError {
    /// Builds an InvalidParameter error from any displayable value.
    pub fn invalid_parameter(name: &str, value: impl std::fmt::Display) -> Self {
        TallyError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: TallyError = io_err.into();
        assert!(matches!(err, TallyError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_out_of_bounds_display() {
        let err = TallyError::OutOfBounds { index: 7, len: 3 };
        assert_eq!(err.to_string(), "Index out of bounds: 7 (len 3)");
    }

    #[test]
    fn test_storage_range_display() {
        let err = TallyError::StorageRange {
            offset: 100,
            len: 8,
            size: 104,
        };
        assert_eq!(
            err.to_string(),
            "Storage range out of bounds: offset 100 + 8 exceeds size 104"
        );
    }

    #[test]
    fn test_parse_display() {
        let err = TallyError::Parse {
            offset: 42,
            reason: "octet out of range: 256".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Parse error at byte 42: octet out of range: 256"
        );
    }

    #[test]
    fn test_pipeline_errors_display() {
        let err = TallyError::ChannelClosed { bucket: 3 };
        assert_eq!(err.to_string(), "Bucket 3 channel closed");

        let err = TallyError::WorkerPanicked("scanner 1".to_string());
        assert_eq!(err.to_string(), "Worker panicked: scanner 1");
    }

    #[test]
    fn test_invalid_parameter_display() {
        let err = TallyError::invalid_parameter("btree_degree", 1);
        assert_eq!(err.to_string(), "Invalid parameter: btree_degree = 1");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<u64> {
            Ok(42)
        }

        fn returns_err() -> Result<u64> {
            Err(TallyError::Internal("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TallyError>();
    }
}
