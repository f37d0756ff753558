//! tally common types, errors, and configuration.
//!
//! This crate provides shared definitions used across all tally components.

pub mod config;
pub mod error;
pub mod key;
pub mod page;

pub use config::CountConfig;
pub use error::{Result, TallyError};
pub use key::{Key, Record};
pub use page::{DEFAULT_FILE_PAGE_SIZE, DEFAULT_READ_PAGE_SIZE};
