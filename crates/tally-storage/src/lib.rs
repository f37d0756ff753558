//! Storage layer for tally.
//!
//! This crate provides:
//! - Byte storage backends: in-memory and single-page-cached files
//! - Fixed-size record arrays with buffered sequential iteration
//! - An append-only B-tree whose nodes live in a record array

mod array;
mod btree;
mod storage;

pub use array::{RecordArray, RecordIter};
pub use btree::{BTree, Node, NodeHandleCache, NodeIndex, NodeLayout, SearchPosition};
pub use storage::{FileStorage, Storage, VirtualStorage};
