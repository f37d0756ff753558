//! Append-only B-tree over a record array.
//!
//! Nodes are fixed-size records addressed by their index in the tree's node
//! array. Children are stored as `u32` indices, never as pointers, so the
//! node array can grow or move without invalidating anything.
//!
//! Node layout for degree `t` and key size `k`:
//! ```text
//! +----------------------+ 0
//! | is_leaf: u8          |
//! | reserved: [u8; 3]    |
//! | count: u32 (LE)      | 8 (NODE_HEADER_SIZE)
//! +----------------------+
//! | keys: [k; 2t-1]      |   big-endian keys, first `count` live
//! +----------------------+
//! | children: [u32; 2t]  |   first `count + 1` live in internal nodes
//! +----------------------+
//! ```
//!
//! The tree only ever grows: splits append a node, nothing is deleted or
//! recycled. A stage tree is filled once, scanned once in order, and then
//! its storage is handed back for reuse.

mod node;
mod tree;

pub use node::{Node, NodeIndex, NodeLayout};
pub use tree::{BTree, NodeHandleCache, SearchPosition};
