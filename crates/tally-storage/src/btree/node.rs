use std::marker::PhantomData;
use tally_common::config::{node_size, CHILD_INDEX_SIZE, NODE_HEADER_SIZE};
use tally_common::{Key, Record};

/// Index of a node within a tree's node array.
pub type NodeIndex = u32;

/// Encoding parameters of a node record.
#[derive(Debug)]
pub struct NodeLayout<K> {
    /// Tree degree (t).
    pub degree: usize,
    _key: PhantomData<fn() -> K>,
}

impl<K: Key> NodeLayout<K> {
    pub fn new(degree: usize) -> Self {
        Self {
            degree,
            _key: PhantomData,
        }
    }

    /// Maximum keys per node (2t-1).
    #[inline]
    pub fn max_keys(&self) -> usize {
        2 * self.degree - 1
    }

    #[inline]
    fn children_offset(&self) -> usize {
        NODE_HEADER_SIZE + self.max_keys() * K::SIZE
    }
}

impl<K> Clone for NodeLayout<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for NodeLayout<K> {}

/// A decoded B-tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node<K> {
    pub is_leaf: bool,
    /// Sorted keys.
    pub keys: Vec<K>,
    /// Child indices; `keys.len() + 1` of them in an internal node, none in a
    /// leaf.
    pub children: Vec<NodeIndex>,
}

impl<K: Key> Node<K> {
    /// Creates a leaf holding `keys`.
    pub fn leaf(keys: Vec<K>) -> Self {
        Self {
            is_leaf: true,
            keys,
            children: Vec::new(),
        }
    }

    /// Creates an internal node.
    pub fn internal(keys: Vec<K>, children: Vec<NodeIndex>) -> Self {
        Self {
            is_leaf: false,
            keys,
            children,
        }
    }

    /// Number of live keys.
    #[inline]
    pub fn count(&self) -> usize {
        self.keys.len()
    }
}

impl<K: Key> Record for Node<K> {
    type Layout = NodeLayout<K>;

    fn encoded_size(layout: &NodeLayout<K>) -> usize {
        node_size(layout.degree, K::SIZE)
    }

    fn encode(&self, layout: &NodeLayout<K>, buf: &mut [u8]) {
        buf.fill(0);
        buf[0] = self.is_leaf as u8;
        buf[4..8].copy_from_slice(&(self.keys.len() as u32).to_le_bytes());

        for (i, key) in self.keys.iter().enumerate() {
            let start = NODE_HEADER_SIZE + i * K::SIZE;
            key.encode(&(), &mut buf[start..start + K::SIZE]);
        }

        let base = layout.children_offset();
        for (i, child) in self.children.iter().enumerate() {
            let start = base + i * CHILD_INDEX_SIZE;
            buf[start..start + CHILD_INDEX_SIZE].copy_from_slice(&child.to_le_bytes());
        }
    }

    fn decode(layout: &NodeLayout<K>, buf: &[u8]) -> Self {
        let is_leaf = buf[0] != 0;
        let count = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
        let count = count.min(layout.max_keys());

        let keys = (0..count)
            .map(|i| {
                let start = NODE_HEADER_SIZE + i * K::SIZE;
                K::decode(&(), &buf[start..start + K::SIZE])
            })
            .collect();

        let children = if is_leaf {
            Vec::new()
        } else {
            let base = layout.children_offset();
            (0..=count)
                .map(|i| {
                    let start = base + i * CHILD_INDEX_SIZE;
                    u32::from_le_bytes([
                        buf[start],
                        buf[start + 1],
                        buf[start + 2],
                        buf[start + 3],
                    ])
                })
                .collect()
        };

        Self {
            is_leaf,
            keys,
            children,
        }
    }
}
