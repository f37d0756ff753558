use super::node::{Node, NodeIndex, NodeLayout};
use crate::array::RecordArray;
use crate::storage::Storage;
use std::sync::Arc;
use tally_buffer::NodeCache;
use tally_common::{Key, Result, TallyError};
use tracing::trace;

/// Cache of decoded nodes keyed by node index.
pub type NodeHandleCache<K> = NodeCache<NodeIndex, Arc<Node<K>>>;

/// Where a search ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchPosition {
    /// Node the search stopped at.
    pub node: NodeIndex,
    /// Position of the key within the node, or where it would be inserted.
    pub position: usize,
    /// Whether the key is present.
    pub found: bool,
}

/// A duplicate-rejecting ordered set of keys stored as B-tree nodes in a
/// [`RecordArray`].
pub struct BTree<K: Key, S: Storage> {
    nodes: RecordArray<Node<K>, S>,
    degree: usize,
    /// Number of distinct keys inserted.
    count: u64,
    root: Option<NodeIndex>,
}

impl<K: Key, S: Storage> BTree<K, S> {
    /// Creates an empty tree of degree `degree` over `storage`.
    ///
    /// Existing bytes in `storage` are treated as spare capacity.
    pub fn new(storage: S, degree: usize) -> Result<Self> {
        if degree < 2 {
            return Err(TallyError::invalid_parameter("btree_degree", degree));
        }

        Ok(Self {
            nodes: RecordArray::new(storage, NodeLayout::new(degree))?,
            degree,
            count: 0,
            root: None,
        })
    }

    /// Returns the degree (t).
    #[inline]
    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Returns the number of keys in the tree.
    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns the number of allocated nodes.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the root node index, if any key was inserted.
    #[inline]
    pub fn root(&self) -> Option<NodeIndex> {
        self.root
    }

    #[inline]
    fn max_keys(&self) -> usize {
        2 * self.degree - 1
    }

    /// Reads and decodes node `index`.
    pub fn node(&self, index: NodeIndex) -> Result<Node<K>> {
        self.nodes.get(index as usize)
    }

    fn write_node(&mut self, index: NodeIndex, node: &Node<K>) -> Result<()> {
        self.nodes.set(index as usize, node)
    }

    fn append_node(&mut self, node: &Node<K>) -> Result<NodeIndex> {
        let index = self.nodes.push(node)?;
        NodeIndex::try_from(index)
            .map_err(|_| TallyError::BTreeCorrupted(format!("node index {} overflows u32", index)))
    }

    fn child_at(node: &Node<K>, position: usize) -> Result<NodeIndex> {
        node.children.get(position).copied().ok_or_else(|| {
            TallyError::BTreeCorrupted(format!(
                "internal node with {} keys has no child {}",
                node.count(),
                position
            ))
        })
    }

    /// Finds the node holding `key`, or the leaf where it would be inserted.
    ///
    /// Returns `None` on an empty tree.
    pub fn search(&self, key: &K) -> Result<Option<SearchPosition>> {
        let Some(mut index) = self.root else {
            return Ok(None);
        };

        loop {
            let node = self.node(index)?;
            match node.keys.binary_search(key) {
                Ok(position) => {
                    return Ok(Some(SearchPosition {
                        node: index,
                        position,
                        found: true,
                    }))
                }
                Err(position) if node.is_leaf => {
                    return Ok(Some(SearchPosition {
                        node: index,
                        position,
                        found: false,
                    }))
                }
                Err(position) => index = Self::child_at(&node, position)?,
            }
        }
    }

    /// Checks whether `key` is in the tree.
    pub fn contains(&self, key: &K) -> Result<bool> {
        Ok(self.search(key)?.map(|p| p.found).unwrap_or(false))
    }

    /// Inserts `key`. Returns false, leaving the tree untouched, if it is
    /// already present.
    pub fn put(&mut self, key: K) -> Result<bool> {
        let Some(root) = self.root else {
            let index = self.append_node(&Node::leaf(vec![key]))?;
            self.root = Some(index);
            self.count = 1;
            return Ok(true);
        };

        let position = match self.search(&key)? {
            Some(position) => position,
            None => return Err(TallyError::BTreeCorrupted("rooted tree found nothing".into())),
        };
        if position.found {
            return Ok(false);
        }

        let mut leaf = self.node(position.node)?;
        if leaf.count() < self.max_keys() {
            leaf.keys.insert(position.position, key);
            self.write_node(position.node, &leaf)?;
            self.count += 1;
            return Ok(true);
        }

        let mut root = root;
        if self.node(root)?.count() == self.max_keys() {
            let new_root = self.append_node(&Node::internal(Vec::new(), vec![root]))?;
            self.split_child(new_root, 0)?;
            self.root = Some(new_root);
            root = new_root;
            trace!(root, nodes = self.nodes.len(), "b-tree root split");
        }

        self.insert_non_full(root, key)?;
        self.count += 1;
        Ok(true)
    }

    /// Inserts into the subtree at `index`, whose root is known not to be
    /// full. Full children are split before descending into them.
    fn insert_non_full(&mut self, index: NodeIndex, key: K) -> Result<()> {
        let mut node = self.node(index)?;
        let mut position = node.keys.partition_point(|k| *k < key);

        if node.is_leaf {
            node.keys.insert(position, key);
            return self.write_node(index, &node);
        }

        let child = self.node(Self::child_at(&node, position)?)?;
        if child.count() == self.max_keys() {
            self.split_child(index, position)?;
            node = self.node(index)?;
            if key > node.keys[position] {
                position += 1;
            }
        }

        self.insert_non_full(Self::child_at(&node, position)?, key)
    }

    /// Splits the full child at `position` of `parent` around its median.
    ///
    /// The child keeps the lower t-1 keys, a new node appended to the array
    /// takes the upper t-1, and the median moves up into the parent.
    fn split_child(&mut self, parent_index: NodeIndex, position: usize) -> Result<()> {
        let t = self.degree;
        let mut parent = self.node(parent_index)?;
        let child_index = Self::child_at(&parent, position)?;
        let mut child = self.node(child_index)?;

        let upper_keys = child.keys.split_off(t);
        let median = child.keys.pop().ok_or_else(|| {
            TallyError::BTreeCorrupted(format!("split of underfull node {}", child_index))
        })?;
        let upper_children = if child.is_leaf {
            Vec::new()
        } else {
            child.children.split_off(t)
        };

        let sibling = Node {
            is_leaf: child.is_leaf,
            keys: upper_keys,
            children: upper_children,
        };
        let sibling_index = self.append_node(&sibling)?;
        self.write_node(child_index, &child)?;

        parent.keys.insert(position, median);
        parent.children.insert(position + 1, sibling_index);
        self.write_node(parent_index, &parent)
    }

    /// Visits every key in ascending order.
    pub fn scan<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(K) -> Result<()>,
    {
        match self.root {
            Some(root) => self.scan_node(root, &mut visit),
            None => Ok(()),
        }
    }

    fn scan_node<F>(&self, index: NodeIndex, visit: &mut F) -> Result<()>
    where
        F: FnMut(K) -> Result<()>,
    {
        let node = self.node(index)?;
        self.scan_entries(&node, visit, |tree, child, visit| tree.scan_node(child, visit))
    }

    /// Visits every key in ascending order, looking nodes up through `cache`.
    ///
    /// Nodes on the path from the root to the current node stay pinned for
    /// as long as the scan is below them.
    pub fn scan_cached<F>(&self, cache: &mut NodeHandleCache<K>, mut visit: F) -> Result<()>
    where
        F: FnMut(K) -> Result<()>,
    {
        match self.root {
            Some(root) => self.scan_node_cached(root, cache, &mut visit),
            None => Ok(()),
        }
    }

    fn scan_node_cached<F>(
        &self,
        index: NodeIndex,
        cache: &mut NodeHandleCache<K>,
        visit: &mut F,
    ) -> Result<()>
    where
        F: FnMut(K) -> Result<()>,
    {
        let node = match cache.get(&index) {
            Some(node) => node,
            None => {
                let node = Arc::new(self.node(index)?);
                cache.insert(index, Arc::clone(&node));
                node
            }
        };
        let pinned = cache.pin(&index).is_some();

        let result = self.scan_entries(&node, visit, |tree, child, visit| {
            tree.scan_node_cached(child, cache, visit)
        });

        if pinned {
            cache.unpin(&index);
        }
        result
    }

    /// In-order walk of one node: child 0, key 0, child 1, ..., child n.
    fn scan_entries<F, D>(&self, node: &Node<K>, visit: &mut F, mut descend: D) -> Result<()>
    where
        F: FnMut(K) -> Result<()>,
        D: FnMut(&Self, NodeIndex, &mut F) -> Result<()>,
    {
        if node.is_leaf {
            return node.keys.iter().try_for_each(|key| visit(*key));
        }

        for (position, key) in node.keys.iter().enumerate() {
            descend(self, Self::child_at(node, position)?, visit)?;
            visit(*key)?;
        }
        descend(self, Self::child_at(node, node.count())?, visit)
    }

    /// Returns the smallest key.
    pub fn min(&self) -> Result<Option<K>> {
        self.edge_key(|node| (0, node.keys.first().copied()))
    }

    /// Returns the largest key.
    pub fn max(&self) -> Result<Option<K>> {
        self.edge_key(|node| (node.count(), node.keys.last().copied()))
    }

    /// Walks down one edge of the tree. `pick` returns the child position to
    /// follow and the key to report if the node is a leaf.
    fn edge_key<P>(&self, pick: P) -> Result<Option<K>>
    where
        P: Fn(&Node<K>) -> (usize, Option<K>),
    {
        let Some(mut index) = self.root else {
            return Ok(None);
        };

        loop {
            let node = self.node(index)?;
            let (child, key) = pick(&node);
            if node.is_leaf {
                return Ok(key);
            }
            index = Self::child_at(&node, child)?;
        }
    }

    /// Returns the number of levels; 0 for an empty tree.
    pub fn height(&self) -> Result<usize> {
        let Some(mut index) = self.root else {
            return Ok(0);
        };

        let mut height = 1;
        loop {
            let node = self.node(index)?;
            if node.is_leaf {
                return Ok(height);
            }
            index = Self::child_at(&node, 0)?;
            height += 1;
        }
    }

    /// Consumes the tree and returns its node storage for reuse.
    pub fn into_storage(self) -> Result<S> {
        self.nodes.into_storage()
    }
}
