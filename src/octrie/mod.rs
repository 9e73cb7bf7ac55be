//! Dynamic octrie: a B-tree whose per-node search is a fusion node.
//!
//! Every node holds up to 8 sorted keys and, when internal, up to 9
//! children. Instead of binary-searching inside a node, each node carries a
//! fusion-node summary of its keys, so the descent decides the child in a
//! constant number of word operations.
//!
//! Nodes live in an arena (`Vec<Node>`) and refer to each other through
//! 32-bit handles; the parent link plus the node's slot index in its parent
//! keep upward navigation O(1) without owning pointers in both directions.
//! Freed slots are recycled through a free list.

use crate::fusion::{self, Summary};
use crate::PredResult;

/// Keys per node before a split.
const MAX_KEYS: usize = 8;
/// Minimum keys in any non-root node.
const MIN_KEYS: usize = 4;

/// Arena handle of an octrie node.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct NodeId(u32);

impl NodeId {
    const NULL: NodeId = NodeId(u32::MAX);

    #[inline]
    fn is_null(self) -> bool {
        self.0 == u32::MAX
    }

    #[inline]
    fn index(self) -> usize {
        debug_assert!(!self.is_null());
        self.0 as usize
    }
}

struct Node {
    /// Sorted keys; slot 8 is only occupied transiently during a split.
    keys: [u64; MAX_KEYS + 1],
    /// Children (internal nodes only); slot 9 is transient like `keys[8]`.
    children: [NodeId; MAX_KEYS + 2],
    parent: NodeId,
    /// This node's child slot within its parent.
    pos_in_parent: u8,
    len: u8,
    leaf: bool,
    summary: Summary,
}

impl Node {
    fn new(leaf: bool) -> Self {
        Self {
            keys: [0; MAX_KEYS + 1],
            children: [NodeId::NULL; MAX_KEYS + 2],
            parent: NodeId::NULL,
            pos_in_parent: 0,
            len: 0,
            leaf,
            summary: Summary::default(),
        }
    }
}

/// A dynamic predecessor set over `u64` keys, shaped as a B-tree of
/// branching factor 9 with fusion-node in-node search.
///
/// Duplicate insertions are no-ops; removals are supported.
pub struct Octrie {
    nodes: Vec<Node>,
    free: Vec<u32>,
    root: NodeId,
    len: usize,
}

impl Default for Octrie {
    fn default() -> Self {
        Self::new()
    }
}

impl Octrie {
    /// Creates an empty octrie.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: NodeId::NULL,
            len: 0,
        }
    }

    /// Builds an octrie from keys that must be sorted ascending (duplicates
    /// are tolerated and skipped).
    pub fn from_sorted(keys: &[u64]) -> Self {
        assert!(
            keys.windows(2).all(|w| w[0] <= w[1]),
            "keys must be sorted ascending"
        );
        let mut trie = Self::new();
        for &k in keys {
            trie.insert(k);
        }
        trie
    }

    /// Number of keys stored.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the set is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Approximate heap usage in bytes.
    pub fn memory_usage(&self) -> usize {
        self.nodes.capacity() * std::mem::size_of::<Node>() + self.free.capacity() * 4
    }

    #[inline]
    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    #[inline]
    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        if let Some(slot) = self.free.pop() {
            self.nodes[slot as usize] = node;
            NodeId(slot)
        } else {
            assert!(self.nodes.len() < u32::MAX as usize, "octrie arena overflow");
            self.nodes.push(node);
            NodeId((self.nodes.len() - 1) as u32)
        }
    }

    fn release(&mut self, id: NodeId) {
        self.free.push(id.0);
    }

    /// Rebuilds a node's fusion summary after its keys changed.
    fn refresh(&mut self, id: NodeId) {
        let node = self.node_mut(id);
        let n = node.len as usize;
        node.summary = if n > 0 {
            fusion::construct(&node.keys[..n])
        } else {
            Summary::default()
        };
    }

    /// Points `parent.children[slot]` at `child` and fixes the back links.
    fn link_child(&mut self, parent: NodeId, slot: usize, child: NodeId) {
        self.node_mut(parent).children[slot] = child;
        let c = self.node_mut(child);
        c.parent = parent;
        c.pos_in_parent = slot as u8;
    }

    /// Re-derives `pos_in_parent` for `parent`'s children in `range` after
    /// its child array shifted.
    fn relink_children(&mut self, parent: NodeId, range: std::ops::Range<usize>) {
        for slot in range {
            let child = self.node(parent).children[slot];
            self.link_child(parent, slot, child);
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Predecessor of `x`: the largest stored key `<= x`.
    ///
    /// Returns `{true, key}` when one exists, `{false, 0}` when `x` precedes
    /// every stored key, and `{false, 1}` on an empty set.
    pub fn predecessor(&self, x: u64) -> PredResult {
        if self.root.is_null() {
            return PredResult::none(1);
        }
        let mut best: Option<u64> = None;
        let mut id = self.root;
        loop {
            let node = self.node(id);
            let n = node.len as usize;
            let r = fusion::predecessor(&node.keys[..n], x, node.summary);
            let slot = if r.exists {
                let k = node.keys[r.pos as usize];
                if k == x {
                    return PredResult::found(x);
                }
                // A tighter predecessor can only live right of this key.
                best = Some(k);
                r.pos as usize + 1
            } else {
                0
            };
            if node.leaf {
                break;
            }
            id = node.children[slot];
        }
        match best {
            Some(k) => PredResult::found(k),
            None => PredResult::none(0),
        }
    }

    /// Whether `x` is stored.
    pub fn contains(&self, x: u64) -> bool {
        let r = self.predecessor(x);
        r.exists && r.pos == x
    }

    // =========================================================================
    // Insertion
    // =========================================================================

    /// Inserts `x`. Re-inserting a present key is a no-op.
    pub fn insert(&mut self, x: u64) {
        if self.root.is_null() {
            let mut node = Node::new(true);
            node.keys[0] = x;
            node.len = 1;
            node.summary = fusion::construct(&node.keys[..1]);
            self.root = self.alloc(node);
            self.len = 1;
            return;
        }

        let mut id = self.root;
        loop {
            let node = self.node(id);
            let n = node.len as usize;
            let r = fusion::predecessor(&node.keys[..n], x, node.summary);
            let rank = r.pos as usize;
            if r.exists && node.keys[rank] == x {
                return;
            }
            let slot = if r.exists { rank + 1 } else { 0 };
            if node.leaf {
                let leaf = self.node_mut(id);
                let n = leaf.len as usize;
                leaf.keys.copy_within(slot..n, slot + 1);
                leaf.keys[slot] = x;
                leaf.len += 1;
                self.len += 1;
                if n + 1 > MAX_KEYS {
                    self.split(id);
                } else {
                    self.refresh(id);
                }
                return;
            }
            id = node.children[slot];
        }
    }

    /// Splits a node that overflowed to 9 keys around its median, pushing
    /// the median into the parent (cascading as needed).
    fn split(&mut self, id: NodeId) {
        const MID: usize = MAX_KEYS / 2;
        let leaf = self.node(id).leaf;
        let median = self.node(id).keys[MID];

        // Upper half moves into a fresh right sibling.
        let mut right = Node::new(leaf);
        right.len = (MAX_KEYS - MID) as u8;
        for i in 0..MAX_KEYS - MID {
            right.keys[i] = self.node(id).keys[MID + 1 + i];
        }
        if !leaf {
            for i in 0..MAX_KEYS + 1 - MID {
                right.children[i] = self.node(id).children[MID + 1 + i];
            }
        }
        right.summary = fusion::construct(&right.keys[..right.len as usize]);
        let right_id = self.alloc(right);
        if !leaf {
            self.relink_children(right_id, 0..MAX_KEYS + 1 - MID);
        }

        self.node_mut(id).len = MID as u8;
        self.refresh(id);

        let parent = self.node(id).parent;
        if parent.is_null() {
            let mut root = Node::new(false);
            root.keys[0] = median;
            root.len = 1;
            root.summary = fusion::construct(&root.keys[..1]);
            let root_id = self.alloc(root);
            self.link_child(root_id, 0, id);
            self.link_child(root_id, 1, right_id);
            self.root = root_id;
            return;
        }

        let pos = self.node(id).pos_in_parent as usize;
        let pn = self.node(parent).len as usize;
        {
            let p = self.node_mut(parent);
            p.keys.copy_within(pos..pn, pos + 1);
            p.keys[pos] = median;
            p.children.copy_within(pos + 1..pn + 1, pos + 2);
            p.len += 1;
        }
        self.link_child(parent, pos + 1, right_id);
        self.relink_children(parent, pos + 2..pn + 2);
        if pn + 1 > MAX_KEYS {
            self.split(parent);
        } else {
            self.refresh(parent);
        }
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Removes `x`; returns whether a key was removed.
    pub fn remove(&mut self, x: u64) -> bool {
        if self.root.is_null() {
            return false;
        }

        // Locate the node and rank holding x.
        let mut id = self.root;
        let (hold_id, hold_rank) = loop {
            let node = self.node(id);
            let n = node.len as usize;
            let r = fusion::predecessor(&node.keys[..n], x, node.summary);
            if r.exists && node.keys[r.pos as usize] == x {
                break (id, r.pos as usize);
            }
            if node.leaf {
                return false;
            }
            id = node.children[if r.exists { r.pos as usize + 1 } else { 0 }];
        };

        // Deleting from an internal node: overwrite with the rightmost key
        // of the left subtree, then delete that key from its leaf instead.
        let (leaf_id, leaf_rank) = if self.node(hold_id).leaf {
            (hold_id, hold_rank)
        } else {
            let mut cur = self.node(hold_id).children[hold_rank];
            while !self.node(cur).leaf {
                let node = self.node(cur);
                cur = node.children[node.len as usize];
            }
            let last = self.node(cur).len as usize - 1;
            let repl = self.node(cur).keys[last];
            self.node_mut(hold_id).keys[hold_rank] = repl;
            self.refresh(hold_id);
            (cur, last)
        };

        {
            let node = self.node_mut(leaf_id);
            let n = node.len as usize;
            node.keys.copy_within(leaf_rank + 1..n, leaf_rank);
            node.len -= 1;
        }
        self.len -= 1;

        if leaf_id == self.root {
            if self.node(leaf_id).len == 0 {
                self.release(leaf_id);
                self.root = NodeId::NULL;
            } else {
                self.refresh(leaf_id);
            }
        } else if (self.node(leaf_id).len as usize) < MIN_KEYS {
            self.rebalance(leaf_id);
        } else {
            self.refresh(leaf_id);
        }
        true
    }

    /// Restores minimum occupancy of an underfull non-root node, either by
    /// borrowing a key through the parent separator or by merging with a
    /// sibling.
    fn rebalance(&mut self, id: NodeId) {
        let parent = self.node(id).parent;
        let pos = self.node(id).pos_in_parent as usize;
        let pn = self.node(parent).len as usize;

        if pos > 0 {
            let left = self.node(parent).children[pos - 1];
            if self.node(left).len as usize > MIN_KEYS {
                self.rotate_from_left(parent, pos, left, id);
                return;
            }
        }
        if pos < pn {
            let right = self.node(parent).children[pos + 1];
            if self.node(right).len as usize > MIN_KEYS {
                self.rotate_from_right(parent, pos, id, right);
                return;
            }
        }

        if pos > 0 {
            let left = self.node(parent).children[pos - 1];
            self.merge(parent, pos - 1, left, id);
        } else {
            let right = self.node(parent).children[pos + 1];
            self.merge(parent, pos, id, right);
        }
    }

    /// Rotates the left sibling's last key through the parent separator into
    /// the front of `id`.
    fn rotate_from_left(&mut self, parent: NodeId, pos: usize, left: NodeId, id: NodeId) {
        let sep = self.node(parent).keys[pos - 1];
        let ln = self.node(left).len as usize;
        let moved_key = self.node(left).keys[ln - 1];
        let leaf = self.node(left).leaf;
        let moved_child = if leaf {
            NodeId::NULL
        } else {
            self.node(left).children[ln]
        };

        {
            let node = self.node_mut(id);
            let n = node.len as usize;
            node.keys.copy_within(0..n, 1);
            node.keys[0] = sep;
            node.len += 1;
            if !leaf {
                node.children.copy_within(0..n + 1, 1);
            }
        }
        if !leaf {
            self.link_child(id, 0, moved_child);
            let count = self.node(id).len as usize + 1;
            self.relink_children(id, 1..count);
        }
        self.node_mut(left).len -= 1;
        self.node_mut(parent).keys[pos - 1] = moved_key;
        self.refresh(left);
        self.refresh(id);
        self.refresh(parent);
    }

    /// Rotates the right sibling's first key through the parent separator
    /// onto the back of `id`.
    fn rotate_from_right(&mut self, parent: NodeId, pos: usize, id: NodeId, right: NodeId) {
        let sep = self.node(parent).keys[pos];
        let rn = self.node(right).len as usize;
        let moved_key = self.node(right).keys[0];
        let leaf = self.node(right).leaf;
        let moved_child = if leaf {
            NodeId::NULL
        } else {
            self.node(right).children[0]
        };

        {
            let node = self.node_mut(id);
            let n = node.len as usize;
            node.keys[n] = sep;
            node.len += 1;
        }
        if !leaf {
            let slot = self.node(id).len as usize;
            self.link_child(id, slot, moved_child);
        }
        {
            let node = self.node_mut(right);
            node.keys.copy_within(1..rn, 0);
            node.len -= 1;
            if !leaf {
                node.children.copy_within(1..rn + 1, 0);
            }
        }
        if !leaf {
            self.relink_children(right, 0..rn);
        }
        self.node_mut(parent).keys[pos] = moved_key;
        self.refresh(right);
        self.refresh(id);
        self.refresh(parent);
    }

    /// Merges `b` into `a` around the parent separator at `sep_pos`,
    /// cascading the parent's own underflow upward.
    fn merge(&mut self, parent: NodeId, sep_pos: usize, a: NodeId, b: NodeId) {
        let sep = self.node(parent).keys[sep_pos];
        let an = self.node(a).len as usize;
        let bn = self.node(b).len as usize;
        let leaf = self.node(a).leaf;
        debug_assert!(an + 1 + bn <= MAX_KEYS);

        for i in 0..bn {
            let k = self.node(b).keys[i];
            self.node_mut(a).keys[an + 1 + i] = k;
        }
        if !leaf {
            for i in 0..bn + 1 {
                let c = self.node(b).children[i];
                self.node_mut(a).children[an + 1 + i] = c;
            }
        }
        {
            let node = self.node_mut(a);
            node.keys[an] = sep;
            node.len = (an + 1 + bn) as u8;
        }
        if !leaf {
            self.relink_children(a, an + 1..an + 2 + bn);
        }
        self.refresh(a);
        self.release(b);

        let pn = self.node(parent).len as usize;
        {
            let p = self.node_mut(parent);
            p.keys.copy_within(sep_pos + 1..pn, sep_pos);
            p.children.copy_within(sep_pos + 2..pn + 1, sep_pos + 1);
            p.len -= 1;
        }
        self.relink_children(parent, sep_pos + 1..pn);

        if parent == self.root {
            if self.node(parent).len == 0 {
                self.release(parent);
                self.root = a;
                let root = self.node_mut(a);
                root.parent = NodeId::NULL;
                root.pos_in_parent = 0;
            } else {
                self.refresh(parent);
            }
        } else if (self.node(parent).len as usize) < MIN_KEYS {
            self.rebalance(parent);
        } else {
            self.refresh(parent);
        }
    }
}

#[cfg(test)]
impl Octrie {
    /// Verifies the full B-tree shape: sorted keys, separator bounds,
    /// occupancy, parent links and uniform leaf depth.
    fn check_invariants(&self) {
        if self.root.is_null() {
            assert_eq!(self.len, 0);
            return;
        }
        let mut leaf_depths = Vec::new();
        let mut count = 0usize;
        self.check_node(self.root, None, None, 0, &mut leaf_depths, &mut count);
        assert_eq!(count, self.len, "stored key count mismatch");
        assert!(
            leaf_depths.windows(2).all(|w| w[0] == w[1]),
            "leaves must share a depth: {leaf_depths:?}"
        );
    }

    fn check_node(
        &self,
        id: NodeId,
        lower: Option<u64>,
        upper: Option<u64>,
        depth: usize,
        leaf_depths: &mut Vec<usize>,
        count: &mut usize,
    ) {
        let node = self.node(id);
        let n = node.len as usize;
        *count += n;

        assert!(n <= MAX_KEYS);
        if id != self.root {
            assert!(n >= MIN_KEYS, "non-root node underfull: {n} keys");
        } else {
            assert!(n >= 1, "non-empty tree must have keys in the root");
        }
        let keys = &node.keys[..n];
        assert!(keys.windows(2).all(|w| w[0] < w[1]), "node keys unsorted");
        if let Some(lo) = lower {
            assert!(keys[0] > lo, "key violates lower separator");
        }
        if let Some(hi) = upper {
            assert!(keys[n - 1] < hi, "key violates upper separator");
        }
        assert_eq!(node.summary, fusion::construct(keys), "stale summary");

        if node.leaf {
            leaf_depths.push(depth);
            return;
        }
        for slot in 0..=n {
            let child = node.children[slot];
            assert!(!child.is_null(), "internal node missing child {slot}");
            let c = self.node(child);
            assert_eq!(c.parent, id, "broken parent link");
            assert_eq!(c.pos_in_parent as usize, slot, "broken slot index");
            let lo = if slot == 0 { lower } else { Some(keys[slot - 1]) };
            let hi = if slot == n { upper } else { Some(keys[slot]) };
            self.check_node(child, lo, hi, depth + 1, leaf_depths, count);
        }
    }
}
