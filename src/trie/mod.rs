//! Patricia trie over IPv4 prefixes with longest-prefix matching.
//!
//! Nodes live in an arena and reference each other by index, so upward walks
//! during insertion stay O(1) without cyclic ownership. Internal "glue"
//! nodes carry no prefix, exist only to branch between two more specific
//! subtrees, and always have exactly two children; removal collapses them
//! back out of the tree.

use std::str::FromStr;

use crate::error::Result;
use crate::prefix::{comp_with_mask, Prefix};

/// Handle to a node in a [`PrefixTrie`] arena.
///
/// A `NodeId` is invalidated when its node is removed; holding one across
/// the removal of that node is a logic error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

struct Node<V> {
    /// Bit position tested at this node. Equals the prefix length whenever
    /// a prefix is present.
    bit: u8,
    prefix: Option<Prefix>,
    value: Option<V>,
    parent: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
}

/// Patricia trie storing IPv4 CIDR prefixes, with an optional value per
/// prefix-bearing node.
///
/// # Examples
/// ```
/// use cloudfilter::trie::PrefixTrie;
///
/// let mut trie: PrefixTrie = PrefixTrie::new();
/// trie.insert_str("10.0.0.0/8").unwrap();
/// trie.insert_str("10.1.0.0/16").unwrap();
///
/// let best = trie.search_best_str("10.1.2.3").unwrap().unwrap();
/// assert_eq!(trie.prefix(best).unwrap().to_string(), "10.1.0.0/16");
/// ```
pub struct PrefixTrie<V = ()> {
    nodes: Vec<Node<V>>,
    free: Vec<NodeId>,
    head: Option<NodeId>,
    maxbits: u8,
    /// Nodes currently linked into the tree, glue included.
    active: usize,
}

/// Test the bit at position `bit` (0 = most significant) of an address.
fn bit_set(addr: &[u8; 4], bit: u8) -> bool {
    addr[(bit >> 3) as usize] & (0x80 >> (bit & 0x07)) != 0
}

impl<V> PrefixTrie<V> {
    /// Create an empty trie.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            maxbits: Prefix::MAX_BITS,
            active: 0,
        }
    }

    /// Number of nodes currently linked, glue nodes included.
    pub fn node_count(&self) -> usize {
        self.active
    }

    /// Number of stored prefixes.
    pub fn prefix_count(&self) -> usize {
        self.iter().count()
    }

    /// Whether the trie stores nothing.
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Unlink every node, keeping the arena's capacity.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.head = None;
        self.active = 0;
    }

    fn node(&self, id: NodeId) -> &Node<V> {
        &self.nodes[id.index()]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<V> {
        &mut self.nodes[id.index()]
    }

    fn alloc(&mut self, bit: u8, prefix: Option<Prefix>) -> NodeId {
        self.active += 1;
        let node = Node {
            bit,
            prefix,
            value: None,
            parent: None,
            left: None,
            right: None,
        };
        match self.free.pop() {
            Some(id) => {
                self.nodes[id.index()] = node;
                id
            }
            None => {
                let id = NodeId(self.nodes.len() as u32);
                self.nodes.push(node);
                id
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        self.active -= 1;
        let node = self.node_mut(id);
        node.prefix = None;
        node.value = None;
        node.parent = None;
        node.left = None;
        node.right = None;
        self.free.push(id);
    }

    /// Swap `old` for `new` in `parent`'s child slot, or at the root.
    fn replace_child(&mut self, parent: Option<NodeId>, old: NodeId, new: NodeId) {
        match parent {
            None => self.head = Some(new),
            Some(p) => {
                if self.node(p).right == Some(old) {
                    self.node_mut(p).right = Some(new);
                } else {
                    self.node_mut(p).left = Some(new);
                }
            }
        }
    }

    /// Prefix stored at `id`, if the node is not glue.
    pub fn prefix(&self, id: NodeId) -> Option<Prefix> {
        self.node(id).prefix
    }

    /// Value attached to `id`.
    pub fn value(&self, id: NodeId) -> Option<&V> {
        self.node(id).value.as_ref()
    }

    /// Mutable value attached to `id`.
    pub fn value_mut(&mut self, id: NodeId) -> Option<&mut V> {
        self.node_mut(id).value.as_mut()
    }

    /// Attach a value to a node, returning the previous one.
    pub fn set_value(&mut self, id: NodeId, value: V) -> Option<V> {
        self.node_mut(id).value.replace(value)
    }

    /// Insert `prefix`, returning the node that holds it.
    ///
    /// Re-inserting an existing prefix returns the existing node and
    /// allocates nothing.
    pub fn insert(&mut self, prefix: Prefix) -> NodeId {
        let head = match self.head {
            Some(h) => h,
            None => {
                let id = self.alloc(prefix.bitlen(), Some(prefix));
                self.head = Some(id);
                return id;
            }
        };

        let addr = prefix.octets();
        let bitlen = prefix.bitlen();

        // Descend to the nearest prefix-bearing node.
        let mut node = head;
        loop {
            let n = self.node(node);
            if n.bit >= bitlen && n.prefix.is_some() {
                break;
            }
            let next = if n.bit < self.maxbits && bit_set(&addr, n.bit) {
                n.right
            } else {
                n.left
            };
            match next {
                Some(child) => node = child,
                None => break,
            }
        }

        let test = match self.node(node).prefix {
            Some(p) => p.octets(),
            // Glue nodes always have two children, so the descent can only
            // stop early at a prefix-bearing node.
            None => unreachable!("descent stopped on a glue node"),
        };

        // First bit where the new address diverges from the one stored at
        // the stopping point.
        let check_bit = self.node(node).bit.min(bitlen);
        let mut differ_bit = check_bit;
        for i in 0..4u8 {
            if i * 8 >= check_bit {
                break;
            }
            let r = addr[i as usize] ^ test[i as usize];
            if r != 0 {
                differ_bit = i * 8 + r.leading_zeros() as u8;
                break;
            }
        }
        if differ_bit > check_bit {
            differ_bit = check_bit;
        }

        // Walk back up: the insertion point sits below the deepest ancestor
        // whose test bit comes before the divergence.
        while let Some(parent) = self.node(node).parent {
            if self.node(parent).bit < differ_bit {
                break;
            }
            node = parent;
        }

        if differ_bit == bitlen && self.node(node).bit == bitlen {
            // Exact slot: either the prefix is already present, or a glue
            // node gets promoted to carry it.
            if self.node(node).prefix.is_some() {
                return node;
            }
            self.node_mut(node).prefix = Some(prefix);
            return node;
        }

        let new_node = self.alloc(bitlen, Some(prefix));

        if self.node(node).bit == differ_bit {
            // Direct child of the divergence node.
            let go_right = {
                let n = self.node(node);
                n.bit < self.maxbits && bit_set(&addr, n.bit)
            };
            self.node_mut(new_node).parent = Some(node);
            if go_right {
                self.node_mut(node).right = Some(new_node);
            } else {
                self.node_mut(node).left = Some(new_node);
            }
            return new_node;
        }

        if bitlen == differ_bit {
            // The new prefix covers `node`: insert above it.
            let go_right = bitlen < self.maxbits && bit_set(&test, bitlen);
            if go_right {
                self.node_mut(new_node).right = Some(node);
            } else {
                self.node_mut(new_node).left = Some(node);
            }
            let old_parent = self.node(node).parent;
            self.node_mut(new_node).parent = old_parent;
            self.replace_child(old_parent, node, new_node);
            self.node_mut(node).parent = Some(new_node);
            return new_node;
        }

        // Diverges below both: split through a fresh glue node, children
        // ordered by the bit value at the divergence position.
        let glue = self.alloc(differ_bit, None);
        let old_parent = self.node(node).parent;
        self.node_mut(glue).parent = old_parent;
        if differ_bit < self.maxbits && bit_set(&addr, differ_bit) {
            self.node_mut(glue).right = Some(new_node);
            self.node_mut(glue).left = Some(node);
        } else {
            self.node_mut(glue).right = Some(node);
            self.node_mut(glue).left = Some(new_node);
        }
        self.node_mut(new_node).parent = Some(glue);
        self.replace_child(old_parent, node, glue);
        self.node_mut(node).parent = Some(glue);
        new_node
    }

    /// Find the node storing exactly `prefix`: same length, same address
    /// under the mask.
    pub fn search_exact(&self, prefix: &Prefix) -> Option<NodeId> {
        let mut node = self.head?;
        let addr = prefix.octets();
        let bitlen = prefix.bitlen();

        while self.node(node).bit < bitlen {
            let n = self.node(node);
            node = if bit_set(&addr, n.bit) { n.right? } else { n.left? };
        }

        let n = self.node(node);
        if n.bit > bitlen {
            return None;
        }
        let stored = n.prefix?;
        if comp_with_mask(&stored.octets(), &addr, bitlen) {
            Some(node)
        } else {
            None
        }
    }

    /// Longest-prefix match: the most specific stored prefix containing
    /// `prefix`. With `inclusive`, the query's own slot is a candidate too.
    ///
    /// Candidates are collected top-down and validated most-specific-first;
    /// a match is a true mask comparison, never an assumption from depth.
    pub fn search_best(&self, prefix: &Prefix, inclusive: bool) -> Option<NodeId> {
        let head = self.head?;
        let addr = prefix.octets();
        let bitlen = prefix.bitlen();

        let mut stack: Vec<NodeId> = Vec::new();
        let mut node = Some(head);

        while let Some(id) = node {
            let n = self.node(id);
            if n.bit >= bitlen {
                break;
            }
            if n.prefix.is_some() {
                stack.push(id);
            }
            node = if bit_set(&addr, n.bit) { n.right } else { n.left };
        }

        if inclusive {
            if let Some(id) = node {
                if self.node(id).prefix.is_some() {
                    stack.push(id);
                }
            }
        }

        while let Some(id) = stack.pop() {
            if let Some(stored) = self.node(id).prefix {
                if comp_with_mask(&stored.octets(), &addr, stored.bitlen()) {
                    return Some(id);
                }
            }
        }
        None
    }

    /// Remove the prefix held by `id`.
    ///
    /// A node with two children cannot be unlinked without reshaping the
    /// tree around other prefixes, so it is demoted to glue instead. Leaves
    /// and single-child nodes are spliced out, and a parent left as a
    /// prefix-less single-child glue node is collapsed along the way.
    pub fn remove(&mut self, id: NodeId) {
        let (left, right) = {
            let n = self.node(id);
            (n.left, n.right)
        };

        match (left, right) {
            (Some(_), Some(_)) => {
                self.node_mut(id).prefix = None;
                self.node_mut(id).value = None;
            }
            (None, None) => {
                let parent = match self.node(id).parent {
                    None => {
                        self.head = None;
                        self.release(id);
                        return;
                    }
                    Some(p) => p,
                };

                let sibling = if self.node(parent).right == Some(id) {
                    self.node_mut(parent).right = None;
                    self.node(parent).left
                } else {
                    self.node_mut(parent).left = None;
                    self.node(parent).right
                };
                self.release(id);

                if self.node(parent).prefix.is_some() {
                    return;
                }

                // The parent is glue with a single child left: splice it out.
                let sibling = match sibling {
                    Some(s) => s,
                    None => unreachable!("glue node without a second child"),
                };
                let grandparent = self.node(parent).parent;
                self.replace_child(grandparent, parent, sibling);
                self.node_mut(sibling).parent = grandparent;
                self.release(parent);
            }
            (Some(child), None) | (None, Some(child)) => {
                let parent = self.node(id).parent;
                self.node_mut(child).parent = parent;
                self.replace_child(parent, id, child);
                self.release(id);
            }
        }
    }

    /// Parse a prefix string and insert it.
    pub fn insert_str(&mut self, s: &str) -> Result<NodeId> {
        Ok(self.insert(Prefix::from_str(s)?))
    }

    /// Exact lookup by prefix string.
    pub fn search_exact_str(&self, s: &str) -> Result<Option<NodeId>> {
        Ok(self.search_exact(&Prefix::from_str(s)?))
    }

    /// Longest-prefix lookup by address or prefix string.
    pub fn search_best_str(&self, s: &str) -> Result<Option<NodeId>> {
        Ok(self.search_best(&Prefix::from_str(s)?, true))
    }

    /// Exact-match a prefix string and remove it; a miss is a no-op.
    pub fn remove_str(&mut self, s: &str) -> Result<()> {
        if let Some(id) = self.search_exact(&Prefix::from_str(s)?) {
            self.remove(id);
        }
        Ok(())
    }

    /// In-order walk over the stored prefixes and their values.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            trie: self,
            stack: match self.head {
                Some(h) => vec![(h, false)],
                None => Vec::new(),
            },
        }
    }
}

impl<V> Default for PrefixTrie<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// In-order iterator over the prefixes of a [`PrefixTrie`].
pub struct Iter<'a, V> {
    trie: &'a PrefixTrie<V>,
    /// Pending nodes; the flag marks that the left subtree is done.
    stack: Vec<(NodeId, bool)>,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (Prefix, Option<&'a V>);

    fn next(&mut self) -> Option<Self::Item> {
        let trie = self.trie;
        while let Some((id, expanded)) = self.stack.pop() {
            let n = trie.node(id);
            if !expanded {
                self.stack.push((id, true));
                if let Some(l) = n.left {
                    self.stack.push((l, false));
                }
            } else {
                if let Some(r) = n.right {
                    self.stack.push((r, false));
                }
                if let Some(p) = n.prefix {
                    return Some((p, n.value.as_ref()));
                }
            }
        }
        None
    }
}
