//
// Copyright (c) The Amprd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::ops::ControlFlow;

use tracing::warn;

// A PATRICIA trie mapping CIDR network numbers to a datum. The central
// data structure for maintaining the lookup tables of active routes
// and tunnels.
//
// The radix walk branches on low-order bits, so keys are stored with
// their bits reversed: descending by `key & 1` then corresponds to
// descending by the most-significant prefix bit. Keys are reversed on
// the way in and un-reversed on the way out of the traversal; callers
// only ever see most-significant-bit-first prefixes.
//
// Each node holds the key fragment consumed on the edge into it (up to
// 32 bits, low `plen` bits significant). An interior node without a
// datum always has both children; removal collapses any node that
// would violate that. The root is stable and never deallocated.
#[derive(Debug)]
pub struct IpMap<T> {
    root: Node<T>,
    len: usize,
}

#[derive(Debug)]
struct Node<T> {
    key: u32,
    plen: u8,
    datum: Option<T>,
    left: Option<Box<Node<T>>>,
    right: Option<Box<Node<T>>>,
}

// Traversal orders.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Order {
    Pre,
    In,
    Post,
}

// Outcome of a recursive removal step.
enum Removed<T> {
    NotFound,
    Diverged,
    // Datum taken; the node itself is still structurally valid.
    Done(T),
    // Datum taken from a childless node; the caller unlinks it.
    Unlink(T),
}

// Mask covering the low `n` bits.
fn low_mask(n: u8) -> u32 {
    match n {
        0..32 => (1 << n) - 1,
        _ => !0,
    }
}

fn shr(value: u32, n: u8) -> u32 {
    match n {
        0..32 => value >> n,
        _ => 0,
    }
}

// Number of common low-order bits of `a` and `b`, up to `n`.
fn common_bits(n: u8, a: u32, b: u32) -> u8 {
    let diff = (a ^ b) | !low_mask(n);
    (diff.trailing_zeros() as u8).min(n)
}

// ===== impl Node =====

impl<T> Node<T> {
    fn new(key: u32, plen: u8, datum: Option<T>) -> Node<T> {
        Node {
            key,
            plen,
            datum,
            left: None,
            right: None,
        }
    }

    fn child(&self, bit: u32) -> Option<&Node<T>> {
        if bit & 0x01 == 0 {
            self.left.as_deref()
        } else {
            self.right.as_deref()
        }
    }

    fn child_slot(&mut self, bit: u32) -> &mut Option<Box<Node<T>>> {
        if bit & 0x01 == 0 {
            &mut self.left
        } else {
            &mut self.right
        }
    }

    // Pull this node's single child up into the node: append the
    // child's fragment above the node's own, take over its datum and
    // children. Must only be called with exactly one child present.
    fn collapse_into_child(&mut self) {
        let child = self
            .left
            .take()
            .or_else(|| self.right.take())
            .expect("collapse of childless node");
        self.key |= child.key << self.plen;
        self.plen += child.plen;
        self.datum = child.datum;
        self.left = child.left;
        self.right = child.right;
    }
}

// ===== impl IpMap =====

impl<T> IpMap<T> {
    pub fn new() -> IpMap<T> {
        IpMap {
            root: Node::new(0, 0, None),
            len: 0,
        }
    }

    // Number of entries holding a datum.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    // Exact-match lookup.
    pub fn find(&self, key: u32, plen: u8) -> Option<&T> {
        let mut rkey = key.reverse_bits();
        let mut plen = plen;
        let mut node = &self.root;

        loop {
            if node.plen > plen || node.key != rkey & low_mask(node.plen) {
                return None;
            }
            rkey = shr(rkey, node.plen);
            plen -= node.plen;
            if plen == 0 {
                return node.datum.as_ref();
            }
            node = node.child(rkey)?;
        }
    }

    pub fn find_mut(&mut self, key: u32, plen: u8) -> Option<&mut T> {
        let mut rkey = key.reverse_bits();
        let mut plen = plen;
        let mut node = &mut self.root;

        loop {
            if node.plen > plen || node.key != rkey & low_mask(node.plen) {
                return None;
            }
            rkey = shr(rkey, node.plen);
            plen -= node.plen;
            if plen == 0 {
                return node.datum.as_mut();
            }
            node = node.child_slot(rkey).as_deref_mut()?;
        }
    }

    // Longest-prefix match: walk as far as the key allows and return
    // the datum of the deepest matching ancestor.
    pub fn nearest(&self, key: u32, plen: u8) -> Option<&T> {
        let mut rkey = key.reverse_bits();
        let mut plen = plen;
        let mut node = Some(&self.root);
        let mut best = None;

        while let Some(n) = node {
            if n.plen > plen || n.key != rkey & low_mask(n.plen) {
                break;
            }
            rkey = shr(rkey, n.plen);
            plen -= n.plen;
            if n.datum.is_some() {
                best = n.datum.as_ref();
            }
            if plen == 0 {
                break;
            }
            node = n.child(rkey);
        }

        best
    }

    // Insert a datum under `(key, plen)`. Returns `None` on success;
    // if the key is already present the existing entry is kept and the
    // rejected datum is handed back.
    pub fn insert(&mut self, key: u32, plen: u8, datum: T) -> Option<T> {
        let rkey = key.reverse_bits() & low_mask(plen);
        match Self::insert_node(&mut self.root, rkey, plen, datum) {
            None => {
                self.len += 1;
                None
            }
            rejected => rejected,
        }
    }

    fn insert_node(node: &mut Node<T>, rkey: u32, plen: u8, datum: T) -> Option<T> {
        // The node's fragment matches the key exactly.
        if plen == node.plen && rkey == node.key {
            if node.datum.is_none() {
                node.datum = Some(datum);
                return None;
            }
            return Some(datum);
        }

        let ncp = common_bits(plen.min(node.plen), rkey, node.key);
        if ncp == 0 || ncp == node.plen {
            // The node's fragment is fully consumed and key bits
            // remain: descend by the next bit, creating a leaf if the
            // child slot is empty.
            debug_assert!(ncp < plen);
            let rkey = shr(rkey, ncp);
            let plen = plen - ncp;
            let slot = node.child_slot(rkey);
            match slot {
                Some(child) => Self::insert_node(child, rkey, plen, datum),
                None => {
                    *slot = Some(Box::new(Node::new(rkey, plen, Some(datum))));
                    None
                }
            }
        } else if ncp == plen {
            // The new key is a proper prefix of the node's fragment:
            // split above, pushing the old fragment's tail down into a
            // new child.
            debug_assert!(ncp < node.plen);
            let tkey = shr(node.key, plen);
            let mut child = Node::new(tkey, node.plen - plen, node.datum.take());
            child.left = node.left.take();
            child.right = node.right.take();
            node.key = rkey;
            node.plen = plen;
            node.datum = Some(datum);
            *node.child_slot(tkey) = Some(Box::new(child));
            None
        } else {
            // The keys diverge partway through both fragments: split
            // sideways. The node keeps the common prefix with no
            // datum; the old and new tails hang below it on opposite
            // sides.
            debug_assert!(ncp < node.plen && ncp < plen);
            let mut old = Node::new(shr(node.key, ncp), node.plen - ncp, node.datum.take());
            old.left = node.left.take();
            old.right = node.right.take();
            let new = Node::new(shr(rkey, ncp), plen - ncp, Some(datum));
            node.key = rkey & low_mask(ncp);
            node.plen = ncp;
            assert_ne!(old.key & 0x01, new.key & 0x01);
            let (old_bit, new_bit) = (old.key, new.key);
            *node.child_slot(new_bit) = Some(Box::new(new));
            *node.child_slot(old_bit) = Some(Box::new(old));
            None
        }
    }

    // Remove the entry under `(key, plen)`, collapsing nodes so that
    // no interior node is left with a nil datum and a single child.
    // Removal of a missing or divergent key logs and leaves the trie
    // untouched.
    pub fn remove(&mut self, key: u32, plen: u8) -> Option<T> {
        let rkey = key.reverse_bits() & low_mask(plen);
        match Self::remove_node(&mut self.root, rkey, plen) {
            // The root is stable: an `Unlink` outcome at the top means
            // the root itself matched as a childless node and only its
            // datum is taken.
            Removed::Done(datum) | Removed::Unlink(datum) => {
                self.len -= 1;
                Some(datum)
            }
            Removed::NotFound => {
                warn!(key = %Ipv4Addr::from(key), %plen, "remove: key not found");
                None
            }
            Removed::Diverged => {
                warn!(key = %Ipv4Addr::from(key), %plen, "remove: divergent key");
                None
            }
        }
    }

    fn remove_node(node: &mut Node<T>, rkey: u32, plen: u8) -> Removed<T> {
        if plen == node.plen && rkey == node.key {
            let Some(datum) = node.datum.take() else {
                return Removed::NotFound;
            };
            return match (node.left.is_some(), node.right.is_some()) {
                // Interior fork: keep the node, only the datum goes.
                (true, true) => Removed::Done(datum),
                // Childless: the parent unlinks the node.
                (false, false) => Removed::Unlink(datum),
                // One child: pull it up into this node.
                _ => {
                    node.collapse_into_child();
                    Removed::Done(datum)
                }
            };
        }

        let ncp = common_bits(plen.min(node.plen), rkey, node.key);
        if ncp != 0 && ncp != node.plen {
            return Removed::Diverged;
        }
        if ncp >= plen {
            return Removed::NotFound;
        }
        let rkey = shr(rkey, ncp);
        let plen = plen - ncp;

        let slot = node.child_slot(rkey);
        let outcome = match slot {
            Some(child) => Self::remove_node(child, rkey, plen),
            None => return Removed::NotFound,
        };
        match outcome {
            Removed::Unlink(datum) => {
                *slot = None;
                // With the leaf gone, fold this node into its other
                // child if it carries no datum of its own.
                if node.datum.is_none()
                    && node.left.is_some() != node.right.is_some()
                {
                    node.collapse_into_child();
                }
                Removed::Done(datum)
            }
            outcome => outcome,
        }
    }

    // Walk the trie in the given order, invoking `f` with the
    // un-reversed key, its prefix length, and the datum of every entry.
    // A `Break` stops the walk immediately and hands the value back.
    pub fn walk<B, F>(&self, order: Order, f: &mut F) -> Option<B>
    where
        F: FnMut(u32, u8, &T) -> ControlFlow<B>,
    {
        match Self::walk_node(&self.root, order, 0, 0, f) {
            ControlFlow::Break(value) => Some(value),
            ControlFlow::Continue(()) => None,
        }
    }

    fn walk_node<B, F>(
        node: &Node<T>,
        order: Order,
        key: u32,
        plen: u8,
        f: &mut F,
    ) -> ControlFlow<B>
    where
        F: FnMut(u32, u8, &T) -> ControlFlow<B>,
    {
        let key = key | node.key.checked_shl(plen.into()).unwrap_or(0);
        let plen = plen + node.plen;
        if order == Order::Pre
            && let Some(datum) = &node.datum
        {
            f(key.reverse_bits(), plen, datum)?;
        }
        if let Some(left) = &node.left {
            Self::walk_node(left, order, key, plen, f)?;
        }
        if order == Order::In
            && let Some(datum) = &node.datum
        {
            f(key.reverse_bits(), plen, datum)?;
        }
        if let Some(right) = &node.right {
            Self::walk_node(right, order, key, plen, f)?;
        }
        if order == Order::Post
            && let Some(datum) = &node.datum
        {
            f(key.reverse_bits(), plen, datum)?;
        }
        ControlFlow::Continue(())
    }
}

impl<T> Default for IpMap<T> {
    fn default() -> IpMap<T> {
        IpMap::new()
    }
}
