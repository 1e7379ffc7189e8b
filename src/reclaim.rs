//! Reclamation adapter over seize.
//!
//! Optimistic readers hold raw pointers with no lock, so a node that has
//! been unlinked from the tree cannot be freed until every reader that
//! may still observe it has departed. Every public tree operation pins a
//! guard from the tree's collector; [`retire_node`] hands an unlinked
//! node to seize for deferred freeing once all such guards are gone.
//!
//! The current operation set never unlinks a node (splits demote the old
//! root to a child, and deletions leave thinned nodes in place), so
//! [`retire_node`] is the published hook for merge-on-underflow rather
//! than a hot path. [`free_tree`] tears a quiescent tree down along
//! child edges; sibling pointers are cross-links, not ownership.

use std::collections::HashSet;

use seize::{Collector, Guard, LocalGuard};

use crate::internode::InternalNode;
use crate::key::IndexKey;
use crate::leaf::LeafNode;
use crate::node::header_of;

// ============================================================================
//  Single-node reclaimers (seize callback signatures)
// ============================================================================

/// Reclaim a boxed leaf (seize callback).
///
/// # Safety
///
/// `ptr` came from `Box::into_raw` and seize has established that no
/// reader can still observe it.
unsafe fn reclaim_leaf_boxed<K: IndexKey, const CARD: usize>(
    ptr: *mut LeafNode<K, CARD>,
    _collector: &Collector,
) {
    // SAFETY: caller contract.
    unsafe { drop(Box::from_raw(ptr)) };
}

/// Reclaim a boxed internal node (seize callback).
///
/// # Safety
///
/// As [`reclaim_leaf_boxed`].
unsafe fn reclaim_internal_boxed<K: IndexKey, const CARD: usize>(
    ptr: *mut InternalNode<K, CARD>,
    _collector: &Collector,
) {
    // SAFETY: caller contract.
    unsafe { drop(Box::from_raw(ptr)) };
}

// ============================================================================
//  Retirement
// ============================================================================

/// Defer freeing an unlinked node until all in-flight readers depart.
///
/// # Safety
///
/// - `ptr` addresses a live node allocated via `Box::into_raw`.
/// - The node has been unlinked: no new traversal can reach it (its
///   lock word was released with the obsolete bit).
/// - `ptr` is retired at most once.
#[allow(dead_code)]
pub(crate) unsafe fn retire_node<K: IndexKey, const CARD: usize>(
    guard: &LocalGuard<'_>,
    ptr: *mut u8,
) {
    // SAFETY: nodes carry their level immutably; the dispatch below
    // restores the concrete type the pointer was allocated with.
    unsafe {
        if header_of(ptr).level() == 0 {
            guard.defer_retire(
                ptr.cast::<LeafNode<K, CARD>>(),
                reclaim_leaf_boxed::<K, CARD>,
            );
        } else {
            guard.defer_retire(
                ptr.cast::<InternalNode<K, CARD>>(),
                reclaim_internal_boxed::<K, CARD>,
            );
        }
    }
}

// ============================================================================
//  Whole-tree teardown
// ============================================================================

/// Free every node reachable from `root` along child edges.
///
/// # Safety
///
/// - `root` is null or addresses a live node allocated via
///   `Box::into_raw`.
/// - The tree is quiescent and will never be traversed again.
pub(crate) unsafe fn free_tree<K: IndexKey, const CARD: usize>(root: *mut u8) {
    if root.is_null() {
        return;
    }

    let mut worklist: Vec<*mut u8> = Vec::with_capacity(64);
    worklist.push(root);

    // Guards against double-free should the tree be corrupted; the
    // address is used for identity only.
    let mut visited: HashSet<usize> = HashSet::new();

    while let Some(node) = worklist.pop() {
        if node.is_null() || !visited.insert(node.addr()) {
            continue;
        }

        // SAFETY: node addresses a live node; quiescence per contract.
        let level: u32 = unsafe { header_of(node) }.level();

        if level == 0 {
            // SAFETY: level 0 nodes were allocated as leaves.
            unsafe { drop(Box::from_raw(node.cast::<LeafNode<K, CARD>>())) };
        } else {
            // SAFETY: level > 0 nodes were allocated as internal nodes.
            let inode: &InternalNode<K, CARD> = unsafe { &*node.cast::<InternalNode<K, CARD>>() };

            let cnt: usize = inode.header().cnt();
            for i in 0..=cnt {
                worklist.push(inode.child_at(i));
            }

            // SAFETY: children are collected; the node can go.
            unsafe { drop(Box::from_raw(node.cast::<InternalNode<K, CARD>>())) };
        }
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_tree_null_is_noop() {
        // SAFETY: null is explicitly handled.
        unsafe { free_tree::<u64, 4>(std::ptr::null_mut()) };
    }

    #[test]
    fn free_tree_single_leaf() {
        let leaf: Box<LeafNode<u64, 4>> = LeafNode::new_root();
        let ptr: *mut u8 = Box::into_raw(leaf).cast();

        // SAFETY: ptr was just created from Box::into_raw; no readers.
        unsafe { free_tree::<u64, 4>(ptr) };
    }

    #[test]
    fn free_tree_two_levels() {
        let left: *mut u8 = Box::into_raw(LeafNode::<u64, 4>::new_root()).cast();
        let right: *mut u8 = Box::into_raw(LeafNode::<u64, 4>::new_sibling(
            std::ptr::null_mut(),
            0,
        ))
        .cast();

        // SAFETY: both leaves are exclusively owned.
        unsafe {
            header_of(left).set_sibling(right);
        }

        let root: *mut u8 =
            Box::into_raw(InternalNode::<u64, 4>::new_root(10, left, right, 1, 20)).cast();

        // SAFETY: the subtree is private to this test; both leaves are
        // reachable as children, the sibling link must not double-free.
        unsafe { free_tree::<u64, 4>(root) };
    }

    #[test]
    fn retire_defers_until_guards_drop() {
        let collector = Collector::new();

        let leaf: Box<LeafNode<u64, 4>> = LeafNode::new_root();
        let ptr: *mut u8 = Box::into_raw(leaf).cast();

        {
            let guard: LocalGuard<'_> = collector.enter();
            // SAFETY: ptr is a leaf from Box::into_raw, unlinked from
            // everything, retired once.
            unsafe { retire_node::<u64, 4>(&guard, ptr) };
        }

        // Dropping the collector runs any remaining reclaimers; the test
        // passes by not double-freeing or leaking under sanitizers.
        drop(collector);
    }
}
