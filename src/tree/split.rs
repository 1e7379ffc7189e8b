//! Split propagation: backtracking cascade, root promotion, and
//! root-race recovery.
//!
//! A split starts at a write-locked full leaf and climbs through the
//! ancestor stack captured on descent. At each level the parent is
//! re-acquired under the optimistic protocol (the captured frame may
//! have split in the meantime, so the cascade walks right before
//! upgrading), and only then is the child's lock released — the child is
//! unreachable-for-writers until its separator is being installed, which
//! keeps the half-linked right node private.
//!
//! When the stack runs out there are two cases: the locked node is still
//! the root and a new root is installed above it, or another thread
//! already promoted a root, and the separator must be inserted by
//! searching for the current parent level from the live root
//! (root-race recovery).

use crate::internode::InternalNode;
use crate::key::IndexKey;
use crate::leaf::LeafNode;
use crate::node::header_of;
use crate::ordering::{READ_ORD, WRITE_ORD};
use crate::tracing_helpers::trace_log;

use super::BlinkTree;

impl<K: IndexKey, const CARD: usize> BlinkTree<K, CARD> {
    /// Complete an insert whose target leaf was full.
    ///
    /// # Safety
    ///
    /// `leaf_ptr` addresses a live, full leaf whose write lock the
    /// caller holds; `stack` holds the true ancestors captured on the
    /// descent that found it. Every lock is released before returning.
    pub(super) unsafe fn split_insert(
        &self,
        leaf_ptr: *mut u8,
        key: K,
        value: u64,
        stack: &mut Vec<*mut u8>,
    ) {
        // SAFETY: caller contract.
        let leaf: &LeafNode<K, CARD> = unsafe { Self::leaf_ref(leaf_ptr) };

        // SAFETY: write lock held.
        let (new_leaf, split_key) = unsafe { leaf.split() };
        trace_log!("leaf split");

        // Route the pending entry into whichever half now covers it.
        // SAFETY: the left half is locked, the right half still private.
        unsafe {
            if key <= split_key {
                leaf.insert(key, value);
            } else {
                (*new_leaf).insert(key, value);
            }
        }

        // SAFETY: forwarded contract.
        unsafe { self.propagate(split_key, leaf_ptr, new_leaf.cast::<u8>(), stack) };
    }

    /// Climb the ancestor stack installing separators, splitting full
    /// parents as needed.
    ///
    /// # Safety
    ///
    /// `left` is write-locked; `right` is its freshly split, still
    /// private sibling; `split_key` separates them.
    unsafe fn propagate(
        &self,
        mut split_key: K,
        mut left: *mut u8,
        mut right: *mut u8,
        stack: &mut Vec<*mut u8>,
    ) {
        while let Some(frame) = stack.pop() {
            // SAFETY: frames are internal nodes captured on descent.
            let parent_ptr: *mut u8 = unsafe { self.lock_parent(frame, split_key) };

            // The parent-level lock is held: the left child's role as
            // the cascade's anchor is over.
            // SAFETY: we hold left's lock.
            unsafe { header_of(left) }.lock().write_unlock();

            // SAFETY: parent_ptr is a locked live internal node.
            let parent: &InternalNode<K, CARD> = unsafe { Self::internal_ref(parent_ptr) };

            if !parent.is_full() {
                // SAFETY: write lock held and the node has room.
                unsafe { parent.insert(split_key, right) };
                parent.header().lock().write_unlock();
                return;
            }

            // SAFETY: write lock held.
            let (new_parent, promoted) = unsafe { parent.split() };
            trace_log!(node_level = parent.header().level(), "internal split");

            // SAFETY: left half locked, right half private; routing uses
            // the freshly promoted key.
            unsafe {
                if split_key <= promoted {
                    parent.insert(split_key, right);
                } else {
                    (*new_parent).insert(split_key, right);
                }
            }

            left = parent_ptr;
            right = new_parent.cast::<u8>();
            split_key = promoted;
        }

        // Stack exhausted with `left` still locked: either it is the
        // root (grow the tree) or another thread grew it first.
        if left == self.root.load(READ_ORD) {
            self.promote_root(split_key, left, right);
            // SAFETY: we hold left's lock.
            unsafe { header_of(left) }.lock().write_unlock();
        } else {
            // SAFETY: left is locked, right private.
            unsafe { self.insert_into_parent_level(split_key, right, left) };
        }
    }

    /// Re-acquire a captured ancestor frame for `key`: capture a
    /// version, walk right past nodes whose high key is below the key,
    /// and upgrade. The frame may be stale (split since capture), which
    /// the right-walk absorbs; a restart resumes from the node reached
    /// so far, since separators only ever move right.
    ///
    /// # Safety
    ///
    /// `frame` addresses a live internal node of the level being
    /// re-acquired.
    unsafe fn lock_parent(&self, frame: *mut u8, key: K) -> *mut u8 {
        let mut cur: *mut u8 = frame;

        'restart: loop {
            // SAFETY: cur stays on one live sibling chain.
            let Some(mut version) = unsafe { header_of(cur) }.lock().read_begin() else {
                continue 'restart;
            };

            loop {
                // SAFETY: chain nodes are internal.
                let node: &InternalNode<K, CARD> = unsafe { Self::internal_ref(cur) };
                let sibling: *mut u8 = node.header().sibling();

                // SAFETY: a torn high key is caught by validation below.
                if sibling.is_null() || unsafe { node.high_key() } >= key {
                    break;
                }

                // SAFETY: sibling is non-null and live.
                let Some(sibling_version) = unsafe { header_of(sibling) }.lock().read_begin()
                else {
                    continue 'restart;
                };
                if !node.header().lock().validate(version) {
                    continue 'restart;
                }

                cur = sibling;
                version = sibling_version;
            }

            // SAFETY: cur is live.
            if unsafe { header_of(cur) }.lock().try_upgrade(version) {
                return cur;
            }
        }
    }

    /// Install a new root above a split that consumed the old one.
    ///
    /// Publication order matters: the new root is fully initialized
    /// before the Release store to the root pointer, so any traversal
    /// that observes it sees the complete node.
    fn promote_root(&self, split_key: K, left: *mut u8, right: *mut u8) {
        // SAFETY: left is locked by the caller; right is still private.
        let (level, high_key) = unsafe { (header_of(left).level(), Self::node_high_key(right)) };

        let new_root: Box<InternalNode<K, CARD>> =
            InternalNode::new_root(split_key, left, right, level + 1, high_key);

        self.root
            .store(Box::into_raw(new_root).cast::<u8>(), WRITE_ORD);
        trace_log!(node_level = level + 1, "root promoted");
    }

    /// Root-race recovery: finish a split whose expected ancestor no
    /// longer exists because a concurrent thread promoted a new root.
    /// Locates the level that now parents `left` from the live root,
    /// acquires it, and inserts the separator there — splitting and
    /// recursing another level up if that parent is itself full.
    ///
    /// # Safety
    ///
    /// `left` is write-locked and below the current root; `right` is its
    /// still-private split sibling; `key` separates them.
    pub(super) unsafe fn insert_into_parent_level(&self, key: K, right: *mut u8, left: *mut u8) {
        // SAFETY: left is live and locked.
        let target_level: u32 = unsafe { header_of(left) }.level() + 1;

        'restart: loop {
            let mut cur: *mut u8 = self.root.load(READ_ORD);

            // SAFETY: the root and everything reached below are live;
            // the descent stops at target_level, which is above `left`,
            // so the locked node is never read-captured here.
            let Some(mut version) = unsafe { header_of(cur) }.lock().read_begin() else {
                continue 'restart;
            };

            // Root promotion publishes the parent level before the root
            // pointer moves, so the target level is reachable.
            while unsafe { header_of(cur) }.level() != target_level {
                // SAFETY: above level 0 until target_level is reached.
                let node: &InternalNode<K, CARD> = unsafe { Self::internal_ref(cur) };

                // SAFETY: validated below.
                let next: *mut u8 = unsafe { node.scan_node(key) }.ptr();

                // SAFETY: scan_node returns published live nodes.
                let Some(next_version) = unsafe { header_of(next) }.lock().read_begin() else {
                    continue 'restart;
                };
                if !node.header().lock().validate(version) {
                    continue 'restart;
                }

                cur = next;
                version = next_version;
            }

            // Walk right within the parent level.
            loop {
                // SAFETY: target level is internal.
                let node: &InternalNode<K, CARD> = unsafe { Self::internal_ref(cur) };
                let sibling: *mut u8 = node.header().sibling();

                // SAFETY: validated below.
                if sibling.is_null() || unsafe { node.high_key() } >= key {
                    break;
                }

                // SAFETY: sibling is non-null and live.
                let Some(sibling_version) = unsafe { header_of(sibling) }.lock().read_begin()
                else {
                    continue 'restart;
                };
                if !node.header().lock().validate(version) {
                    continue 'restart;
                }

                cur = sibling;
                version = sibling_version;
            }

            // SAFETY: cur is live.
            if !unsafe { header_of(cur) }.lock().try_upgrade(version) {
                continue 'restart;
            }

            // SAFETY: we hold left's lock until the parent level is
            // secured; release it now.
            unsafe { header_of(left) }.lock().write_unlock();

            // SAFETY: cur is a locked live internal node.
            let parent: &InternalNode<K, CARD> = unsafe { Self::internal_ref(cur) };

            if !parent.is_full() {
                // SAFETY: write lock held and the node has room.
                unsafe { parent.insert(key, right) };
                parent.header().lock().write_unlock();
                return;
            }

            // SAFETY: write lock held.
            let (new_parent, promoted) = unsafe { parent.split() };
            trace_log!(node_level = target_level, "internal split in root-race recovery");

            // SAFETY: left half locked, right half private.
            unsafe {
                if key <= promoted {
                    parent.insert(key, right);
                } else {
                    (*new_parent).insert(key, right);
                }
            }

            if cur == self.root.load(READ_ORD) {
                self.promote_root(promoted, cur, new_parent.cast::<u8>());
                parent.header().lock().write_unlock();
            } else {
                // The tree grew again underneath us; recover one level
                // higher with cur as the locked anchor.
                // SAFETY: cur locked, new_parent private.
                unsafe { self.insert_into_parent_level(promoted, new_parent.cast::<u8>(), cur) };
            }
            return;
        }
    }
}
