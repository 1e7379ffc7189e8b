//! Optimistic descent from the root to a leaf.
//!
//! Traversal holds no locks. Each step captures the child's version
//! before re-validating the current node, so a validated step proves the
//! child pointer was consistent with the state the version was captured
//! at. Any failed capture or validation aborts the attempt; the caller
//! restarts from the root.
//!
//! Nodes passed through by a same-level sibling step are *not* ancestors
//! and stay off the stack; only true parents are recorded for the split
//! backtracking path.

use crate::internode::{InternalNode, ScanStep};
use crate::key::IndexKey;
use crate::leaf::LeafNode;
use crate::node::header_of;
use crate::ordering::READ_ORD;

use super::BlinkTree;

impl<K: IndexKey, const CARD: usize> BlinkTree<K, CARD> {
    /// One traversal attempt without ancestor tracking (lookup, update,
    /// remove, range entry). `None` means restart.
    pub(super) fn to_leaf(&self, key: K) -> Option<(*mut u8, u64)> {
        self.descend(key, None)
    }

    /// One traversal attempt recording true ancestors for a potential
    /// split cascade. `None` means restart.
    pub(super) fn to_leaf_with_stack(
        &self,
        key: K,
        stack: &mut Vec<*mut u8>,
    ) -> Option<(*mut u8, u64)> {
        self.descend(key, Some(stack))
    }

    /// Descend to the leaf whose range covers `key`, walking right along
    /// sibling chains wherever a concurrent split moved the key out of
    /// the chosen node. Returns the leaf and its captured version.
    fn descend(&self, key: K, mut stack: Option<&mut Vec<*mut u8>>) -> Option<(*mut u8, u64)> {
        let mut cur: *mut u8 = self.root.load(READ_ORD);

        // SAFETY: the root pointer always addresses a live node, and
        // every pointer followed below was read from a node that
        // subsequently validated.
        let mut version: u64 = unsafe { header_of(cur) }.lock().read_begin()?;

        while unsafe { header_of(cur) }.level() > 0 {
            // SAFETY: level > 0.
            let node: &InternalNode<K, CARD> = unsafe { Self::internal_ref(cur) };

            // SAFETY: routing is confirmed by the validation below.
            let step: ScanStep = unsafe { node.scan_node(key) };
            let next: *mut u8 = step.ptr();

            // SAFETY: scan_node only returns published live nodes.
            let next_version: u64 = unsafe { header_of(next) }.lock().read_begin()?;
            if !node.header().lock().validate(version) {
                return None;
            }

            // A sibling step stays on the same level; only a true
            // descent records the parent.
            if let (Some(stack), ScanStep::Child(_)) = (stack.as_deref_mut(), step) {
                stack.push(cur);
            }

            cur = next;
            version = next_version;
        }

        // Leaf level: keep walking right while the key is beyond the
        // leaf's high key.
        loop {
            // SAFETY: level 0 reached; chain stays on level 0.
            let leaf: &LeafNode<K, CARD> = unsafe { Self::leaf_ref(cur) };
            let sibling: *mut u8 = leaf.header().sibling();

            // SAFETY: a torn high key misroutes at worst; the validation
            // below catches it.
            if sibling.is_null() || unsafe { leaf.high_key() } >= key {
                break;
            }

            // SAFETY: sibling is non-null and addresses a live leaf.
            let sibling_version: u64 = unsafe { header_of(sibling) }.lock().read_begin()?;
            if !leaf.header().lock().validate(version) {
                return None;
            }

            cur = sibling;
            version = sibling_version;
        }

        Some((cur, version))
    }
}
