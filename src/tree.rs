//! Filepath: src/tree.rs
//!
//! `BlinkTree` - a concurrent, in-memory, ordered key→value index.
//!
//! The tree is a B+-tree whose nodes carry right-sibling pointers, so a
//! traversal that races with a node split can still reach the correct
//! destination by walking right instead of restarting. Reads are
//! optimistic (version-validated, never blocking); writes lock exactly
//! one node, except during split propagation where a parent is acquired
//! while the freshly split child stays locked.
//!
//! Every public operation retries its optimistic section until it
//! observes a consistent version; the linearization point is the
//! successful lock upgrade (writers) or the final validation (readers).

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::atomic::AtomicPtr;

use seize::Collector;

use crate::internode::InternalNode;
use crate::key::IndexKey;
use crate::leaf::LeafNode;
use crate::node::{DEFAULT_CARDINALITY, NodeHeader, header_of};
use crate::ordering::{READ_ORD, RELAXED};
use crate::reclaim;

mod split;
mod traverse;

// ============================================================================
//  BlinkTree
// ============================================================================

/// A concurrent B-link tree mapping keys to 64-bit values.
///
/// # Type Parameters
///
/// * `K` - key type; see [`IndexKey`]
/// * `CARD` - per-node entry capacity. The default is derived from the
///   nominal page size for 8-byte keys; tests use small values to force
///   deep trees.
///
/// # Caller contract
///
/// [`insert`](Self::insert) must not be called for a key that is already
/// present; upsert is `update`-then-`insert`. Range scans are
/// linearizable per leaf but are not a global snapshot across leaves.
///
/// # Example
///
/// ```rust
/// use blinktree::BlinkTree;
///
/// let tree: BlinkTree<u64> = BlinkTree::new();
/// tree.insert(10, 100);
/// tree.insert(20, 200);
///
/// assert_eq!(tree.lookup(10), Some(100));
/// assert_eq!(tree.height(), 0);
/// ```
pub struct BlinkTree<K: IndexKey, const CARD: usize = DEFAULT_CARDINALITY> {
    /// Current root; always the highest-level live node. Replaced only
    /// by root promotion, with a Release store.
    root: AtomicPtr<u8>,

    /// Deferred-reclamation collector. Every operation pins a guard so
    /// that future unlink paths (merge-on-underflow) can retire nodes
    /// safely; the current operation set never unlinks.
    collector: Collector,

    _marker: PhantomData<K>,
}

// SAFETY: all shared node state is governed by the lock-word protocol;
// the raw pointers the tree hands between threads always address nodes
// that stay live for the tree's lifetime.
unsafe impl<K: IndexKey, const CARD: usize> Send for BlinkTree<K, CARD> {}
unsafe impl<K: IndexKey, const CARD: usize> Sync for BlinkTree<K, CARD> {}

impl<K: IndexKey, const CARD: usize> BlinkTree<K, CARD> {
    const CARD_CHECK: () = {
        assert!(CARD >= 4, "CARD must be at least 4");
        assert!(CARD <= u32::MAX as usize, "CARD must fit the entry counter");
    };

    /// Create an empty tree. The initial root is an empty leaf.
    #[must_use]
    pub fn new() -> Self {
        // Trigger the compile-time capacity check.
        let _: () = Self::CARD_CHECK;

        let root: Box<LeafNode<K, CARD>> = LeafNode::new_root();

        Self {
            root: AtomicPtr::new(Box::into_raw(root).cast::<u8>()),
            collector: Collector::new(),
            _marker: PhantomData,
        }
    }

    /// Current root level: 0 for a single-leaf tree.
    #[must_use]
    pub fn height(&self) -> u32 {
        // SAFETY: the root pointer always addresses a live node.
        unsafe { header_of(self.root.load(READ_ORD)) }.level()
    }

    // ========================================================================
    //  Point operations
    // ========================================================================

    /// Insert a key that is not present.
    ///
    /// The pre-state contract is the caller's: inserting an existing key
    /// duplicates it (lookups would return the copy closest to the
    /// front). Use [`update`](Self::update) for existing keys.
    pub fn insert(&self, key: K, value: u64) {
        let _guard = self.collector.enter();
        let mut stack: Vec<*mut u8> = Vec::new();

        loop {
            // Reset per-attempt state; the stack is sized by the root
            // level observed at attempt start.
            stack.clear();
            stack.reserve(self.height() as usize);

            let Some((leaf_ptr, version)) = self.to_leaf_with_stack(key, &mut stack) else {
                continue;
            };

            // SAFETY: traversal returned a live leaf.
            let leaf: &LeafNode<K, CARD> = unsafe { Self::leaf_ref(leaf_ptr) };
            if !leaf.header().lock().try_upgrade(version) {
                continue;
            }

            if !leaf.is_full() {
                // SAFETY: write lock held and the leaf has room.
                unsafe { leaf.insert(key, value) };
                leaf.header().lock().write_unlock();
                return;
            }

            // SAFETY: write lock held; the split cascade releases every
            // lock it takes and never abandons the operation.
            unsafe { self.split_insert(leaf_ptr, key, value, &mut stack) };
            return;
        }
    }

    /// Overwrite the value of an existing key. Returns `true` iff the
    /// key was present.
    pub fn update(&self, key: K, value: u64) -> bool {
        let _guard = self.collector.enter();

        loop {
            let Some((leaf_ptr, version)) = self.to_leaf(key) else {
                continue;
            };

            // SAFETY: traversal returned a live leaf.
            let leaf: &LeafNode<K, CARD> = unsafe { Self::leaf_ref(leaf_ptr) };
            if !leaf.header().lock().try_upgrade(version) {
                continue;
            }

            // SAFETY: write lock held.
            let updated: bool = unsafe { leaf.update(key, value) };
            leaf.header().lock().write_unlock();
            return updated;
        }
    }

    /// Look up a key. Returns `None` when absent.
    #[must_use]
    pub fn lookup(&self, key: K) -> Option<u64> {
        let _guard = self.collector.enter();

        loop {
            let Some((leaf_ptr, version)) = self.to_leaf(key) else {
                continue;
            };

            // SAFETY: traversal returned a live leaf.
            let leaf: &LeafNode<K, CARD> = unsafe { Self::leaf_ref(leaf_ptr) };

            // SAFETY: the result is returned only after validation.
            let value: Option<u64> = unsafe { leaf.find(key) };
            if leaf.header().lock().validate(version) {
                return value;
            }
        }
    }

    /// Remove a key. Returns `true` iff the key was present.
    pub fn remove(&self, key: K) -> bool {
        let _guard = self.collector.enter();

        loop {
            let Some((leaf_ptr, version)) = self.to_leaf(key) else {
                continue;
            };

            // SAFETY: traversal returned a live leaf.
            let leaf: &LeafNode<K, CARD> = unsafe { Self::leaf_ref(leaf_ptr) };
            if !leaf.header().lock().try_upgrade(version) {
                continue;
            }

            // SAFETY: write lock held.
            let removed: bool = unsafe { leaf.remove(key) };
            leaf.header().lock().write_unlock();
            return removed;
        }
    }

    // ========================================================================
    //  Range scan
    // ========================================================================

    /// Copy values for ascending keys starting at the first key
    /// `>= min_key` into `buf`. Returns the number of values copied
    /// (up to `buf.len()`).
    ///
    /// The scan validates each leaf individually: concurrent inserts
    /// into a not-yet-visited leaf are visible, inserts into an
    /// already-visited leaf are not.
    pub fn range_lookup(&self, min_key: K, buf: &mut [u64]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        let _guard = self.collector.enter();

        'restart: loop {
            let Some((mut cur, mut version)) = self.to_leaf(min_key) else {
                continue 'restart;
            };

            // SAFETY: validated before the scan commits to the position.
            let mut idx: usize = unsafe { Self::leaf_ref(cur).find_lowerbound(min_key) };
            let mut count: usize = 0;

            loop {
                // SAFETY: each pointer on this chain came from a
                // validated sibling load.
                let leaf: &LeafNode<K, CARD> = unsafe { Self::leaf_ref(cur) };

                // SAFETY: recopied from scratch on any restart.
                let filled: usize = unsafe { leaf.range_copy(idx, buf, count) };
                let sibling: *mut u8 = leaf.header().sibling();

                if filled == buf.len() || sibling.is_null() {
                    if !leaf.header().lock().validate(version) {
                        continue 'restart;
                    }
                    return filled;
                }

                // SAFETY: sibling is non-null and nodes stay live.
                let Some(sibling_version) = unsafe { header_of(sibling) }.lock().read_begin()
                else {
                    continue 'restart;
                };
                if !leaf.header().lock().validate(version) {
                    continue 'restart;
                }

                cur = sibling;
                version = sibling_version;
                count = filled;
                idx = 0;
            }
        }
    }

    // ========================================================================
    //  Node casts
    // ========================================================================

    /// # Safety
    ///
    /// `ptr` must address a live leaf (level 0) of this tree.
    #[inline]
    pub(crate) unsafe fn leaf_ref<'a>(ptr: *mut u8) -> &'a LeafNode<K, CARD> {
        debug_assert_eq!(unsafe { header_of(ptr) }.level(), 0);
        // SAFETY: forwarded contract.
        unsafe { &*ptr.cast::<LeafNode<K, CARD>>() }
    }

    /// # Safety
    ///
    /// `ptr` must address a live internal node (level > 0) of this tree.
    #[inline]
    pub(crate) unsafe fn internal_ref<'a>(ptr: *mut u8) -> &'a InternalNode<K, CARD> {
        debug_assert_ne!(unsafe { header_of(ptr) }.level(), 0);
        // SAFETY: forwarded contract.
        unsafe { &*ptr.cast::<InternalNode<K, CARD>>() }
    }

    /// Read a type-erased node's high key, dispatching on its level.
    ///
    /// # Safety
    ///
    /// `ptr` must address a live node that the caller owns or has
    /// locked (the read is not validated).
    pub(crate) unsafe fn node_high_key(ptr: *mut u8) -> K {
        // SAFETY: forwarded contract.
        unsafe {
            if header_of(ptr).level() == 0 {
                Self::leaf_ref(ptr).high_key()
            } else {
                Self::internal_ref(ptr).high_key()
            }
        }
    }

    // ========================================================================
    //  Invariant checking (tests)
    // ========================================================================

    /// Walk the whole tree verifying structural invariants: strictly
    /// sorted nodes, entry-count bounds, level-homogeneous acyclic
    /// sibling chains ordered by high key, and child level consistency.
    ///
    /// Intended for tests: the tree must be quiescent. Panics on the
    /// first violation.
    pub fn check_invariants(&self) {
        // SAFETY: quiescence is the caller's contract; unvalidated raw
        // reads are then exact.
        unsafe {
            let mut leftmost: *mut u8 = self.root.load(READ_ORD);

            loop {
                let level: u32 = header_of(leftmost).level();
                self.check_level_chain(leftmost, level);

                if level == 0 {
                    break;
                }
                leftmost = Self::internal_ref(leftmost).child_at(0);
            }
        }
    }

    /// # Safety
    ///
    /// Quiescent tree; `head` is the leftmost live node of `level`.
    unsafe fn check_level_chain(&self, head: *mut u8, level: u32) {
        let mut cur: *mut u8 = head;
        let mut prev_high: Option<K> = None;
        let mut visited: HashSet<usize> = HashSet::new();

        while !cur.is_null() {
            assert!(visited.insert(cur.addr()), "sibling chain has a cycle");

            // SAFETY: chain pointers address live nodes.
            let header: &NodeHeader = unsafe { header_of(cur) };
            assert_eq!(header.level(), level, "sibling chain mixes levels");
            assert!(
                !header.lock().is_write_locked(),
                "quiescent tree holds a write lock"
            );
            assert!(!header.lock().is_retired(), "live chain holds a retired node");

            let cnt: usize = header.cnt();
            let rightmost: bool = header.sibling_relaxed().is_null();

            // SAFETY: quiescent, indices bounded by cnt.
            unsafe {
                let (high, first_key) = if level == 0 {
                    let leaf = Self::leaf_ref(cur);
                    assert!(cnt <= CARD, "leaf overfull: {cnt}");

                    for i in 1..cnt {
                        assert!(leaf.key_at(i - 1) < leaf.key_at(i), "leaf keys unsorted");
                    }
                    if !rightmost {
                        for i in 0..cnt {
                            assert!(
                                leaf.key_at(i) <= leaf.high_key(),
                                "leaf key above high key"
                            );
                        }
                    }

                    let first_key = if cnt > 0 { Some(leaf.key_at(0)) } else { None };
                    (leaf.high_key(), first_key)
                } else {
                    let node = Self::internal_ref(cur);
                    assert!(cnt <= CARD - 1, "internal node overfull: {cnt}");

                    for i in 1..cnt {
                        assert!(node.key_at(i - 1) < node.key_at(i), "separators unsorted");
                    }
                    for i in 0..=cnt {
                        let child: *mut u8 = node.child_at(i);
                        assert!(!child.is_null(), "published child slot is null");
                        assert_eq!(
                            header_of(child).level(),
                            level - 1,
                            "child level mismatch"
                        );
                    }
                    if !rightmost {
                        for i in 0..cnt {
                            assert!(
                                node.key_at(i) <= node.high_key(),
                                "separator above high key"
                            );
                        }
                    }

                    let first_key = if cnt > 0 { Some(node.key_at(0)) } else { None };
                    (node.high_key(), first_key)
                };

                if let Some(prev) = prev_high {
                    if let Some(first) = first_key {
                        assert!(prev <= first, "high key overlaps right sibling");
                    }
                    if !rightmost {
                        assert!(prev <= high, "sibling high keys out of order");
                    }
                }
                prev_high = Some(high);
            }

            cur = header.sibling_relaxed();
        }
    }
}

impl<K: IndexKey, const CARD: usize> Default for BlinkTree<K, CARD> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: IndexKey, const CARD: usize> std::fmt::Debug for BlinkTree<K, CARD> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlinkTree")
            .field("height", &self.height())
            .field("cardinality", &CARD)
            .finish_non_exhaustive()
    }
}

impl<K: IndexKey, const CARD: usize> Drop for BlinkTree<K, CARD> {
    fn drop(&mut self) {
        // SAFETY: &mut self means no concurrent operations. Ownership
        // follows child edges only; sibling pointers are cross-links.
        unsafe { reclaim::free_tree::<K, CARD>(self.root.load(RELAXED)) };
    }
}

// ============================================================================
//  Tests
// ============================================================================
