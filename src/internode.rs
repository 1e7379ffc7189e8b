//! Filepath: src/internode.rs
//!
//! Internal node: sorted separator keys routing to child nodes.
//!
//! Logical layout for `cnt` separators `k_1 .. k_n`:
//!
//! ```text
//! | k1 | k2 | k3 | k4 |    |
//! | p0 | p1 | p2 | p3 | p4 |
//! ```
//!
//! `children[i]` covers keys in `(k_i, k_{i+1}]` (with `k_0 = -inf` and
//! `k_{n+1} = high_key`); the trailing child lives at `children[cnt]`,
//! which is why [`is_full`](InternalNode::is_full) reserves one slot
//! (`cnt == CARD - 1`).
//!
//! Separator keys follow the leaf's seqlock discipline (raw reads,
//! validate before acting). Child pointers are `AtomicPtr`: a reader
//! dereferences the chosen child *before* validating the parent, so the
//! pointer load itself must be untearable — a stale-but-real pointer is
//! fine (validation catches the misroute), a torn one would not be.
//! Same reasoning for the sibling pointer in the header.

use std::cell::UnsafeCell;
use std::ptr as StdPtr;
use std::sync::atomic::AtomicPtr;

use crate::key::IndexKey;
use crate::node::NodeHeader;
use crate::ordering::{READ_ORD, RELAXED, WRITE_ORD};

/// Outcome of routing a key through an internal node: either descend a
/// level or continue rightwards on the same level.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ScanStep {
    /// Key belongs under this node; descend into the child.
    Child(*mut u8),

    /// Key is beyond this node's high key; continue at the right sibling.
    Sibling(*mut u8),
}

impl ScanStep {
    #[inline]
    pub(crate) fn ptr(self) -> *mut u8 {
        match self {
            Self::Child(ptr) | Self::Sibling(ptr) => ptr,
        }
    }
}

// ============================================================================
//  InternalNode
// ============================================================================

/// An internal routing node (level > 0).
///
/// # Type Parameters
/// * `K` - key type
/// * `CARD` - slot capacity shared with leaves; internal nodes are full
///   at `cnt == CARD - 1` to keep room for the trailing child
#[repr(C)]
pub struct InternalNode<K: IndexKey, const CARD: usize> {
    header: NodeHeader,
    high_key: UnsafeCell<K>,
    keys: UnsafeCell<[K; CARD]>,
    children: [AtomicPtr<u8>; CARD],
}

// SAFETY: keys follow the seqlock discipline, children and the header
// are atomic; see the module docs.
unsafe impl<K: IndexKey, const CARD: usize> Send for InternalNode<K, CARD> {}
unsafe impl<K: IndexKey, const CARD: usize> Sync for InternalNode<K, CARD> {}

impl<K: IndexKey, const CARD: usize> InternalNode<K, CARD> {
    /// Create a node with `cnt` yet-to-be-filled separators, linked to
    /// `sibling`. Used by [`split`](Self::split).
    #[must_use]
    pub(crate) fn new_sibling(sibling: *mut u8, cnt: usize, level: u32, high_key: K) -> Box<Self> {
        Box::new(Self {
            header: NodeHeader::new(sibling, cnt, level),
            high_key: UnsafeCell::new(high_key),
            keys: UnsafeCell::new([K::default(); CARD]),
            children: std::array::from_fn(|_| AtomicPtr::new(StdPtr::null_mut())),
        })
    }

    /// Create the internal node installed by a root promotion: one
    /// separator with the split-off halves as its two children.
    #[must_use]
    pub(crate) fn new_root(
        split_key: K,
        left: *mut u8,
        right: *mut u8,
        level: u32,
        high_key: K,
    ) -> Box<Self> {
        let node: Box<Self> = Self::new_sibling(StdPtr::null_mut(), 1, level, high_key);

        // SAFETY: node is exclusively owned until published.
        unsafe {
            StdPtr::write(node.keys_ptr(), split_key);
        }
        node.children[0].store(left, RELAXED);
        node.children[1].store(right, RELAXED);

        node
    }

    #[inline]
    pub(crate) fn header(&self) -> &NodeHeader {
        &self.header
    }

    /// Full when one more separator would leave no room for the trailing
    /// child.
    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.header.cnt() == CARD - 1
    }

    #[inline]
    fn keys_ptr(&self) -> *mut K {
        self.keys.get().cast::<K>()
    }

    // ========================================================================
    //  Optimistic accessors
    // ========================================================================

    /// Read the high key.
    ///
    /// # Safety
    ///
    /// May race with a locked writer; validate before acting on the
    /// result.
    #[inline]
    pub(crate) unsafe fn high_key(&self) -> K {
        // SAFETY: K is Copy plain data; torn reads are discarded by the
        // caller on validation failure.
        unsafe { StdPtr::read(self.high_key.get()) }
    }

    /// Smallest index whose separator is `>= key`, or `cnt` when none is.
    ///
    /// # Safety
    ///
    /// As [`high_key`](Self::high_key).
    pub(crate) unsafe fn find_lowerbound(&self, key: K) -> usize {
        let cnt: usize = self.header.cnt();
        let base: *const K = self.keys_ptr();

        for i in 0..cnt {
            // SAFETY: i < cnt < CARD and the array is fully initialized.
            if unsafe { StdPtr::read(base.add(i)) } >= key {
                return i;
            }
        }

        cnt
    }

    /// Route `key` one step: to the right sibling when the key is beyond
    /// this node's high key, otherwise down into the covering child.
    ///
    /// # Safety
    ///
    /// As [`high_key`](Self::high_key). The returned pointer is a real
    /// node (loads are atomic and slots only ever hold published nodes),
    /// so the caller may `read_begin` it before validating this node.
    pub(crate) unsafe fn scan_node(&self, key: K) -> ScanStep {
        let sibling: *mut u8 = self.header.sibling();

        // SAFETY: forwarded contract.
        if !sibling.is_null() && unsafe { self.high_key() } < key {
            return ScanStep::Sibling(sibling);
        }

        // SAFETY: forwarded contract; the index is at most cnt, and
        // children[0..=cnt] are published non-null.
        let idx: usize = unsafe { self.find_lowerbound(key) };
        ScanStep::Child(self.children[idx].load(READ_ORD))
    }

    // ========================================================================
    //  Mutators (write lock required)
    // ========================================================================

    /// Insert a separator for a freshly split child.
    ///
    /// `right` is the new right half of the child that split at `key`;
    /// it becomes the child covering `(key, next_separator]`, while the
    /// pre-split child (already in place) keeps covering `(prev, key]`.
    ///
    /// # Safety
    ///
    /// Caller holds this node's write lock (or owns it exclusively), and
    /// the node is not full.
    pub(crate) unsafe fn insert(&self, key: K, right: *mut u8) {
        let cnt: usize = self.header.cnt();
        debug_assert!(cnt < CARD - 1, "insert into a full internal node");

        let base: *mut K = self.keys_ptr();

        // SAFETY: lock held; pos <= cnt and cnt + 1 < CARD keep every
        // shifted slot in bounds.
        let pos: usize = unsafe {
            let pos: usize = self.find_lowerbound(key);
            StdPtr::copy(base.add(pos), base.add(pos + 1), cnt - pos);
            StdPtr::write(base.add(pos), key);

            if key > StdPtr::read(self.high_key.get()) {
                StdPtr::write(self.high_key.get(), key);
            }

            pos
        };

        // Shift children (pos, cnt] right by one, slot by slot so racing
        // readers always load a real pointer.
        let mut i: usize = cnt + 1;
        while i > pos + 1 {
            let child: *mut u8 = self.children[i - 1].load(RELAXED);
            self.children[i].store(child, WRITE_ORD);
            i -= 1;
        }
        self.children[pos + 1].store(right, WRITE_ORD);

        self.header.set_cnt(cnt + 1);
    }

    /// Split off the upper half into a new right sibling.
    ///
    /// The separator at `cnt - cnt/2` is promoted (returned, not kept in
    /// either half): the new node takes the separators above it together
    /// with their children and inherits the current high key; this node
    /// keeps the separators below it, the promoted key's child as its new
    /// trailing child, and the promoted key as its new high key.
    ///
    /// # Safety
    ///
    /// Caller holds this node's write lock. The returned node is
    /// unlocked but unreachable to other threads until this node's lock
    /// is released.
    pub(crate) unsafe fn split(&self) -> (*mut Self, K) {
        let cnt: usize = self.header.cnt();
        debug_assert!(cnt >= 2, "split of an underfull internal node");

        let half: usize = cnt - cnt / 2;
        let new_cnt: usize = cnt - half - 1;
        let base: *mut K = self.keys_ptr();

        // SAFETY: lock held; half < cnt.
        let split_key: K = unsafe { StdPtr::read(base.add(half)) };

        let new_node: Box<Self> = Self::new_sibling(
            self.header.sibling(),
            new_cnt,
            self.header.level(),
            // SAFETY: lock held.
            unsafe { self.high_key() },
        );

        // SAFETY: new_node is exclusively owned; source ranges
        // [half + 1, cnt) and [half + 1, cnt + 1] are in bounds.
        unsafe {
            StdPtr::copy_nonoverlapping(base.add(half + 1), new_node.keys_ptr(), new_cnt);
        }
        for i in 0..=new_cnt {
            let child: *mut u8 = self.children[half + 1 + i].load(RELAXED);
            new_node.children[i].store(child, RELAXED);
        }

        let new_ptr: *mut Self = Box::into_raw(new_node);
        self.header.set_sibling(new_ptr.cast::<u8>());
        // SAFETY: lock held.
        unsafe {
            StdPtr::write(self.high_key.get(), split_key);
        }
        self.header.set_cnt(half);

        (new_ptr, split_key)
    }

    // ========================================================================
    //  Quiescent helpers (invariant checks, teardown)
    // ========================================================================

    /// Separator key at `idx`. Quiescent access only.
    ///
    /// # Safety
    ///
    /// No concurrent writer, and `idx < cnt`.
    pub(crate) unsafe fn key_at(&self, idx: usize) -> K {
        debug_assert!(idx < self.header.cnt());
        // SAFETY: caller guarantees quiescence and bounds.
        unsafe { StdPtr::read(self.keys_ptr().add(idx)) }
    }

    /// Child pointer at `idx` (`idx <= cnt`). Quiescent access only.
    pub(crate) fn child_at(&self, idx: usize) -> *mut u8 {
        debug_assert!(idx <= self.header.cnt());
        self.children[idx].load(RELAXED)
    }
}

// ============================================================================
//  Tests
// ============================================================================
