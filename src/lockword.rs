//! Filepath: src/lockword.rs
//!
//! Per-node lock word for optimistic concurrency control.
//!
//! [`LockWord`] packs the whole synchronization state of a node into a
//! single `u64`: a monotonically increasing version counter in the high
//! bits, a write-lock bit, and an obsolete bit.
//!
//! # Layout
//!
//! Bit 1: `locked` | Bit 0: `obsolete` | Bits 2..63: version counter
//!
//! - unlocked        ⇔ `....00`
//! - write-locked    ⇔ `....10`
//! - obsolete        ⇔ `.....1` (node logically retired)
//!
//! # Concurrency Model
//!
//! 1. Readers: [`read_begin`](LockWord::read_begin) to capture a version,
//!    perform raw reads, [`validate`](LockWord::validate) before acting on
//!    anything that was read.
//! 2. Writers: [`try_upgrade`](LockWord::try_upgrade) from a captured
//!    version, mutate in place, then [`write_unlock`](LockWord::write_unlock).
//!
//! Unlocking adds `0b10`: the lock bit clears and the carry bumps the
//! version counter, invalidating every version captured before the lock
//! was taken. Retiring a node unlocks with `0b11`, which additionally
//! sets the obsolete bit; any reader that observes it restarts from the
//! root.
//!
//! Readers never block. A failed capture, validation, or upgrade issues a
//! CPU pause hint and reports restart to the caller.

use std::sync::atomic::{AtomicU64, fence};

use crate::ordering::{CAS_FAILURE, CAS_SUCCESS, READ_ORD, RELAXED, WRITE_ORD};

/// Obsolete bit: the node is logically removed from the tree.
const OBSOLETE_BIT: u64 = 0b01;

/// Lock bit: the node is write-locked.
const LOCK_BIT: u64 = 0b10;

// ============================================================================
//  LockWord
// ============================================================================

/// A versioned lock for tree nodes.
///
/// # Example
///
/// ```rust
/// use blinktree::lockword::LockWord;
///
/// let lock = LockWord::new();
/// let version = lock.read_begin().unwrap();
///
/// assert!(lock.try_upgrade(version));
/// lock.write_unlock();
///
/// // The unlock bumped the version: the old capture no longer validates.
/// assert!(!lock.validate(version));
/// ```
#[derive(Debug)]
pub struct LockWord {
    word: AtomicU64,
}

impl LockWord {
    /// Create an unlocked lock word with version zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            word: AtomicU64::new(0),
        }
    }

    #[inline]
    const fn is_locked(word: u64) -> bool {
        word & LOCK_BIT == LOCK_BIT
    }

    #[inline]
    const fn is_obsolete(word: u64) -> bool {
        word & OBSOLETE_BIT == OBSOLETE_BIT
    }

    // ========================================================================
    //  Optimistic read protocol
    // ========================================================================

    /// Capture a version for an optimistic read.
    ///
    /// Returns `None` when the node is write-locked or obsolete; the
    /// caller must restart its operation from the root.
    #[inline]
    #[must_use]
    pub fn read_begin(&self) -> Option<u64> {
        let word: u64 = self.word.load(READ_ORD);

        if Self::is_locked(word) || Self::is_obsolete(word) {
            std::hint::spin_loop();
            return None;
        }

        Some(word)
    }

    /// Re-check a captured version after a batch of raw reads.
    ///
    /// Returns `false` when the word changed in any way (version bump,
    /// lock taken, node retired); everything read since `read_begin` must
    /// then be discarded.
    ///
    /// The Acquire fence keeps the preceding data reads from being
    /// reordered past the reload (seqlock discipline).
    #[inline]
    #[must_use]
    pub fn validate(&self, version: u64) -> bool {
        fence(READ_ORD);

        if self.word.load(RELAXED) == version {
            true
        } else {
            std::hint::spin_loop();
            false
        }
    }

    // ========================================================================
    //  Write lock
    // ========================================================================

    /// Atomically upgrade a captured version to the write lock.
    ///
    /// Returns `false` when the word moved since `version` was captured
    /// (another writer got there first); the caller must restart.
    #[inline]
    #[must_use]
    pub fn try_upgrade(&self, version: u64) -> bool {
        match self
            .word
            .compare_exchange(version, version + LOCK_BIT, CAS_SUCCESS, CAS_FAILURE)
        {
            Ok(_) => true,
            Err(_) => {
                std::hint::spin_loop();
                false
            }
        }
    }

    /// Release the write lock, bumping the version counter.
    #[inline]
    pub fn write_unlock(&self) {
        self.word.fetch_add(LOCK_BIT, WRITE_ORD);
    }

    /// Release the write lock, bumping the version counter and marking
    /// the node obsolete. Readers observing the word afterwards restart.
    #[inline]
    pub fn write_unlock_obsolete(&self) {
        self.word.fetch_add(LOCK_BIT | OBSOLETE_BIT, WRITE_ORD);
    }

    // ========================================================================
    //  Inspection
    // ========================================================================

    /// Check whether the node is currently write-locked.
    #[inline]
    #[must_use]
    pub fn is_write_locked(&self) -> bool {
        Self::is_locked(self.word.load(RELAXED))
    }

    /// Check whether the node has been retired.
    #[inline]
    #[must_use]
    pub fn is_retired(&self) -> bool {
        Self::is_obsolete(self.word.load(RELAXED))
    }

    /// The raw word, for tests and diagnostics.
    #[inline]
    #[must_use]
    pub fn raw(&self) -> u64 {
        self.word.load(RELAXED)
    }
}

impl Default for LockWord {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(all(test, loom))]
mod loom_tests;

// ============================================================================
//  Tests
// ============================================================================
