//! Standard memory orderings for concurrent node access.
//!
//! These constants keep ordering usage consistent across the codebase
//! and make the intent clear at each access point.

use std::sync::atomic::Ordering;

/// Ordering for reading node fields during optimistic traversal.
/// Pairs with writer's Release stores.
pub const READ_ORD: Ordering = Ordering::Acquire;

/// Ordering for writing node fields under the write lock.
/// Pairs with reader's Acquire loads.
pub const WRITE_ORD: Ordering = Ordering::Release;

/// Ordering for a successful lock-upgrade CAS.
pub const CAS_SUCCESS: Ordering = Ordering::AcqRel;

/// Ordering for a failed lock-upgrade CAS.
/// Only needs to observe the current word.
pub const CAS_FAILURE: Ordering = Ordering::Acquire;

/// Ordering for relaxed accesses within a locked region or on
/// not-yet-published nodes.
pub const RELAXED: Ordering = Ordering::Relaxed;
