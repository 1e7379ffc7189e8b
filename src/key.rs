//! Key parameter for the tree.
//!
//! Keys are compile-time parameters: totally ordered, trivially copyable
//! plain data. The `Default` value stands in for the not-yet-set high key
//! of a freshly constructed node; that is sound because no query predates
//! the first insert, and every split recomputes high keys from live
//! entries.

use std::fmt::Debug;

/// Bounds required of a tree key.
///
/// Implemented for free for every type that satisfies the bounds, which
/// covers the integer types the index is typically instantiated with.
pub trait IndexKey: Copy + Ord + Default + Debug + Send + Sync + 'static {}

impl<T> IndexKey for T where T: Copy + Ord + Default + Debug + Send + Sync + 'static {}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_index_key<K: IndexKey>() {}

    #[test]
    fn integer_keys_qualify() {
        assert_index_key::<u32>();
        assert_index_key::<u64>();
        assert_index_key::<i64>();
        assert_index_key::<u128>();
        assert_index_key::<[u8; 16]>();
    }
}
