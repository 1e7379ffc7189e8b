//! # blinktree
//!
//! A concurrent, in-memory, ordered key→value index.
//!
//! The index is a B-link tree: a B+-tree whose nodes carry right-sibling
//! pointers, so node splits can be observed and traversed by concurrent
//! threads without holding locks along the path from the root.
//!
//! ## Design
//!
//! - **Optimistic reads**: every node carries a single 64-bit
//!   lock/version word ([`lockword::LockWord`]). Readers capture a
//!   version, read, and validate; a mismatch restarts the operation
//!   from the root. Readers never block.
//! - **Localized writes**: writers upgrade the leaf's captured version
//!   to a write lock and mutate in place. At most a parent and a child
//!   are locked together, and only while a split propagates.
//! - **Split propagation**: a full node splits into a right sibling;
//!   the separator climbs through the ancestor stack captured on
//!   descent, with root promotion — and recovery when another thread
//!   promoted first — handled by the tree driver.
//! - **Reclamation**: unlinked nodes are handed to a
//!   [seize](https://docs.rs/seize) collector so in-flight readers can
//!   drain before memory is freed.
//!
//! ## Example
//!
//! ```rust
//! use blinktree::BlinkTree;
//!
//! let tree: BlinkTree<u64> = BlinkTree::new();
//! tree.insert(10, 100);
//! tree.insert(20, 200);
//!
//! assert_eq!(tree.lookup(10), Some(100));
//! assert!(tree.update(10, 101));
//! assert_eq!(tree.lookup(10), Some(101));
//! assert!(tree.remove(20));
//! assert_eq!(tree.lookup(20), None);
//!
//! let mut buf = [0u64; 8];
//! assert_eq!(tree.range_lookup(0, &mut buf), 1);
//! assert_eq!(buf[0], 101);
//! ```

pub mod key;
pub mod lockword;
pub mod tree;

mod internode;
mod leaf;
mod node;
mod ordering;
mod reclaim;
mod tracing_helpers;

pub use key::IndexKey;
pub use node::{DEFAULT_CARDINALITY, PAGE_SIZE};
pub use tree::BlinkTree;
