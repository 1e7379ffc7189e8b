//! Stress tests for concurrent tree operations.
//!
//! These are designed to expose protocol races through:
//! - High thread counts on disjoint key ranges
//! - Small cardinalities (deep trees, constant splits, root races)
//! - Mixed read/write workloads
//!
//! Run with:
//! ```bash
//! cargo test --release --test stress_tests
//! ```

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use blinktree::BlinkTree;
use rand::seq::SliceRandom;

/// Disjoint per-thread key: thread `t` owns `{ k : k % threads == t }`.
fn owned_keys(thread: usize, threads: usize, per_thread: usize) -> Vec<u64> {
    (0..per_thread)
        .map(|i| (i * threads + thread) as u64)
        .collect()
}

// =============================================================================
// Disjoint concurrent inserts
// =============================================================================

/// 8 threads, 10 000 disjoint keys each, randomized order: after the
/// join every key is retrievable and a single-threaded scan returns
/// exactly the union.
#[test]
fn concurrent_disjoint_inserts_default_card() {
    common::init_tracing();

    const THREADS: usize = 8;
    const PER_THREAD: usize = 10_000;
    const TOTAL: usize = THREADS * PER_THREAD;

    let tree: Arc<BlinkTree<u64>> = Arc::new(BlinkTree::new());

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let mut keys: Vec<u64> = owned_keys(t, THREADS, PER_THREAD);
                keys.shuffle(&mut rand::rng());

                for k in keys {
                    tree.insert(k, k + 1);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    tree.check_invariants();

    for k in 0..TOTAL as u64 {
        assert_eq!(tree.lookup(k), Some(k + 1), "missing key {k}");
    }

    // The full scan sees exactly the union, in order.
    let mut buf = vec![0u64; TOTAL + 8];
    let count: usize = tree.range_lookup(0, &mut buf);
    assert_eq!(count, TOTAL);
    for (i, &v) in buf[..count].iter().enumerate() {
        assert_eq!(v, i as u64 + 1);
    }
}

/// Small cardinality: the tree is deep and splits on almost every
/// insert, hammering the backtracking cascade and root-race recovery.
#[test]
fn concurrent_disjoint_inserts_deep_tree() {
    common::init_tracing();

    const THREADS: usize = 8;
    const PER_THREAD: usize = 2_000;
    const TOTAL: usize = THREADS * PER_THREAD;

    let tree: Arc<BlinkTree<u64, 4>> = Arc::new(BlinkTree::new());

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let mut keys: Vec<u64> = owned_keys(t, THREADS, PER_THREAD);
                keys.shuffle(&mut rand::rng());

                for k in keys {
                    tree.insert(k, k);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    tree.check_invariants();
    assert!(tree.height() >= 3, "deep tree expected at CARD = 4");

    for k in 0..TOTAL as u64 {
        assert_eq!(tree.lookup(k), Some(k), "missing key {k}");
    }
}

// =============================================================================
// Mixed workloads
// =============================================================================

/// Readers on a stable prefilled range while writers insert a disjoint
/// range: prefilled lookups must never miss, and scans must always see
/// at least the prefilled values in order.
#[test]
fn readers_never_miss_stable_keys() {
    common::init_tracing();

    const WRITERS: usize = 4;
    const READERS: usize = 4;
    const PREFILL: usize = 5_000;
    const PER_WRITER: usize = 2_500;

    let tree: Arc<BlinkTree<u64, 8>> = Arc::new(BlinkTree::new());

    // Stable range: even keys. Writers add odd keys.
    for i in 0..PREFILL {
        tree.insert((i * 2) as u64, i as u64);
    }

    let done = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..WRITERS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let mut keys: Vec<u64> = (0..PER_WRITER)
                    .map(|i| ((i * WRITERS + t) * 2 + 1) as u64)
                    .collect();
                keys.shuffle(&mut rand::rng());

                for k in keys {
                    tree.insert(k, k);
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..READERS)
        .map(|r| {
            let tree = Arc::clone(&tree);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut rounds: usize = 0;
                while !done.load(Ordering::Acquire) {
                    let probe: u64 = (((rounds * 7919 + r * 131) % PREFILL) * 2) as u64;
                    assert_eq!(
                        tree.lookup(probe),
                        Some(probe / 2),
                        "stable key {probe} went missing"
                    );
                    rounds += 1;
                }
            })
        })
        .collect();

    for w in writers {
        w.join().unwrap();
    }
    done.store(true, Ordering::Release);
    for r in readers {
        r.join().unwrap();
    }

    tree.check_invariants();

    let total: usize = PREFILL + WRITERS * PER_WRITER;
    let mut buf = vec![0u64; total + 8];
    assert_eq!(tree.range_lookup(0, &mut buf), total);
}

/// Concurrent updates and removes on disjoint ranges leave exactly the
/// expected survivors.
#[test]
fn concurrent_updates_and_removes() {
    common::init_tracing();

    const THREADS: usize = 8;
    const PER_THREAD: usize = 2_000;
    const TOTAL: usize = THREADS * PER_THREAD;

    let tree: Arc<BlinkTree<u64, 8>> = Arc::new(BlinkTree::new());

    for k in 0..TOTAL as u64 {
        tree.insert(k, 0);
    }

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let mut keys: Vec<u64> = owned_keys(t, THREADS, PER_THREAD);
                keys.shuffle(&mut rand::rng());

                for k in keys {
                    if k % 3 == 0 {
                        assert!(tree.remove(k), "own key {k} already gone");
                    } else {
                        assert!(tree.update(k, k + 7), "own key {k} not updatable");
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    tree.check_invariants();

    for k in 0..TOTAL as u64 {
        if k % 3 == 0 {
            assert_eq!(tree.lookup(k), None, "key {k} should be removed");
        } else {
            assert_eq!(tree.lookup(k), Some(k + 7), "key {k} lost its update");
        }
    }
}

/// Scans racing with inserts stay sorted: every snapshot a scan returns
/// is an ascending value sequence (values mirror keys here).
#[test]
fn concurrent_scans_stay_sorted() {
    common::init_tracing();

    const WRITERS: usize = 4;
    const PER_WRITER: usize = 4_000;

    let tree: Arc<BlinkTree<u64, 8>> = Arc::new(BlinkTree::new());
    let done = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..WRITERS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let mut keys: Vec<u64> = owned_keys(t, WRITERS, PER_WRITER);
                keys.shuffle(&mut rand::rng());

                for k in keys {
                    tree.insert(k, k);
                }
            })
        })
        .collect();

    let scanner = {
        let tree = Arc::clone(&tree);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut buf = vec![0u64; 256];
            let mut min_key: u64 = 0;

            while !done.load(Ordering::Acquire) {
                let count: usize = tree.range_lookup(min_key, &mut buf);

                for window in buf[..count].windows(2) {
                    assert!(window[0] < window[1], "scan out of order: {window:?}");
                }

                min_key = if count == buf.len() {
                    buf[count - 1] + 1
                } else {
                    0
                };
            }
        })
    };

    for w in writers {
        w.join().unwrap();
    }
    done.store(true, Ordering::Release);
    scanner.join().unwrap();

    tree.check_invariants();
}
