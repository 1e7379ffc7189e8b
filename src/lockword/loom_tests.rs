//! Loom tests for the lock-word protocol.
//!
//! Loom explores all interesting interleavings deterministically, which
//! catches ordering bugs that the std-thread tests only hit by luck.
//!
//! Run with: `RUSTFLAGS="--cfg loom" cargo test --lib lockword::loom_tests`
//!
//! NOTE: Loom requires its own atomic types, so these tests model the
//! word with `loom::sync::atomic::AtomicU64` and mirror the production
//! constants and orderings exactly.

use loom::sync::Arc;
use loom::sync::atomic::{AtomicU64, Ordering, fence};
use loom::thread;

const OBSOLETE_BIT: u64 = 0b01;
const LOCK_BIT: u64 = 0b10;

/// Shadow of [`crate::lockword::LockWord`] on loom atomics.
struct LoomLockWord {
    word: AtomicU64,
}

impl LoomLockWord {
    fn new() -> Self {
        Self {
            word: AtomicU64::new(0),
        }
    }

    fn read_begin(&self) -> Option<u64> {
        let word = self.word.load(Ordering::Acquire);
        if word & (LOCK_BIT | OBSOLETE_BIT) != 0 {
            return None;
        }
        Some(word)
    }

    fn validate(&self, version: u64) -> bool {
        fence(Ordering::Acquire);
        self.word.load(Ordering::Relaxed) == version
    }

    fn try_upgrade(&self, version: u64) -> bool {
        self.word
            .compare_exchange(
                version,
                version + LOCK_BIT,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn write_unlock(&self) {
        self.word.fetch_add(LOCK_BIT, Ordering::Release);
    }
}

/// Two upgraders contending on one version: exactly one wins.
#[test]
fn upgrade_is_mutually_exclusive() {
    loom::model(|| {
        let lock = Arc::new(LoomLockWord::new());
        let wins = Arc::new(AtomicU64::new(0));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let wins = Arc::clone(&wins);
                thread::spawn(move || {
                    if let Some(version) = lock.read_begin() {
                        if lock.try_upgrade(version) {
                            wins.fetch_add(1, Ordering::Relaxed);
                            lock.write_unlock();
                        }
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        // Both captured version 0; at most one CAS can succeed on it.
        assert!(wins.load(Ordering::Relaxed) <= 1);
    });
}

/// A reader that validates sees either all of a writer's stores or none.
#[test]
fn validated_read_is_atomic() {
    loom::model(|| {
        let lock = Arc::new(LoomLockWord::new());
        let a = Arc::new(AtomicU64::new(0));
        let b = Arc::new(AtomicU64::new(0));

        let writer = {
            let lock = Arc::clone(&lock);
            let a = Arc::clone(&a);
            let b = Arc::clone(&b);
            thread::spawn(move || {
                let version = lock.read_begin().unwrap();
                assert!(lock.try_upgrade(version));
                a.store(1, Ordering::Relaxed);
                b.store(1, Ordering::Relaxed);
                lock.write_unlock();
            })
        };

        let reader = {
            let lock = Arc::clone(&lock);
            let a = Arc::clone(&a);
            let b = Arc::clone(&b);
            thread::spawn(move || {
                if let Some(version) = lock.read_begin() {
                    let got_a = a.load(Ordering::Relaxed);
                    let got_b = b.load(Ordering::Relaxed);
                    if lock.validate(version) {
                        assert_eq!(got_a, got_b, "validated read must not tear");
                    }
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();
    });
}

/// A writer's mutations happen-before a validation that observes the new
/// version.
#[test]
fn unlock_publishes_mutations() {
    loom::model(|| {
        let lock = Arc::new(LoomLockWord::new());
        let data = Arc::new(AtomicU64::new(0));

        let writer = {
            let lock = Arc::clone(&lock);
            let data = Arc::clone(&data);
            thread::spawn(move || {
                assert!(lock.try_upgrade(0));
                data.store(42, Ordering::Relaxed);
                lock.write_unlock();
            })
        };

        let reader = {
            let lock = Arc::clone(&lock);
            let data = Arc::clone(&data);
            thread::spawn(move || {
                // A capture of the post-unlock version must see the store.
                if let Some(version) = lock.read_begin() {
                    if version == 4 {
                        assert_eq!(data.load(Ordering::Relaxed), 42);
                    }
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();
    });
}
