//! Priority donation scenarios, including the eight-level donation chain
//! and lock auto-release on thread death.

use super::{record, snapshot, trace};
use crate::kernel::{self, KernelOptions};
use crate::sync::Lock;
use crate::thread::{get_priority, set_priority, PRI_DEFAULT, PRI_MIN};

extern crate alloc;
use alloc::format;
use alloc::sync::Arc;
use alloc::vec::Vec;

const NESTING_DEPTH: usize = 8;

#[test]
fn test_donation_raises_and_recovers() {
    kernel::boot(KernelOptions::default(), || {
        let lock = Arc::new(Lock::new());
        lock.acquire();

        let donor_lock = lock.clone();
        kernel::spawn("donor", PRI_DEFAULT + 9, move || {
            donor_lock.acquire();
            donor_lock.release();
        })
        .unwrap();

        // The donor outranks us, so it already ran, blocked on the lock and
        // donated its priority to us.
        assert_eq!(get_priority(), PRI_DEFAULT + 9);

        lock.release();
        // Donor ran to completion; the donation is gone with it.
        assert_eq!(get_priority(), PRI_DEFAULT);
    });
}

#[test]
fn test_donation_max_over_held_locks() {
    kernel::boot(KernelOptions::default(), || {
        let l1 = Arc::new(Lock::new());
        let l2 = Arc::new(Lock::new());
        l1.acquire();
        l2.acquire();

        let d1 = l1.clone();
        kernel::spawn("d1", 40, move || {
            d1.acquire();
            d1.release();
        })
        .unwrap();
        let d2 = l2.clone();
        kernel::spawn("d2", 50, move || {
            d2.acquire();
            d2.release();
        })
        .unwrap();

        assert_eq!(get_priority(), 50);
        l2.release();
        // d2 is gone; d1 still donates through l1.
        assert_eq!(get_priority(), 40);
        l1.release();
        assert_eq!(get_priority(), PRI_DEFAULT);
    });
}

/// The eight-level donation chain: donor `i` takes lock `i`, then blocks on
/// lock `i-1`, donating its priority down the whole chain to the main
/// thread. Interlopers sit between the donor priorities to prove that
/// donation, not luck, keeps the chain running.
#[test]
fn test_priority_donate_chain() {
    kernel::boot(KernelOptions::default(), || {
        let t = trace();
        set_priority(PRI_MIN);

        let locks: Vec<Arc<Lock>> = (0..NESTING_DEPTH - 1)
            .map(|_| Arc::new(Lock::new()))
            .collect();

        locks[0].acquire();
        record(&t, "main got lock");

        for i in 1..NESTING_DEPTH {
            let donor_priority = PRI_MIN + (i as i32) * 3;
            let first = if i < NESTING_DEPTH - 1 {
                Some(locks[i].clone())
            } else {
                None
            };
            let second = locks[i - 1].clone();
            let dt = t.clone();
            kernel::spawn(&format!("thread {i}"), donor_priority, move || {
                if let Some(first) = &first {
                    first.acquire();
                }
                second.acquire();
                record(&dt, format!("thread {i} got lock"));
                second.release();
                // Still holding `first`, whose waiter keeps donating the
                // chain maximum; the deepest donor is back at its own base,
                // which is the same value.
                record(&dt, format!("thread {i} priority {}", get_priority()));
                // `first` is deliberately left held; it is released when
                // this thread dies.
            })
            .unwrap();

            // The donor has already run and blocked; its priority must have
            // reached us through the whole chain.
            assert_eq!(get_priority(), donor_priority);

            let it = t.clone();
            kernel::spawn(&format!("interloper {i}"), donor_priority - 1, move || {
                record(&it, format!("interloper {i} finished"));
            })
            .unwrap();
        }

        locks[0].release();

        // The chain has fully unwound before a PRI_MIN thread runs again.
        assert_eq!(get_priority(), PRI_MIN);

        let log = snapshot(&t);
        let got: Vec<&String> = log.iter().filter(|e| e.ends_with("got lock")).collect();
        assert_eq!(got.len(), NESTING_DEPTH);
        for (i, entry) in got.iter().enumerate().skip(1) {
            assert_eq!(**entry, format!("thread {i} got lock"));
        }
        let reported_max = ((NESTING_DEPTH - 1) * 3) as i32;
        for i in 1..NESTING_DEPTH {
            assert!(
                log.contains(&format!("thread {i} priority {reported_max}")),
                "donor {i} did not run at the chain maximum: {log:?}"
            );
            assert!(log.contains(&format!("interloper {i} finished")));
        }
    });
}

/// The donation chain again, but the thread anchoring it dies without
/// releasing anything. Its locks are released on death, so the chain
/// unwinds instead of deadlocking.
#[test]
fn test_priority_donate_chain_autorelease() {
    kernel::boot(KernelOptions::default(), || {
        let t = trace();
        set_priority(PRI_MIN);

        let main_lock = Arc::new(Lock::new());
        // The chain locks outlive every donor; donors only hold clones.
        let locks: Vec<Arc<Lock>> = (0..NESTING_DEPTH - 1)
            .map(|_| Arc::new(Lock::new()))
            .collect();

        let fm_lock = main_lock.clone();
        let fm_locks = locks.clone();
        let fm_trace = t.clone();
        kernel::spawn("fake-main", PRI_DEFAULT, move || {
            fm_lock.acquire();
            set_priority(PRI_MIN);

            let locks = fm_locks;
            locks[0].acquire();
            record(&fm_trace, "fake-main got lock");

            for i in 1..NESTING_DEPTH {
                let donor_priority = PRI_MIN + (i as i32) * 3;
                let first = if i < NESTING_DEPTH - 1 {
                    Some(locks[i].clone())
                } else {
                    None
                };
                let second = locks[i - 1].clone();
                let dt = fm_trace.clone();
                kernel::spawn(&format!("thread {i}"), donor_priority, move || {
                    if let Some(first) = &first {
                        first.acquire();
                    }
                    second.acquire();
                    record(&dt, format!("thread {i} got lock"));
                    second.release();
                    record(&dt, format!("thread {i} priority {}", get_priority()));
                })
                .unwrap();
                assert_eq!(get_priority(), donor_priority);
            }
            // Dies holding `main_lock` and `locks[0]`.
        })
        .unwrap();

        // fake-main outranked us and holds the lock by now.
        main_lock.acquire();
        record(&t, "fake-main finished");
        main_lock.release();

        let log = snapshot(&t);
        assert!(log.contains(&"fake-main finished".into()));
        let reported_max = ((NESTING_DEPTH - 1) * 3) as i32;
        for i in 1..NESTING_DEPTH {
            assert!(
                log.contains(&format!("thread {i} got lock")),
                "donor {i} deadlocked against a dead holder: {log:?}"
            );
            assert!(log.contains(&format!("thread {i} priority {reported_max}")));
        }
    });
}

/// Lowering your own priority below a ready thread hands over the CPU
/// before returning.
#[test]
fn test_priority_lower_then_yield() {
    kernel::boot(KernelOptions::default(), || {
        let t = trace();
        set_priority(50);

        let mt = t.clone();
        kernel::spawn("mid", 30, move || {
            record(&mt, "mid ran");
        })
        .unwrap();
        // Lower priority than us: must not have run yet.
        assert!(snapshot(&t).is_empty());

        set_priority(10);
        // The priority-30 thread ran before control came back.
        assert_eq!(snapshot(&t), ["mid ran"]);
    });
}
