//! Core scheduling behavior: preemption, FIFO fairness, creation limits.

use super::{record, snapshot, trace};
use crate::errors::SpawnError;
use crate::kernel::{self, KernelOptions};
use crate::thread::{current_name, get_priority, MAX_THREADS, PRI_DEFAULT, PRI_MIN};
use crate::timer;

extern crate alloc;
use alloc::format;
use alloc::sync::Arc;

use portable_atomic::{AtomicBool, Ordering};

/// Creating a higher-priority thread hands it the CPU before `spawn`
/// returns.
#[test]
fn test_spawn_higher_priority_preempts() {
    kernel::boot(KernelOptions::default(), || {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        kernel::spawn("eager", PRI_DEFAULT + 1, move || {
            flag.store(true, Ordering::Release);
        })
        .unwrap();
        assert!(ran.load(Ordering::Acquire));
    });
}

/// A lower-priority thread waits its turn.
#[test]
fn test_spawn_lower_priority_defers() {
    kernel::boot(KernelOptions::default(), || {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        kernel::spawn("patient", PRI_DEFAULT - 1, move || {
            flag.store(true, Ordering::Release);
        })
        .unwrap();
        assert!(!ran.load(Ordering::Acquire));

        // Yielding is not enough: we still outrank it.
        crate::yield_now();
        assert!(!ran.load(Ordering::Acquire));

        // Blocking is.
        timer::sleep_for(1);
        assert!(ran.load(Ordering::Acquire));
    });
}

/// Equal-priority threads run in FIFO order.
#[test]
fn test_equal_priority_is_fifo() {
    kernel::boot(KernelOptions::default(), || {
        let t = trace();
        for name in ["a", "b", "c"] {
            let st = t.clone();
            kernel::spawn(name, PRI_DEFAULT, move || {
                record(&st, current_name());
            })
            .unwrap();
        }
        timer::sleep_for(2);
        assert_eq!(snapshot(&t), ["a", "b", "c"]);
    });
}

#[test]
fn test_main_thread_identity() {
    kernel::boot(KernelOptions::default(), || {
        assert_eq!(current_name(), "main");
        assert_eq!(get_priority(), PRI_DEFAULT);
        let tid = crate::current_tid();
        assert!(tid.get() > 0);
    });
}

/// TIDs increase monotonically across creations.
#[test]
fn test_tids_are_monotonic() {
    kernel::boot(KernelOptions::default(), || {
        let a = kernel::spawn("a", PRI_MIN, || {}).unwrap();
        let b = kernel::spawn("b", PRI_MIN, || {}).unwrap();
        assert!(b > a);
        timer::sleep_for(1);
    });
}

/// The thread table is the backing-page pool: when it is full, creation
/// fails with a recoverable error.
#[test]
fn test_spawn_exhausts_thread_slots() {
    kernel::boot(KernelOptions::default(), || {
        let mut created = 0;
        loop {
            // Lower priority than main, so none of them runs (and frees its
            // slot) while we keep allocating.
            match kernel::spawn(&format!("filler {created}"), PRI_MIN, || {}) {
                Ok(_) => created += 1,
                Err(SpawnError::OutOfSlots) => break,
                Err(other) => panic!("unexpected spawn failure: {other}"),
            }
        }
        // Everything but main and idle was available.
        assert_eq!(created, MAX_THREADS - 2);
        // Shutdown drains the fillers.
    });
}

#[test]
fn test_spawn_without_boot_fails() {
    // Hold the boot serialization so no kernel exists while we probe.
    let _serial = kernel::test_serial();
    assert_eq!(
        kernel::spawn("orphan", PRI_DEFAULT, || {}).unwrap_err(),
        SpawnError::NotBooted
    );
}

/// Ticks are attributed to the idle thread while everyone sleeps.
#[test]
fn test_stats_attribute_idle_time() {
    kernel::boot(KernelOptions::default(), || {
        let before = kernel::stats();
        timer::sleep_for(10);
        let after = kernel::stats();
        assert!(after.idle_ticks >= before.idle_ticks + 9);
        assert_eq!(after.user_ticks, 0);
    });
}

/// The builder front end spawns a named, prioritized thread.
#[test]
fn test_thread_builder() {
    kernel::boot(KernelOptions::default(), || {
        let t = trace();
        let st = t.clone();
        crate::ThreadBuilder::new()
            .name("built")
            .priority(PRI_DEFAULT + 5)
            .spawn(move || {
                record(&st, current_name());
            })
            .unwrap();
        assert_eq!(snapshot(&t), ["built"]);
    });
}
