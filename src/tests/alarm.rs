//! Sleep and wakeup ordering.

use super::{record, snapshot, trace};
use crate::kernel::{self, KernelOptions};
use crate::timer;

extern crate alloc;
use alloc::format;

/// Threads sleeping until ticks 100, 50 and 75 wake in deadline order, each
/// at the first tick at or past its deadline.
#[test]
fn test_sleep_wake_order() {
    kernel::boot(KernelOptions::default(), || {
        let t = trace();

        for (name, deadline) in [("A", 100u64), ("B", 50), ("C", 75)] {
            let st = t.clone();
            kernel::spawn(name, crate::PRI_DEFAULT, move || {
                timer::sleep_until(deadline);
                record(&st, format!("{name} woke at {}", timer::ticks()));
            })
            .unwrap();
        }

        timer::sleep_until(150);
        assert_eq!(
            snapshot(&t),
            ["B woke at 50", "C woke at 75", "A woke at 100"]
        );
    });
}

#[test]
fn test_sleep_for_blocks_at_least_that_long() {
    kernel::boot(KernelOptions::default(), || {
        let before = timer::ticks();
        timer::sleep_for(7);
        assert!(timer::ticks() >= before + 7);
    });
}

#[test]
fn test_sleep_until_past_deadline_returns_immediately() {
    kernel::boot(KernelOptions::default(), || {
        timer::sleep_for(5);
        let now = timer::ticks();
        timer::sleep_until(3);
        // No ticks can have passed; we never blocked.
        assert_eq!(timer::ticks(), now);
    });
}
