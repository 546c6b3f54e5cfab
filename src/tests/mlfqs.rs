//! MLFQS mode: load average convergence, recent CPU accounting, niceness.

use crate::kernel::{self, KernelOptions};
use crate::platform::cpu_relax;
use crate::thread::{get_load_avg, get_nice, get_priority, get_recent_cpu, set_nice, PRI_MAX};
use crate::timer::{self, TIMER_FREQ};

extern crate alloc;
use alloc::sync::Arc;

fn mlfqs() -> KernelOptions {
    KernelOptions::default().mlfqs(true)
}

/// One compute-bound thread keeps the ready count at one, so the load
/// average decays toward 1.00. The 59/60-per-second decay reaches ~0.63
/// after one simulated minute and settles within a few percent of 1.00
/// after five.
#[test]
fn test_load_avg_converges_to_ready_count() {
    kernel::boot(mlfqs(), || {
        let measurements = Arc::new(spin::Mutex::new((0i32, 0i32)));
        let cell = measurements.clone();
        kernel::spawn("cruncher", crate::PRI_DEFAULT, move || {
            while timer::ticks() < 60 * TIMER_FREQ {
                cpu_relax();
            }
            let after_one_minute = get_load_avg();
            while timer::ticks() < 300 * TIMER_FREQ {
                cpu_relax();
            }
            let after_five_minutes = get_load_avg();
            *cell.lock() = (after_one_minute, after_five_minutes);
        })
        .unwrap();

        // Stay blocked (and uncounted) while the cruncher owns the CPU.
        timer::sleep_until(301 * TIMER_FREQ);

        let (after_one_minute, after_five_minutes) = *measurements.lock();
        assert!(
            (55..=70).contains(&after_one_minute),
            "load_avg after 60s was {after_one_minute}"
        );
        assert!(
            (95..=105).contains(&after_five_minutes),
            "load_avg after 300s was {after_five_minutes}"
        );
    });
}

/// `recent_cpu` counts the ticks a thread actually ran, scaled by 100.
#[test]
fn test_recent_cpu_counts_running_ticks() {
    kernel::boot(mlfqs(), || {
        assert_eq!(get_recent_cpu(), 0);
        // Run for ten ticks; the once-a-second decay is still far away.
        for _ in 0..10 {
            cpu_relax();
        }
        assert_eq!(get_recent_cpu(), 1000);
    });
}

/// Raising nice lowers the computed priority immediately.
#[test]
fn test_nice_lowers_priority() {
    kernel::boot(mlfqs(), || {
        assert_eq!(get_nice(), 0);

        // No ticks have elapsed, so recent_cpu is still zero and the
        // computed priority depends on niceness alone.
        set_nice(0);
        assert_eq!(get_priority(), PRI_MAX);

        set_nice(10);
        assert_eq!(get_nice(), 10);
        assert_eq!(get_priority(), PRI_MAX - 20);

        // Out-of-range values are clamped, not rejected.
        set_nice(99);
        assert_eq!(get_nice(), crate::NICE_MAX);
        assert_eq!(get_priority(), PRI_MAX - 2 * crate::NICE_MAX);
    });
}

/// A spawned thread inherits its creator's nice value.
#[test]
fn test_nice_is_inherited() {
    kernel::boot(mlfqs(), || {
        set_nice(5);
        let observed = Arc::new(spin::Mutex::new(None));
        let cell = observed.clone();
        kernel::spawn("child", crate::PRI_DEFAULT, move || {
            *cell.lock() = Some(get_nice());
        })
        .unwrap();
        timer::sleep_for(2);
        assert_eq!(*observed.lock(), Some(5));
    });
}
