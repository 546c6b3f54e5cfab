//! The virtual tick clock and the sleep queue bridge.
//!
//! Time is measured in timer ticks at `TIMER_FREQ` ticks per simulated
//! second. On the hosted platform the clock advances exactly when the CPU
//! would have waited for an interrupt: once per `cpu_relax` and once per
//! idle-thread wait. Each advance runs the timer interrupt handler, which
//! drives scheduler accounting and wakes due sleepers.

use crate::intr;
use crate::kernel;
use crate::sched;
use portable_atomic::{AtomicU64, Ordering};

/// Timer ticks per simulated second.
pub const TIMER_FREQ: u64 = 100;

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Ticks elapsed since boot.
#[inline]
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Acquire)
}

/// Rewind the clock to zero. Called once per kernel boot.
pub(crate) fn reset() {
    TICKS.store(0, Ordering::Release);
}

/// Block the running thread until the clock reaches `wakeup`.
///
/// The thread is unblocked by the first timer tick at or past `wakeup`;
/// if that tick has already happened this returns immediately. Must not be
/// called from interrupt context.
pub fn sleep_until(wakeup: u64) {
    assert!(
        !intr::in_external_handler(),
        "cannot sleep in an interrupt handler"
    );
    let old = intr::disable();
    if ticks() < wakeup {
        let mut k = kernel::lock();
        let cur = k.current;
        debug_assert!(Some(cur) != k.idle, "the idle thread does not sleep");
        let st = &mut *k;
        st.threads.get_mut(cur).wakeup_time = wakeup;
        st.sleepers.push_back(&mut st.threads, cur);
        sched::block(k);
    }
    intr::set_level(old);
}

/// Block the running thread for `duration` ticks from now.
pub fn sleep_for(duration: u64) {
    sleep_until(ticks().saturating_add(duration));
}

/// The timer interrupt handler: advance the clock and run the scheduler's
/// tick hook. Runs in external-interrupt context with interrupts off.
pub(crate) fn external_tick() {
    debug_assert!(intr::in_external_handler());
    TICKS.fetch_add(1, Ordering::AcqRel);
    sched::tick();
}
