//! Hosted single-CPU platform.
//!
//! Every kernel thread is backed by an OS thread, but only one of them runs
//! at a time: a global baton names the slot that owns the CPU, and everyone
//! else parks on its condition variable. `switch` publishes the next owner
//! and parks the previous one, which is exactly the semantics of a bare
//! metal context switch at the points the scheduler performs one.
//!
//! External interrupts have no asynchronous delivery here. The virtual
//! timer fires at the two places a real CPU would be caught with interrupts
//! enabled and nothing to do: `cpu_relax` in busy-wait loops and the idle
//! thread's wait. Each firing advances the clock one tick, runs the handler
//! in interrupt context, and honors a requested yield on the way out, which
//! makes every run of the kernel deterministic.

use crate::intr::{self, IntrLevel};
use crate::kernel;
use crate::mem::Slot;
use crate::sched;
use crate::timer;

use std::any::Any;
use std::boxed::Box;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::string::String;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Unwind payload used to tear a thread down through its own call stack.
pub(crate) struct ThreadExit;

/// Unwind payload delivered to a parked thread whose kernel is gone.
struct StaleKernel;

struct GateState {
    epoch: u64,
    running: usize,
    prev: Option<usize>,
}

static GATE: Mutex<GateState> = Mutex::new(GateState {
    epoch: 0,
    running: 0,
    prev: None,
});
static GATE_CV: Condvar = Condvar::new();

/// First panic payload raised by a kernel thread, re-raised at shutdown.
static PANIC_PAYLOAD: spin::Mutex<Option<Box<dyn Any + Send>>> = spin::Mutex::new(None);

fn gate() -> MutexGuard<'static, GateState> {
    GATE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Point the baton at the booting kernel's initial thread. Any thread still
/// parked from an earlier kernel observes the epoch change and bails out.
pub(crate) fn reset(epoch: u64, boot_slot: Slot) {
    let mut st = gate();
    st.epoch = epoch;
    st.running = boot_slot.0;
    st.prev = None;
    GATE_CV.notify_all();
    *PANIC_PAYLOAD.lock() = None;
}

/// Hand the CPU from `prev` to `next`.
///
/// Parks the calling thread until the baton names `prev` again, except when
/// `prev` is dying, in which case the call returns immediately and the
/// caller's host thread unwinds. Interrupts must be off.
pub(crate) fn switch(epoch: u64, prev: Slot, next: Slot, dying: bool) {
    debug_assert_eq!(intr::get_level(), IntrLevel::Off);
    let mut st = gate();
    debug_assert_eq!(st.running, prev.0);
    st.prev = Some(prev.0);
    st.running = next.0;
    GATE_CV.notify_all();
    if dying {
        return;
    }
    loop {
        if st.epoch != epoch {
            // The kernel this thread belongs to was torn down while it was
            // parked. Unwind out through the trampoline.
            drop(st);
            std::panic::panic_any(StaleKernel);
        }
        if st.running == prev.0 {
            return;
        }
        st = GATE_CV.wait(st).unwrap_or_else(PoisonError::into_inner);
    }
}

/// The slot switched away from most recently, consumed by the switch tail.
pub(crate) fn take_prev() -> Option<Slot> {
    gate().prev.take().map(Slot)
}

/// Back a freshly created kernel thread with a parked host thread.
///
/// The host thread waits for its first scheduling, completes the context
/// switch, enables interrupts and runs `f`; when `f` returns (or the thread
/// exits through an unwind) the thread is torn down.
pub(crate) fn spawn_host(epoch: u64, slot: Slot, name: String, f: Box<dyn FnOnce() + Send>) {
    std::thread::Builder::new()
        .name(name)
        .spawn(move || trampoline(epoch, slot, f))
        .expect("failed to create a host thread for a kernel thread");
}

fn trampoline(epoch: u64, slot: Slot, f: Box<dyn FnOnce() + Send>) {
    // Park until first scheduled.
    {
        let mut st = gate();
        loop {
            if st.epoch != epoch {
                return;
            }
            if st.running == slot.0 {
                break;
            }
            st = GATE_CV.wait(st).unwrap_or_else(PoisonError::into_inner);
        }
    }

    // We are now the running thread, mid context switch, interrupts off.
    sched::schedule_tail();
    intr::enable();

    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => {}
        Err(payload) => {
            if payload.is::<StaleKernel>() {
                return;
            }
            if !payload.is::<ThreadExit>() {
                log::error!("kernel thread panicked; tearing it down");
                let mut stash = PANIC_PAYLOAD.lock();
                if stash.is_none() {
                    *stash = Some(payload);
                }
            }
        }
    }

    if kernel::epoch_is_live(epoch) {
        sched::exit_current();
    }
    // The baton is gone; the host thread just ends.
}

/// Take the first panic raised by any kernel thread this boot.
pub(crate) fn take_panic() -> Option<Box<dyn Any + Send>> {
    PANIC_PAYLOAD.lock().take()
}

/// Busy-wait pause with interrupts enabled.
///
/// Stands in for a spin-loop hint: this is where a compute-bound thread can
/// be caught by the timer. Each call delivers exactly one timer tick, so a
/// loop spinning on `cpu_relax` experiences preemption, MLFQS accounting and
/// sleeper wakeups exactly as it would under a hardware timer.
pub fn cpu_relax() {
    deliver_tick();
}

/// The idle thread's wait-for-interrupt. One tick per call.
pub(crate) fn wait_for_interrupt() {
    deliver_tick();
}

fn deliver_tick() {
    assert_eq!(
        intr::get_level(),
        IntrLevel::On,
        "waiting for an interrupt with interrupts disabled would hang"
    );
    assert!(!intr::in_external_handler());

    intr::disable();
    intr::begin_external();
    timer::external_tick();
    intr::end_external();
    let wants_yield = intr::take_yield_request();
    intr::enable();

    if wants_yield {
        sched::yield_now();
    }
}
