//! The scheduler core.
//!
//! Sixty-four ready buckets indexed by effective priority, the sleep queue,
//! next-thread selection, the context-switch tail, and the timer-tick hook.
//! All of it runs with interrupts disabled; the kernel-state mutex is taken
//! only in that condition and is always released before the platform switches
//! contexts, so a blocked thread never parks while holding it.

use crate::intr::{self, IntrLevel};
use crate::kernel::{self, KernelRef, KernelState};
use crate::mem::Slot;
use crate::thread::{ThreadState, NOT_SLEEPING, PRI_COUNT, PRI_MAX, PRI_MIN};
use crate::timer;

extern crate alloc;
use alloc::vec::Vec;

pub mod donation;
pub mod mlfqs;

/// Timer ticks a thread may run before preemption is enforced.
pub const TIME_SLICE: u32 = 4;

/// Append a thread to the ready bucket matching its effective priority.
pub(crate) fn ready_push(k: &mut KernelState, slot: Slot) {
    let priority = k.threads.get(slot).priority;
    debug_assert!((PRI_MIN..=PRI_MAX).contains(&priority));
    k.ready[priority as usize].push_back(&mut k.threads, slot);
}

/// Threads that are ready to run or running, excluding the idle thread.
pub(crate) fn ready_thread_count(k: &KernelState) -> i32 {
    let queued: usize = k.ready.iter().map(|bucket| bucket.len()).sum();
    let running = if Some(k.current) == k.idle { 0 } else { 1 };
    queued as i32 + running
}

/// Transition a blocked thread to ready.
///
/// Returns true when the thread now outranks the running thread, in which
/// case the caller owes a preemption at its next safe point.
pub(crate) fn unblock_locked(k: &mut KernelState, slot: Slot) -> bool {
    debug_assert_eq!(intr::get_level(), IntrLevel::Off);
    let t = k.threads.get(slot);
    assert_eq!(
        t.state,
        ThreadState::Blocked,
        "unblocking a thread that is not blocked"
    );
    let priority = t.priority;
    // The idle thread runs only as the fallback choice and is never queued.
    if Some(slot) != k.idle {
        ready_push(k, slot);
    }
    k.threads.get_mut(slot).state = ThreadState::Ready;
    priority > k.threads.get(k.current).priority
}

/// Transition a blocked thread to ready, yielding immediately if the caller
/// had interrupts enabled and the woken thread outranks it.
pub(crate) fn unblock(slot: Slot) {
    let old = intr::disable();
    let preempt = {
        let mut k = kernel::lock();
        unblock_locked(&mut k, slot)
    };
    intr::set_level(old);
    if preempt && old == IntrLevel::On && !intr::in_external_handler() {
        yield_now();
    }
}

/// Block the running thread and schedule another.
///
/// Interrupts must be off and the kernel state locked; the lock is released
/// before the switch. Returns once the thread has been unblocked and
/// rescheduled, with interrupts still off.
pub(crate) fn block(mut k: KernelRef) {
    debug_assert_eq!(intr::get_level(), IntrLevel::Off);
    debug_assert!(!intr::in_external_handler());
    let cur = k.current;
    k.threads.get_mut(cur).state = ThreadState::Blocked;
    schedule(k);
}

/// Yield the CPU, staying runnable.
pub fn yield_now() {
    assert!(
        !intr::in_external_handler(),
        "cannot yield from inside an interrupt handler"
    );
    let old = intr::disable();
    {
        let mut k = kernel::lock();
        let cur = k.current;
        if Some(cur) != k.idle {
            ready_push(&mut k, cur);
        }
        k.threads.get_mut(cur).state = ThreadState::Ready;
        schedule(k);
    }
    intr::set_level(old);
}

/// Tear down the running thread.
///
/// Releases every lock the thread still holds so its waiters can proceed,
/// unregisters it, marks it dying and schedules away. The thread's slot is
/// reclaimed by the next thread to run. Only the platform trampoline calls
/// this; after it returns, the host thread unwinds without touching the
/// kernel again.
pub(crate) fn exit_current() {
    debug_assert!(!intr::in_external_handler());
    crate::sync::lock::release_all_held();

    intr::disable();
    let mut k = kernel::lock();
    let cur = k.current;
    log::trace!("thread {} \"{}\" exiting", k.threads.get(cur).tid, k.threads.get(cur).name);
    if k.idle == Some(cur) {
        k.idle = None;
    }
    let st = &mut *k;
    st.all.remove(&mut st.threads, cur);
    st.threads.get_mut(cur).state = ThreadState::Dying;
    schedule(k);
}

/// Apply `f` to every live thread, in registration order.
///
/// Interrupts must be off; `f` may mutate the thread it is handed through
/// the state it receives.
pub(crate) fn foreach(k: &mut KernelState, mut f: impl FnMut(&mut KernelState, Slot)) {
    debug_assert_eq!(intr::get_level(), IntrLevel::Off);
    for slot in k.all.collect(&k.threads) {
        f(&mut *k, slot);
    }
}

/// Wake every sleeper whose deadline has passed.
///
/// Returns true when a woken thread outranks the running thread.
pub(crate) fn wake_due_sleepers(k: &mut KernelState) -> bool {
    let now = timer::ticks();
    let mut woke_higher = false;
    let due: Vec<Slot> = k
        .sleepers
        .collect(&k.threads)
        .into_iter()
        .filter(|&s| k.threads.get(s).wakeup_time <= now)
        .collect();
    for slot in due {
        k.sleepers.remove(&mut k.threads, slot);
        k.threads.get_mut(slot).wakeup_time = NOT_SLEEPING;
        if unblock_locked(k, slot) {
            woke_higher = true;
        }
    }
    woke_higher
}

/// Pick the thread to run next: the head of the highest non-empty ready
/// bucket, or the idle thread when everything is blocked. Due sleepers are
/// drained first so they compete in the same pass.
fn next_thread_to_run(k: &mut KernelState) -> Slot {
    debug_assert_eq!(intr::get_level(), IntrLevel::Off);
    wake_due_sleepers(k);
    for priority in (0..PRI_COUNT).rev() {
        if !k.ready[priority].is_empty() {
            return k.ready[priority]
                .pop_front(&mut k.threads)
                .expect("non-empty ready bucket");
        }
    }
    k.idle.expect("nothing to run and no idle thread")
}

/// Switch to the next thread.
///
/// At entry interrupts are off and the running thread's state has already
/// been changed away from `Running`. The kernel-state lock is consumed and
/// released before the platform switch; the function returns in the calling
/// thread's context once it is scheduled again.
pub(crate) fn schedule(mut k: KernelRef) {
    debug_assert_eq!(intr::get_level(), IntrLevel::Off);
    let cur = k.current;
    debug_assert_ne!(k.threads.get(cur).state, ThreadState::Running);
    let dying = k.threads.get(cur).state == ThreadState::Dying;
    let next = next_thread_to_run(&mut k);

    if next == cur {
        // Nothing better to do; keep running without a switch.
        k.threads.get_mut(cur).state = ThreadState::Running;
        k.slice_ticks = 0;
        return;
    }

    log::trace!(
        "switch \"{}\" -> \"{}\"",
        k.threads.get(cur).name,
        k.threads.get(next).name
    );
    let epoch = k.epoch;
    k.current = next;
    drop(k);

    crate::platform::host::switch(epoch, cur, next, dying);
    if !dying {
        schedule_tail();
    }
}

/// Complete a context switch in the newly running thread.
///
/// Marks it running, starts a fresh time slice, and reclaims the previous
/// thread's slot if it was dying. The dying thread cannot free itself; the
/// reclamation always happens here, one switch later.
pub(crate) fn schedule_tail() {
    debug_assert_eq!(intr::get_level(), IntrLevel::Off);
    let prev = crate::platform::host::take_prev();
    let mut k = kernel::lock();
    let cur = k.current;
    k.threads.get_mut(cur).state = ThreadState::Running;
    k.slice_ticks = 0;
    if let Some(prev) = prev {
        if prev != cur
            && prev != k.initial
            && k.threads.get(prev).state == ThreadState::Dying
        {
            k.threads.free(prev);
        }
    }
}

/// Timer-tick hook, run in external-interrupt context on every tick.
pub(crate) fn tick() {
    debug_assert!(intr::in_external_handler());
    let mut k = kernel::lock();

    if Some(k.current) == k.idle {
        k.idle_ticks += 1;
    } else {
        k.kernel_ticks += 1;
    }

    if k.mlfqs && mlfqs::on_tick(&mut k) {
        intr::yield_on_return();
    }

    if wake_due_sleepers(&mut k) {
        intr::yield_on_return();
    }

    k.slice_ticks += 1;
    if k.slice_ticks >= TIME_SLICE {
        intr::yield_on_return();
    }
}
