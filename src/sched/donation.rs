//! The priority-donation engine.
//!
//! When a thread blocks on a lock held by a lower-priority thread, the
//! holder's effective priority is raised to the waiter's, and the raise is
//! propagated through whatever the holder is itself waiting on, for as long
//! as each step still raises somebody. Donation is inert under MLFQS.

use crate::intr::{self, IntrLevel};
use crate::kernel::KernelState;
use crate::mem::Slot;
use crate::thread::ThreadState;

/// Raise `holder`'s effective priority to at least `priority`.
///
/// Returns false when the donation would not raise anything, which is also
/// the termination condition for chain propagation. A ready holder is moved
/// to the bucket matching its new priority.
pub(crate) fn donate(k: &mut KernelState, holder: Slot, priority: i32) -> bool {
    debug_assert!(!k.mlfqs);
    let t = k.threads.get(holder);
    if priority <= t.priority {
        return false;
    }
    let old = t.priority;
    let state = t.state;
    k.threads.get_mut(holder).priority = priority;
    log::trace!(
        "donated priority {} to \"{}\"",
        priority,
        k.threads.get(holder).name
    );
    if state == ThreadState::Ready && Some(holder) != k.idle {
        k.ready[old as usize].remove(&mut k.threads, holder);
        k.ready[priority as usize].push_back(&mut k.threads, holder);
    }
    true
}

/// Propagate `waiter`'s effective priority down the chain of lock holders.
///
/// Called when a thread joins a semaphore waiter list. Each step donates to
/// the holder of the lock the current thread waits on; if the holder is
/// itself queued on another lock's semaphore, its position there is fixed up
/// and the walk continues through it. The walk stops at a holder that is not
/// blocked on a lock, at a sleeping holder, or as soon as a donation stops
/// raising priorities, so it takes at most one step per lock in the chain.
pub(crate) fn update_donation(k: &mut KernelState, waiter: Slot) {
    if k.mlfqs {
        return;
    }
    debug_assert_eq!(intr::get_level(), IntrLevel::Off);

    let mut waiter = waiter;
    loop {
        let (priority, waiting_on) = {
            let t = k.threads.get(waiter);
            (t.priority, t.waiting_on)
        };
        let Some(sema) = waiting_on else { return };
        let Some(lock) = k.semas.get(sema.0).lock else { return };
        let Some(holder) = k.locks.get(lock.0).holder else { return };

        if !donate(k, holder, priority) {
            return;
        }

        let t = k.threads.get(holder);
        if t.state != ThreadState::Blocked || t.is_sleeping() {
            return;
        }
        let Some(holder_sema) = t.waiting_on else { return };

        // The holder's priority rose while queued; restore its waiter-list
        // position before walking through it.
        let waiters = &mut k.semas.get_mut(holder_sema.0).waiters;
        waiters.remove(&mut k.threads, holder);
        waiters.insert_by_priority(&mut k.threads, holder);

        waiter = holder;
    }
}

/// Recompute the current thread's effective priority from scratch.
///
/// Called after releasing a lock, and by `set_priority` when the base
/// changes: effective priority is the base plus the strongest donation still
/// standing, which is the front waiter of each lock the thread still holds.
pub(crate) fn recover_donation(k: &mut KernelState, slot: Slot) {
    if k.mlfqs {
        return;
    }
    debug_assert_eq!(intr::get_level(), IntrLevel::Off);

    let mut priority = k.threads.get(slot).base_priority;
    let held = k.threads.get(slot).held_locks.clone();
    for lock in held {
        let sema = k.locks.get(lock.0).sema;
        if let Some(front) = k.semas.get(sema.0).waiters.front() {
            priority = priority.max(k.threads.get(front).priority);
        }
    }
    k.threads.get_mut(slot).priority = priority;
}
