//! Condition variables.
//!
//! Each waiting thread parks on a one-shot semaphore of its own; the
//! condition variable keeps those semaphores in a list ordered by the
//! priority of the thread behind each one, so `signal` always wakes the
//! highest-priority waiter even if priorities shifted while it waited.

use super::lock::Lock;
use super::semaphore;
use crate::intr::IntrGuard;
use crate::kernel;
use crate::mem::{CondId, SemaId, Slot};

extern crate alloc;
use alloc::vec::Vec;
use core::cmp::Reverse;

/// One parked waiter: its one-shot semaphore and the thread behind it.
pub(crate) struct CondWaiter {
    pub sema: SemaId,
    pub thread: Slot,
}

/// Kernel-side state of a condition variable.
pub(crate) struct CondState {
    pub waiters: Vec<CondWaiter>,
}

/// A condition variable, used together with a [`Lock`].
pub struct Condvar {
    id: CondId,
    epoch: u64,
}

unsafe impl Send for Condvar {}
unsafe impl Sync for Condvar {}

impl Condvar {
    /// Create a condition variable with no waiters.
    pub fn new() -> Condvar {
        let mut k = kernel::lock();
        let id = CondId(
            k.conds
                .insert(CondState { waiters: Vec::new() })
                .expect("condvar arena is unbounded"),
        );
        Condvar { id, epoch: k.epoch }
    }

    /// Atomically release `lock` and wait to be signaled, then re-acquire
    /// `lock` before returning. The caller must hold `lock`.
    pub fn wait(&self, lock: &Lock) {
        assert!(
            lock.held_by_current(),
            "condition wait without holding the lock"
        );
        let sema;
        {
            let _guard = IntrGuard::off();
            let mut k = kernel::lock();
            let cur = k.current;
            let st = &mut *k;
            sema = semaphore::create_raw(st, 0);
            // Keep the list ordered, best first, ties FIFO.
            let priority = st.threads.get(cur).priority;
            let threads = &st.threads;
            let waiters = &mut st.conds.get_mut(self.id.0).waiters;
            let at = waiters
                .iter()
                .position(|w| threads.get(w.thread).priority < priority)
                .unwrap_or(waiters.len());
            waiters.insert(at, CondWaiter { sema, thread: cur });
        }
        lock.release();
        semaphore::down_raw(sema);
        lock.acquire();
        let _guard = IntrGuard::off();
        let mut k = kernel::lock();
        semaphore::free_raw(&mut k, sema);
    }

    /// Wake the highest-priority waiter, if any. The caller must hold `lock`.
    pub fn signal(&self, lock: &Lock) {
        self.signal_one(lock);
    }

    /// Wake every waiter. The caller must hold `lock`.
    pub fn broadcast(&self, lock: &Lock) {
        while self.signal_one(lock) {}
    }

    fn signal_one(&self, lock: &Lock) -> bool {
        assert!(
            lock.held_by_current(),
            "condition signal without holding the lock"
        );
        let winner = {
            let _guard = IntrGuard::off();
            let mut k = kernel::lock();
            let st = &mut *k;
            let threads = &st.threads;
            let waiters = &mut st.conds.get_mut(self.id.0).waiters;
            if waiters.is_empty() {
                None
            } else {
                // Waiter priorities can have shifted since they queued.
                waiters.sort_by_key(|w| Reverse(threads.get(w.thread).priority));
                Some(waiters.remove(0))
            }
        };
        match winner {
            Some(w) => {
                semaphore::up_raw(w.sema);
                true
            }
            None => false,
        }
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Condvar::new()
    }
}

impl Drop for Condvar {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        if let Some(mut k) = kernel::lock_if_epoch(self.epoch) {
            let state = k.conds.remove(self.id.0);
            assert!(
                state.waiters.is_empty(),
                "condition variable destroyed while threads wait on it"
            );
        }
    }
}
