//! Locks with priority donation.
//!
//! A lock is a binary semaphore plus an owner. While a higher-priority
//! thread waits for it, the holder runs at the waiter's priority, donated
//! transitively through any lock the holder is itself waiting on. When a
//! thread dies it drops every lock it still holds, so waiters can never
//! deadlock against a dead owner.

use super::semaphore::{self, SemaState};
use crate::intr::{self, IntrGuard};
use crate::kernel;
use crate::mem::{Arena, LockId, SemaId, Slot};
use crate::sched;

/// Kernel-side state of a lock.
pub(crate) struct LockState {
    pub sema: SemaId,
    pub holder: Option<Slot>,
}

/// A mutual-exclusion lock. Not recursive: acquiring a lock already held by
/// the caller is a bug and panics.
pub struct Lock {
    id: LockId,
    epoch: u64,
}

unsafe impl Send for Lock {}
unsafe impl Sync for Lock {}

impl Lock {
    /// Create an unheld lock.
    pub fn new() -> Lock {
        let mut k = kernel::lock();
        let st = &mut *k;
        let id = create_in(&mut st.locks, &mut st.semas);
        Lock { id, epoch: st.epoch }
    }

    /// Acquire the lock, donating priority to the holder while waiting.
    pub fn acquire(&self) {
        acquire_raw(self.id);
    }

    /// Acquire the lock without waiting. Returns whether it succeeded.
    pub fn try_acquire(&self) -> bool {
        try_acquire_raw(self.id)
    }

    /// Release the lock, recomputing the caller's effective priority and
    /// waking the highest-priority waiter.
    pub fn release(&self) {
        release_raw(self.id);
    }

    /// Whether the running thread holds this lock.
    pub fn held_by_current(&self) -> bool {
        held_by_current_raw(self.id)
    }
}

impl Default for Lock {
    fn default() -> Self {
        Lock::new()
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        // A panicking thread may still hold the lock; its exit path will
        // release it, and kernel teardown reclaims the slot.
        if std::thread::panicking() {
            return;
        }
        if let Some(mut k) = kernel::lock_if_epoch(self.epoch) {
            let st = &mut *k;
            let state = st.locks.remove(self.id.0);
            assert!(state.holder.is_none(), "lock destroyed while held");
            semaphore::free_raw(st, state.sema);
        }
    }
}

/// Allocate a lock and its backing semaphore directly in the arenas.
pub(crate) fn create_in(locks: &mut Arena<LockState>, semas: &mut Arena<SemaState>) -> LockId {
    let sema = SemaId(
        semas
            .insert(SemaState::new(1, None))
            .expect("semaphore arena is unbounded"),
    );
    let id = LockId(
        locks
            .insert(LockState { sema, holder: None })
            .expect("lock arena is unbounded"),
    );
    semas.get_mut(sema.0).lock = Some(id);
    id
}

pub(crate) fn acquire_raw(id: LockId) {
    assert!(
        !intr::in_external_handler(),
        "cannot take a lock in an interrupt handler"
    );
    assert!(
        !held_by_current_raw(id),
        "lock already held by the current thread"
    );

    let sema = {
        let _guard = IntrGuard::off();
        let k = kernel::lock();
        k.locks.get(id.0).sema
    };
    semaphore::down_raw(sema);

    let _guard = IntrGuard::off();
    let mut k = kernel::lock();
    let cur = k.current;
    let st = &mut *k;
    debug_assert!(st.locks.get(id.0).holder.is_none());
    debug_assert!(st.threads.get(cur).waiting_on.is_none());
    st.locks.get_mut(id.0).holder = Some(cur);
    st.threads.get_mut(cur).held_locks.push(id);
}

pub(crate) fn try_acquire_raw(id: LockId) -> bool {
    assert!(!held_by_current_raw(id), "lock already held by the current thread");
    let sema = {
        let _guard = IntrGuard::off();
        let k = kernel::lock();
        k.locks.get(id.0).sema
    };
    if !semaphore::try_down_raw(sema) {
        return false;
    }
    let _guard = IntrGuard::off();
    let mut k = kernel::lock();
    let cur = k.current;
    let st = &mut *k;
    st.locks.get_mut(id.0).holder = Some(cur);
    st.threads.get_mut(cur).held_locks.push(id);
    true
}

pub(crate) fn release_raw(id: LockId) {
    assert!(
        held_by_current_raw(id),
        "releasing a lock not held by the current thread"
    );
    let sema;
    {
        let _guard = IntrGuard::off();
        let mut k = kernel::lock();
        let cur = k.current;
        let st = &mut *k;
        sema = st.locks.get(id.0).sema;
        st.locks.get_mut(id.0).holder = None;
        let held = &mut st.threads.get_mut(cur).held_locks;
        let at = held
            .iter()
            .position(|&l| l == id)
            .expect("held lock missing from the holder's list");
        held.remove(at);
        // Whatever priority this lock's waiters were donating is gone now.
        sched::donation::recover_donation(st, cur);
    }
    semaphore::up_raw(sema);
}

pub(crate) fn held_by_current_raw(id: LockId) -> bool {
    let _guard = IntrGuard::off();
    let k = kernel::lock();
    k.locks.get(id.0).holder == Some(k.current)
}

/// Release every lock the running thread still holds, first acquired first.
/// Part of the thread teardown path.
pub(crate) fn release_all_held() {
    loop {
        let next = {
            let _guard = IntrGuard::off();
            let k = kernel::lock();
            k.threads.get(k.current).held_locks.first().copied()
        };
        match next {
            Some(id) => {
                log::trace!("auto-releasing lock held by a dying thread");
                release_raw(id);
            }
            None => break,
        }
    }
}

