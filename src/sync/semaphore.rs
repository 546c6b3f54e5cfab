//! Counting semaphores.

use crate::intr::{self, IntrLevel};
use crate::kernel::{self, KernelState};
use crate::mem::{LockId, SemaId};
use crate::sched;
use crate::thread::ThreadList;
use crate::thread::list::LinkKind;

/// Kernel-side state of a semaphore.
pub(crate) struct SemaState {
    pub value: u32,
    /// Blocked threads, sorted by effective priority descending.
    pub waiters: ThreadList,
    /// Back-reference to the lock this semaphore implements, if any. The
    /// donation engine walks waiter -> semaphore -> lock -> holder.
    pub lock: Option<LockId>,
}

impl SemaState {
    pub fn new(value: u32, lock: Option<LockId>) -> SemaState {
        SemaState {
            value,
            waiters: ThreadList::new(LinkKind::Queue),
            lock,
        }
    }
}

/// A counting semaphore.
///
/// `down` waits for the value to become positive and decrements it; `up`
/// increments it and wakes the highest-effective-priority waiter. The handle
/// may be shared across threads behind an `Arc`.
pub struct Semaphore {
    id: SemaId,
    epoch: u64,
}

unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

impl Semaphore {
    /// Create a semaphore with the given initial value.
    pub fn new(value: u32) -> Semaphore {
        let mut k = kernel::lock();
        let id = create_raw(&mut k, value);
        Semaphore { id, epoch: k.epoch }
    }

    /// Wait until the value is positive, then decrement it ("P").
    pub fn down(&self) {
        down_raw(self.id);
    }

    /// Decrement the value without waiting. Returns whether it succeeded.
    pub fn try_down(&self) -> bool {
        try_down_raw(self.id)
    }

    /// Increment the value, waking the best waiter if there is one ("V").
    pub fn up(&self) {
        up_raw(self.id);
    }

    /// The current value. Racy the moment it is returned; useful for
    /// diagnostics and tests only.
    pub fn value(&self) -> u32 {
        let _guard = intr::IntrGuard::off();
        let k = kernel::lock();
        k.semas.get(self.id.0).value
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        // On an unwinding thread the state may be mid-teardown; leave the
        // slot for the kernel teardown to reclaim instead of asserting.
        if std::thread::panicking() {
            return;
        }
        if let Some(mut k) = kernel::lock_if_epoch(self.epoch) {
            free_raw(&mut k, self.id);
        }
    }
}

/// Allocate semaphore state in the kernel.
pub(crate) fn create_raw(k: &mut KernelState, value: u32) -> SemaId {
    SemaId(
        k.semas
            .insert(SemaState::new(value, None))
            .expect("semaphore arena is unbounded"),
    )
}

/// Release semaphore state. The waiter list must be empty.
pub(crate) fn free_raw(k: &mut KernelState, id: SemaId) {
    let state = k.semas.remove(id.0);
    assert!(
        state.waiters.is_empty(),
        "semaphore destroyed while threads wait on it"
    );
}

pub(crate) fn down_raw(id: SemaId) {
    assert!(
        !intr::in_external_handler(),
        "cannot block in an interrupt handler"
    );
    let old = intr::disable();
    loop {
        let mut k = kernel::lock();
        let st = &mut *k;
        if st.semas.get(id.0).value > 0 {
            st.semas.get_mut(id.0).value -= 1;
            break;
        }
        // Enqueue sorted so the head is always the best choice on `up`,
        // then propagate our priority into whoever is holding us up.
        let cur = st.current;
        st.semas
            .get_mut(id.0)
            .waiters
            .insert_by_priority(&mut st.threads, cur);
        st.threads.get_mut(cur).waiting_on = Some(id);
        sched::donation::update_donation(st, cur);
        sched::block(k);
        // Unblocked: the value may already be gone again, so retest.
    }
    intr::set_level(old);
}

pub(crate) fn try_down_raw(id: SemaId) -> bool {
    let old = intr::disable();
    let ok = {
        let mut k = kernel::lock();
        let sema = k.semas.get_mut(id.0);
        if sema.value > 0 {
            sema.value -= 1;
            true
        } else {
            false
        }
    };
    intr::set_level(old);
    ok
}

pub(crate) fn up_raw(id: SemaId) {
    let old = intr::disable();
    let preempt = {
        let mut k = kernel::lock();
        let st = &mut *k;
        let mut preempt = false;
        let sema = st.semas.get_mut(id.0);
        if !sema.waiters.is_empty() {
            // Queued priorities can have shifted (donation, MLFQS); honor
            // the ordering invariant before picking the winner.
            sema.waiters.sort_by_priority(&mut st.threads);
            let winner = sema
                .waiters
                .pop_front(&mut st.threads)
                .expect("non-empty waiter list");
            st.threads.get_mut(winner).waiting_on = None;
            preempt = sched::unblock_locked(st, winner);
        }
        st.semas.get_mut(id.0).value += 1;
        preempt
    };
    intr::set_level(old);

    if preempt {
        if intr::in_external_handler() {
            intr::yield_on_return();
        } else if old == IntrLevel::On {
            sched::yield_now();
        }
    }
}
