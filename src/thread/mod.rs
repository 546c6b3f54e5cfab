//! Thread control blocks and the public thread API.
//!
//! A thread is a slot in the kernel's thread table holding its identity,
//! scheduling state, priorities, MLFQS accounting, sleep deadline and lock
//! bookkeeping, plus two intrusive list links: `link` enrolls the thread in
//! at most one of a ready bucket, the sleep queue or a semaphore waiter list,
//! and `all_link` enrolls it in the all-threads registry.

use crate::fixed::Fixed;
use crate::intr;
use crate::mem::{LockId, SemaId};
use crate::sched;

extern crate alloc;
use alloc::string::String;
use alloc::vec::Vec;

pub mod builder;
pub mod list;
pub mod table;

pub use builder::ThreadBuilder;
pub(crate) use list::{Link, LinkKind, ThreadList};
pub(crate) use table::ThreadTable;

/// Lowest thread priority.
pub const PRI_MIN: i32 = 0;
/// Default priority for new threads.
pub const PRI_DEFAULT: i32 = 31;
/// Highest thread priority.
pub const PRI_MAX: i32 = 63;
/// Number of ready-queue buckets.
pub(crate) const PRI_COUNT: usize = (PRI_MAX + 1) as usize;

/// Lowest MLFQS nice value.
pub const NICE_MIN: i32 = -20;
/// Highest MLFQS nice value.
pub const NICE_MAX: i32 = 20;

/// Capacity of the thread table, standing in for the backing-page pool.
pub const MAX_THREADS: usize = 64;

/// Wakeup-time sentinel for "not sleeping".
pub(crate) const NOT_SLEEPING: u64 = u64::MAX;

/// Sentinel detecting a corrupted thread control block.
pub(crate) const THREAD_MAGIC: u32 = 0xcd6a_bf4b;

/// Thread identifier, positive and monotonically increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(pub(crate) i32);

impl Tid {
    /// The raw identifier value.
    pub fn get(self) -> i32 {
        self.0
    }
}

impl core::fmt::Display for Tid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling state of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    /// Currently executing on the CPU.
    Running,
    /// Runnable, waiting in a ready bucket.
    Ready,
    /// Waiting on a synchronization object, the sleep queue, or a bare block.
    Blocked,
    /// About to be destroyed by the next thread to run.
    Dying,
}

/// A thread control block.
pub(crate) struct Tcb {
    pub tid: Tid,
    pub name: String,
    pub state: ThreadState,
    /// Priority last set by the owner.
    pub base_priority: i32,
    /// Effective priority: base plus the strongest donation, or the MLFQS
    /// computed value when that mode is active.
    pub priority: i32,
    pub nice: i32,
    pub recent_cpu: Fixed,
    /// Absolute wakeup tick, or `NOT_SLEEPING`.
    pub wakeup_time: u64,
    /// Locks currently held, in acquisition order.
    pub held_locks: Vec<LockId>,
    /// The semaphore whose waiter list holds this thread, if any. Donation
    /// chains are walked through this edge.
    pub waiting_on: Option<SemaId>,
    /// Membership link for ready bucket / sleep queue / waiter list.
    pub link: Link,
    /// Membership link for the all-threads registry.
    pub all_link: Link,
    pub magic: u32,
}

impl Tcb {
    pub fn new(name: &str, priority: i32, nice: i32, recent_cpu: Fixed) -> Tcb {
        assert!(
            (PRI_MIN..=PRI_MAX).contains(&priority),
            "priority {priority} out of range"
        );
        Tcb {
            tid: Tid(0),
            name: String::from(name),
            state: ThreadState::Blocked,
            base_priority: priority,
            priority,
            nice,
            recent_cpu,
            wakeup_time: NOT_SLEEPING,
            held_locks: Vec::new(),
            waiting_on: None,
            link: Link::new(),
            all_link: Link::new(),
            magic: THREAD_MAGIC,
        }
    }

    /// Sleeping threads carry a real wakeup deadline.
    #[inline]
    pub fn is_sleeping(&self) -> bool {
        self.wakeup_time != NOT_SLEEPING
    }
}

// ============================================================================
// Public thread API, operating on the current thread
// ============================================================================

/// The identifier of the running thread.
pub fn current_tid() -> Tid {
    let _guard = intr::IntrGuard::off();
    let k = crate::kernel::lock();
    k.threads.get(k.current).tid
}

/// The name of the running thread.
pub fn current_name() -> String {
    let _guard = intr::IntrGuard::off();
    let k = crate::kernel::lock();
    k.threads.get(k.current).name.clone()
}

/// The running thread's effective priority.
pub fn get_priority() -> i32 {
    let _guard = intr::IntrGuard::off();
    let k = crate::kernel::lock();
    k.threads.get(k.current).priority
}

/// Set the running thread's base priority.
///
/// The effective priority becomes the maximum of `new_priority` and any
/// outstanding donation. If that lowers the thread below another ready
/// thread, it yields the CPU at once so the highest-priority thread runs.
///
/// Panics in MLFQS mode, where priorities are computed, not set.
pub fn set_priority(new_priority: i32) {
    assert!(
        (PRI_MIN..=PRI_MAX).contains(&new_priority),
        "priority {new_priority} out of range"
    );
    let old = intr::disable();
    {
        let mut k = crate::kernel::lock();
        assert!(!k.mlfqs, "priorities are computed under MLFQS");
        let cur = k.current;
        k.threads.get_mut(cur).base_priority = new_priority;
        sched::donation::recover_donation(&mut k, cur);
    }
    intr::set_level(old);
    sched::yield_now();
}

/// The running thread's nice value.
pub fn get_nice() -> i32 {
    let _guard = intr::IntrGuard::off();
    let k = crate::kernel::lock();
    assert!(k.mlfqs, "nice values exist only under MLFQS");
    k.threads.get(k.current).nice
}

/// Set the running thread's nice value, clamped to [`NICE_MIN`, `NICE_MAX`].
///
/// The thread's MLFQS priority is recomputed immediately and the thread
/// yields so a now-higher-priority thread can take over.
pub fn set_nice(nice: i32) {
    let old = intr::disable();
    {
        let mut k = crate::kernel::lock();
        assert!(k.mlfqs, "nice values exist only under MLFQS");
        let cur = k.current;
        k.threads.get_mut(cur).nice = nice.clamp(NICE_MIN, NICE_MAX);
        sched::mlfqs::update_priority(&mut k, cur);
    }
    intr::set_level(old);
    sched::yield_now();
}

/// 100 times the system load average, rounded to the nearest integer.
pub fn get_load_avg() -> i32 {
    let _guard = intr::IntrGuard::off();
    let k = crate::kernel::lock();
    assert!(k.mlfqs, "load average exists only under MLFQS");
    (k.load_avg * 100).round_to_int()
}

/// 100 times the running thread's `recent_cpu`, rounded to the nearest
/// integer.
pub fn get_recent_cpu() -> i32 {
    let _guard = intr::IntrGuard::off();
    let k = crate::kernel::lock();
    assert!(k.mlfqs, "recent_cpu exists only under MLFQS");
    (k.threads.get(k.current).recent_cpu * 100).round_to_int()
}

/// Terminate the running thread.
///
/// Any locks the thread still holds are released on its way out, so waiters
/// never deadlock against a dead holder. Never returns.
pub fn exit() -> ! {
    assert!(
        !intr::in_external_handler(),
        "a thread cannot exit from interrupt context"
    );
    {
        let _guard = intr::IntrGuard::off();
        let k = crate::kernel::lock();
        assert!(
            k.current != k.initial,
            "the initial thread exits by returning from boot"
        );
    }
    // Unwind back to the platform trampoline, dropping the thread's locals,
    // before the scheduler tears the thread down.
    std::panic::panic_any(crate::platform::host::ThreadExit);
}
