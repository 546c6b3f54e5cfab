//! Kernel state, boot and thread creation.
//!
//! All scheduler state lives in one `KernelState` behind a spin mutex. The
//! mutex is taken only with interrupts off and is never held across a
//! context switch, so on the single simulated CPU it is never contended; it
//! exists to keep the brief cross-thread touches (handle drops on unwinding
//! host threads) sound.
//!
//! `boot` converts the calling OS thread into the kernel thread "main",
//! brings up the idle thread, runs the supplied entry function, waits for
//! every spawned thread to finish and tears the kernel down again, so tests
//! and embedders can boot repeatedly in one process.

use crate::errors::SpawnError;
use crate::fixed::Fixed;
use crate::intr;
use crate::mem::{Arena, LockId, SemaId, Slot};
use crate::platform;
use crate::sched;
use crate::sync::{self, CondState, LockState, SemaState};
use crate::thread::{
    LinkKind, Tcb, ThreadList, ThreadState, ThreadTable, Tid, PRI_COUNT, PRI_DEFAULT, PRI_MAX,
    PRI_MIN,
};
use crate::timer;

use core::ops::{Deref, DerefMut};
use portable_atomic::{AtomicU64, Ordering};
use std::boxed::Box;
use std::string::String;
use std::sync::{Mutex as StdMutex, PoisonError};

/// Boot-time configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelOptions {
    /// Use the multilevel feedback queue scheduler instead of priority
    /// donation. Corresponds to the `mlfqs` command-line option.
    pub mlfqs: bool,
}

impl KernelOptions {
    pub fn mlfqs(mut self, on: bool) -> KernelOptions {
        self.mlfqs = on;
        self
    }
}

/// Tick statistics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Ticks spent in the idle thread.
    pub idle_ticks: u64,
    /// Ticks spent in kernel threads.
    pub kernel_ticks: u64,
    /// Ticks spent in user programs. Always zero in this core.
    pub user_ticks: u64,
}

/// Everything the scheduler knows, guarded by one mutex.
pub(crate) struct KernelState {
    pub epoch: u64,
    pub mlfqs: bool,
    pub threads: ThreadTable,
    /// Every live thread, registered at creation, unregistered at exit.
    pub all: ThreadList,
    /// Ready queues, one bucket per priority.
    pub ready: [ThreadList; PRI_COUNT],
    /// Sleeping threads, in no particular order.
    pub sleepers: ThreadList,
    pub semas: Arena<SemaState>,
    pub locks: Arena<LockState>,
    pub conds: Arena<CondState>,
    pub current: Slot,
    pub idle: Option<Slot>,
    pub initial: Slot,
    pub load_avg: Fixed,
    /// Ticks since the running thread was handed the CPU.
    pub slice_ticks: u32,
    pub idle_ticks: u64,
    pub kernel_ticks: u64,
    pub user_ticks: u64,
    next_tid: i32,
    /// The TID counter has its own lock because allocation can be preempted.
    tid_lock: LockId,
    /// Handshake the idle thread uses to wake the shutdown path.
    shutdown_sema: SemaId,
    pub shutting_down: bool,
}

impl KernelState {
    fn new(epoch: u64, mlfqs: bool) -> KernelState {
        let mut semas = Arena::new();
        let mut locks = Arena::new();
        let tid_lock = sync::lock::create_in(&mut locks, &mut semas);
        let shutdown_sema = SemaId(
            semas
                .insert(SemaState::new(0, None))
                .expect("semaphore arena is unbounded"),
        );
        KernelState {
            epoch,
            mlfqs,
            threads: ThreadTable::new(),
            all: ThreadList::new(LinkKind::All),
            ready: core::array::from_fn(|_| ThreadList::new(LinkKind::Queue)),
            sleepers: ThreadList::new(LinkKind::Queue),
            semas,
            locks,
            conds: Arena::new(),
            current: Slot(0),
            idle: None,
            initial: Slot(0),
            load_avg: Fixed::ZERO,
            slice_ticks: 0,
            idle_ticks: 0,
            kernel_ticks: 0,
            user_ticks: 0,
            next_tid: 0,
            tid_lock,
            shutdown_sema,
            shutting_down: false,
        }
    }
}

static KERNEL: spin::Mutex<Option<KernelState>> = spin::Mutex::new(None);

/// Serializes boots; consecutive kernels may not overlap in one process.
static BOOT_LOCK: StdMutex<()> = StdMutex::new(());

static EPOCH: AtomicU64 = AtomicU64::new(0);

/// A locked view of the kernel state.
pub(crate) struct KernelRef {
    guard: spin::MutexGuard<'static, Option<KernelState>>,
}

impl Deref for KernelRef {
    type Target = KernelState;

    fn deref(&self) -> &KernelState {
        self.guard.as_ref().expect("kernel is not booted")
    }
}

impl DerefMut for KernelRef {
    fn deref_mut(&mut self) -> &mut KernelState {
        self.guard.as_mut().expect("kernel is not booted")
    }
}

/// Lock the kernel state. Panics if the kernel is not booted.
pub(crate) fn lock() -> KernelRef {
    let guard = KERNEL.lock();
    assert!(guard.is_some(), "kernel is not booted");
    KernelRef { guard }
}

/// Lock the kernel state only if it is the same kernel `epoch` refers to.
/// Used by primitive handles so one outliving its kernel becomes inert.
pub(crate) fn lock_if_epoch(epoch: u64) -> Option<KernelRef> {
    let guard = KERNEL.lock();
    match guard.as_ref() {
        Some(state) if state.epoch == epoch => Some(KernelRef { guard }),
        _ => None,
    }
}

/// Whether `epoch` names the currently booted kernel.
pub(crate) fn epoch_is_live(epoch: u64) -> bool {
    KERNEL.lock().as_ref().map_or(false, |k| k.epoch == epoch)
}

fn is_booted() -> bool {
    KERNEL.lock().is_some()
}

/// Boot the kernel, run `main_fn` as the kernel thread "main", and shut the
/// kernel down once `main_fn` and every thread it spawned have finished.
///
/// A panic on a spawned kernel thread tears that thread down (releasing its
/// locks) and is re-raised here after shutdown.
pub fn boot<F>(options: KernelOptions, main_fn: F)
where
    F: FnOnce(),
{
    let _serial = BOOT_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let epoch = EPOCH.fetch_add(1, Ordering::AcqRel) + 1;

    // Bring the world up with interrupts off, converting the running
    // context into the thread "main".
    intr::reset();
    timer::reset();
    let main_slot;
    {
        let mut guard = KERNEL.lock();
        let mut state = KernelState::new(epoch, options.mlfqs);
        let tcb = Tcb::new("main", PRI_DEFAULT, 0, Fixed::ZERO);
        main_slot = state
            .threads
            .allocate(tcb)
            .expect("empty thread table rejected the initial thread");
        state.all.push_back(&mut state.threads, main_slot);
        state.threads.get_mut(main_slot).state = ThreadState::Running;
        state.current = main_slot;
        state.initial = main_slot;
        *guard = Some(state);
    }
    platform::host::reset(epoch, main_slot);

    let tid = allocate_tid();
    {
        let mut k = lock();
        k.threads.get_mut(main_slot).tid = tid;
    }

    start_idle();
    log::debug!("kernel booted, mlfqs={}", options.mlfqs);

    main_fn();

    shutdown();

    if let Some(payload) = platform::host::take_panic() {
        std::panic::resume_unwind(payload);
    }
}

/// Create a kernel thread running `f` at `priority`.
///
/// The new thread inherits the creator's `nice` and `recent_cpu`. If it has
/// a higher effective priority than the caller it runs before `spawn`
/// returns.
pub fn spawn<F>(name: &str, priority: i32, f: F) -> Result<Tid, SpawnError>
where
    F: FnOnce() + Send + 'static,
{
    spawn_inner(name, priority, Box::new(f), false)
}

fn spawn_inner(
    name: &str,
    priority: i32,
    f: Box<dyn FnOnce() + Send>,
    is_idle: bool,
) -> Result<Tid, SpawnError> {
    assert!(
        (PRI_MIN..=PRI_MAX).contains(&priority),
        "priority {priority} out of range"
    );
    if !is_booted() {
        return Err(SpawnError::NotBooted);
    }

    let epoch;
    let slot;
    {
        let old = intr::disable();
        let mut k = lock();
        let (nice, recent_cpu) = {
            let cur = k.threads.get(k.current);
            (cur.nice, cur.recent_cpu)
        };
        match k.threads.allocate(Tcb::new(name, priority, nice, recent_cpu)) {
            Some(s) => slot = s,
            None => {
                drop(k);
                intr::set_level(old);
                return Err(SpawnError::OutOfSlots);
            }
        }
        let st = &mut *k;
        st.all.push_back(&mut st.threads, slot);
        if is_idle {
            st.idle = Some(slot);
        }
        epoch = st.epoch;
        drop(k);
        intr::set_level(old);
    }

    let tid = allocate_tid();
    {
        let _guard = intr::IntrGuard::off();
        let mut k = lock();
        k.threads.get_mut(slot).tid = tid;
    }

    platform::host::spawn_host(epoch, slot, String::from(name), f);
    log::debug!("spawned thread {tid} \"{name}\" at priority {priority}");

    // Preempts the caller at once if the new thread outranks it.
    sched::unblock(slot);
    Ok(tid)
}

/// Current tick statistics.
pub fn stats() -> Stats {
    let _guard = intr::IntrGuard::off();
    let k = lock();
    Stats {
        idle_ticks: k.idle_ticks,
        kernel_ticks: k.kernel_ticks,
        user_ticks: k.user_ticks,
    }
}

/// Hand out the next TID. The counter is guarded by its own lock rather
/// than the interrupt gate because the path is preemptible.
fn allocate_tid() -> Tid {
    let tid_lock = {
        let _guard = intr::IntrGuard::off();
        let k = lock();
        k.tid_lock
    };
    sync::lock::acquire_raw(tid_lock);
    let tid = {
        let _guard = intr::IntrGuard::off();
        let mut k = lock();
        k.next_tid += 1;
        Tid(k.next_tid)
    };
    sync::lock::release_raw(tid_lock);
    tid
}

/// Create the idle thread and wait for it to introduce itself.
fn start_idle() {
    let started = {
        let mut k = lock();
        sync::semaphore::create_raw(&mut k, 0)
    };
    spawn_inner("idle", PRI_MIN, Box::new(move || idle_loop(started)), true)
        .expect("idle thread creation cannot fail on a fresh kernel");

    // Preemptive scheduling starts here.
    intr::enable();

    sync::semaphore::down_raw(started);
    let mut k = lock();
    sync::semaphore::free_raw(&mut k, started);
}

/// The idle thread: runs only when nothing else is ready, and spends its
/// time waiting for the next timer interrupt. At shutdown it wakes the
/// initiator and exits.
fn idle_loop(started: SemaId) {
    sync::semaphore::up_raw(started);

    loop {
        let old = intr::disable();
        let quit = {
            let k = lock();
            k.shutting_down
        };
        if quit {
            intr::set_level(old);
            break;
        }
        {
            let k = lock();
            sched::block(k);
        }
        intr::set_level(old);
        // Scheduled again with nothing to run; wait for a tick.
        platform::host::wait_for_interrupt();
    }

    // Wake the shutdown path with interrupts off so the handoff happens
    // through this thread's own exit, not an early yield.
    intr::disable();
    let shutdown_sema = {
        let k = lock();
        k.shutdown_sema
    };
    sync::semaphore::up_raw(shutdown_sema);
    // Returning tears the idle thread down.
}

/// Wait for every spawned thread to exit, retire the idle thread, log the
/// tick statistics and drop the kernel state.
fn shutdown() {
    let mut waited = 0u64;
    loop {
        let stragglers = {
            let _guard = intr::IntrGuard::off();
            let k = lock();
            k.all.len() - 1 - usize::from(k.idle.is_some())
        };
        if stragglers == 0 {
            break;
        }
        waited += 1;
        assert!(
            waited < 1_000_000,
            "kernel shutdown stalled: {stragglers} threads never exited"
        );
        // Sleeping keeps the CPU available to the stragglers and lets the
        // idle thread advance the clock for any of them still sleeping.
        timer::sleep_for(1);
    }

    {
        let old = intr::disable();
        {
            let mut k = lock();
            k.shutting_down = true;
        }
        intr::set_level(old);
    }
    let shutdown_sema = {
        let _guard = intr::IntrGuard::off();
        let k = lock();
        k.shutdown_sema
    };
    sync::semaphore::down_raw(shutdown_sema);

    let snapshot = stats();
    log::debug!(
        "kernel shutdown: {} idle ticks, {} kernel ticks, {} user ticks",
        snapshot.idle_ticks,
        snapshot.kernel_ticks,
        snapshot.user_ticks
    );

    let mut guard = KERNEL.lock();
    *guard = None;
}

/// Serialize a test that touches global CPU state against kernel boots.
#[cfg(test)]
pub(crate) fn test_serial() -> std::sync::MutexGuard<'static, ()> {
    BOOT_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}
