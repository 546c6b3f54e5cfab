#![cfg_attr(not(feature = "std-host"), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

//! Preemptive priority scheduling core of a teaching kernel, runnable on a host.
//!
//! This library implements the concurrency core of a small kernel: a
//! single-CPU preemptive scheduler with 64 priority levels, counting
//! semaphores, locks with nested priority donation, condition variables, a
//! tick-driven sleep queue, and an alternative multilevel-feedback-queue
//! (MLFQS) mode with Q17.14 fixed-point CPU accounting.
//!
//! Instead of a bare-metal context switch, the `std-host` platform backs every
//! kernel thread with a parked OS thread and hands a single-CPU "baton"
//! between them, so the kernel's interrupt-disable discipline and preemption
//! points behave exactly as they would on hardware while remaining fully
//! exercisable from `cargo test`.
//!
//! # Quick Start
//!
//! ```
//! use priority_threads::{kernel, KernelOptions, PRI_DEFAULT};
//!
//! kernel::boot(KernelOptions::default(), || {
//!     let tid = priority_threads::spawn("worker", PRI_DEFAULT, || {
//!         priority_threads::timer::sleep_for(3);
//!     })
//!     .expect("spawn worker");
//!     priority_threads::timer::sleep_for(10);
//!     let _ = tid;
//! });
//! ```
//!
//! # Architecture
//!
//! - `sched`: ready buckets, next-thread selection, the context-switch tail,
//!   the timer-tick hook, priority donation and MLFQS recomputation
//! - `sync`: semaphore, lock and condition variable built on the scheduler
//! - `thread`: thread control blocks, intrusive run-queue links, thread table
//! - `timer`: virtual tick clock and the sleep queue bridge
//! - `platform`: the hosted single-CPU baton and interrupt delivery points
//! - `intr`: the interrupt gate used as the kernel's mutual exclusion primitive

extern crate alloc;

// Freestanding pieces, usable without the hosted platform.
pub mod errors;
pub mod fixed;
pub mod intr;
pub mod mem;

// The scheduler proper requires a platform to switch contexts on.
#[cfg(feature = "std-host")]
pub mod kernel;
#[cfg(feature = "std-host")]
pub mod platform;
#[cfg(feature = "std-host")]
pub mod sched;
#[cfg(feature = "std-host")]
pub mod sync;
#[cfg(feature = "std-host")]
pub mod thread;
#[cfg(feature = "std-host")]
pub mod timer;

#[cfg(all(test, feature = "std-host"))]
mod tests;

// ============================================================================
// Public API
// ============================================================================

pub use errors::SpawnError;
pub use fixed::Fixed;
pub use intr::IntrLevel;

#[cfg(feature = "std-host")]
pub use kernel::{boot, spawn, KernelOptions, Stats};

#[cfg(feature = "std-host")]
pub use sched::TIME_SLICE;

#[cfg(feature = "std-host")]
pub use sync::{Condvar, Lock, Semaphore};

#[cfg(feature = "std-host")]
pub use thread::{
    current_name, current_tid, exit, get_load_avg, get_nice, get_priority, get_recent_cpu,
    set_nice, set_priority, ThreadBuilder, ThreadState, Tid, NICE_MAX, NICE_MIN, PRI_DEFAULT,
    PRI_MAX, PRI_MIN,
};

#[cfg(feature = "std-host")]
pub use platform::cpu_relax;

/// Yield the current thread's time slice to the scheduler.
///
/// This is a cooperative yield: the thread stays runnable and is appended to
/// the back of its priority bucket, so among equal priorities scheduling is
/// round robin.
#[cfg(feature = "std-host")]
#[inline]
pub fn yield_now() {
    sched::yield_now();
}
