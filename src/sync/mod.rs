//! Synchronization primitives built on the scheduler.
//!
//! The semaphore is the only primitive that blocks directly; locks and
//! condition variables are layered on it. Every waiter list is kept sorted
//! by effective priority so a signal always releases the best waiter, and
//! lock waiter lists feed the priority-donation engine.

pub mod condvar;
pub mod lock;
pub mod semaphore;

pub use condvar::Condvar;
pub use lock::Lock;
pub use semaphore::Semaphore;

pub(crate) use condvar::CondState;
pub(crate) use lock::LockState;
pub(crate) use semaphore::SemaState;
