//! Memory management for kernel objects.
//!
//! Thread control blocks and synchronization objects live in slot arenas so
//! that every queue in the scheduler can refer to them by stable index
//! instead of by pointer.

pub mod arena;

pub use arena::Arena;
pub(crate) use arena::{CondId, LockId, SemaId, Slot};
