//! Error types for the scheduling core.
//!
//! Almost every operation in the core either succeeds or is a programming
//! violation that panics, matching the assertion discipline of kernel code.
//! The only recoverable failure is thread creation, which can run out of
//! thread slots (the backing-page pool) or be attempted before the kernel
//! has booted.

use core::fmt;

/// Result type for thread creation.
pub type SpawnResult<T> = Result<T, SpawnError>;

/// Errors that can occur during thread creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// The kernel has not been booted on this host yet.
    NotBooted,
    /// No thread slot (backing page) is available.
    OutOfSlots,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::NotBooted => write!(f, "kernel is not booted"),
            SpawnError::OutOfSlots => write!(f, "out of thread slots"),
        }
    }
}
