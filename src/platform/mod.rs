//! Platform layer.
//!
//! The scheduler needs two things from its platform: a way to switch the CPU
//! between thread contexts, and a source of timer interrupts. The `host`
//! backend provides both on top of ordinary OS threads, preserving the
//! single-CPU execution model exactly.

pub mod host;

pub use host::cpu_relax;
