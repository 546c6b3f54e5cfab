//! End-to-end scheduler scenarios.
//!
//! Each test boots a fresh kernel, runs a scenario as the kernel thread
//! "main" and asserts on the recorded trace. Boots are serialized process
//! wide, so the tests can run under the default parallel test harness.

mod alarm;
mod donation;
mod mlfqs;
mod scheduler;

extern crate alloc;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

/// A shared trace buffer scenarios append to and assert on afterwards.
pub(crate) type Trace = Arc<spin::Mutex<Vec<String>>>;

pub(crate) fn trace() -> Trace {
    Arc::new(spin::Mutex::new(Vec::new()))
}

pub(crate) fn record(trace: &Trace, entry: impl Into<String>) {
    trace.lock().push(entry.into());
}

pub(crate) fn snapshot(trace: &Trace) -> Vec<String> {
    trace.lock().clone()
}
