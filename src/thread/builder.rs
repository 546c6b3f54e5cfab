//! Builder-style thread creation.

use super::{Tid, PRI_DEFAULT};
use crate::errors::SpawnError;

extern crate alloc;
use alloc::string::String;

/// Configures and spawns a kernel thread.
///
/// ```
/// # use priority_threads::{kernel, KernelOptions, ThreadBuilder};
/// # kernel::boot(KernelOptions::default(), || {
/// let tid = ThreadBuilder::new()
///     .name("worker")
///     .priority(40)
///     .spawn(|| {})
///     .expect("spawn");
/// # let _ = tid;
/// # });
/// ```
pub struct ThreadBuilder {
    name: Option<String>,
    priority: i32,
}

impl ThreadBuilder {
    pub fn new() -> ThreadBuilder {
        ThreadBuilder {
            name: None,
            priority: PRI_DEFAULT,
        }
    }

    /// Set the thread's name.
    pub fn name<T: Into<String>>(mut self, name: T) -> ThreadBuilder {
        self.name = Some(name.into());
        self
    }

    /// Set the thread's initial priority.
    pub fn priority(mut self, priority: i32) -> ThreadBuilder {
        self.priority = priority;
        self
    }

    /// Spawn the thread, returning its identifier.
    pub fn spawn<F>(self, f: F) -> Result<Tid, SpawnError>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = self.name.unwrap_or_else(|| String::from("anonymous"));
        crate::kernel::spawn(&name, self.priority, f)
    }
}

impl Default for ThreadBuilder {
    fn default() -> Self {
        ThreadBuilder::new()
    }
}
