//! The interrupt gate.
//!
//! Kernel code achieves mutual exclusion over scheduler state by disabling
//! external interrupts around critical sections rather than by spinning.
//! This module tracks the (virtual) interrupt level of the single CPU, the
//! external-interrupt-context flag, and the "yield on interrupt return" flag
//! an interrupt handler raises to request preemption.
//!
//! On the hosted platform there is no asynchronous delivery: external
//! interrupts arrive only at the explicit wait points in `platform`, always
//! with the level saved off beforehand and restored afterwards, so the flags
//! here are ordinary atomics.

use portable_atomic::{AtomicBool, Ordering};

static INTERRUPTS_ON: AtomicBool = AtomicBool::new(false);
static IN_EXTERNAL: AtomicBool = AtomicBool::new(false);
static YIELD_ON_RETURN: AtomicBool = AtomicBool::new(false);

/// Interrupt state of the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrLevel {
    /// External interrupts are masked.
    Off,
    /// External interrupts may be delivered.
    On,
}

/// Get the current interrupt level.
#[inline]
pub fn get_level() -> IntrLevel {
    if INTERRUPTS_ON.load(Ordering::Acquire) {
        IntrLevel::On
    } else {
        IntrLevel::Off
    }
}

/// Set the interrupt level, returning the previous one.
pub fn set_level(level: IntrLevel) -> IntrLevel {
    let was = INTERRUPTS_ON.swap(level == IntrLevel::On, Ordering::AcqRel);
    if was {
        IntrLevel::On
    } else {
        IntrLevel::Off
    }
}

/// Disable external interrupts, returning the previous level.
#[inline]
pub fn disable() -> IntrLevel {
    set_level(IntrLevel::Off)
}

/// Enable external interrupts, returning the previous level.
///
/// It is an error to enable interrupts from inside an interrupt handler;
/// the handler must finish first.
#[inline]
pub fn enable() -> IntrLevel {
    assert!(
        !in_external_handler(),
        "interrupts cannot be enabled inside an interrupt handler"
    );
    set_level(IntrLevel::On)
}

/// True while an external interrupt handler is running.
#[inline]
pub fn in_external_handler() -> bool {
    IN_EXTERNAL.load(Ordering::Acquire)
}

/// Scoped interrupt disable: restores the saved level on every exit path,
/// including unwinding and resumption after a context switch.
pub struct IntrGuard {
    old: IntrLevel,
}

impl IntrGuard {
    /// Disable interrupts until the guard is dropped.
    pub fn off() -> IntrGuard {
        IntrGuard { old: disable() }
    }
}

impl Drop for IntrGuard {
    fn drop(&mut self) {
        set_level(self.old);
    }
}

/// Ask the scheduler to yield once the current interrupt handler returns.
///
/// Only meaningful from inside a handler; the platform checks the flag on
/// the way out of interrupt context.
pub(crate) fn yield_on_return() {
    debug_assert!(in_external_handler());
    YIELD_ON_RETURN.store(true, Ordering::Release);
}

/// Consume the yield-on-return flag.
pub(crate) fn take_yield_request() -> bool {
    YIELD_ON_RETURN.swap(false, Ordering::AcqRel)
}

/// Enter external-interrupt context. Interrupts must already be off.
pub(crate) fn begin_external() {
    debug_assert_eq!(get_level(), IntrLevel::Off);
    let nested = IN_EXTERNAL.swap(true, Ordering::AcqRel);
    assert!(!nested, "nested external interrupt");
}

/// Leave external-interrupt context.
pub(crate) fn end_external() {
    IN_EXTERNAL.store(false, Ordering::Release);
}

/// Reset all interrupt state. Called once per kernel boot.
#[cfg(feature = "std-host")]
pub(crate) fn reset() {
    INTERRUPTS_ON.store(false, Ordering::Release);
    IN_EXTERNAL.store(false, Ordering::Release);
    YIELD_ON_RETURN.store(false, Ordering::Release);
}

#[cfg(all(test, feature = "std-host"))]
mod tests {
    use super::*;

    #[test]
    fn test_level_save_restore() {
        // The interrupt level is CPU state; keep booted kernels away.
        let _serial = crate::kernel::test_serial();
        let old = set_level(IntrLevel::On);
        assert_eq!(get_level(), IntrLevel::On);
        {
            let _guard = IntrGuard::off();
            assert_eq!(get_level(), IntrLevel::Off);
            {
                let _inner = IntrGuard::off();
                assert_eq!(get_level(), IntrLevel::Off);
            }
            assert_eq!(get_level(), IntrLevel::Off);
        }
        assert_eq!(get_level(), IntrLevel::On);
        set_level(old);
    }
}
