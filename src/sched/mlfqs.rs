//! Multilevel-feedback-queue scheduling.
//!
//! Selected at boot; mutually exclusive with priority donation. Priorities
//! are derived from recent CPU usage and niceness in Q17.14 fixed point:
//!
//! - every tick, the running thread's `recent_cpu` grows by one
//! - every fourth tick, every thread's priority is recomputed as
//!   `PRI_MAX - recent_cpu/4 - nice*2`, clamped to the priority band
//! - once per second, `load_avg` decays toward the number of ready threads
//!   and every thread's `recent_cpu` decays by `2*load_avg / (2*load_avg + 1)`

use crate::fixed::Fixed;
use crate::kernel::KernelState;
use crate::mem::Slot;
use crate::sched;
use crate::thread::{ThreadState, PRI_MAX, PRI_MIN};
use crate::timer;

/// The MLFQS priority formula.
pub(crate) fn priority_for(recent_cpu: Fixed, nice: i32) -> i32 {
    (PRI_MAX - recent_cpu.to_int() / 4 - nice * 2).clamp(PRI_MIN, PRI_MAX)
}

/// Recompute one thread's priority, moving it between ready buckets if the
/// result changed while it was queued.
pub(crate) fn update_priority(k: &mut KernelState, slot: Slot) {
    debug_assert!(k.mlfqs);
    if Some(slot) == k.idle {
        k.threads.get_mut(slot).priority = PRI_MIN;
        return;
    }
    let t = k.threads.get(slot);
    let new = priority_for(t.recent_cpu, t.nice);
    let old = t.priority;
    if new == old {
        return;
    }
    let state = t.state;
    k.threads.get_mut(slot).priority = new;
    if state == ThreadState::Ready {
        k.ready[old as usize].remove(&mut k.threads, slot);
        k.ready[new as usize].push_back(&mut k.threads, slot);
    }
}

/// Per-tick MLFQS accounting. Returns true when priorities were recomputed
/// and the interrupted thread should yield on return.
pub(crate) fn on_tick(k: &mut KernelState) -> bool {
    let ticks = timer::ticks();
    let cur = k.current;

    if Some(cur) != k.idle {
        let t = k.threads.get_mut(cur);
        t.recent_cpu += Fixed::from_int(1);
    }

    if ticks % timer::TIMER_FREQ == 0 {
        // Both updates use the load average of the ending second: the decay
        // factor comes from the value load_avg had before its own update.
        let old_load_avg = k.load_avg;
        let ready = sched::ready_thread_count(k);
        k.load_avg = Fixed::from_int(59) / Fixed::from_int(60) * old_load_avg
            + Fixed::from_int(ready) / Fixed::from_int(60);
        let twice = old_load_avg * 2;
        let decay = twice / (twice + Fixed::from_int(1));
        sched::foreach(k, |k, slot| {
            let t = k.threads.get_mut(slot);
            t.recent_cpu = decay * t.recent_cpu + Fixed::from_int(t.nice);
        });
    }

    let recompute = ticks % 4 == 0;
    if recompute {
        sched::foreach(k, update_priority);
    }
    recompute
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_formula() {
        assert_eq!(priority_for(Fixed::ZERO, 0), PRI_MAX);
        assert_eq!(priority_for(Fixed::from_int(100), 0), PRI_MAX - 25);
        assert_eq!(priority_for(Fixed::ZERO, 20), PRI_MAX - 40);
        assert_eq!(priority_for(Fixed::ZERO, -20), PRI_MAX);
        assert_eq!(priority_for(Fixed::from_int(4000), 20), PRI_MIN);
    }
}
