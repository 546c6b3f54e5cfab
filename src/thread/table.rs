//! The thread table.
//!
//! A bounded arena of thread control blocks. Slots stand in for the backing
//! pages a bare-metal kernel would allocate per thread: creation fails when
//! the pool is exhausted, and a dying thread's slot is reclaimed by the next
//! thread to run, never by the dying thread itself.

use super::list::{Link, LinkKind};
use super::{Tcb, THREAD_MAGIC};
use crate::mem::{Arena, Slot};

pub(crate) struct ThreadTable {
    arena: Arena<Tcb>,
}

impl ThreadTable {
    pub fn new() -> ThreadTable {
        ThreadTable {
            arena: Arena::bounded(super::MAX_THREADS),
        }
    }

    /// Allocate a slot for `tcb`, or `None` if the pool is exhausted.
    pub fn allocate(&mut self, tcb: Tcb) -> Option<Slot> {
        self.arena.insert(tcb).map(Slot)
    }

    /// Release a thread's slot. The thread must be fully unlinked.
    pub fn free(&mut self, slot: Slot) {
        let tcb = self.arena.remove(slot.0);
        debug_assert!(!tcb.link.is_attached());
        debug_assert!(!tcb.all_link.is_attached());
    }

    /// Borrow a thread, checking its corruption sentinel.
    #[inline]
    pub fn get(&self, slot: Slot) -> &Tcb {
        let tcb = self.arena.get(slot.0);
        assert_eq!(tcb.magic, THREAD_MAGIC, "thread control block corrupted");
        tcb
    }

    /// Mutably borrow a thread, checking its corruption sentinel.
    #[inline]
    pub fn get_mut(&mut self, slot: Slot) -> &mut Tcb {
        let tcb = self.arena.get_mut(slot.0);
        assert_eq!(tcb.magic, THREAD_MAGIC, "thread control block corrupted");
        tcb
    }

    pub(crate) fn link(&self, slot: Slot, kind: LinkKind) -> &Link {
        let tcb = self.get(slot);
        match kind {
            LinkKind::Queue => &tcb.link,
            LinkKind::All => &tcb.all_link,
        }
    }

    pub(crate) fn link_mut(&mut self, slot: Slot, kind: LinkKind) -> &mut Link {
        let tcb = self.get_mut(slot);
        match kind {
            LinkKind::Queue => &mut tcb.link,
            LinkKind::All => &mut tcb.all_link,
        }
    }
}
