//! Posts that arrive while the tracker is already in use on the same thread
//!
//! `sem_post` is async-signal-safe, so a signal handler may post while the
//! thread it interrupted is halfway through a tracker update. That post must
//! neither borrow the tracker nor take the global lock. It leaves a note in a
//! lock-free slot set instead, and the monitor applies the notes at the start
//! and end of every update.
//!
//! Notes are left before the real post, the same order as an ordinary post,
//! so a waiter woken by it applies the note before consuming the token.

use crate::core::types::SemId;
use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Notes one slot set holds before further nested posts are refused
pub const DEFERRED_CAPACITY: usize = 64;

thread_local! {
    /// Address of the monitor the calling thread is inside, 0 when none
    static INSIDE: Cell<usize> = const { Cell::new(0) };
}

/// Marks the calling thread as inside a monitor until dropped
pub(crate) struct Inside {
    previous: usize,
}

impl Inside {
    pub(crate) fn enter(monitor: usize) -> Self {
        let previous = INSIDE.with(|inside| inside.replace(monitor));
        Inside { previous }
    }

    /// Whether the calling thread is inside `monitor` right now
    pub(crate) fn is_inside(monitor: usize) -> bool {
        INSIDE.with(|inside| inside.get() == monitor)
    }
}

impl Drop for Inside {
    fn drop(&mut self) {
        INSIDE.with(|inside| inside.set(self.previous));
    }
}

/// Fixed set of semaphore ids; an empty slot holds 0
pub(crate) struct SlotSet {
    slots: [AtomicUsize; DEFERRED_CAPACITY],
}

impl SlotSet {
    pub(crate) const fn new() -> Self {
        SlotSet {
            slots: [const { AtomicUsize::new(0) }; DEFERRED_CAPACITY],
        }
    }

    /// Add one note for `sem`; `false` when the set is full
    pub(crate) fn push(&self, sem: SemId) -> bool {
        self.slots.iter().any(|slot| {
            slot.compare_exchange(0, sem, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        })
    }

    /// Take back one note for `sem` that nobody applied yet
    pub(crate) fn cancel(&self, sem: SemId) -> bool {
        self.slots.iter().any(|slot| {
            slot.compare_exchange(sem, 0, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        })
    }

    /// Remove and return every note
    pub(crate) fn drain(&self) -> impl Iterator<Item = SemId> + '_ {
        self.slots
            .iter()
            .map(|slot| slot.swap(0, Ordering::AcqRel))
            .filter(|sem| *sem != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_set_counts_duplicates() {
        let set = SlotSet::new();
        assert!(set.push(0x10));
        assert!(set.push(0x10));
        assert!(set.push(0x20));
        assert!(set.cancel(0x10));
        assert!(!set.cancel(0x30));

        let mut drained: Vec<_> = set.drain().collect();
        drained.sort_unstable();
        assert_eq!(drained, vec![0x10, 0x20]);
        assert_eq!(set.drain().count(), 0);
    }

    #[test]
    fn test_slot_set_refuses_when_full() {
        let set = SlotSet::new();
        for _ in 0..DEFERRED_CAPACITY {
            assert!(set.push(0x10));
        }
        assert!(!set.push(0x20));
        assert_eq!(set.drain().count(), DEFERRED_CAPACITY);
        assert!(set.push(0x20));
    }

    #[test]
    fn test_inside_restores_outer_monitor() {
        let outer = Inside::enter(0xa);
        assert!(Inside::is_inside(0xa));
        {
            let _inner = Inside::enter(0xb);
            assert!(Inside::is_inside(0xb));
            assert!(!Inside::is_inside(0xa));
        }
        assert!(Inside::is_inside(0xa));
        drop(outer);
        assert!(!Inside::is_inside(0xa));
    }
}
