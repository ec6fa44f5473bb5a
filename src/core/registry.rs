//! Identity-keyed bookkeeping for threads, semaphores and condition groups
//!
//! The registry is plain data. It is only ever touched through a
//! [`Tracker`](crate::core::tracker::Tracker), which in turn is only reachable
//! with the global lock held, so nothing here synchronizes on its own.

use crate::core::locks::raw::RawSemaphore;
use crate::core::types::{CondId, SemId, ThreadId};
use fxhash::FxHashMap;
use std::sync::Arc;

/// Per-thread activity state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadRecord {
    /// Currently inside a blocking primitive
    pub sleeping: bool,
    /// Explicit override, independent of `sleeping`
    pub forced_idle: bool,
    /// Set only while blocked in a semaphore wait; requires `sleeping`
    pub waiting_on: Option<SemId>,
    /// Set only while blocked joining another thread; requires `sleeping`
    pub joining: Option<ThreadId>,
}

/// Per-semaphore wakeup accounting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SemaphoreRecord {
    /// Shared outside the process; never counts as blocking
    pub named: bool,
    /// Posts not yet consumed by a wait. Meaningless when `named`.
    pub pending_wakeups: usize,
}

impl SemaphoreRecord {
    /// A process-private semaphore created with `value` initial tokens
    pub fn unnamed(value: usize) -> Self {
        SemaphoreRecord {
            named: false,
            pending_wakeups: value,
        }
    }

    /// An externally shared semaphore
    pub fn named() -> Self {
        SemaphoreRecord {
            named: true,
            pending_wakeups: 0,
        }
    }
}

/// One epoch of a condition variable, bounded by broadcasts
///
/// Waiters park on `entry`; a broadcaster posts one `entry` token per counted
/// waiter and then collects one `exit` token from each before retiring the
/// pair.
#[derive(Debug, Clone)]
pub struct Generation {
    /// Monotonic per-group generation number
    pub number: u64,
    /// Semaphore the waiters of this generation sleep on
    pub entry: Arc<RawSemaphore>,
    /// Semaphore released waiters post to once they are off `entry`
    pub exit: Arc<RawSemaphore>,
}

impl Generation {
    /// Allocate a fresh pair with no tokens
    pub fn new(number: u64) -> Self {
        Generation {
            number,
            entry: Arc::new(RawSemaphore::new(0)),
            exit: Arc::new(RawSemaphore::new(0)),
        }
    }

    /// Registry identity of the entry semaphore
    pub fn entry_id(&self) -> SemId {
        Arc::as_ptr(&self.entry) as SemId
    }

    /// Registry identity of the exit semaphore
    pub fn exit_id(&self) -> SemId {
        Arc::as_ptr(&self.exit) as SemId
    }
}

/// Emulation state of one condition variable
#[derive(Debug, Clone)]
pub struct ConditionGroup {
    /// The live generation, exclusively owned by this group
    pub generation: Generation,
    /// Waiters parked in the live generation
    pub sleeping_threads: usize,
}

/// The three identity maps
#[derive(Debug, Default)]
pub struct Registry {
    pub(crate) threads: FxHashMap<ThreadId, ThreadRecord>,
    pub(crate) semaphores: FxHashMap<SemId, SemaphoreRecord>,
    pub(crate) conditions: FxHashMap<CondId, ConditionGroup>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a thread with a fresh (awake) record
    ///
    /// Re-registering an identity replaces its record; `pthread_t` values are
    /// recycled once a thread has been joined.
    pub fn register_thread(&mut self, thread: ThreadId) {
        self.threads.insert(thread, ThreadRecord::default());
    }

    /// Look up a thread record
    pub fn thread(&self, thread: ThreadId) -> Option<&ThreadRecord> {
        self.threads.get(&thread)
    }

    /// Look up a thread record for mutation
    pub fn thread_mut(&mut self, thread: ThreadId) -> Option<&mut ThreadRecord> {
        self.threads.get_mut(&thread)
    }

    /// Remove a thread record
    pub fn unregister_thread(&mut self, thread: ThreadId) -> Option<ThreadRecord> {
        self.threads.remove(&thread)
    }

    /// Iterate over all registered threads
    pub fn threads(&self) -> impl Iterator<Item = (ThreadId, &ThreadRecord)> {
        self.threads.iter().map(|(&id, record)| (id, record))
    }

    /// Number of registered threads
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Register (or re-initialize) a semaphore
    pub fn register_semaphore(&mut self, sem: SemId, record: SemaphoreRecord) {
        self.semaphores.insert(sem, record);
    }

    /// Look up a semaphore record
    pub fn semaphore(&self, sem: SemId) -> Option<&SemaphoreRecord> {
        self.semaphores.get(&sem)
    }

    /// Look up a semaphore record for mutation
    pub fn semaphore_mut(&mut self, sem: SemId) -> Option<&mut SemaphoreRecord> {
        self.semaphores.get_mut(&sem)
    }

    /// Remove a semaphore record
    pub fn unregister_semaphore(&mut self, sem: SemId) -> Option<SemaphoreRecord> {
        self.semaphores.remove(&sem)
    }

    /// Register a condition group, along with both semaphores of its generation
    pub fn register_condition(&mut self, cond: CondId, group: ConditionGroup) {
        self.register_generation(&group.generation);
        self.conditions.insert(cond, group);
    }

    /// Look up a condition group
    pub fn condition(&self, cond: CondId) -> Option<&ConditionGroup> {
        self.conditions.get(&cond)
    }

    /// Look up a condition group for mutation
    pub fn condition_mut(&mut self, cond: CondId) -> Option<&mut ConditionGroup> {
        self.conditions.get_mut(&cond)
    }

    /// Remove a condition group
    ///
    /// The semaphores of its live generation are left registered; the caller
    /// retires them with [`Registry::retire_generation`].
    pub fn unregister_condition(&mut self, cond: CondId) -> Option<ConditionGroup> {
        self.conditions.remove(&cond)
    }

    /// Register both semaphores of a generation as unnamed and empty
    pub fn register_generation(&mut self, generation: &Generation) {
        self.register_semaphore(generation.entry_id(), SemaphoreRecord::unnamed(0));
        self.register_semaphore(generation.exit_id(), SemaphoreRecord::unnamed(0));
    }

    /// Unregister both semaphores of a generation
    pub fn retire_generation(&mut self, generation: &Generation) {
        self.unregister_semaphore(generation.entry_id());
        self.unregister_semaphore(generation.exit_id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_of_unknown_identity_is_none() {
        let registry = Registry::new();
        assert!(registry.thread(1).is_none());
        assert!(registry.semaphore(2).is_none());
        assert!(registry.condition(3).is_none());
    }

    #[test]
    fn test_thread_registration_roundtrip() {
        let mut registry = Registry::new();
        registry.register_thread(7);
        registry.thread_mut(7).unwrap().sleeping = true;

        assert!(registry.thread(7).unwrap().sleeping);
        assert_eq!(registry.thread_count(), 1);

        // Recycled identities start from a clean record
        registry.register_thread(7);
        assert_eq!(registry.thread(7), Some(&ThreadRecord::default()));

        assert!(registry.unregister_thread(7).is_some());
        assert!(registry.unregister_thread(7).is_none());
    }

    #[test]
    fn test_condition_registration_tracks_its_semaphores() {
        let mut registry = Registry::new();
        let group = ConditionGroup {
            generation: Generation::new(0),
            sleeping_threads: 0,
        };
        let entry = group.generation.entry_id();
        let exit = group.generation.exit_id();

        registry.register_condition(42, group);
        assert_eq!(
            registry.semaphore(entry),
            Some(&SemaphoreRecord::unnamed(0))
        );
        assert!(registry.semaphore(exit).is_some());

        let group = registry.unregister_condition(42).unwrap();
        registry.retire_generation(&group.generation);
        assert!(registry.semaphore(entry).is_none());
        assert!(registry.semaphore(exit).is_none());
    }

    #[test]
    fn test_generation_pairs_have_distinct_identities() {
        let a = Generation::new(0);
        let b = Generation::new(1);
        assert_ne!(a.entry_id(), a.exit_id());
        assert_ne!(a.entry_id(), b.entry_id());
        assert_ne!(a.exit_id(), b.exit_id());
    }
}
