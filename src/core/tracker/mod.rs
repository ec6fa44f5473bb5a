//! The activity tracker
//!
//! [`Tracker`] owns everything that changes when a thread blocks or wakes:
//! the registry, the publisher and the event logger. Every mutation ends in
//! [`Tracker::settle`], which recomputes the active count from scratch, logs
//! the event and lets the publisher flip the external signal on a zero
//! crossing.
//!
//! [`Monitor`] puts the tracker behind the single global lock and implements
//! the sequences that have to let go of that lock around a real blocking
//! call: semaphore waits, joins, condition waits and broadcasts.

pub mod condvar;
mod deferred;
pub mod semaphore;
pub mod thread;

pub use condvar::WaitOutcome;
pub use thread::{ExitGuard, SpawnTicket};

use crate::core::error::{TrackError, TrackResult, fatal};
use crate::core::logger::EventLogger;
use crate::core::publisher::{IdleSignal, Publisher, Transition};
use crate::core::registry::Registry;
use crate::core::types::{Events, SemId, Snapshot, ThreadId, get_current_thread_id};
use deferred::{Inside, SlotSet};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::RefCell;
use std::sync::Arc;

/// Registry, publisher and logger of one instrumented process
#[derive(Debug)]
pub struct Tracker {
    registry: Registry,
    publisher: Publisher,
    logger: EventLogger,
    /// Threads being created that have not registered themselves yet
    pending_spawns: usize,
}

impl Tracker {
    /// Create a tracker publishing through `signal`
    ///
    /// The signal is switched to busy right away; it goes idle at the first
    /// mutation that leaves no active thread.
    pub fn new(signal: Box<dyn IdleSignal>, logger: EventLogger) -> TrackResult<Self> {
        Ok(Tracker {
            registry: Registry::new(),
            publisher: Publisher::new(signal)?,
            logger,
            pending_spawns: 0,
        })
    }

    /// Read access to the registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Threads that can make progress, including ones still being created
    pub fn active_count(&self) -> usize {
        self.registry.active_count() + self.pending_spawns
    }

    /// Whether the published signal reads busy
    pub fn is_busy(&self) -> bool {
        self.publisher.is_busy()
    }

    /// Number of busy to idle transitions so far
    pub fn times_idle(&self) -> u64 {
        self.publisher.times_idle()
    }

    /// Current state, for diagnostics
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            active: self.active_count(),
            busy: self.publisher.is_busy(),
            times_idle: self.publisher.times_idle(),
            threads: self.registry.thread_count(),
            pending_spawns: self.pending_spawns,
            block_map: self.registry.block_map(),
        }
    }

    /// Recompute the active count, log `event` and publish any zero crossing
    ///
    /// Called at the end of every mutation, after the registry has reached
    /// its final state for that operation.
    pub(crate) fn settle(
        &mut self,
        thread: ThreadId,
        object: usize,
        event: Events,
    ) -> TrackResult<()> {
        let active = self.active_count();
        self.logger
            .log_event(thread, object, event, active, || self.registry.block_map());

        if let Some(transition) = self.publisher.reconcile(active)? {
            let event = match transition {
                Transition::WentBusy => Events::Busy,
                Transition::WentIdle(_) => Events::Idle,
            };
            self.logger
                .log_event(thread, 0, event, active, || self.registry.block_map());
        }
        Ok(())
    }
}

/// The tracker behind its global lock
///
/// The lock is reentrant so that a hook running while the lock is already
/// held on the same thread cannot deadlock. Borrows of the inner tracker are
/// never held across a call back into the monitor; the one hook that may
/// legitimately interrupt an update, a post from a signal handler, is
/// deferred instead (see [`Monitor::semaphore_post`]).
pub struct Monitor {
    state: ReentrantMutex<RefCell<Tracker>>,
    deferred_posts: SlotSet,
    deferred_reverts: SlotSet,
}

impl Monitor {
    /// Put `tracker` behind a new lock
    pub fn new(tracker: Tracker) -> Arc<Self> {
        Arc::new(Monitor {
            state: ReentrantMutex::new(RefCell::new(tracker)),
            deferred_posts: SlotSet::new(),
            deferred_reverts: SlotSet::new(),
        })
    }

    /// Run `f` with exclusive access to the tracker
    ///
    /// Posts deferred by nested hooks are applied before and after `f`.
    pub fn with<R>(&self, f: impl FnOnce(&mut Tracker) -> R) -> R {
        let _inside = Inside::enter(self.address());
        let guard = self.state.lock();
        let Ok(mut tracker) = guard.try_borrow_mut() else {
            fatal("tracker re-entered from a hook nested in one of its updates");
        };
        self.apply_deferred(&mut tracker);
        let result = f(&mut tracker);
        self.apply_deferred(&mut tracker);
        result
    }

    fn address(&self) -> usize {
        self as *const Monitor as usize
    }

    /// Whether the calling thread is in the middle of an update of this monitor
    pub(crate) fn is_entered(&self) -> bool {
        Inside::is_inside(self.address())
    }

    /// Leave a note for a post the tracker cannot take right now
    pub(crate) fn defer_post(&self, sem: SemId) -> TrackResult<()> {
        if self.deferred_posts.push(sem) {
            Ok(())
        } else {
            Err(TrackError::DeferredOverflow(sem))
        }
    }

    /// Undo a [`Monitor::defer_post`] whose real post failed
    pub(crate) fn defer_revert(&self, sem: SemId) -> TrackResult<()> {
        if self.deferred_posts.cancel(sem) || self.deferred_reverts.push(sem) {
            Ok(())
        } else {
            Err(TrackError::DeferredOverflow(sem))
        }
    }

    fn apply_deferred(&self, tracker: &mut Tracker) {
        let thread = get_current_thread_id();
        for sem in self.deferred_posts.drain() {
            applied(tracker.note_post(thread, sem));
        }
        for sem in self.deferred_reverts.drain() {
            applied(tracker.revert_post(thread, sem));
        }
    }

    /// Take the global lock without borrowing the tracker yet
    pub(crate) fn lock(&self) -> ReentrantMutexGuard<'_, RefCell<Tracker>> {
        self.state.lock()
    }

    /// Current state, for diagnostics
    pub fn snapshot(&self) -> Snapshot {
        self.with(|tracker| tracker.snapshot())
    }

    /// Whether the published signal reads idle
    pub fn is_idle(&self) -> bool {
        self.with(|tracker| !tracker.is_busy())
    }

    /// Number of busy to idle transitions so far
    pub fn times_idle(&self) -> u64 {
        self.with(|tracker| tracker.times_idle())
    }
}

/// A note for a semaphore that went away before it was applied is dropped
fn applied(result: TrackResult<()>) {
    match result {
        Ok(()) | Err(TrackError::UnknownSemaphore(_)) => {}
        Err(e) => fatal(e),
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use anyhow::Result;
    use std::sync::Mutex;

    /// Signal that records what it was told, shared with the test
    #[derive(Clone, Default)]
    pub struct RecordingSignal {
        pub busy: Arc<Mutex<bool>>,
        pub history: Arc<Mutex<Vec<Option<u64>>>>,
    }

    impl IdleSignal for RecordingSignal {
        fn acquire_busy(&mut self) -> Result<()> {
            *self.busy.lock().unwrap() = true;
            self.history.lock().unwrap().push(None);
            Ok(())
        }

        fn release_idle(&mut self, times_idle: u64) -> Result<()> {
            *self.busy.lock().unwrap() = false;
            self.history.lock().unwrap().push(Some(times_idle));
            Ok(())
        }
    }

    pub fn tracker() -> (Tracker, RecordingSignal) {
        let signal = RecordingSignal::default();
        let tracker = Tracker::new(Box::new(signal.clone()), EventLogger::new()).unwrap();
        (tracker, signal)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::tracker;
    use super::*;

    #[test]
    fn test_new_tracker_is_busy_until_settled() {
        let (mut tracker, signal) = tracker();
        assert!(tracker.is_busy());
        assert_eq!(tracker.active_count(), 0);

        tracker.settle(0, 0, Events::EnterBlocked).unwrap();
        assert!(!tracker.is_busy());
        assert_eq!(tracker.times_idle(), 1);
        assert_eq!(*signal.history.lock().unwrap(), vec![None, Some(1)]);
    }

    #[test]
    fn test_snapshot_reflects_registry() {
        let (mut tracker, _signal) = tracker();
        tracker.register_thread(1).unwrap();
        tracker.register_thread(2).unwrap();
        tracker.enter_blocked(2).unwrap();

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.active, 1);
        assert!(snapshot.busy);
        assert_eq!(snapshot.threads, 2);
        assert_eq!(snapshot.block_map, "-|x");
    }

    #[test]
    fn test_monitor_with_is_reentrant_across_calls() {
        let (tracker, _signal) = tracker();
        let monitor = Monitor::new(tracker);
        let outer = monitor.lock();
        // Same thread may take the lock again while holding it
        assert_eq!(monitor.times_idle(), 0);
        drop(outer);
        assert!(!monitor.is_idle());
    }
}
