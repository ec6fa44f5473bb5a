//! Condition variables emulated on counted semaphores
//!
//! Each condition variable owns one live [`Generation`]. A waiter joins the
//! live generation under the global lock, releases its external mutex and
//! sleeps on the generation's entry semaphore. A broadcast closes the
//! generation: it installs a fresh one, posts one entry token per counted
//! waiter and collects one exit token from each before retiring the old pair.
//!
//! Because every wakeup is an ordinary post on a tracked semaphore, a released
//! waiter shows up as a pending wakeup and stays active until it has actually
//! run. Waiters that arrive after the broadcast land in the new generation and
//! can never steal a token meant for an earlier one.

use super::{Monitor, Tracker};
use crate::core::error::{TrackError, TrackResult};
use crate::core::locks::ExternalLock;
use crate::core::registry::{ConditionGroup, Generation};
use crate::core::types::{CondId, Events, ThreadId, get_current_thread_id};
use std::time::Instant;

/// How a condition wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Released by a signal or broadcast
    Woken,
    /// The deadline passed before any broadcast counted the waiter
    TimedOut,
}

impl WaitOutcome {
    /// Whether the wait ended on its deadline
    pub fn timed_out(self) -> bool {
        self == WaitOutcome::TimedOut
    }
}

impl Tracker {
    /// Create (or re-initialize) the group for `cond`
    ///
    /// Re-initializing a condition variable that still has waiters fails.
    pub fn register_condition(&mut self, thread: ThreadId, cond: CondId) -> TrackResult<()> {
        if let Some(group) = self.registry.condition(cond) {
            if group.sleeping_threads > 0 {
                return Err(TrackError::ConditionInUse {
                    cond,
                    sleeping: group.sleeping_threads,
                });
            }
            let stale = group.generation.clone();
            self.registry.retire_generation(&stale);
        }
        self.registry.register_condition(
            cond,
            ConditionGroup {
                generation: Generation::new(0),
                sleeping_threads: 0,
            },
        );
        self.settle(thread, cond, Events::CondvarCreate)
    }

    /// Create the group for `cond` unless it already exists
    pub fn ensure_condition(&mut self, thread: ThreadId, cond: CondId) -> TrackResult<()> {
        if self.registry.condition(cond).is_some() {
            return Ok(());
        }
        self.register_condition(thread, cond)
    }

    /// Remove the group for `cond`, refusing while threads wait on it
    pub fn destroy_condition(&mut self, thread: ThreadId, cond: CondId) -> TrackResult<()> {
        let sleeping = self
            .registry
            .condition(cond)
            .ok_or(TrackError::UnknownCondition(cond))?
            .sleeping_threads;
        if sleeping > 0 {
            return Err(TrackError::ConditionInUse { cond, sleeping });
        }
        if let Some(group) = self.registry.unregister_condition(cond) {
            self.registry.retire_generation(&group.generation);
        }
        self.settle(thread, cond, Events::CondvarDestroy)
    }

    /// Count the thread into the live generation of `cond` and hand it out
    pub fn join_generation(&mut self, thread: ThreadId, cond: CondId) -> TrackResult<Generation> {
        let group = self
            .registry
            .condition_mut(cond)
            .ok_or(TrackError::UnknownCondition(cond))?;
        group.sleeping_threads += 1;
        let generation = group.generation.clone();
        self.settle(thread, cond, Events::CondvarWaitBegin)?;
        Ok(generation)
    }

    /// Close the live generation of `cond`
    ///
    /// Installs a fresh generation and returns the closed one together with
    /// the number of waiters counted into it.
    pub fn roll_generation(
        &mut self,
        thread: ThreadId,
        cond: CondId,
    ) -> TrackResult<(Generation, usize)> {
        let group = self
            .registry
            .condition(cond)
            .ok_or(TrackError::UnknownCondition(cond))?;
        let fresh = Generation::new(group.generation.number + 1);
        self.registry.register_generation(&fresh);

        let Some(group) = self.registry.condition_mut(cond) else {
            return Err(TrackError::UnknownCondition(cond));
        };
        let closed = std::mem::replace(&mut group.generation, fresh);
        let released = std::mem::take(&mut group.sleeping_threads);
        self.settle(thread, cond, Events::CondvarBroadcast)?;
        Ok((closed, released))
    }

    /// Take a timed-out waiter back out of generation `number`
    ///
    /// Returns `false` when that generation has already been closed: the
    /// broadcaster counted the waiter and owes it a token.
    pub fn withdraw_waiter(
        &mut self,
        thread: ThreadId,
        cond: CondId,
        number: u64,
    ) -> TrackResult<bool> {
        let Some(group) = self.registry.condition_mut(cond) else {
            return Ok(false);
        };
        if group.generation.number != number {
            return Ok(false);
        }
        group.sleeping_threads = group.sleeping_threads.saturating_sub(1);
        self.settle(thread, cond, Events::CondvarWithdraw)?;
        Ok(true)
    }

    /// Forget both semaphores of a closed generation
    pub fn retire_generation(&mut self, generation: &Generation) {
        self.registry.retire_generation(generation);
    }

    /// Waiters parked in the live generation of `cond`
    pub fn sleeping_on(&self, cond: CondId) -> Option<usize> {
        self.registry
            .condition(cond)
            .map(|group| group.sleeping_threads)
    }
}

impl Monitor {
    /// Create (or re-initialize) the group for `cond`
    pub fn condvar_register(&self, cond: CondId) -> TrackResult<()> {
        self.with(|tracker| tracker.register_condition(get_current_thread_id(), cond))
    }

    /// Create the group for `cond` unless it already exists
    pub fn condvar_ensure(&self, cond: CondId) -> TrackResult<()> {
        self.with(|tracker| tracker.ensure_condition(get_current_thread_id(), cond))
    }

    /// Remove the group for `cond`
    pub fn condvar_destroy(&self, cond: CondId) -> TrackResult<()> {
        self.with(|tracker| tracker.destroy_condition(get_current_thread_id(), cond))
    }

    /// Waiters parked in the live generation of `cond`
    pub fn sleeping_on(&self, cond: CondId) -> Option<usize> {
        self.with(|tracker| tracker.sleeping_on(cond))
    }

    /// Wait on `cond`, releasing `lock` for the duration
    ///
    /// The global lock is taken before `lock` is released, so a broadcaster
    /// that acquires `lock` right after is guaranteed to count this waiter.
    /// `lock` is held again when this returns, whatever the outcome.
    pub fn condvar_wait<L: ExternalLock>(
        &self,
        cond: CondId,
        lock: &mut L,
        deadline: Option<Instant>,
    ) -> TrackResult<WaitOutcome> {
        let thread = get_current_thread_id();
        let held = self.lock();
        lock.unlocked(move || {
            let generation = self.with(|tracker| tracker.join_generation(thread, cond))?;
            drop(held);
            self.park(thread, cond, &generation, deadline)
        })
    }

    fn park(
        &self,
        thread: ThreadId,
        cond: CondId,
        generation: &Generation,
        deadline: Option<Instant>,
    ) -> TrackResult<WaitOutcome> {
        let entry = generation.entry_id();
        let woken = self.semaphore_wait(
            entry,
            || match deadline {
                Some(deadline) => generation.entry.wait_until(deadline),
                None => {
                    generation.entry.wait();
                    true
                }
            },
            |took| *took,
        )?;

        if !woken {
            if self.with(|tracker| tracker.withdraw_waiter(thread, cond, generation.number))? {
                return Ok(WaitOutcome::TimedOut);
            }
            // Too late to withdraw: our token is on its way
            self.semaphore_wait(entry, || generation.entry.wait(), |_| true)?;
        }

        self.semaphore_post(generation.exit_id(), || generation.exit.post(), |_| true)?;
        Ok(WaitOutcome::Woken)
    }

    /// Wake every thread waiting on `cond`
    ///
    /// Returns once each released waiter has left the entry semaphore; they
    /// reacquire their external mutex afterwards. Returns the number of
    /// waiters released.
    pub fn condvar_broadcast(&self, cond: CondId) -> TrackResult<usize> {
        let thread = get_current_thread_id();
        let (closed, released) = self.with(|tracker| tracker.roll_generation(thread, cond))?;

        for _ in 0..released {
            self.semaphore_post(closed.entry_id(), || closed.entry.post(), |_| true)?;
        }
        for _ in 0..released {
            self.semaphore_wait(closed.exit_id(), || closed.exit.wait(), |_| true)?;
        }

        self.with(|tracker| tracker.retire_generation(&closed));
        Ok(released)
    }

    /// Wake threads waiting on `cond`
    ///
    /// Same as [`Monitor::condvar_broadcast`]; waking everyone is a valid
    /// signal and callers must already tolerate spurious wakeups.
    pub fn condvar_signal(&self, cond: CondId) -> TrackResult<usize> {
        self.condvar_broadcast(cond)
    }
}
