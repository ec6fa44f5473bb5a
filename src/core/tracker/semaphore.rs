//! Semaphore wakeup accounting
//!
//! A post on an unnamed semaphore is a wakeup owed to some waiter. Until a
//! wait consumes it, a thread sleeping on that semaphore is about to run and
//! is counted as active.

use super::{Monitor, Tracker};
use crate::core::error::{TrackError, TrackResult};
use crate::core::registry::SemaphoreRecord;
use crate::core::types::{Events, SemId, ThreadId, get_current_thread_id};

impl Tracker {
    /// Register (or re-initialize) a semaphore
    pub fn register_semaphore(
        &mut self,
        thread: ThreadId,
        sem: SemId,
        record: SemaphoreRecord,
    ) -> TrackResult<()> {
        self.registry.register_semaphore(sem, record);
        self.settle(thread, sem, Events::SemCreate)
    }

    /// Forget a semaphore
    pub fn unregister_semaphore(&mut self, thread: ThreadId, sem: SemId) -> TrackResult<()> {
        self.registry
            .unregister_semaphore(sem)
            .ok_or(TrackError::UnknownSemaphore(sem))?;
        self.settle(thread, sem, Events::SemDestroy)
    }

    /// Record a post as a pending wakeup, before the real post happens
    pub fn note_post(&mut self, thread: ThreadId, sem: SemId) -> TrackResult<()> {
        let record = self
            .registry
            .semaphore_mut(sem)
            .ok_or(TrackError::UnknownSemaphore(sem))?;
        if !record.named {
            record.pending_wakeups += 1;
        }
        self.settle(thread, sem, Events::SemPost)
    }

    /// Undo [`Tracker::note_post`] after the real post failed
    pub fn revert_post(&mut self, thread: ThreadId, sem: SemId) -> TrackResult<()> {
        if let Some(record) = self.registry.semaphore_mut(sem)
            && !record.named
        {
            record.pending_wakeups = record.pending_wakeups.saturating_sub(1);
        }
        self.settle(thread, sem, Events::SemPost)
    }

    /// The thread is about to wait on `sem`
    ///
    /// Returns whether the wait is tracked as blocking; waits on named
    /// semaphores are not.
    pub fn begin_semaphore_wait(&mut self, thread: ThreadId, sem: SemId) -> TrackResult<bool> {
        let named = self
            .registry
            .semaphore(sem)
            .ok_or(TrackError::UnknownSemaphore(sem))?
            .named;
        if named {
            return Ok(false);
        }
        if let Some(record) = self.registry.thread_mut(thread) {
            record.sleeping = true;
            record.waiting_on = Some(sem);
        }
        self.settle(thread, sem, Events::SemWaitBegin)?;
        Ok(true)
    }

    /// The thread returned from a tracked wait on `sem`
    ///
    /// `consumed` tells whether the wait took a token; only then is a pending
    /// wakeup retired. The semaphore may have been destroyed in the meantime.
    pub fn end_semaphore_wait(
        &mut self,
        thread: ThreadId,
        sem: SemId,
        consumed: bool,
    ) -> TrackResult<()> {
        if let Some(record) = self.registry.thread_mut(thread) {
            record.sleeping = false;
            record.waiting_on = None;
        }
        if consumed {
            self.consume_wakeup(sem);
        }
        self.settle(thread, sem, Events::SemWaitEnd)
    }

    /// A non-blocking wait on `sem` took a token
    pub fn note_try_wait(&mut self, thread: ThreadId, sem: SemId) -> TrackResult<()> {
        if self.registry.semaphore(sem).is_none() {
            return Err(TrackError::UnknownSemaphore(sem));
        }
        self.consume_wakeup(sem);
        self.settle(thread, sem, Events::SemWaitEnd)
    }

    fn consume_wakeup(&mut self, sem: SemId) {
        if let Some(record) = self.registry.semaphore_mut(sem)
            && !record.named
        {
            record.pending_wakeups = record.pending_wakeups.saturating_sub(1);
        }
    }
}

impl Monitor {
    /// Post to `sem` through `post`, recording the wakeup first
    ///
    /// `succeeded` inspects the result of the real post; a failed post rolls
    /// the pending wakeup back.
    ///
    /// A post made while the calling thread is already inside an update of
    /// this monitor (from a signal handler, typically) only leaves a note,
    /// which the next update applies.
    pub fn semaphore_post<R>(
        &self,
        sem: SemId,
        post: impl FnOnce() -> R,
        succeeded: impl FnOnce(&R) -> bool,
    ) -> TrackResult<R> {
        if self.is_entered() {
            self.defer_post(sem)?;
            let result = post();
            if !succeeded(&result) {
                self.defer_revert(sem)?;
            }
            return Ok(result);
        }

        let thread = get_current_thread_id();
        self.with(|tracker| tracker.note_post(thread, sem))?;
        let result = post();
        if !succeeded(&result) {
            self.with(|tracker| tracker.revert_post(thread, sem))?;
        }
        Ok(result)
    }

    /// Wait on `sem` through `wait`, marking the calling thread as sleeping on it
    ///
    /// `consumed` inspects the result of the real wait and tells whether it
    /// took a token. Timeouts and interrupted waits do not.
    pub fn semaphore_wait<R>(
        &self,
        sem: SemId,
        wait: impl FnOnce() -> R,
        consumed: impl FnOnce(&R) -> bool,
    ) -> TrackResult<R> {
        let thread = get_current_thread_id();
        let tracked = self.with(|tracker| tracker.begin_semaphore_wait(thread, sem))?;
        let result = wait();
        if tracked {
            let consumed = consumed(&result);
            self.with(|tracker| tracker.end_semaphore_wait(thread, sem, consumed))?;
        }
        Ok(result)
    }

    /// Non-blocking wait on `sem` through `try_wait`
    pub fn semaphore_try_wait<R>(
        &self,
        sem: SemId,
        try_wait: impl FnOnce() -> R,
        consumed: impl FnOnce(&R) -> bool,
    ) -> TrackResult<R> {
        let thread = get_current_thread_id();
        let result = try_wait();
        if consumed(&result) {
            self.with(|tracker| tracker.note_try_wait(thread, sem))?;
        }
        Ok(result)
    }
}
