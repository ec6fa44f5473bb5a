//! Thread lifecycle and generic blocking

use super::{Monitor, Tracker};
use crate::core::error::{OrFatal, TrackError, TrackResult};
use crate::core::types::{Events, ThreadId, get_current_thread_id};
use std::sync::Arc;

impl Tracker {
    /// Register a thread as awake
    pub fn register_thread(&mut self, thread: ThreadId) -> TrackResult<()> {
        self.registry.register_thread(thread);
        self.settle(thread, 0, Events::Spawn)
    }

    /// A thread creation is about to start in `parent`
    ///
    /// The thread-to-be counts as active until it registers itself or the
    /// creation is cancelled.
    pub fn begin_spawn(&mut self, parent: ThreadId) -> TrackResult<()> {
        self.pending_spawns += 1;
        self.settle(parent, 0, Events::SpawnBegin)
    }

    /// A freshly created thread registers itself and retires its pending spawn
    pub fn attach_spawned(&mut self, thread: ThreadId) -> TrackResult<()> {
        self.pending_spawns = self.pending_spawns.saturating_sub(1);
        self.registry.register_thread(thread);
        self.settle(thread, 0, Events::Spawn)
    }

    /// A thread creation failed before the thread ran
    pub fn cancel_spawn(&mut self, parent: ThreadId) -> TrackResult<()> {
        self.pending_spawns = self.pending_spawns.saturating_sub(1);
        self.settle(parent, 0, Events::SpawnCancel)
    }

    /// Remove an exiting thread
    pub fn exit_thread(&mut self, thread: ThreadId) -> TrackResult<()> {
        self.registry.unregister_thread(thread);
        self.settle(thread, 0, Events::Exit)
    }

    /// The thread is about to enter a blocking call
    ///
    /// No-op on the registry for threads that were never registered.
    pub fn enter_blocked(&mut self, thread: ThreadId) -> TrackResult<()> {
        if let Some(record) = self.registry.thread_mut(thread) {
            record.sleeping = true;
        }
        self.settle(thread, 0, Events::EnterBlocked)
    }

    /// The thread is about to wait for `target` to finish
    pub fn enter_join(&mut self, thread: ThreadId, target: ThreadId) -> TrackResult<()> {
        if let Some(record) = self.registry.thread_mut(thread) {
            record.sleeping = true;
            record.joining = Some(target);
        }
        self.settle(thread, target, Events::JoinBegin)
    }

    /// The thread returned from a blocking call
    pub fn leave_blocked(&mut self, thread: ThreadId) -> TrackResult<()> {
        if let Some(record) = self.registry.thread_mut(thread) {
            record.sleeping = false;
            record.joining = None;
        }
        self.settle(thread, 0, Events::LeaveBlocked)
    }

    /// Declare the thread idle regardless of what it is doing
    pub fn enable_forced_idle(&mut self, thread: ThreadId) -> TrackResult<()> {
        let record = self
            .registry
            .thread_mut(thread)
            .ok_or(TrackError::UnknownThread(thread))?;
        if record.forced_idle {
            return Err(TrackError::ForcedIdleAlreadyEnabled(thread));
        }
        record.forced_idle = true;
        self.settle(thread, 0, Events::ForcedIdleOn)
    }

    /// Lift a previous [`Tracker::enable_forced_idle`]
    pub fn disable_forced_idle(&mut self, thread: ThreadId) -> TrackResult<()> {
        let record = self
            .registry
            .thread_mut(thread)
            .ok_or(TrackError::UnknownThread(thread))?;
        if !record.forced_idle {
            return Err(TrackError::ForcedIdleNotEnabled(thread));
        }
        record.forced_idle = false;
        self.settle(thread, 0, Events::ForcedIdleOff)
    }
}

impl Monitor {
    /// Register the calling thread
    pub fn register_current_thread(&self) -> TrackResult<()> {
        self.with(|tracker| tracker.register_thread(get_current_thread_id()))
    }

    /// Run a blocking operation with the calling thread marked as sleeping
    ///
    /// The global lock is not held while `op` runs.
    pub fn blocking<R>(&self, op: impl FnOnce() -> R) -> TrackResult<R> {
        let thread = get_current_thread_id();
        self.with(|tracker| tracker.enter_blocked(thread))?;
        let result = op();
        self.with(|tracker| tracker.leave_blocked(thread))?;
        Ok(result)
    }

    /// Run a join on `target` with the calling thread marked as sleeping
    pub fn blocking_join<R>(&self, target: ThreadId, op: impl FnOnce() -> R) -> TrackResult<R> {
        let thread = get_current_thread_id();
        self.with(|tracker| tracker.enter_join(thread, target))?;
        let result = op();
        self.with(|tracker| tracker.leave_blocked(thread))?;
        Ok(result)
    }

    /// Declare the calling thread idle until [`Monitor::disable_forced_idle`]
    pub fn enable_forced_idle(&self) -> TrackResult<()> {
        self.with(|tracker| tracker.enable_forced_idle(get_current_thread_id()))
    }

    /// Lift forced idle on the calling thread
    pub fn disable_forced_idle(&self) -> TrackResult<()> {
        self.with(|tracker| tracker.disable_forced_idle(get_current_thread_id()))
    }

    /// Start a thread creation from the calling thread
    ///
    /// The returned ticket is moved into the new thread, which calls
    /// [`SpawnTicket::attach`] before running anything else. A ticket dropped
    /// without being attached cancels the pending spawn.
    pub fn begin_spawn(self: &Arc<Self>) -> TrackResult<SpawnTicket> {
        let parent = get_current_thread_id();
        self.with(|tracker| tracker.begin_spawn(parent))?;
        Ok(SpawnTicket {
            monitor: Arc::clone(self),
            parent,
            attached: false,
        })
    }
}

/// A thread creation that has started but not registered yet
#[derive(Debug)]
pub struct SpawnTicket {
    monitor: Arc<Monitor>,
    parent: ThreadId,
    attached: bool,
}

impl SpawnTicket {
    /// Register the calling (new) thread in place of the pending spawn
    ///
    /// The returned guard unregisters the thread when dropped.
    pub fn attach(mut self) -> TrackResult<ExitGuard> {
        let thread = get_current_thread_id();
        self.attached = true;
        self.monitor
            .with(|tracker| tracker.attach_spawned(thread))?;
        Ok(ExitGuard {
            monitor: Arc::clone(&self.monitor),
            thread,
        })
    }
}

impl Drop for SpawnTicket {
    fn drop(&mut self) {
        if !self.attached {
            let parent = self.parent;
            self.monitor
                .with(|tracker| tracker.cancel_spawn(parent))
                .or_fatal();
        }
    }
}

/// Unregisters its thread when dropped
#[derive(Debug)]
pub struct ExitGuard {
    monitor: Arc<Monitor>,
    thread: ThreadId,
}

impl ExitGuard {
    /// The registered thread
    pub fn thread(&self) -> ThreadId {
        self.thread
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let thread = self.thread;
        self.monitor
            .with(|tracker| tracker.exit_thread(thread))
            .or_fatal();
    }
}
