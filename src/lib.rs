//! # Idlewatch
//!
//! Tells the outside world when a multithreaded process has run out of work.
//!
//! Idlewatch tracks whether each thread of a process is able to make progress
//! or is blocked in a primitive it knows about (semaphore waits, condition
//! waits, joins, socket receives). When no thread can make progress the
//! process is *idle*, and idlewatch publishes that through a state file: an
//! exclusive `flock` on it is held for as long as the process is busy, and on
//! each busy to idle transition a counter is written to it and the lock is
//! released. An observer (a test harness, say) learns that the process is
//! quiescent with one non-blocking lock attempt, and can tell from the counter
//! whether anything happened since it last looked.
//!
//! ## Features
//!
//! - Tracked semaphores, condition variables and threads for Rust code
//! - Deterministic wakeup accounting: a notified waiter is busy until it runs
//! - Forced idle for threads that block where the tracker cannot see
//! - An observer API and CLI for the state file
//! - A C API, and with the `preload` feature an `LD_PRELOAD` shim that tracks
//!   unmodified programs

mod core;
pub use crate::core::{
    IdleWatch, disable_forced_idle, enable_forced_idle, global, try_global,
    config::Config,
    error::{TrackError, TrackResult},
    locks::{Condvar, ExternalLock, Semaphore},
    observer::{Observation, probe, wait_for_idle},
    publisher::{DEFAULT_STATE_FILE, IdleSignal, StateFile},
    tracker::{Monitor, Tracker, WaitOutcome},
    types::{CondId, Events, SemId, Snapshot, ThreadId},
};

/// Native threads with activity tracking
pub mod thread {
    pub use crate::core::thread::*;
}

/// Building blocks for custom integrations
pub mod raw {
    pub use crate::core::locks::RawSemaphore;
    pub use crate::core::logger::{EventLogger, LogEntry, LoggerMode};
    pub use crate::core::registry::{
        ConditionGroup, Generation, Registry, SemaphoreRecord, ThreadRecord,
    };
    pub use crate::core::tracker::{ExitGuard, SpawnTicket};
}

pub mod ffi;
