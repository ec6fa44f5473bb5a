//! Contract violations and the fatal exit path
//!
//! Every misuse the tracker can detect is a [`TrackError`]. The tracker and
//! the monitor return them so callers (and tests) can see exactly what went
//! wrong; the public convenience layer and the C boundary turn them into
//! [`fatal`], because a silently wrong idle signal is worse than a crash.

use crate::core::types::{CondId, SemId, ThreadId};
use thiserror::Error;

/// Errors raised by tracker operations
#[derive(Debug, Error)]
pub enum TrackError {
    /// The thread was never registered (or has already exited)
    #[error("thread {0:#x} is not tracked")]
    UnknownThread(ThreadId),

    /// The semaphore was never initialized through the tracker
    #[error("semaphore {0:#x} is not tracked")]
    UnknownSemaphore(SemId),

    /// The condition variable was never initialized through the tracker
    #[error("condition variable {0:#x} is not tracked")]
    UnknownCondition(CondId),

    /// Destroying (or re-initializing) a condition variable with parked waiters
    #[error("condition variable {cond:#x} still has {sleeping} waiter(s)")]
    ConditionInUse {
        /// The condition variable
        cond: CondId,
        /// Waiters parked in its current generation
        sleeping: usize,
    },

    /// `enable_forced_idle` on a thread that is already forced idle
    #[error("forced idle is already enabled on thread {0:#x}")]
    ForcedIdleAlreadyEnabled(ThreadId),

    /// `disable_forced_idle` on a thread that is not forced idle
    #[error("forced idle is not enabled on thread {0:#x}")]
    ForcedIdleNotEnabled(ThreadId),

    /// Too many posts from hooks nested in one update, such as signal handlers
    #[error("too many nested posts waiting to be recorded (latest on semaphore {0:#x})")]
    DeferredOverflow(SemId),

    /// The published signal could not be acquired or written
    #[error(transparent)]
    Signal(#[from] anyhow::Error),
}

/// Result alias for tracker operations
pub type TrackResult<T> = Result<T, TrackError>;

/// Report an unrecoverable error and abort the process
///
/// Used wherever a [`TrackError`] reaches a boundary that has no way to
/// report it: the interposed libc symbols, the C API and the infallible
/// Rust-native primitives.
#[cold]
pub fn fatal(err: impl std::fmt::Display) -> ! {
    eprintln!("idlewatch: fatal: {err:#}");
    std::process::abort()
}

/// Unwrap a tracker result or abort with the error
pub(crate) trait OrFatal<T> {
    fn or_fatal(self) -> T;
}

impl<T> OrFatal<T> for TrackResult<T> {
    fn or_fatal(self) -> T {
        self.unwrap_or_else(|e| fatal(e))
    }
}
