//! Native threads with activity tracking.
//!
//! A drop-in replacement for the parts of `std::thread` that create and join
//! threads. A spawned thread counts as active from the moment `spawn` is
//! called, before the OS thread even exists, until it returns (or unwinds).
//! Joining it is a tracked blocking operation.
//!
//! ## Usage
//!
//! ```no_run
//! use idlewatch::thread;
//!
//! let handle = thread::spawn(|| 42);
//! assert_eq!(handle.join().unwrap(), 42);
//!
//! // The rest of std::thread is re-exported
//! thread::yield_now();
//! ```

use crate::core::error::OrFatal;
use crate::core::global;
use crate::core::tracker::Monitor;
use crate::core::types::ThreadId;
use std::os::unix::thread::JoinHandleExt;
use std::sync::Arc;

pub use std::thread::{
    AccessError, LocalKey, Result, Thread, available_parallelism, current, panicking, park,
    park_timeout, sleep, yield_now,
};

/// Spawns a new tracked thread on the global monitor, returning a
/// [`JoinHandle`] for it.
///
/// # Panics
///
/// Panics if the OS fails to create a thread; use [`Builder::spawn`]
/// to recover from such errors.
pub fn spawn<F, T>(f: F) -> JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Builder::new()
        .spawn(f)
        .unwrap_or_else(|e| panic!("failed to spawn thread: {e}"))
}

/// Thread factory, which can be used in order to configure the properties of a new thread.
///
/// Wraps [`std::thread::Builder`] and additionally lets the caller pick the
/// [`Monitor`] the thread is tracked by.
///
/// # Examples
///
/// ```no_run
/// use idlewatch::{IdleWatch, thread};
///
/// let monitor = IdleWatch::new().state_file("/tmp/worker.idle").build().unwrap();
/// let handle = thread::Builder::new()
///     .name("worker".to_string())
///     .monitor(&monitor)
///     .spawn(|| {})
///     .unwrap();
/// handle.join().unwrap();
/// ```
#[derive(Debug)]
pub struct Builder {
    inner: std::thread::Builder,
    monitor: Option<Arc<Monitor>>,
}

impl Builder {
    /// Generates the base configuration for spawning a thread.
    pub fn new() -> Builder {
        Builder {
            inner: std::thread::Builder::new(),
            monitor: None,
        }
    }

    /// Names the thread-to-be.
    pub fn name(mut self, name: String) -> Builder {
        self.inner = self.inner.name(name);
        self
    }

    /// Sets the size of the stack (in bytes) for the new thread.
    pub fn stack_size(mut self, size: usize) -> Builder {
        self.inner = self.inner.stack_size(size);
        self
    }

    /// Track the thread on `monitor` instead of the global one.
    pub fn monitor(mut self, monitor: &Arc<Monitor>) -> Builder {
        self.monitor = Some(Arc::clone(monitor));
        self
    }

    /// Spawns a new tracked thread by executing the provided closure on it,
    /// returning a [`JoinHandle`] for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread could not be spawned. The pending spawn
    /// is cancelled in that case.
    pub fn spawn<F, T>(self, f: F) -> std::io::Result<JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let monitor = self.monitor.unwrap_or_else(|| Arc::clone(global()));
        let ticket = monitor.begin_spawn().or_fatal();

        // On failure the closure is dropped unrun, and the ticket with it
        let inner = self.inner.spawn(move || {
            let _exit = ticket.attach().or_fatal();
            f()
        })?;

        Ok(JoinHandle { inner, monitor })
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

/// An owned permission to join on a tracked thread
#[derive(Debug)]
pub struct JoinHandle<T> {
    inner: std::thread::JoinHandle<T>,
    monitor: Arc<Monitor>,
}

impl<T> JoinHandle<T> {
    /// Waits for the thread to finish, with the caller marked as blocked.
    pub fn join(self) -> Result<T> {
        let JoinHandle { inner, monitor } = self;
        let target = inner.as_pthread_t() as ThreadId;
        monitor.blocking_join(target, || inner.join()).or_fatal()
    }

    /// Tracker identity of the thread
    pub fn id(&self) -> ThreadId {
        self.inner.as_pthread_t() as ThreadId
    }

    /// Gets the thread's handle.
    pub fn thread(&self) -> &Thread {
        self.inner.thread()
    }

    /// Checks if the associated thread has finished running its main function.
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}
