use crate::core::error::OrFatal;
use crate::core::global;
use crate::core::locks::raw::RawSemaphore;
use crate::core::registry::SemaphoreRecord;
use crate::core::tracker::Monitor;
use crate::core::types::{SemId, get_current_thread_id};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A counted semaphore whose waiters are tracked
///
/// A thread blocked in [`Semaphore::wait`] counts as idle, unless a post has
/// been made that no wait has consumed yet: such a thread is about to wake up
/// and still counts as active.
///
/// # Example
///
/// ```no_run
/// use idlewatch::{Semaphore, thread};
/// use std::sync::Arc;
///
/// let ready = Arc::new(Semaphore::new(0));
/// let worker = {
///     let ready = Arc::clone(&ready);
///     thread::spawn(move || ready.wait())
/// };
/// ready.post();
/// worker.join().unwrap();
/// ```
#[derive(Debug)]
pub struct Semaphore {
    monitor: Arc<Monitor>,
    raw: Arc<RawSemaphore>,
    named: bool,
}

impl Semaphore {
    /// Create a semaphore with `value` tokens on the global monitor
    pub fn new(value: usize) -> Self {
        Self::new_in(global(), value)
    }

    /// Create a semaphore with `value` tokens on `monitor`
    pub fn new_in(monitor: &Arc<Monitor>, value: usize) -> Self {
        Self::register(monitor, value, SemaphoreRecord::unnamed(value))
    }

    /// Create a semaphore that stands for one shared with other processes
    ///
    /// Posts to it may come from outside, so its waiters never count as
    /// blocked.
    pub fn named_in(monitor: &Arc<Monitor>, value: usize) -> Self {
        Self::register(monitor, value, SemaphoreRecord::named())
    }

    fn register(monitor: &Arc<Monitor>, value: usize, record: SemaphoreRecord) -> Self {
        let raw = Arc::new(RawSemaphore::new(value));
        let sem = Arc::as_ptr(&raw) as SemId;
        monitor
            .with(|tracker| tracker.register_semaphore(get_current_thread_id(), sem, record))
            .or_fatal();
        Semaphore {
            monitor: Arc::clone(monitor),
            raw,
            named: record.named,
        }
    }

    /// Registry identity of this semaphore
    pub fn id(&self) -> SemId {
        Arc::as_ptr(&self.raw) as SemId
    }

    /// Whether this semaphore is treated as shared with other processes
    pub fn is_named(&self) -> bool {
        self.named
    }

    /// Tokens currently available
    pub fn value(&self) -> usize {
        self.raw.value()
    }

    /// Add a token, waking one waiter
    pub fn post(&self) {
        self.monitor
            .semaphore_post(self.id(), || self.raw.post(), |_| true)
            .or_fatal()
    }

    /// Take a token, sleeping until one is available
    pub fn wait(&self) {
        self.monitor
            .semaphore_wait(self.id(), || self.raw.wait(), |_| true)
            .or_fatal()
    }

    /// Take a token, giving up after `timeout`
    ///
    /// Returns `true` if a token was taken.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.monitor
            .semaphore_wait(self.id(), || self.raw.wait_until(deadline), |took| *took)
            .or_fatal()
    }

    /// Take a token if one is available right now
    pub fn try_wait(&self) -> bool {
        self.monitor
            .semaphore_try_wait(self.id(), || self.raw.try_wait(), |took| *took)
            .or_fatal()
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        let sem = self.id();
        self.monitor
            .with(|tracker| tracker.unregister_semaphore(get_current_thread_id(), sem))
            .or_fatal();
    }
}
