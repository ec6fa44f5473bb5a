use crate::core::error::OrFatal;
use crate::core::global;
use crate::core::locks::ExternalLock;
use crate::core::tracker::Monitor;
use crate::core::types::CondId;
use std::ops::DerefMut;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A condition variable whose waiters are tracked
///
/// Waiters sleep on a semaphore pair owned by the current generation of the
/// condition variable, so a notified waiter counts as active from the moment
/// it is released until it is blocked again. `notify_one` wakes every waiter;
/// callers must tolerate spurious wakeups anyway.
///
/// Works with any [`ExternalLock`], including `parking_lot::MutexGuard`.
///
/// # Example
///
/// ```no_run
/// use idlewatch::{Condvar, thread};
/// use parking_lot::Mutex;
/// use std::sync::Arc;
///
/// let pair = Arc::new((Mutex::new(false), Condvar::new()));
/// let pair2 = Arc::clone(&pair);
///
/// let waiter = thread::spawn(move || {
///     let (lock, cvar) = &*pair2;
///     let mut started = lock.lock();
///     cvar.wait_while(&mut started, |started| !*started);
/// });
///
/// let (lock, cvar) = &*pair;
/// *lock.lock() = true;
/// cvar.notify_all();
/// waiter.join().unwrap();
/// ```
#[derive(Debug)]
pub struct Condvar {
    monitor: Arc<Monitor>,
    /// Heap slot whose address is the registry identity
    identity: Box<u8>,
}

impl Condvar {
    /// Create a condition variable on the global monitor
    pub fn new() -> Self {
        Self::new_in(global())
    }

    /// Create a condition variable on `monitor`
    pub fn new_in(monitor: &Arc<Monitor>) -> Self {
        let condvar = Condvar {
            monitor: Arc::clone(monitor),
            identity: Box::new(0),
        };
        monitor.condvar_register(condvar.id()).or_fatal();
        condvar
    }

    /// Registry identity of this condition variable
    pub fn id(&self) -> CondId {
        &*self.identity as *const u8 as CondId
    }

    /// Number of threads currently parked on this condition variable
    pub fn waiters(&self) -> usize {
        self.monitor.sleeping_on(self.id()).unwrap_or(0)
    }

    /// Release `guard`, wait for a notification and take `guard` back
    pub fn wait<L: ExternalLock>(&self, guard: &mut L) {
        self.monitor
            .condvar_wait(self.id(), guard, None)
            .or_fatal();
    }

    /// Like [`Condvar::wait`], giving up after `timeout`
    ///
    /// Returns `true` if the timeout elapsed.
    pub fn wait_timeout<L: ExternalLock>(&self, guard: &mut L, timeout: Duration) -> bool {
        self.wait_until(guard, Instant::now() + timeout)
    }

    /// Like [`Condvar::wait`], giving up at `deadline`
    ///
    /// Returns `true` if the deadline passed.
    pub fn wait_until<L: ExternalLock>(&self, guard: &mut L, deadline: Instant) -> bool {
        self.monitor
            .condvar_wait(self.id(), guard, Some(deadline))
            .or_fatal()
            .timed_out()
    }

    /// Wait for as long as `condition` holds
    pub fn wait_while<L, T, F>(&self, guard: &mut L, mut condition: F)
    where
        L: ExternalLock + DerefMut<Target = T>,
        T: ?Sized,
        F: FnMut(&mut T) -> bool,
    {
        while condition(guard.deref_mut()) {
            self.wait(guard);
        }
    }

    /// Wait for as long as `condition` holds, at most `timeout`
    ///
    /// Returns `true` if the timeout elapsed with the condition still holding.
    pub fn wait_timeout_while<L, T, F>(
        &self,
        guard: &mut L,
        timeout: Duration,
        mut condition: F,
    ) -> bool
    where
        L: ExternalLock + DerefMut<Target = T>,
        T: ?Sized,
        F: FnMut(&mut T) -> bool,
    {
        let deadline = Instant::now() + timeout;
        while condition(guard.deref_mut()) {
            if self.wait_until(guard, deadline) {
                return condition(guard.deref_mut());
            }
        }
        false
    }

    /// Wake the waiters of this condition variable
    ///
    /// Every current waiter is released. Returns how many were.
    pub fn notify_one(&self) -> usize {
        self.monitor.condvar_signal(self.id()).or_fatal()
    }

    /// Wake every waiter of this condition variable
    ///
    /// Returns once each released waiter is off the condition variable.
    pub fn notify_all(&self) -> usize {
        self.monitor.condvar_broadcast(self.id()).or_fatal()
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Condvar {
    fn drop(&mut self) {
        self.monitor.condvar_destroy(self.id()).or_fatal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tracker::testing::tracker;
    use parking_lot::Mutex;

    #[test]
    fn test_wait_timeout_while_reports_timeout() {
        let (tracker, _signal) = tracker();
        let monitor = Monitor::new(tracker);
        let cvar = Condvar::new_in(&monitor);
        let lock = Mutex::new(false);

        let mut guard = lock.lock();
        assert!(cvar.wait_timeout_while(&mut guard, Duration::from_millis(10), |ready| !*ready));
        assert_eq!(cvar.waiters(), 0);
    }

    #[test]
    fn test_notify_releases_waiter() {
        let (tracker, _signal) = tracker();
        let monitor = Monitor::new(tracker);
        let pair = Arc::new((Mutex::new(false), Condvar::new_in(&monitor)));

        let waiter = {
            let pair = Arc::clone(&pair);
            std::thread::spawn(move || {
                let (lock, cvar) = &*pair;
                let mut ready = lock.lock();
                cvar.wait_while(&mut ready, |ready| !*ready);
            })
        };

        let (lock, cvar) = &*pair;
        while cvar.waiters() == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        *lock.lock() = true;
        assert_eq!(cvar.notify_one(), 1);
        waiter.join().unwrap();
    }

    #[test]
    fn test_drop_unregisters() {
        let (tracker, _signal) = tracker();
        let monitor = Monitor::new(tracker);
        let cvar = Condvar::new_in(&monitor);
        let id = cvar.id();
        drop(cvar);
        assert!(monitor.sleeping_on(id).is_none());
    }
}
