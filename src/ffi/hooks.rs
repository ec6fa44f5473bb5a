//! The parts of the libc hooks that do not need symbol interposition

use crate::core::registry::SemaphoreRecord;
use fxhash::FxHashMap;
use libc::{c_int, c_uint, clockid_t, pthread_condattr_t, timespec};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// `errno` as the real call left it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Errno(pub(crate) c_int);

impl Errno {
    pub(crate) fn save() -> Self {
        // SAFETY: __errno_location always returns this thread's errno slot.
        Errno(unsafe { *libc::__errno_location() })
    }

    pub(crate) fn restore(self) {
        // SAFETY: as above.
        unsafe { *libc::__errno_location() = self.0 };
    }
}

/// Run a real call, keeping its `errno` for after the bookkeeping
pub(crate) fn keep_errno<R>(call: impl FnOnce() -> R) -> impl FnOnce() -> (R, Errno) {
    move || {
        let result = call();
        (result, Errno::save())
    }
}

/// How a semaphore created by `sem_init` is tracked
///
/// Process-shared semaphores can be posted from outside, like named ones.
pub(crate) fn init_record(pshared: c_int, value: c_uint) -> SemaphoreRecord {
    if pshared != 0 {
        SemaphoreRecord::named()
    } else {
        SemaphoreRecord::unnamed(value as usize)
    }
}

/// Clock for condition timed waits; anything but monotonic means realtime
pub(crate) fn sanitize_clock(clock: clockid_t) -> clockid_t {
    if clock == libc::CLOCK_MONOTONIC {
        clock
    } else {
        libc::CLOCK_REALTIME
    }
}

/// Clock selected by a condition attribute object, realtime for NULL
///
/// # Safety
/// `attr` must be NULL or point to an initialized attribute object.
pub(crate) unsafe fn condattr_clock(attr: *const pthread_condattr_t) -> clockid_t {
    if attr.is_null() {
        return libc::CLOCK_REALTIME;
    }
    let mut clock = libc::CLOCK_REALTIME;
    // SAFETY: non-null and initialized per the caller's contract.
    if unsafe { libc::pthread_condattr_getclock(attr, &mut clock) } != 0 {
        return libc::CLOCK_REALTIME;
    }
    sanitize_clock(clock)
}

lazy_static::lazy_static! {
    /// Condition variables whose timed waits do not use the realtime clock
    static ref COND_CLOCKS: Mutex<FxHashMap<usize, clockid_t>> = Mutex::new(FxHashMap::default());
}

/// Remember the clock timed waits on `cond` are measured against
pub(crate) fn set_cond_clock(cond: usize, clock: clockid_t) {
    let mut clocks = COND_CLOCKS.lock();
    if clock == libc::CLOCK_REALTIME {
        clocks.remove(&cond);
    } else {
        clocks.insert(cond, clock);
    }
}

pub(crate) fn cond_clock(cond: usize) -> clockid_t {
    COND_CLOCKS
        .lock()
        .get(&cond)
        .copied()
        .unwrap_or(libc::CLOCK_REALTIME)
}

pub(crate) fn forget_cond_clock(cond: usize) {
    COND_CLOCKS.lock().remove(&cond);
}

/// Convert an absolute deadline on `clock` to an `Instant`
///
/// Returns `None` for a malformed timespec. A deadline already past maps to
/// now.
pub(crate) fn deadline_on(clock: clockid_t, abstime: &timespec) -> Option<Instant> {
    if !(0..1_000_000_000).contains(&abstime.tv_nsec) || abstime.tv_sec < 0 {
        return None;
    }
    let mut now = timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `now` is a valid out-parameter.
    unsafe { libc::clock_gettime(clock, &mut now) };

    let target = Duration::new(abstime.tv_sec as u64, abstime.tv_nsec as u32);
    let current = Duration::new(
        now.tv_sec.max(0) as u64,
        now.tv_nsec.clamp(0, 999_999_999) as u32,
    );
    Some(Instant::now() + target.saturating_sub(current))
}
