//! Interposed libc entry points
//!
//! Built into the shared library with the `preload` feature. When the library
//! is loaded through `LD_PRELOAD`, the dynamic linker binds the program's calls
//! to thread creation, joins, socket receives, semaphores and condition
//! variables to the definitions below. Each one does its bookkeeping and
//! forwards to the next definition of the same symbol, found with
//! `dlsym(RTLD_NEXT, ...)`.
//!
//! Condition variables are the exception: they are not forwarded at all but
//! emulated on tracked semaphores, so the real `pthread_cond_t` is never
//! touched.
//!
//! Every hook returns exactly what the real call returned, with the `errno`
//! the real call left behind.

use super::hooks::{
    condattr_clock, cond_clock, deadline_on, forget_cond_clock, init_record, keep_errno,
    set_cond_clock,
};
use crate::core::error::{OrFatal, TrackError, fatal};
use crate::core::locks::ExternalLock;
use crate::core::registry::SemaphoreRecord;
use crate::core::tracker::{ExitGuard, SpawnTicket, WaitOutcome};
use crate::core::types::{SemId, ThreadId, get_current_thread_id};
use crate::core::global;
use libc::{
    c_char, c_int, c_uint, c_void, mode_t, pthread_attr_t, pthread_cond_t, pthread_condattr_t,
    pthread_mutex_t, pthread_t, sem_t, size_t, sockaddr, socklen_t, ssize_t, timespec,
};
use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Resolve the next definition of a libc symbol, once
///
/// A symbol that cannot be resolved is fatal: there is nothing to forward to.
macro_rules! real {
    ($name:ident : $ty:ty) => {{
        static ADDR: AtomicUsize = AtomicUsize::new(0);
        let mut addr = ADDR.load(Ordering::Acquire);
        if addr == 0 {
            // SAFETY: the name is a static NUL-terminated string.
            let sym = unsafe {
                libc::dlsym(
                    libc::RTLD_NEXT,
                    concat!(stringify!($name), "\0").as_ptr().cast::<c_char>(),
                )
            };
            if sym.is_null() {
                fatal(concat!("cannot resolve ", stringify!($name)));
            }
            addr = sym as usize;
            ADDR.store(addr, Ordering::Release);
        }
        // SAFETY: the symbol is the libc function with the signature `$ty`.
        unsafe { std::mem::transmute::<usize, $ty>(addr) }
    }};
}

/// Register the initial thread as soon as the library is loaded
#[used]
#[unsafe(link_section = ".init_array")]
static INIT: extern "C" fn() = init;

/// A hook that ran earlier, from another library's constructor, has already
/// created the monitor and registered its own thread.
extern "C" fn init() {
    global();
}

// ---------------------------------------------------------------------------
// Threads
// ---------------------------------------------------------------------------

type StartRoutine = extern "C" fn(*mut c_void) -> *mut c_void;

struct Trampoline {
    start: StartRoutine,
    arg: *mut c_void,
    ticket: SpawnTicket,
}

thread_local! {
    static EXIT_GUARD: RefCell<Option<ExitGuard>> = const { RefCell::new(None) };
}

extern "C" fn trampoline(data: *mut c_void) -> *mut c_void {
    // SAFETY: `data` is the box leaked by pthread_create below, handed over once.
    let Trampoline { start, arg, ticket } = *unsafe { Box::from_raw(data.cast::<Trampoline>()) };
    let guard = ticket.attach().or_fatal();
    // Dropped by the thread-local destructor, on return and on pthread_exit
    EXIT_GUARD.with(|slot| *slot.borrow_mut() = Some(guard));
    start(arg)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_create(
    thread: *mut pthread_t,
    attr: *const pthread_attr_t,
    start: StartRoutine,
    arg: *mut c_void,
) -> c_int {
    type F = unsafe extern "C" fn(
        *mut pthread_t,
        *const pthread_attr_t,
        StartRoutine,
        *mut c_void,
    ) -> c_int;
    let real = real!(pthread_create: F);

    let ticket = global().begin_spawn().or_fatal();
    let data = Box::into_raw(Box::new(Trampoline { start, arg, ticket }));
    // SAFETY: forwarded unchanged apart from the start routine.
    let rc = unsafe { real(thread, attr, trampoline, data.cast()) };
    if rc != 0 {
        // The thread never started; dropping the ticket cancels the spawn
        // SAFETY: the box was not handed to any thread.
        drop(unsafe { Box::from_raw(data) });
    }
    rc
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_join(thread: pthread_t, retval: *mut *mut c_void) -> c_int {
    type F = unsafe extern "C" fn(pthread_t, *mut *mut c_void) -> c_int;
    let real = real!(pthread_join: F);
    // SAFETY: forwarded unchanged.
    global()
        .blocking_join(thread as ThreadId, || unsafe { real(thread, retval) })
        .or_fatal()
}

// ---------------------------------------------------------------------------
// Sockets
// ---------------------------------------------------------------------------

#[unsafe(no_mangle)]
pub unsafe extern "C" fn accept(
    fd: c_int,
    addr: *mut sockaddr,
    len: *mut socklen_t,
) -> c_int {
    type F = unsafe extern "C" fn(c_int, *mut sockaddr, *mut socklen_t) -> c_int;
    let real = real!(accept: F);
    // SAFETY: forwarded unchanged.
    let (rc, errno) = global()
        .blocking(keep_errno(|| unsafe { real(fd, addr, len) }))
        .or_fatal();
    errno.restore();
    rc
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn recv(fd: c_int, buf: *mut c_void, len: size_t, flags: c_int) -> ssize_t {
    type F = unsafe extern "C" fn(c_int, *mut c_void, size_t, c_int) -> ssize_t;
    let real = real!(recv: F);
    // SAFETY: forwarded unchanged.
    let (rc, errno) = global()
        .blocking(keep_errno(|| unsafe { real(fd, buf, len, flags) }))
        .or_fatal();
    errno.restore();
    rc
}

// ---------------------------------------------------------------------------
// Semaphores
// ---------------------------------------------------------------------------

fn sem_id(sem: *mut sem_t) -> SemId {
    sem as SemId
}

/// `sem_open` is variadic; the mode and initial value are only meaningful
/// (and only forwarded) when `O_CREAT` is set.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sem_open(
    name: *const c_char,
    oflag: c_int,
    mode: mode_t,
    value: c_uint,
) -> *mut sem_t {
    type F = unsafe extern "C" fn(*const c_char, c_int, ...) -> *mut sem_t;
    let real = real!(sem_open: F);

    // SAFETY: forwarded unchanged.
    let (sem, errno) = if oflag & libc::O_CREAT != 0 {
        keep_errno(|| unsafe { real(name, oflag, mode as c_uint, value) })()
    } else {
        keep_errno(|| unsafe { real(name, oflag) })()
    };
    if sem != libc::SEM_FAILED {
        let thread = get_current_thread_id();
        global()
            .with(|tracker| tracker.register_semaphore(thread, sem_id(sem), SemaphoreRecord::named()))
            .or_fatal();
    }
    errno.restore();
    sem
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sem_init(sem: *mut sem_t, pshared: c_int, value: c_uint) -> c_int {
    type F = unsafe extern "C" fn(*mut sem_t, c_int, c_uint) -> c_int;
    let real = real!(sem_init: F);

    // SAFETY: forwarded unchanged.
    let (rc, errno) = keep_errno(|| unsafe { real(sem, pshared, value) })();
    if rc == 0 {
        let record = init_record(pshared, value);
        let thread = get_current_thread_id();
        global()
            .with(|tracker| tracker.register_semaphore(thread, sem_id(sem), record))
            .or_fatal();
    }
    errno.restore();
    rc
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sem_post(sem: *mut sem_t) -> c_int {
    type F = unsafe extern "C" fn(*mut sem_t) -> c_int;
    let real = real!(sem_post: F);
    // SAFETY: forwarded unchanged.
    let (rc, errno) = global()
        .semaphore_post(
            sem_id(sem),
            keep_errno(|| unsafe { real(sem) }),
            |(rc, _)| *rc == 0,
        )
        .or_fatal();
    errno.restore();
    rc
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sem_wait(sem: *mut sem_t) -> c_int {
    type F = unsafe extern "C" fn(*mut sem_t) -> c_int;
    let real = real!(sem_wait: F);
    // SAFETY: forwarded unchanged.
    let (rc, errno) = global()
        .semaphore_wait(
            sem_id(sem),
            keep_errno(|| unsafe { real(sem) }),
            |(rc, _)| *rc == 0,
        )
        .or_fatal();
    errno.restore();
    rc
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sem_timedwait(sem: *mut sem_t, abstime: *const timespec) -> c_int {
    type F = unsafe extern "C" fn(*mut sem_t, *const timespec) -> c_int;
    let real = real!(sem_timedwait: F);
    // SAFETY: forwarded unchanged.
    let (rc, errno) = global()
        .semaphore_wait(
            sem_id(sem),
            keep_errno(|| unsafe { real(sem, abstime) }),
            |(rc, _)| *rc == 0,
        )
        .or_fatal();
    errno.restore();
    rc
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sem_trywait(sem: *mut sem_t) -> c_int {
    type F = unsafe extern "C" fn(*mut sem_t) -> c_int;
    let real = real!(sem_trywait: F);
    // SAFETY: forwarded unchanged.
    let (rc, errno) = global()
        .semaphore_try_wait(
            sem_id(sem),
            keep_errno(|| unsafe { real(sem) }),
            |(rc, _)| *rc == 0,
        )
        .or_fatal();
    errno.restore();
    rc
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sem_destroy(sem: *mut sem_t) -> c_int {
    type F = unsafe extern "C" fn(*mut sem_t) -> c_int;
    let real = real!(sem_destroy: F);

    // Unregister first: once destroyed, the address may be reused at once
    let thread = get_current_thread_id();
    global()
        .with(|tracker| tracker.unregister_semaphore(thread, sem_id(sem)))
        .or_fatal();
    // SAFETY: forwarded unchanged.
    unsafe { real(sem) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sem_close(sem: *mut sem_t) -> c_int {
    type F = unsafe extern "C" fn(*mut sem_t) -> c_int;
    let real = real!(sem_close: F);

    // The same named semaphore may be opened, and closed, more than once
    let thread = get_current_thread_id();
    match global().with(|tracker| tracker.unregister_semaphore(thread, sem_id(sem))) {
        Ok(()) | Err(TrackError::UnknownSemaphore(_)) => {}
        Err(e) => fatal(e),
    }
    // SAFETY: forwarded unchanged.
    unsafe { real(sem) }
}

// ---------------------------------------------------------------------------
// Condition variables
// ---------------------------------------------------------------------------

/// A pthread mutex the caller holds around a condition wait
struct PthreadMutex(*mut pthread_mutex_t);

impl ExternalLock for PthreadMutex {
    fn unlocked<R>(&mut self, f: impl FnOnce() -> R) -> R {
        // SAFETY: the caller of pthread_cond_wait holds this mutex.
        unsafe { libc::pthread_mutex_unlock(self.0) };
        let result = f();
        // SAFETY: the mutex outlives the wait per the pthread contract.
        unsafe { libc::pthread_mutex_lock(self.0) };
        result
    }
}

fn cond_id(cond: *mut pthread_cond_t) -> usize {
    cond as usize
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_cond_init(
    cond: *mut pthread_cond_t,
    attr: *const pthread_condattr_t,
) -> c_int {
    let cond = cond_id(cond);
    global().condvar_register(cond).or_fatal();
    // SAFETY: attr is NULL or initialized per the pthread contract.
    set_cond_clock(cond, unsafe { condattr_clock(attr) });
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_cond_wait(
    cond: *mut pthread_cond_t,
    mutex: *mut pthread_mutex_t,
) -> c_int {
    let monitor = global();
    let cond = cond_id(cond);
    // Statically initialized condition variables never pass through init
    monitor.condvar_ensure(cond).or_fatal();
    monitor
        .condvar_wait(cond, &mut PthreadMutex(mutex), None)
        .or_fatal();
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_cond_timedwait(
    cond: *mut pthread_cond_t,
    mutex: *mut pthread_mutex_t,
    abstime: *const timespec,
) -> c_int {
    let cond = cond_id(cond);
    // SAFETY: a non-null abstime points to a valid timespec per the pthread contract.
    let Some(deadline) =
        (unsafe { abstime.as_ref() }).and_then(|abstime| deadline_on(cond_clock(cond), abstime))
    else {
        return libc::EINVAL;
    };
    let monitor = global();
    monitor.condvar_ensure(cond).or_fatal();
    match monitor
        .condvar_wait(cond, &mut PthreadMutex(mutex), Some(deadline))
        .or_fatal()
    {
        WaitOutcome::Woken => 0,
        WaitOutcome::TimedOut => libc::ETIMEDOUT,
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_cond_signal(cond: *mut pthread_cond_t) -> c_int {
    let monitor = global();
    let cond = cond_id(cond);
    monitor.condvar_ensure(cond).or_fatal();
    monitor.condvar_signal(cond).or_fatal();
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_cond_broadcast(cond: *mut pthread_cond_t) -> c_int {
    let monitor = global();
    let cond = cond_id(cond);
    monitor.condvar_ensure(cond).or_fatal();
    monitor.condvar_broadcast(cond).or_fatal();
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_cond_destroy(cond: *mut pthread_cond_t) -> c_int {
    let monitor = global();
    let cond = cond_id(cond);
    // Never used, never registered
    if monitor.sleeping_on(cond).is_none() {
        return 0;
    }
    monitor.condvar_destroy(cond).or_fatal();
    forget_cond_clock(cond);
    0
}
