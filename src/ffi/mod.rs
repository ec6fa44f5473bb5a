/// FFI bindings for the idlewatch C API
///
/// Lets C and C++ programs that link against idlewatch directly (rather than
/// preloading it) start the tracker, register their threads, declare forced
/// idle sections and read the state back. Contract violations abort the
/// process, exactly as they do through the Rust API.
use crate::core::error::{OrFatal, fatal};
use crate::core::types::get_current_thread_id;
use crate::core::{IdleWatch, global, try_global};
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_ulong, c_ulonglong};

#[cfg(target_os = "linux")]
#[cfg_attr(not(feature = "preload"), allow(dead_code))]
mod hooks;
#[cfg(all(feature = "preload", target_os = "linux"))]
mod shim;

/// Initialize idlewatch.
///
/// Starts the process-wide tracker and registers the calling thread. Must be
/// called before any other idlewatch function, from the thread that is
/// considered the initial thread of the program.
///
/// # Arguments
/// * `state_file` - Path of the state file as a null-terminated C string, or
///   NULL to use `IDLEWATCH_STATEFILE` (default `.idlewatch_state`).
/// * `verbose` - Nonzero to log every event to stderr.
///
/// # Returns
/// * `0` on success
/// * `1` if idlewatch is already initialized
/// * `-1` if the path contains invalid UTF-8
/// * `-2` if the state file could not be created or locked
///
/// # Safety
/// `state_file` must be NULL or point to a valid null-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn idlewatch_init(state_file: *const c_char, verbose: c_int) -> c_int {
    if try_global().is_some() {
        return 1;
    }

    let mut builder = IdleWatch::from_env();
    if !state_file.is_null() {
        // SAFETY: non-null, and valid per the caller's contract.
        match unsafe { CStr::from_ptr(state_file) }.to_str() {
            Ok(path) => builder = builder.state_file(path),
            Err(_) => return -1,
        }
    }
    if verbose != 0 {
        builder = builder.verbose(true);
    }

    match builder.start() {
        Ok(_) => 0,
        Err(_) if try_global().is_some() => 1,
        Err(_) => -2,
    }
}

/// Register the calling thread.
///
/// For threads created without going through idlewatch. Such a thread counts
/// as active from now on until [`idlewatch_unregister_thread`].
#[unsafe(no_mangle)]
pub extern "C" fn idlewatch_register_thread() {
    global().register_current_thread().or_fatal()
}

/// Unregister the calling thread, typically right before it exits.
#[unsafe(no_mangle)]
pub extern "C" fn idlewatch_unregister_thread() {
    let thread = get_current_thread_id();
    global()
        .with(|tracker| tracker.exit_thread(thread))
        .or_fatal()
}

/// Declare the calling thread idle until [`idlewatch_disable_forced_idle`].
///
/// Aborts if the thread is not tracked or is already forced idle.
#[unsafe(no_mangle)]
pub extern "C" fn idlewatch_enable_forced_idle() {
    global().enable_forced_idle().or_fatal()
}

/// Lift forced idle on the calling thread.
///
/// Aborts if the thread is not forced idle.
#[unsafe(no_mangle)]
pub extern "C" fn idlewatch_disable_forced_idle() {
    global().disable_forced_idle().or_fatal()
}

/// Check whether the process currently publishes idle.
///
/// # Returns
/// * `1` if idle
/// * `0` if busy
/// * `-1` if idlewatch is not initialized
#[unsafe(no_mangle)]
pub extern "C" fn idlewatch_is_idle() -> c_int {
    match try_global() {
        Some(monitor) => monitor.is_idle() as c_int,
        None => -1,
    }
}

/// Number of busy to idle transitions so far, 0 if not initialized.
#[unsafe(no_mangle)]
pub extern "C" fn idlewatch_times_idle() -> c_ulonglong {
    try_global().map_or(0, |monitor| monitor.times_idle())
}

/// Get the idlewatch identity of the calling thread.
#[unsafe(no_mangle)]
pub extern "C" fn idlewatch_get_thread_id() -> c_ulong {
    get_current_thread_id() as c_ulong
}

/// Get the current tracker state as a JSON string.
///
/// # Returns
/// A string to be released with [`idlewatch_free_string`], or NULL if
/// idlewatch is not initialized.
#[unsafe(no_mangle)]
pub extern "C" fn idlewatch_snapshot_json() -> *mut c_char {
    let Some(monitor) = try_global() else {
        return std::ptr::null_mut();
    };
    let json = serde_json::to_string(&monitor.snapshot()).unwrap_or_else(|e| fatal(e));
    match CString::new(json) {
        Ok(json) => json.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Release a string returned by idlewatch.
///
/// # Safety
/// `s` must be NULL or a pointer returned by [`idlewatch_snapshot_json`] that
/// has not been freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn idlewatch_free_string(s: *mut c_char) {
    if !s.is_null() {
        // SAFETY: allocated by CString::into_raw per the caller's contract.
        drop(unsafe { CString::from_raw(s) });
    }
}
