//! Real-time scheduling class for measurement threads.

use crate::error::PinError;

/// Moves the calling thread into `SCHED_FIFO` at the class's maximum
/// priority. Returns the priority that was applied.
///
/// Requires `CAP_SYS_NICE` (or a permissive `RLIMIT_RTPRIO`); without it the
/// kernel answers `EPERM`, reported as [`PinError::PermissionDenied`].
#[cfg(target_os = "linux")]
pub fn elevate_to_realtime() -> Result<i32, PinError> {
    // SAFETY: plain syscall wrapper with no pointer arguments.
    let max = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };
    if max < 0 {
        return Err(PinError::from_os(
            "sched_get_priority_max",
            std::io::Error::last_os_error(),
        ));
    }

    // SAFETY: sched_param is plain data; zeroed is valid.
    let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
    param.sched_priority = max;

    // SAFETY: param is initialized; pthread_self() is always valid.
    // Returns the error code directly rather than through errno.
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if rc != 0 {
        return Err(PinError::from_os(
            "pthread_setschedparam",
            std::io::Error::from_raw_os_error(rc),
        ));
    }
    Ok(max)
}

#[cfg(not(target_os = "linux"))]
pub fn elevate_to_realtime() -> Result<i32, PinError> {
    Err(PinError::Unsupported(
        "real-time scheduling is not supported on this platform".into(),
    ))
}

/// Returns the calling thread's scheduling policy (`SCHED_*`).
#[cfg(target_os = "linux")]
pub fn current_policy() -> Result<i32, PinError> {
    let mut policy: libc::c_int = 0;
    // SAFETY: both out-pointers reference valid locals.
    let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::pthread_getschedparam(libc::pthread_self(), &mut policy, &mut param) };
    if rc != 0 {
        return Err(PinError::from_os(
            "pthread_getschedparam",
            std::io::Error::from_raw_os_error(rc),
        ));
    }
    Ok(policy)
}
