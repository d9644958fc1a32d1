//! Per-thread CPU usage around timed loops.
//!
//! # Purpose
//!
//! A trial's wall time alone cannot tell a device stall from a CPU-bound
//! reduction. Pairing it with the worker thread's own user/system time does:
//! an I/O-bound device trial shows CPU time well below wall time, a DRAM scan
//! shows them nearly equal.
//!
//! # Semantics
//!
//! - **Thread scope**: on Linux, `getrusage(RUSAGE_THREAD)` counts only the
//!   calling worker, so concurrent sibling devices do not pollute each
//!   other's numbers. Other Unix targets fall back to `RUSAGE_SELF`
//!   (process-wide; only meaningful for single-device runs).
//! - **Syscall cost**: ~200ns. Sample at trial boundaries, never per block.
//!
//! # Usage
//!
//! ```rust,ignore
//! let before = rusage_thread();
//! // ... timed loop ...
//! let cpu = rusage_thread().since(&before);
//! ```

use std::time::Duration;

/// CPU time snapshot for the calling thread.
///
/// Best-effort: if `getrusage` fails, all fields are zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ThreadUsage {
    /// Time spent executing in user mode.
    pub user_time: Duration,
    /// Time spent executing in kernel mode (syscalls, page faults, I/O
    /// submission).
    pub sys_time: Duration,
}

impl ThreadUsage {
    /// Total CPU time (user + system).
    #[inline]
    pub fn total_cpu_time(&self) -> Duration {
        self.user_time.saturating_add(self.sys_time)
    }

    /// Usage accumulated since an earlier snapshot. Saturates at zero.
    #[inline]
    pub fn since(&self, earlier: &ThreadUsage) -> ThreadUsage {
        ThreadUsage {
            user_time: self.user_time.saturating_sub(earlier.user_time),
            sys_time: self.sys_time.saturating_sub(earlier.sys_time),
        }
    }
}

/// Converts a `libc::timeval` to `Duration`, clamping invalid fields.
#[cfg(unix)]
#[inline]
fn timeval_to_duration(tv: libc::timeval) -> Duration {
    let secs = if tv.tv_sec < 0 { 0 } else { tv.tv_sec as u64 };
    // POSIX specifies tv_usec in [0, 999_999].
    let usec = tv.tv_usec.clamp(0, 999_999) as u64;
    Duration::from_secs(secs) + Duration::from_micros(usec)
}

#[cfg(target_os = "linux")]
const RUSAGE_WHO: libc::c_int = libc::RUSAGE_THREAD;

#[cfg(all(unix, not(target_os = "linux")))]
const RUSAGE_WHO: libc::c_int = libc::RUSAGE_SELF;

/// Returns CPU usage of the calling thread.
#[cfg(unix)]
pub fn rusage_thread() -> ThreadUsage {
    // SAFETY: zeroed rusage is valid; the error return is handled.
    unsafe {
        let mut ru: libc::rusage = std::mem::zeroed();
        if libc::getrusage(RUSAGE_WHO, &mut ru) != 0 {
            return ThreadUsage::default();
        }
        ThreadUsage {
            user_time: timeval_to_duration(ru.ru_utime),
            sys_time: timeval_to_duration(ru.ru_stime),
        }
    }
}

#[cfg(not(unix))]
pub fn rusage_thread() -> ThreadUsage {
    ThreadUsage::default()
}

impl std::fmt::Display for ThreadUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "user={:.3}s sys={:.3}s",
            self.user_time.as_secs_f64(),
            self.sys_time.as_secs_f64()
        )
    }
}
