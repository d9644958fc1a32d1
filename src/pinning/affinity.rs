//! CPU affinity for low-jitter timing.
//!
//! Pinning a measurement thread to one core removes core-migration noise
//! (TLB flush, cache refill) and keeps the thread on the memory controller
//! the benchmark is meant to exercise.
//!
//! # Platform Support
//!
//! - **Linux**: `pthread_setaffinity_np` / `sched_getaffinity`
//! - **Other**: every operation returns [`PinError::Unsupported`]; pinning
//!   never silently succeeds, since that would mislead benchmark results.
//!
//! # Container/Cgroup Awareness
//!
//! A containerized process may only run on a subset of host CPUs. Use
//! [`allowed_cpus`] to discover the usable cores instead of assuming
//! `0..num_cpus`.

use crate::error::PinError;

/// Maximum number of CPUs representable in an affinity mask.
///
/// This is `CPU_SETSIZE` on Linux (typically 1024). Core indices must be
/// below it; `CPU_SET` with a larger index is undefined behavior.
#[cfg(target_os = "linux")]
pub const CPU_SET_CAPACITY: usize = std::mem::size_of::<libc::cpu_set_t>() * 8;

#[cfg(not(target_os = "linux"))]
pub const CPU_SET_CAPACITY: usize = 1024;

#[inline]
fn validate_core(core: usize) -> Result<(), PinError> {
    if core >= CPU_SET_CAPACITY {
        return Err(PinError::InvalidCore {
            core,
            capacity: CPU_SET_CAPACITY,
        });
    }
    Ok(())
}

/// Pins the calling thread to a single core.
///
/// # Errors
///
/// - [`PinError::InvalidCore`] if `core >= CPU_SET_CAPACITY`
/// - [`PinError::PermissionDenied`] / [`PinError::Os`] if the kernel rejects
///   the mask (for example, the core is outside the cgroup's cpuset)
/// - [`PinError::Unsupported`] off Linux
pub fn pin_current_thread_to_core(core: usize) -> Result<(), PinError> {
    let mut set = CpuSet::new();
    set.set(core)?;
    set.apply()
}

/// Returns the set of CPUs the calling thread may run on.
///
/// Respects cgroups, cpusets, and `taskset`.
#[cfg(target_os = "linux")]
pub fn allowed_cpus() -> Result<CpuSet, PinError> {
    let mut set = CpuSet::new();

    // SAFETY: pid 0 queries the calling thread; the mask is a valid,
    // correctly sized cpu_set_t.
    let rc = unsafe {
        libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set.inner)
    };
    if rc != 0 {
        return Err(PinError::from_os(
            "sched_getaffinity",
            std::io::Error::last_os_error(),
        ));
    }
    Ok(set)
}

#[cfg(not(target_os = "linux"))]
pub fn allowed_cpus() -> Result<CpuSet, PinError> {
    Err(PinError::Unsupported(
        "CPU affinity is not supported on this platform".into(),
    ))
}

/// Returns the first CPU in the allowed set, if any.
pub fn first_allowed_cpu() -> Option<usize> {
    allowed_cpus().ok()?.iter().next()
}

/// Parses a kernel CPU list such as `0-3,8,10-11` into a [`CpuSet`].
///
/// This is the format of `/sys/devices/system/node/nodeN/cpulist`.
pub fn parse_cpu_list(list: &str) -> Result<CpuSet, PinError> {
    let mut set = CpuSet::new();
    for part in list.trim().split(',').filter(|p| !p.is_empty()) {
        let bad = || PinError::Unsupported(format!("malformed cpu list entry '{part}'"));
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: usize = lo.trim().parse().map_err(|_| bad())?;
                let hi: usize = hi.trim().parse().map_err(|_| bad())?;
                if lo > hi {
                    return Err(bad());
                }
                for core in lo..=hi {
                    set.set(core)?;
                }
            }
            None => set.set(part.trim().parse().map_err(|_| bad())?)?,
        }
    }
    Ok(set)
}

// ============================================================================
// CpuSet
// ============================================================================

/// CPU affinity mask.
///
/// On Linux, wraps `cpu_set_t`. Elsewhere it tracks cores in a plain bitmap
/// so parsing and set algebra still work, but [`CpuSet::apply`] fails.
#[derive(Clone)]
pub struct CpuSet {
    #[cfg(target_os = "linux")]
    inner: libc::cpu_set_t,

    #[cfg(not(target_os = "linux"))]
    bits: Vec<u64>,
}

impl CpuSet {
    /// Creates an empty CPU set.
    pub fn new() -> Self {
        #[cfg(target_os = "linux")]
        {
            // SAFETY: an all-zero cpu_set_t is valid; CPU_ZERO makes the
            // intent explicit.
            let mut inner: libc::cpu_set_t = unsafe { std::mem::zeroed() };
            unsafe { libc::CPU_ZERO(&mut inner) };
            Self { inner }
        }
        #[cfg(not(target_os = "linux"))]
        {
            Self {
                bits: vec![0; CPU_SET_CAPACITY / 64],
            }
        }
    }

    /// Adds a core to the set.
    pub fn set(&mut self, core: usize) -> Result<(), PinError> {
        validate_core(core)?;
        #[cfg(target_os = "linux")]
        {
            // SAFETY: core was bounds-checked above.
            unsafe { libc::CPU_SET(core, &mut self.inner) };
        }
        #[cfg(not(target_os = "linux"))]
        {
            self.bits[core / 64] |= 1u64 << (core % 64);
        }
        Ok(())
    }

    /// Checks membership. Out-of-range cores are never members.
    pub fn is_set(&self, core: usize) -> bool {
        if core >= CPU_SET_CAPACITY {
            return false;
        }
        #[cfg(target_os = "linux")]
        {
            // SAFETY: core was bounds-checked above.
            unsafe { libc::CPU_ISSET(core, &self.inner) }
        }
        #[cfg(not(target_os = "linux"))]
        {
            self.bits[core / 64] & (1u64 << (core % 64)) != 0
        }
    }

    /// Number of cores in the set.
    pub fn count(&self) -> usize {
        self.iter().count()
    }

    /// Cores present in both sets.
    pub fn intersect(&self, other: &CpuSet) -> CpuSet {
        let mut out = CpuSet::new();
        for core in self.iter().filter(|&c| other.is_set(c)) {
            // Cores from iter() are always in range.
            let _ = out.set(core);
        }
        out
    }

    /// Iterates the member cores in ascending order.
    ///
    /// O(CPU_SET_CAPACITY): always scans the full mask.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..CPU_SET_CAPACITY).filter(move |&core| self.is_set(core))
    }

    /// Restricts the calling thread to this set.
    #[cfg(target_os = "linux")]
    pub fn apply(&self) -> Result<(), PinError> {
        if self.count() == 0 {
            return Err(PinError::Unsupported("empty CPU set".into()));
        }
        // SAFETY: the mask is a valid cpu_set_t of the size we pass.
        // pthread_setaffinity_np returns the error code instead of errno.
        let rc = unsafe {
            libc::pthread_setaffinity_np(
                libc::pthread_self(),
                std::mem::size_of::<libc::cpu_set_t>(),
                &self.inner,
            )
        };
        if rc != 0 {
            return Err(PinError::from_os(
                "pthread_setaffinity_np",
                std::io::Error::from_raw_os_error(rc),
            ));
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    pub fn apply(&self) -> Result<(), PinError> {
        Err(PinError::Unsupported(
            "CPU affinity is not supported on this platform".into(),
        ))
    }
}

impl Default for CpuSet {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CpuSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
