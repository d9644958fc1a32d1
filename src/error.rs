//! Error types for each harness stage.
//!
//! Errors are stage-specific so a failure names the layer that produced it:
//! thread placement ([`PinError`]), buffer allocation ([`AllocError`]),
//! device reads ([`ReadError`]), a single device's measurement
//! ([`DeviceError`]), and the run as a whole ([`BenchError`]).
//!
//! All enums are `#[non_exhaustive]`; consumers should include a fallback
//! match arm.
//!
//! # Propagation
//! - `PinError`, `AllocError` and `ReadError` are wrapped into a
//!   `DeviceError` and stay local to the device that produced them.
//! - Only `BenchError` aborts a run, and only before device work starts.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure to place the calling thread on a core, NUMA node, or scheduling
/// class.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PinError {
    /// The platform (or this machine) lacks the requested control.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// The process lacks the privilege for the requested control.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The core index is outside the affinity mask capacity.
    #[error("core index {core} exceeds CPU set capacity ({capacity})")]
    InvalidCore { core: usize, capacity: usize },
    /// Any other OS failure.
    #[error("{what}: {source}")]
    Os {
        what: &'static str,
        #[source]
        source: io::Error,
    },
}

impl PinError {
    /// Maps an OS error from `what` onto the pinning taxonomy.
    pub fn from_os(what: &'static str, err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::EPERM) | Some(libc::EACCES) => {
                Self::PermissionDenied(format!("{what}: {err}"))
            }
            Some(libc::ENOSYS) | Some(libc::EOPNOTSUPP) => {
                Self::Unsupported(format!("{what}: {err}"))
            }
            _ => Self::Os { what, source: err },
        }
    }
}

/// Failure to obtain an aligned (and optionally resident) buffer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AllocError {
    /// The allocator returned null.
    #[error("out of memory allocating {size} bytes")]
    OutOfMemory { size: usize },
    /// Alignment is zero, not a power of two, or the layout overflows.
    #[error("alignment {alignment} unavailable for {size} bytes")]
    AlignmentUnavailable { size: usize, alignment: usize },
    /// `mlock` refused to pin the pages (RLIMIT_MEMLOCK or privilege).
    #[error("failed to lock {size} bytes resident: {source}")]
    LockFailed {
        size: usize,
        #[source]
        source: io::Error,
    },
}

/// Failure while reading from a device or file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReadError {
    /// Opening the device failed.
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// A buffer address, transfer size, or offset is not a multiple of the
    /// direct-I/O alignment.
    #[error("{what} {value} is not a multiple of the direct-I/O alignment {alignment}")]
    AlignmentViolation {
        what: &'static str,
        value: u64,
        alignment: usize,
    },
    /// The device rejected a read.
    #[error("read failed at offset {offset} (errno {errno:?}): {source}")]
    IoFailure {
        offset: u64,
        errno: Option<i32>,
        #[source]
        source: io::Error,
    },
    /// The read buffer could not be allocated.
    #[error(transparent)]
    Alloc(#[from] AllocError),
}

/// Failure of one device's measurement. Never propagates to siblings.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DeviceError {
    /// Required thread placement failed.
    #[error("setup: {0}")]
    Setup(#[from] PinError),
    /// Buffer allocation or locking failed.
    #[error("allocation: {0}")]
    Alloc(#[from] AllocError),
    /// Reading the device failed.
    #[error("read: {0}")]
    Read(#[from] ReadError),
    /// The reduction did not match the pattern's analytic checksum.
    #[error(
        "checksum mismatch on trial {trial}: expected {expected}, observed {observed} \
         over {bytes} bytes"
    )]
    ChecksumMismatch {
        trial: u32,
        bytes: u64,
        expected: u64,
        observed: u64,
    },
    /// The worker thread panicked; its result is lost.
    #[error("worker thread panicked")]
    WorkerPanicked,
    /// The run was aborted before this device started.
    #[error("run aborted before start")]
    Aborted,
}

/// Run-level failure; aborts before any device work starts.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BenchError {
    /// The configuration or device list is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A mandatory setup step failed on a worker.
    #[error("mandatory setup failed for device {device}: {source}")]
    Setup {
        device: usize,
        #[source]
        source: PinError,
    },
    /// A worker thread could not be spawned.
    #[error("failed to spawn worker for device {device}: {source}")]
    Spawn {
        device: usize,
        #[source]
        source: io::Error,
    },
}
