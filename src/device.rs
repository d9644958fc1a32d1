//! Uncached block reads from a device or file.
//!
//! # Purpose
//!
//! Measures what the device delivers, not what the page cache delivers. The
//! file is opened with `O_DIRECT` and read sequentially from offset 0 with
//! positional reads into one reusable 4 KiB-aligned buffer; every block is
//! reduced as it arrives so the bytes are really touched.
//!
//! # Invariants
//!
//! - Buffer address, transfer size, and every file offset are multiples of
//!   [`DIRECT_IO_ALIGN`] while reading directly. The buffer and transfer size
//!   are checked in [`DeviceReader::new`]; offsets stay aligned because the
//!   loop stops at the first short read.
//! - The timed region covers only the read loop. Open, allocation, and close
//!   happen outside it.
//! - A short read ends the trial. With a fixed `block_count` the trial is
//!   marked `truncated`; in read-to-EOF mode it is the normal end.
//!
//! # Fallback
//!
//! Filesystems without direct-I/O support reject `O_DIRECT` with
//! `EINVAL`/`EOPNOTSUPP` at open (or at the first read). Under
//! [`DirectIo::Preferred`] the reader reopens buffered and logs a warning;
//! under [`DirectIo::Required`] the device fails.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, warn};

use crate::aligned::{AlignedBuffer, DIRECT_IO_ALIGN};
use crate::config::{BenchmarkConfig, DirectIo, SetupPolicy};
use crate::error::ReadError;
use crate::probe::TrialResult;
use crate::reduce::VectorizedReducer;
use crate::rusage::rusage_thread;

/// Sequential block reader for one device. Owned by exactly one worker.
#[derive(Debug)]
pub struct DeviceReader {
    device_id: usize,
    path: PathBuf,
    block_size: usize,
    block_count: u64,
    direct_io: DirectIo,
    buffer: AlignedBuffer,
    reducer: VectorizedReducer,
}

impl DeviceReader {
    /// Validates the transfer geometry and allocates the read buffer.
    ///
    /// No file is opened here. A `block_size` that is not a multiple of
    /// [`DIRECT_IO_ALIGN`] fails with `AlignmentViolation` unless direct I/O
    /// is disabled.
    ///
    /// With `lock_memory` set, the buffer is locked resident before any
    /// trial. A refused lock fails the reader under [`SetupPolicy::Required`]
    /// and is only logged otherwise.
    pub fn new(
        device_id: usize,
        path: impl Into<PathBuf>,
        config: &BenchmarkConfig,
    ) -> Result<Self, ReadError> {
        let path = path.into();
        if config.direct_io != DirectIo::Disabled && !config.block_size_is_direct_aligned() {
            return Err(ReadError::AlignmentViolation {
                what: "block size",
                value: config.block_size as u64,
                alignment: DIRECT_IO_ALIGN,
            });
        }
        if config.block_size == 0 {
            return Err(ReadError::AlignmentViolation {
                what: "block size",
                value: 0,
                alignment: DIRECT_IO_ALIGN,
            });
        }

        let mut buffer = AlignedBuffer::for_direct_io(config.block_size)?;
        if config.lock_memory {
            if let Err(err) = buffer.lock() {
                if config.setup_policy == SetupPolicy::Required {
                    return Err(err.into());
                }
                warn!(device = device_id, error = %err, "mlock failed; read buffer may be swapped");
            }
        }
        Ok(Self {
            device_id,
            path,
            block_size: config.block_size,
            block_count: config.block_count,
            direct_io: config.direct_io,
            buffer,
            reducer: VectorizedReducer::new(),
        })
    }

    /// One-shot convenience: build a reader and run a single trial.
    pub fn run(
        device_id: usize,
        path: impl Into<PathBuf>,
        config: &BenchmarkConfig,
    ) -> Result<TrialResult, ReadError> {
        Self::new(device_id, path, config)?.run_trial(0)
    }

    pub fn device_id(&self) -> usize {
        self.device_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Whether the read buffer is locked resident.
    pub fn is_buffer_locked(&self) -> bool {
        self.buffer.is_locked()
    }

    /// Reads `block_count` blocks (or to EOF) from offset 0 and reduces them.
    ///
    /// The file is reopened for every trial so each starts from a cold
    /// descriptor.
    pub fn run_trial(&mut self, trial: u32) -> Result<TrialResult, ReadError> {
        let (mut file, mut direct) = self.open()?;

        let mut offset = 0u64;
        let mut blocks = 0u64;
        let mut checksum = 0u64;
        let mut truncated = false;

        let mut usage_before = rusage_thread();
        let mut start = Instant::now();

        while self.block_count == 0 || blocks < self.block_count {
            let buf = self.buffer.as_mut_slice();
            let n = match file.read_at(buf, offset) {
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err)
                    if direct
                        && offset == 0
                        && self.direct_io == DirectIo::Preferred
                        && is_direct_unsupported(&err) =>
                {
                    warn!(
                        device = self.device_id,
                        path = %self.path.display(),
                        error = %err,
                        "direct read rejected; reopening buffered"
                    );
                    file = open_buffered(&self.path)?;
                    direct = false;
                    usage_before = rusage_thread();
                    start = Instant::now();
                    continue;
                }
                Err(err) => return Err(map_read_error(err, offset, direct)),
            };

            checksum = checksum.wrapping_add(self.reducer.reduce(&buf[..n]));
            offset += n as u64;

            if n < self.block_size {
                if self.block_count != 0 {
                    truncated = true;
                    warn!(
                        device = self.device_id,
                        trial,
                        requested = self.block_size,
                        got = n,
                        offset,
                        "short read; ending trial early"
                    );
                }
                break;
            }
            blocks += 1;
        }

        let elapsed = start.elapsed();
        let cpu_time = rusage_thread().since(&usage_before).total_cpu_time();
        drop(file);

        let result = TrialResult {
            device_id: self.device_id,
            trial,
            elapsed,
            bytes_moved: offset,
            checksum,
            truncated,
            cpu_time,
        };
        debug!(
            device = self.device_id,
            trial,
            direct,
            bytes = result.bytes_moved,
            gbps = result.bandwidth_gbps(),
            checksum,
            "device trial complete"
        );
        Ok(result)
    }

    /// Opens the target per the direct-I/O policy. Returns the file and
    /// whether it is open for direct reads.
    fn open(&self) -> Result<(File, bool), ReadError> {
        if self.direct_io == DirectIo::Disabled {
            return Ok((open_buffered(&self.path)?, false));
        }
        match open_direct(&self.path) {
            Ok(file) => Ok((file, true)),
            Err(err) if self.direct_io == DirectIo::Preferred && is_direct_unsupported(&err) => {
                warn!(
                    device = self.device_id,
                    path = %self.path.display(),
                    error = %err,
                    "O_DIRECT unsupported; falling back to buffered reads"
                );
                Ok((open_buffered(&self.path)?, false))
            }
            Err(source) => Err(ReadError::Open {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

fn open_buffered(path: &Path) -> Result<File, ReadError> {
    File::open(path).map_err(|source| ReadError::Open {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(target_os = "linux")]
fn open_direct(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECT | libc::O_CLOEXEC)
        .open(path)
}

#[cfg(not(target_os = "linux"))]
fn open_direct(_path: &Path) -> io::Result<File> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "O_DIRECT requires Linux",
    ))
}

fn is_direct_unsupported(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::Unsupported
        || matches!(
            err.raw_os_error(),
            Some(libc::EINVAL) | Some(libc::EOPNOTSUPP) | Some(libc::ENOTTY)
        )
}

/// `EINVAL` from a direct read means the kernel rejected the buffer, size,
/// or offset alignment.
fn map_read_error(err: io::Error, offset: u64, direct: bool) -> ReadError {
    if direct && err.raw_os_error() == Some(libc::EINVAL) {
        return ReadError::AlignmentViolation {
            what: "direct read at offset",
            value: offset,
            alignment: DIRECT_IO_ALIGN,
        };
    }
    ReadError::IoFailure {
        offset,
        errno: err.raw_os_error(),
        source: err,
    }
}
