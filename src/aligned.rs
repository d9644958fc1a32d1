//! Owned, aligned, optionally resident byte buffers.
//!
//! # Invariants
//! - The base address is a multiple of the requested alignment for the
//!   buffer's whole lifetime (the allocation never moves or grows).
//! - Each buffer owns exactly one allocation, released exactly once: by an
//!   explicit [`AlignedBuffer::release`] or by `Drop`, whichever comes first.
//! - A locked buffer is unlocked before it is freed.
//!
//! # Alignment classes
//! - [`SIMD_ALIGN`] (64): one cache line, the widest vector load.
//! - [`DIRECT_IO_ALIGN`] (4096): buffer, length, and offset granularity for
//!   `O_DIRECT` reads.
//!
//! # Failure modes
//! Invalid alignments, allocator failure, and `mlock` refusal are reported
//! through [`AllocError`]; nothing here panics on bad input.

use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;
use std::slice;

use crate::error::AllocError;

/// Alignment for vectorized memory scans (one cache line).
pub const SIMD_ALIGN: usize = 64;

/// Alignment for direct (page-cache bypassing) I/O.
///
/// Most block devices accept 512-byte granularity, but 4 KiB covers every
/// logical block size in common use.
pub const DIRECT_IO_ALIGN: usize = 4096;

/// An owned, aligned byte region.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
    locked: bool,
    released: bool,
}

// SAFETY: the buffer exclusively owns its allocation; moving it between
// threads moves that ownership.
unsafe impl Send for AlignedBuffer {}
// SAFETY: shared access only hands out `&[u8]`.
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocates `size` bytes aligned to `alignment`, zero-filled.
    ///
    /// `size == 0` yields a valid empty buffer (backed by a one-byte
    /// allocation so the address is still aligned).
    ///
    /// # Errors
    /// - `AlignmentUnavailable` if `alignment` is not a power of two or the
    ///   rounded size overflows `isize::MAX`.
    /// - `OutOfMemory` if the allocator returns null.
    pub fn allocate(size: usize, alignment: usize) -> Result<Self, AllocError> {
        let layout = Layout::from_size_align(size.max(1), alignment)
            .map_err(|_| AllocError::AlignmentUnavailable { size, alignment })?;

        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc(layout) };
        let ptr = NonNull::new(raw).ok_or(AllocError::OutOfMemory { size })?;

        // Touch every page now so first-fault cost (and NUMA placement) is
        // settled before any timed pass.
        // SAFETY: ptr is valid for layout.size() bytes.
        unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0, layout.size()) };

        debug_assert!((ptr.as_ptr() as usize).is_multiple_of(alignment));
        Ok(Self {
            ptr,
            len: size,
            layout,
            locked: false,
            released: false,
        })
    }

    /// Allocates a buffer suitable for direct I/O transfers of `size` bytes.
    pub fn for_direct_io(size: usize) -> Result<Self, AllocError> {
        Self::allocate(size, DIRECT_IO_ALIGN)
    }

    /// Pins the buffer's pages in physical memory until release.
    ///
    /// Idempotent. Empty buffers have nothing to lock.
    ///
    /// # Errors
    /// `LockFailed` when the kernel refuses (`RLIMIT_MEMLOCK`, privilege).
    #[cfg(unix)]
    pub fn lock(&mut self) -> Result<(), AllocError> {
        if self.locked || self.len == 0 {
            return Ok(());
        }
        // SAFETY: the range is exactly our live allocation.
        let rc = unsafe { libc::mlock(self.ptr.as_ptr().cast(), self.len) };
        if rc != 0 {
            return Err(AllocError::LockFailed {
                size: self.len,
                source: std::io::Error::last_os_error(),
            });
        }
        self.locked = true;
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn lock(&mut self) -> Result<(), AllocError> {
        Err(AllocError::LockFailed {
            size: self.len,
            source: std::io::Error::new(std::io::ErrorKind::Unsupported, "mlock unavailable"),
        })
    }

    /// Whether the pages are currently locked resident.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Unlocks and frees the allocation. Safe to call more than once; later
    /// calls (and the eventual `Drop`) do nothing.
    ///
    /// After release the buffer reads as empty.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        #[cfg(unix)]
        {
            if self.locked {
                // SAFETY: same range that was locked. On failure the pages
                // stay locked until freed.
                unsafe { libc::munlock(self.ptr.as_ptr().cast(), self.len) };
            }
        }
        self.locked = false;

        // SAFETY: ptr/layout came from alloc() and have not been freed.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
        self.len = 0;
    }

    /// Whether [`release`](Self::release) has run.
    pub fn is_released(&self) -> bool {
        self.released
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Alignment the base address is guaranteed to satisfy.
    #[inline]
    pub fn alignment(&self) -> usize {
        self.layout.align()
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid and initialized for len bytes (len is 0 once
        // released, and a zero-length slice from a non-null pointer is fine).
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self guarantees exclusivity.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("len", &self.len)
            .field("alignment", &self.layout.align())
            .field("locked", &self.locked)
            .field("released", &self.released)
            .finish()
    }
}
