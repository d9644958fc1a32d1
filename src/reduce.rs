//! Vectorized byte-sum reduction.
//!
//! # Purpose
//!
//! The reduction is both the work being timed and the integrity oracle: it
//! forces every loaded byte through an ALU (so the scan cannot be elided),
//! and its result must equal the pattern's analytic checksum.
//!
//! # Semantics
//!
//! `reduce(buf) = Σ buf[i] as u64`, each byte zero-extended, accumulated
//! with wrapping 64-bit addition. Every backend computes exactly this:
//!
//! - Lanes are summed with SAD against zero (`psadbw`): each 8-byte group
//!   becomes one 64-bit partial sum of unsigned bytes. The 64-bit
//!   accumulators cannot overflow for any buffer that fits in memory.
//! - NEON widens u8 → u16 → u32 → u64 pairwise within each 64-byte block,
//!   flushing into 64-bit lanes every block.
//! - The tail shorter than one lane is summed with scalar code using the
//!   same zero-extension, so `reduce(a) + reduce(b) == reduce(a ++ b)` for
//!   every split point.
//!
//! # Backends
//!
//! | Backend  | Lane width | Selection |
//! |----------|------------|-----------|
//! | AVX-512BW | 64 | runtime detection (x86_64) |
//! | AVX2     | 32 | runtime detection (x86_64) |
//! | SSE2     | 16 | baseline on x86_64 |
//! | NEON     | 16 | baseline on aarch64 |
//! | Scalar   | 1  | everywhere |
//!
//! # Prefetch
//!
//! With prefetch enabled, each unrolled step issues a T0 hint for the
//! cache line [`PREFETCH_DISTANCE`] bytes ahead. Hints past the end of the
//! buffer are computed with wrapping pointer arithmetic and never
//! dereferenced.

use std::fmt;

/// Distance ahead of the current position for software prefetch.
pub const PREFETCH_DISTANCE: usize = 64;

/// Reduction implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Backend {
    Scalar,
    Sse2,
    Avx2,
    Avx512,
    Neon,
}

impl Backend {
    /// Bytes consumed per vector step.
    pub const fn lane_width(self) -> usize {
        match self {
            Self::Scalar => 1,
            Self::Sse2 | Self::Neon => 16,
            Self::Avx2 => 32,
            Self::Avx512 => 64,
        }
    }

    /// Whether this CPU can run the backend.
    pub fn is_available(self) -> bool {
        match self {
            Self::Scalar => true,
            #[cfg(target_arch = "x86_64")]
            Self::Sse2 => true,
            #[cfg(target_arch = "x86_64")]
            Self::Avx2 => std::is_x86_feature_detected!("avx2"),
            #[cfg(target_arch = "x86_64")]
            Self::Avx512 => {
                std::is_x86_feature_detected!("avx512f") && std::is_x86_feature_detected!("avx512bw")
            }
            #[cfg(target_arch = "aarch64")]
            Self::Neon => true,
            #[allow(unreachable_patterns)]
            _ => false,
        }
    }

    /// The widest backend this CPU supports.
    pub fn detect() -> Self {
        [Self::Avx512, Self::Avx2, Self::Sse2, Self::Neon]
            .into_iter()
            .find(|b| b.is_available())
            .unwrap_or(Self::Scalar)
    }

    /// All backends this CPU supports, widest first, scalar last.
    pub fn available() -> Vec<Self> {
        [Self::Avx512, Self::Avx2, Self::Sse2, Self::Neon, Self::Scalar]
            .into_iter()
            .filter(|b| b.is_available())
            .collect()
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Scalar => "scalar",
            Self::Sse2 => "sse2",
            Self::Avx2 => "avx2",
            Self::Avx512 => "avx512bw",
            Self::Neon => "neon",
        })
    }
}

/// Byte-sum reducer bound to one backend.
///
/// Cheap to copy; construct once per worker and reuse.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VectorizedReducer {
    backend: Backend,
    prefetch: bool,
}

impl Default for VectorizedReducer {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorizedReducer {
    /// Reducer using the widest available backend, prefetch off.
    pub fn new() -> Self {
        Self {
            backend: Backend::detect(),
            prefetch: false,
        }
    }

    /// Reducer pinned to `backend`, or `None` if this CPU lacks it.
    pub fn with_backend(backend: Backend) -> Option<Self> {
        backend.is_available().then_some(Self {
            backend,
            prefetch: false,
        })
    }

    /// Enables or disables the software prefetch hint.
    pub fn with_prefetch(mut self, prefetch: bool) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn lane_width(&self) -> usize {
        self.backend.lane_width()
    }

    pub fn prefetch(&self) -> bool {
        self.prefetch
    }

    /// Sum of all bytes in `buf`, zero-extended, wrapping at 2^64.
    pub fn reduce(&self, buf: &[u8]) -> u64 {
        match self.backend {
            Backend::Scalar => reduce_scalar(buf),
            #[cfg(target_arch = "x86_64")]
            // SAFETY: SSE2 is baseline on x86_64.
            Backend::Sse2 => unsafe { x86::reduce_sse2(buf, self.prefetch) },
            #[cfg(target_arch = "x86_64")]
            // SAFETY: construction verified AVX2 via runtime detection.
            Backend::Avx2 => unsafe { x86::reduce_avx2(buf, self.prefetch) },
            #[cfg(target_arch = "x86_64")]
            // SAFETY: construction verified AVX-512F/BW via runtime detection.
            Backend::Avx512 => unsafe { x86::reduce_avx512(buf, self.prefetch) },
            #[cfg(target_arch = "aarch64")]
            // SAFETY: NEON is baseline on aarch64.
            Backend::Neon => unsafe { neon::reduce_neon(buf, self.prefetch) },
            #[allow(unreachable_patterns)]
            _ => reduce_scalar(buf),
        }
    }
}

/// Reduces `buf` with the widest available backend.
pub fn reduce(buf: &[u8]) -> u64 {
    VectorizedReducer::new().reduce(buf)
}

/// Reference implementation; also the tail path of every vector backend.
#[inline]
pub fn reduce_scalar(buf: &[u8]) -> u64 {
    buf.iter().fold(0u64, |acc, &b| acc.wrapping_add(b as u64))
}

#[cfg(target_arch = "x86_64")]
mod x86 {
    use core::arch::x86_64::*;

    use super::{reduce_scalar, PREFETCH_DISTANCE};

    #[inline(always)]
    unsafe fn prefetch_ahead(p: *const u8) {
        _mm_prefetch::<_MM_HINT_T0>(p.wrapping_add(PREFETCH_DISTANCE) as *const i8);
    }

    #[target_feature(enable = "sse2")]
    pub(super) unsafe fn reduce_sse2(buf: &[u8], prefetch: bool) -> u64 {
        const LANE: usize = 16;
        let zero = _mm_setzero_si128();
        let mut acc0 = zero;
        let mut acc1 = zero;
        let mut acc2 = zero;
        let mut acc3 = zero;

        let mut blocks = buf.chunks_exact(LANE * 4);
        for block in &mut blocks {
            let p = block.as_ptr();
            if prefetch {
                prefetch_ahead(p);
            }
            let v0 = _mm_loadu_si128(p as *const __m128i);
            let v1 = _mm_loadu_si128(p.add(LANE) as *const __m128i);
            let v2 = _mm_loadu_si128(p.add(2 * LANE) as *const __m128i);
            let v3 = _mm_loadu_si128(p.add(3 * LANE) as *const __m128i);
            acc0 = _mm_add_epi64(acc0, _mm_sad_epu8(v0, zero));
            acc1 = _mm_add_epi64(acc1, _mm_sad_epu8(v1, zero));
            acc2 = _mm_add_epi64(acc2, _mm_sad_epu8(v2, zero));
            acc3 = _mm_add_epi64(acc3, _mm_sad_epu8(v3, zero));
        }

        let mut acc = _mm_add_epi64(_mm_add_epi64(acc0, acc1), _mm_add_epi64(acc2, acc3));
        let mut lanes = blocks.remainder().chunks_exact(LANE);
        for lane in &mut lanes {
            let v = _mm_loadu_si128(lane.as_ptr() as *const __m128i);
            acc = _mm_add_epi64(acc, _mm_sad_epu8(v, zero));
        }

        let mut out = [0u64; 2];
        _mm_storeu_si128(out.as_mut_ptr() as *mut __m128i, acc);
        out[0]
            .wrapping_add(out[1])
            .wrapping_add(reduce_scalar(lanes.remainder()))
    }

    #[target_feature(enable = "avx2")]
    pub(super) unsafe fn reduce_avx2(buf: &[u8], prefetch: bool) -> u64 {
        const LANE: usize = 32;
        let zero = _mm256_setzero_si256();
        let mut acc0 = zero;
        let mut acc1 = zero;
        let mut acc2 = zero;
        let mut acc3 = zero;

        let mut blocks = buf.chunks_exact(LANE * 4);
        for block in &mut blocks {
            let p = block.as_ptr();
            if prefetch {
                prefetch_ahead(p);
                prefetch_ahead(p.wrapping_add(LANE * 2));
            }
            let v0 = _mm256_loadu_si256(p as *const __m256i);
            let v1 = _mm256_loadu_si256(p.add(LANE) as *const __m256i);
            let v2 = _mm256_loadu_si256(p.add(2 * LANE) as *const __m256i);
            let v3 = _mm256_loadu_si256(p.add(3 * LANE) as *const __m256i);
            acc0 = _mm256_add_epi64(acc0, _mm256_sad_epu8(v0, zero));
            acc1 = _mm256_add_epi64(acc1, _mm256_sad_epu8(v1, zero));
            acc2 = _mm256_add_epi64(acc2, _mm256_sad_epu8(v2, zero));
            acc3 = _mm256_add_epi64(acc3, _mm256_sad_epu8(v3, zero));
        }

        let mut acc = _mm256_add_epi64(_mm256_add_epi64(acc0, acc1), _mm256_add_epi64(acc2, acc3));
        let mut lanes = blocks.remainder().chunks_exact(LANE);
        for lane in &mut lanes {
            let v = _mm256_loadu_si256(lane.as_ptr() as *const __m256i);
            acc = _mm256_add_epi64(acc, _mm256_sad_epu8(v, zero));
        }

        let mut out = [0u64; 4];
        _mm256_storeu_si256(out.as_mut_ptr() as *mut __m256i, acc);
        out.iter()
            .fold(0u64, |s, &v| s.wrapping_add(v))
            .wrapping_add(reduce_scalar(lanes.remainder()))
    }

    #[target_feature(enable = "avx512f,avx512bw")]
    pub(super) unsafe fn reduce_avx512(buf: &[u8], prefetch: bool) -> u64 {
        const LANE: usize = 64;
        let zero = _mm512_setzero_si512();
        let mut acc0 = zero;
        let mut acc1 = zero;

        let mut blocks = buf.chunks_exact(LANE * 2);
        for block in &mut blocks {
            let p = block.as_ptr();
            if prefetch {
                prefetch_ahead(p);
                prefetch_ahead(p.wrapping_add(LANE));
            }
            let v0 = _mm512_loadu_si512(p as *const _);
            let v1 = _mm512_loadu_si512(p.add(LANE) as *const _);
            acc0 = _mm512_add_epi64(acc0, _mm512_sad_epu8(v0, zero));
            acc1 = _mm512_add_epi64(acc1, _mm512_sad_epu8(v1, zero));
        }

        let mut acc = _mm512_add_epi64(acc0, acc1);
        let mut lanes = blocks.remainder().chunks_exact(LANE);
        for lane in &mut lanes {
            let v = _mm512_loadu_si512(lane.as_ptr() as *const _);
            acc = _mm512_add_epi64(acc, _mm512_sad_epu8(v, zero));
        }

        (_mm512_reduce_add_epi64(acc) as u64).wrapping_add(reduce_scalar(lanes.remainder()))
    }
}

#[cfg(target_arch = "aarch64")]
mod neon {
    use core::arch::aarch64::*;

    use super::{reduce_scalar, PREFETCH_DISTANCE};

    #[inline(always)]
    unsafe fn prefetch_ahead(p: *const u8) {
        let target = p.wrapping_add(PREFETCH_DISTANCE);
        // PRFM never faults, even on unmapped addresses.
        core::arch::asm!("prfm pldl1keep, [{0}]", in(reg) target, options(nostack, readonly, preserves_flags));
    }

    #[target_feature(enable = "neon")]
    pub(super) unsafe fn reduce_neon(buf: &[u8], prefetch: bool) -> u64 {
        const LANE: usize = 16;
        let mut acc = vdupq_n_u64(0);

        let mut blocks = buf.chunks_exact(LANE * 4);
        for block in &mut blocks {
            let p = block.as_ptr();
            if prefetch {
                prefetch_ahead(p);
            }
            // Each u16 lane holds at most 4 * 2 * 255 = 2040: no overflow.
            let s0 = vpaddlq_u8(vld1q_u8(p));
            let s1 = vpaddlq_u8(vld1q_u8(p.add(LANE)));
            let s2 = vpaddlq_u8(vld1q_u8(p.add(2 * LANE)));
            let s3 = vpaddlq_u8(vld1q_u8(p.add(3 * LANE)));
            let s16 = vaddq_u16(vaddq_u16(s0, s1), vaddq_u16(s2, s3));
            acc = vpadalq_u32(acc, vpaddlq_u16(s16));
        }

        let mut lanes = blocks.remainder().chunks_exact(LANE);
        for lane in &mut lanes {
            let s16 = vpaddlq_u8(vld1q_u8(lane.as_ptr()));
            acc = vpadalq_u32(acc, vpaddlq_u16(s16));
        }

        vaddvq_u64(acc).wrapping_add(reduce_scalar(lanes.remainder()))
    }
}
