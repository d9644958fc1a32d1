//! Deterministic fill patterns and their analytic checksums.
//!
//! Every pattern defines the byte at absolute offset `i` as a pure function
//! of `i`. A buffer (or file) filled in any number of chunks therefore has
//! the same contents as one filled in a single pass, and its checksum can be
//! computed in O(1) from the size alone.
//!
//! The default, `Constant(1)`, is period 1: any chunking of any length sums
//! to `len * 1`. `Ramp` (byte = offset mod 256) has period 256 and is only
//! safe because it is keyed on the absolute offset; a pattern that restarts
//! its cycle per write buffer desynchronizes from the analytic checksum
//! whenever the buffer length is not a multiple of the period.

use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

/// Sum of 0 + 1 + ... + 255.
const RAMP_PERIOD_SUM: u64 = 255 * 256 / 2;

/// Chunk size used when writing reference files.
pub const REFERENCE_WRITE_CHUNK: usize = 1 << 20;

/// A deterministic byte pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Every byte equals the value.
    Constant(u8),
    /// Byte at offset `i` is `i mod 256`.
    Ramp,
}

impl Default for PatternKind {
    fn default() -> Self {
        Self::Constant(1)
    }
}

impl PatternKind {
    /// The byte at absolute offset `offset`.
    #[inline]
    pub fn byte_at(self, offset: u64) -> u8 {
        match self {
            Self::Constant(v) => v,
            Self::Ramp => offset as u8,
        }
    }

    /// Sum of the first `len` bytes of the pattern (offsets `0..len`).
    fn prefix_sum(self, len: u64) -> u64 {
        match self {
            Self::Constant(v) => len.wrapping_mul(v as u64),
            Self::Ramp => {
                let rem = len % 256;
                (len / 256)
                    .wrapping_mul(RAMP_PERIOD_SUM)
                    .wrapping_add(rem * rem.saturating_sub(1) / 2)
            }
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(v) => write!(f, "const:{v}"),
            Self::Ramp => f.write_str("ramp"),
        }
    }
}

impl FromStr for PatternKind {
    type Err = String;

    /// Parses `const:<0-255>` or `ramp`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "ramp" {
            return Ok(Self::Ramp);
        }
        s.strip_prefix("const:")
            .and_then(|v| v.parse::<u8>().ok())
            .map(Self::Constant)
            .ok_or_else(|| format!("invalid pattern '{s}' (expected const:<0-255> or ramp)"))
    }
}

/// Fills `buf` as the pattern's bytes at offsets `0..buf.len()`.
pub fn fill(buf: &mut [u8], pattern: PatternKind) {
    fill_at(buf, 0, pattern);
}

/// Fills `buf` as the pattern's bytes at offsets `offset..offset + len`.
pub fn fill_at(buf: &mut [u8], offset: u64, pattern: PatternKind) {
    match pattern {
        PatternKind::Constant(v) => buf.fill(v),
        PatternKind::Ramp => {
            for (i, b) in buf.iter_mut().enumerate() {
                *b = pattern.byte_at(offset.wrapping_add(i as u64));
            }
        }
    }
}

/// Checksum of `size` pattern bytes starting at offset 0, without touching
/// any data. Arithmetic wraps exactly like the reducer's accumulation.
pub fn expected_checksum(size: u64, pattern: PatternKind) -> u64 {
    pattern.prefix_sum(size)
}

/// Checksum of the pattern bytes at offsets `offset..offset + len`.
pub fn expected_range_checksum(offset: u64, len: u64, pattern: PatternKind) -> u64 {
    pattern
        .prefix_sum(offset.wrapping_add(len))
        .wrapping_sub(pattern.prefix_sum(offset))
}

/// Writes a flat reference file of exactly `size` pattern bytes (no header
/// or footer), syncs it, and returns its expected checksum.
///
/// Existing files are truncated.
pub fn write_reference_file(path: &Path, size: u64, pattern: PatternKind) -> io::Result<u64> {
    let mut file = File::create(path)?;
    let mut chunk = vec![0u8; REFERENCE_WRITE_CHUNK];
    let mut offset = 0u64;

    while offset < size {
        let len = (size - offset).min(REFERENCE_WRITE_CHUNK as u64) as usize;
        let chunk = &mut chunk[..len];
        fill_at(chunk, offset, pattern);
        file.write_all(chunk)?;
        offset += len as u64;
    }
    file.sync_all()?;

    let checksum = expected_checksum(size, pattern);
    info!(
        path = %path.display(),
        size,
        %pattern,
        checksum,
        "reference file written"
    );
    Ok(checksum)
}
