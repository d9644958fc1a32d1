//! Peak-bandwidth measurement for memory and block devices.
//!
//! ## Scope
//! Measures the sustained read bandwidth a machine can deliver: DRAM scans
//! with wide-vector reductions, and uncached (`O_DIRECT`) block reads from
//! one or more devices concurrently. Every byte moved is summed, so the
//! measurement doubles as an end-to-end integrity check against a known
//! fill pattern.
//!
//! ## Key invariants
//! - Buffers are aligned for their medium (64 B for SIMD scans, 4 KiB for
//!   direct I/O) and released exactly once.
//! - Timing brackets only the data-movement loop; setup and teardown are
//!   excluded.
//! - Checksums wrap at 2^64 identically on every backend, so any split of a
//!   buffer reduces to the same total.
//! - A failing device never cancels or slows its siblings.
//!
//! ## Flow
//! `PatternKind -> reference file -> DeviceReader -> VectorizedReducer ->
//! BandwidthProbe (best of N) -> MultiDeviceCoordinator -> report`
//!
//! ## Notable entry points
//! - [`MultiDeviceCoordinator::run_all`]: concurrent multi-device run.
//! - [`BandwidthProbe`] / [`DeviceReader`]: single-device measurement.
//! - [`VectorizedReducer`]: runtime-dispatched byte-sum kernel.
//! - [`pattern::write_reference_file`]: generate verifiable input files.

pub mod aligned;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod logging;
pub mod pattern;
pub mod pinning;
pub mod probe;
pub mod reduce;
pub mod report;
pub mod rusage;
#[cfg(test)]
pub mod test_utils;

pub use aligned::{AlignedBuffer, DIRECT_IO_ALIGN, SIMD_ALIGN};
pub use config::{BenchmarkConfig, BenchmarkPlan, DeviceDescriptor, DirectIo, SetupPolicy};
pub use coordinator::{AggregateResult, DeviceOutcome, MultiDeviceCoordinator, RunOutcome};
pub use device::DeviceReader;
pub use error::{AllocError, BenchError, DeviceError, PinError, ReadError};
pub use pattern::{expected_checksum, fill, PatternKind};
pub use pinning::{ExecutionContext, NoopExecutionContext, PinnedExecutionContext};
pub use probe::{BandwidthProbe, DataSource, DeviceReport, TrialResult};
pub use reduce::{Backend, VectorizedReducer};
