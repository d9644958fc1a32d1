//! Thread placement for low-jitter measurement.
//!
//! Core affinity, NUMA memory binding, and real-time priority, exposed to the
//! rest of the harness only through the [`ExecutionContext`] trait.

pub mod affinity;
pub mod context;
pub mod numa;
pub mod priority;

pub use affinity::{allowed_cpus, first_allowed_cpu, CpuSet, CPU_SET_CAPACITY};
pub use context::{BindReport, ExecutionContext, NoopExecutionContext, PinnedExecutionContext};
