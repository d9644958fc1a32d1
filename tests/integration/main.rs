//! Integration tests for device reads, probes, and the multi-device
//! coordinator, against real files in temporary directories.
//!
//! Run with: `cargo test --test integration`

mod coordinator;
mod device_reader;
mod memory_probe;
