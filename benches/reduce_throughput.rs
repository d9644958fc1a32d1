//! Byte-Sum Reduction Throughput
//!
//! Measures every available reducer backend across the cache hierarchy, with
//! and without software prefetch, plus the direct-I/O block path against a
//! cached temporary file.
//!
//! # Expected Shape (single core)
//!
//! | Level | Size Range | Bound by                 |
//! |-------|------------|--------------------------|
//! | L1D   | < 64KB     | vector ALU / load ports  |
//! | L2    | 128KB-2MB  | L2 bandwidth             |
//! | RAM   | > 32MB     | DRAM channel bandwidth   |
//!
//! Prefetch should matter only in the RAM rows.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench reduce_throughput
//! cargo bench --bench reduce_throughput -- backends
//! cargo bench --bench reduce_throughput -- prefetch
//! cargo bench --bench reduce_throughput -- device_read
//! ```

use std::time::Duration;

use bandwidth_rs::pattern::{fill, write_reference_file, PatternKind};
use bandwidth_rs::reduce::{Backend, VectorizedReducer};
use bandwidth_rs::{AlignedBuffer, BenchmarkConfig, DeviceReader, DirectIo, SIMD_ALIGN};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const CACHE_PROBE_SIZES: &[(usize, &str)] = &[
    (4 * 1024, "4KB"),
    (32 * 1024, "32KB"),
    (256 * 1024, "256KB"),
    (2 * 1024 * 1024, "2MB"),
    (32 * 1024 * 1024, "32MB"),
    (256 * 1024 * 1024, "256MB"),
];

fn filled(size: usize) -> AlignedBuffer {
    let mut buf = AlignedBuffer::allocate(size, SIMD_ALIGN).expect("allocate bench buffer");
    fill(buf.as_mut_slice(), PatternKind::Ramp);
    buf
}

// ============================================================================
// Backends
// ============================================================================

fn bench_backends(c: &mut Criterion) {
    let mut group = c.benchmark_group("backends");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(3));

    for &(size, name) in CACHE_PROBE_SIZES {
        let buf = filled(size);
        group.throughput(Throughput::Bytes(size as u64));
        for backend in Backend::available() {
            let Some(reducer) = VectorizedReducer::with_backend(backend) else {
                continue;
            };
            group.bench_with_input(
                BenchmarkId::new(backend.to_string(), name),
                &buf,
                |b, buf| b.iter(|| black_box(reducer.reduce(black_box(buf.as_slice())))),
            );
        }
    }
    group.finish();
}

// ============================================================================
// Prefetch
// ============================================================================

fn bench_prefetch(c: &mut Criterion) {
    let mut group = c.benchmark_group("prefetch");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(3));

    for &(size, name) in &CACHE_PROBE_SIZES[3..] {
        let buf = filled(size);
        group.throughput(Throughput::Bytes(size as u64));
        for prefetch in [false, true] {
            let reducer = VectorizedReducer::new().with_prefetch(prefetch);
            let label = if prefetch { "on" } else { "off" };
            group.bench_with_input(BenchmarkId::new(label, name), &buf, |b, buf| {
                b.iter(|| black_box(reducer.reduce(black_box(buf.as_slice()))))
            });
        }
    }
    group.finish();
}

// ============================================================================
// Device Read Path
// ============================================================================

fn bench_device_read(c: &mut Criterion) {
    const FILE_SIZE: u64 = 64 * 1024 * 1024;
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bench.bin");
    write_reference_file(&path, FILE_SIZE, PatternKind::Constant(1)).expect("reference file");

    let mut group = c.benchmark_group("device_read");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Bytes(FILE_SIZE));

    for &(block_size, name) in &[(64 * 1024usize, "64KB"), (1024 * 1024, "1MB"), (8 << 20, "8MB")] {
        for direct in [DirectIo::Preferred, DirectIo::Disabled] {
            let config = BenchmarkConfig {
                block_size,
                block_count: 0,
                direct_io: direct,
                ..BenchmarkConfig::ci_quick()
            };
            let mut reader = DeviceReader::new(0, &path, &config).expect("reader");
            let label = format!("{direct:?}").to_lowercase();
            group.bench_function(BenchmarkId::new(label, name), |b| {
                b.iter(|| black_box(reader.run_trial(0).expect("trial").checksum))
            });
        }
    }
    group.finish();
}

criterion_group!(reduce_benches, bench_backends, bench_prefetch);
criterion_group!(device_benches, bench_device_read);
criterion_main!(reduce_benches, device_benches);
