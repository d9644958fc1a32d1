use bandwidth_rs::pattern::fill;
use bandwidth_rs::{AlignedBuffer, BandwidthProbe, BenchmarkConfig, PatternKind, SIMD_ALIGN};

#[test]
fn one_gib_scan_checksums_exactly() {
    const SIZE: usize = 1 << 30;
    let mut buf = AlignedBuffer::allocate(SIZE, SIMD_ALIGN).unwrap();
    fill(buf.as_mut_slice(), PatternKind::Constant(1));

    let probe = BandwidthProbe::new(0, &BenchmarkConfig::dram());
    let result = probe.measure_memory(buf.as_slice(), 0);

    assert_eq!(result.checksum, 1_073_741_824);
    assert_eq!(result.bytes_moved, SIZE as u64);
    assert!(result.elapsed.as_nanos() > 0);
    assert!(result.bandwidth_gbps() > 0.0);
}

#[test]
fn prefetch_does_not_change_the_sum() {
    let mut buf = AlignedBuffer::allocate(3 << 20, SIMD_ALIGN).unwrap();
    fill(buf.as_mut_slice(), PatternKind::Ramp);

    let with = BandwidthProbe::new(0, &BenchmarkConfig::dram());
    let without = BandwidthProbe::new(
        0,
        &BenchmarkConfig {
            use_prefetch: false,
            ..BenchmarkConfig::dram()
        },
    );
    assert!(with.reducer().prefetch());
    assert!(!without.reducer().prefetch());
    assert_eq!(
        with.measure_memory(buf.as_slice(), 0).checksum,
        without.measure_memory(buf.as_slice(), 0).checksum
    );
}
