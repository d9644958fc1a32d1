use std::path::Path;

use bandwidth_rs::pattern::{expected_checksum, write_reference_file, PatternKind};
use bandwidth_rs::{BenchmarkConfig, DeviceReader, DirectIo, ReadError, DIRECT_IO_ALIGN};
use tempfile::TempDir;

fn config(block_size: usize, block_count: u64) -> BenchmarkConfig {
    BenchmarkConfig {
        block_size,
        block_count,
        trial_count: 1,
        direct_io: DirectIo::Preferred,
        ..BenchmarkConfig::ci_quick()
    }
}

fn reference(dir: &Path, name: &str, size: u64, pattern: PatternKind) -> std::path::PathBuf {
    let path = dir.join(name);
    write_reference_file(&path, size, pattern).unwrap();
    path
}

#[test]
fn block_count_zero_reads_to_eof() {
    let tmp = TempDir::new().unwrap();
    let size = (1 << 20) + 3 * 4096;
    let path = reference(tmp.path(), "dev0.bin", size, PatternKind::Constant(1));

    let result = DeviceReader::run(0, &path, &config(64 * 1024, 0)).unwrap();

    assert_eq!(result.bytes_moved, size);
    assert_eq!(result.checksum, size);
    assert!(!result.truncated, "EOF in read-to-end mode is not truncation");
    assert!(result.elapsed.as_nanos() > 0);
}

#[test]
fn short_file_yields_truncated_trial_with_actual_bytes() {
    let tmp = TempDir::new().unwrap();
    let path = reference(tmp.path(), "short.bin", 10_000, PatternKind::Constant(1));

    let result = DeviceReader::run(0, &path, &config(4096, 8)).unwrap();

    assert!(result.truncated);
    assert_eq!(result.bytes_moved, 10_000);
    assert_eq!(result.checksum, 10_000);
}

#[test]
fn exact_block_count_stops_early() {
    let tmp = TempDir::new().unwrap();
    let path = reference(tmp.path(), "long.bin", 64 * 4096, PatternKind::Constant(3));

    let result = DeviceReader::run(0, &path, &config(4096, 5)).unwrap();

    assert!(!result.truncated);
    assert_eq!(result.bytes_moved, 5 * 4096);
    assert_eq!(result.checksum, 5 * 4096 * 3);
}

#[test]
fn misaligned_block_size_fails_without_io() {
    let tmp = TempDir::new().unwrap();
    let path = reference(tmp.path(), "dev.bin", 8192, PatternKind::Constant(1));

    let err = DeviceReader::run(0, &path, &config(4097, 1)).unwrap_err();
    match err {
        ReadError::AlignmentViolation {
            value, alignment, ..
        } => {
            assert_eq!(value, 4097);
            assert_eq!(alignment, DIRECT_IO_ALIGN);
        }
        other => panic!("expected AlignmentViolation, got {other:?}"),
    }

    // A missing path still reports the alignment problem: it is checked first.
    let err = DeviceReader::run(0, tmp.path().join("absent"), &config(100, 1)).unwrap_err();
    assert!(matches!(err, ReadError::AlignmentViolation { .. }));
}

#[test]
fn buffered_mode_accepts_unaligned_blocks() {
    let tmp = TempDir::new().unwrap();
    let path = reference(tmp.path(), "dev.bin", 10_000, PatternKind::Constant(2));
    let cfg = BenchmarkConfig {
        direct_io: DirectIo::Disabled,
        ..config(1000, 0)
    };

    let result = DeviceReader::run(0, &path, &cfg).unwrap();
    assert_eq!(result.bytes_moved, 10_000);
    assert_eq!(result.checksum, 20_000);
}

#[test]
fn ramp_file_checksum_matches_analytic_value() {
    let tmp = TempDir::new().unwrap();
    let size = 3 * 65_536 + 4096;
    let path = reference(tmp.path(), "ramp.bin", size, PatternKind::Ramp);

    let result = DeviceReader::run(0, &path, &config(65_536, 0)).unwrap();

    assert_eq!(result.bytes_moved, size);
    assert_eq!(result.checksum, expected_checksum(size, PatternKind::Ramp));
}

#[test]
fn missing_device_is_open_error() {
    let tmp = TempDir::new().unwrap();
    let err = DeviceReader::run(2, tmp.path().join("nope"), &config(4096, 1)).unwrap_err();
    assert!(matches!(err, ReadError::Open { .. }));
}

#[test]
fn repeated_trials_reuse_the_reader() {
    let tmp = TempDir::new().unwrap();
    let path = reference(tmp.path(), "dev.bin", 16 * 4096, PatternKind::Constant(1));
    let mut reader = DeviceReader::new(4, &path, &config(4096, 0)).unwrap();

    for trial in 0..3 {
        let result = reader.run_trial(trial).unwrap();
        assert_eq!(result.trial, trial);
        assert_eq!(result.device_id, 4);
        assert_eq!(result.bytes_moved, 16 * 4096);
    }
}
