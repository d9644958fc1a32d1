use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bandwidth_rs::logging::init_test_logging;
use bandwidth_rs::pattern::{write_reference_file, PatternKind};
use bandwidth_rs::pinning::BindReport;
use bandwidth_rs::{
    BenchError, BenchmarkConfig, DeviceDescriptor, DeviceError, DirectIo, ExecutionContext,
    MultiDeviceCoordinator, PinError, ReadError, RunOutcome, SetupPolicy,
};
use tempfile::TempDir;

fn config() -> BenchmarkConfig {
    BenchmarkConfig {
        block_size: 64 * 1024,
        block_count: 0,
        trial_count: 2,
        direct_io: DirectIo::Preferred,
        lock_memory: false,
        ..BenchmarkConfig::ci_quick()
    }
}

fn reference_files(tmp: &TempDir, count: usize, size: u64) -> Vec<PathBuf> {
    (0..count)
        .map(|i| {
            let path = tmp.path().join(format!("dev{i}.bin"));
            write_reference_file(&path, size, PatternKind::Constant(1)).unwrap();
            path
        })
        .collect()
}

/// Context that fails, or panics, for selected cores and counts binds.
#[derive(Default)]
struct ScriptedContext {
    fail_core: Option<usize>,
    panic_core: Option<usize>,
    binds: AtomicUsize,
}

impl ExecutionContext for ScriptedContext {
    fn bind(&self, core_id: Option<usize>, _numa: Option<usize>) -> Result<BindReport, PinError> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        if core_id.is_some() && core_id == self.panic_core {
            panic!("scripted bind panic");
        }
        if core_id.is_some() && core_id == self.fail_core {
            return Err(PinError::PermissionDenied("scripted".into()));
        }
        Ok(BindReport::default())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[test]
fn one_missing_device_of_four_is_partial() {
    init_test_logging();
    let tmp = TempDir::new().unwrap();
    let size = 512 * 1024;
    let mut devices: Vec<DeviceDescriptor> = reference_files(&tmp, 3, size)
        .into_iter()
        .map(|p| DeviceDescriptor::block(p).verified_with(PatternKind::Constant(1)))
        .collect();
    devices.insert(2, DeviceDescriptor::block(tmp.path().join("missing.bin")));

    let agg = MultiDeviceCoordinator::unpinned(config())
        .run_all(&devices)
        .unwrap();

    assert_eq!(agg.per_device.len(), 4);
    assert_eq!(agg.successes(), 3);
    assert_eq!(agg.outcome(), RunOutcome::Partial);
    assert_eq!(agg.exit_code(), 0);

    let failed = &agg.per_device[2];
    assert!(matches!(
        failed.result,
        Err(DeviceError::Read(ReadError::Open { .. }))
    ));

    let sum: f64 = agg.per_device.iter().filter_map(|o| o.best_gbps()).sum();
    assert!((agg.combined_bandwidth - sum).abs() < 1e-9);
    assert!(agg.max_bandwidth_per_device <= agg.combined_bandwidth);

    for outcome in agg.per_device.iter().filter(|o| o.is_success()) {
        let report = outcome.result.as_ref().unwrap();
        assert_eq!(report.trials.len(), 2);
        assert_eq!(report.best().bytes_moved, size);
        assert_eq!(report.best().checksum, size);
    }
}

#[test]
fn all_devices_failing_is_failed_run() {
    let tmp = TempDir::new().unwrap();
    let devices = vec![
        DeviceDescriptor::block(tmp.path().join("a")),
        DeviceDescriptor::block(tmp.path().join("b")),
    ];

    let agg = MultiDeviceCoordinator::unpinned(config())
        .run_all(&devices)
        .unwrap();

    assert_eq!(agg.outcome(), RunOutcome::Failed);
    assert_eq!(agg.exit_code(), 1);
    assert_eq!(agg.combined_bandwidth, 0.0);
}

#[test]
fn checksum_mismatch_fails_only_that_device() {
    let tmp = TempDir::new().unwrap();
    let paths = reference_files(&tmp, 2, 256 * 1024);
    let devices = vec![
        DeviceDescriptor::block(&paths[0]).verified_with(PatternKind::Constant(1)),
        DeviceDescriptor::block(&paths[1]).verified_with(PatternKind::Constant(2)),
    ];

    let agg = MultiDeviceCoordinator::unpinned(config())
        .run_all(&devices)
        .unwrap();

    assert!(agg.per_device[0].is_success());
    match &agg.per_device[1].result {
        Err(DeviceError::ChecksumMismatch {
            expected, observed, ..
        }) => {
            assert_eq!(*observed, 256 * 1024);
            assert_eq!(*expected, 2 * 256 * 1024);
        }
        other => panic!("expected ChecksumMismatch, got {other:?}"),
    }
    assert_eq!(agg.outcome(), RunOutcome::Partial);
}

#[test]
fn read_failure_fails_only_that_device() {
    init_test_logging();
    let tmp = TempDir::new().unwrap();
    let size = 256 * 1024;
    let paths = reference_files(&tmp, 2, size);
    let unreadable = tmp.path().join("subdir");
    std::fs::create_dir(&unreadable).unwrap();
    let devices = vec![
        DeviceDescriptor::block(&paths[0]).verified_with(PatternKind::Constant(1)),
        DeviceDescriptor::block(&unreadable),
        DeviceDescriptor::block(&paths[1]).verified_with(PatternKind::Constant(1)),
    ];

    let agg = MultiDeviceCoordinator::unpinned(config())
        .run_all(&devices)
        .unwrap();

    assert!(matches!(
        agg.per_device[1].result,
        Err(DeviceError::Read(ReadError::IoFailure {
            offset: 0,
            errno: Some(libc::EISDIR),
            ..
        }))
    ));
    for id in [0, 2] {
        let report = agg.per_device[id].result.as_ref().unwrap();
        assert_eq!(report.best().checksum, size);
    }
    assert_eq!(agg.successes(), 2);
    assert_eq!(agg.outcome(), RunOutcome::Partial);
    assert_eq!(agg.exit_code(), 0);
}

#[test]
fn misaligned_block_size_fails_each_block_device() {
    let tmp = TempDir::new().unwrap();
    let paths = reference_files(&tmp, 1, 64 * 1024);
    let devices = vec![
        DeviceDescriptor::block(&paths[0]),
        DeviceDescriptor::memory(64 * 1024),
    ];
    let cfg = BenchmarkConfig {
        block_size: 4097,
        ..config()
    };

    let agg = MultiDeviceCoordinator::unpinned(cfg).run_all(&devices).unwrap();

    assert!(matches!(
        agg.per_device[0].result,
        Err(DeviceError::Read(ReadError::AlignmentViolation { .. }))
    ));
    assert!(agg.per_device[1].is_success(), "memory targets ignore block size");
}

#[test]
fn required_setup_failure_aborts_before_work() {
    let tmp = TempDir::new().unwrap();
    let paths = reference_files(&tmp, 2, 64 * 1024);
    let devices = vec![
        DeviceDescriptor::block(&paths[0]).on_core(0),
        DeviceDescriptor::block(&paths[1]).on_core(7),
    ];
    let context = Arc::new(ScriptedContext {
        fail_core: Some(7),
        ..ScriptedContext::default()
    });
    let cfg = BenchmarkConfig {
        setup_policy: SetupPolicy::Required,
        ..config()
    };

    let err = MultiDeviceCoordinator::new(cfg, context.clone())
        .run_all(&devices)
        .unwrap_err();

    match err {
        BenchError::Setup { device, source } => {
            assert_eq!(device, 1);
            assert!(matches!(source, PinError::PermissionDenied(_)));
        }
        other => panic!("expected Setup, got {other:?}"),
    }
    assert_eq!(context.binds.load(Ordering::SeqCst), 2);
}

#[test]
fn best_effort_setup_failure_degrades() {
    let tmp = TempDir::new().unwrap();
    let paths = reference_files(&tmp, 2, 64 * 1024);
    let devices = vec![
        DeviceDescriptor::block(&paths[0]).on_core(0),
        DeviceDescriptor::block(&paths[1]).on_core(7),
    ];
    let context = Arc::new(ScriptedContext {
        fail_core: Some(7),
        ..ScriptedContext::default()
    });

    let agg = MultiDeviceCoordinator::new(config(), context)
        .run_all(&devices)
        .unwrap();

    assert_eq!(agg.outcome(), RunOutcome::Complete);
}

#[test]
fn worker_panic_is_isolated() {
    let tmp = TempDir::new().unwrap();
    let paths = reference_files(&tmp, 2, 64 * 1024);
    let devices = vec![
        DeviceDescriptor::block(&paths[0]).on_core(0),
        DeviceDescriptor::block(&paths[1]).on_core(13),
        DeviceDescriptor::memory(64 * 1024),
    ];
    let context = Arc::new(ScriptedContext {
        panic_core: Some(13),
        ..ScriptedContext::default()
    });

    let agg = MultiDeviceCoordinator::new(config(), context)
        .run_all(&devices)
        .unwrap();

    assert!(agg.per_device[0].is_success());
    assert!(matches!(
        agg.per_device[1].result,
        Err(DeviceError::WorkerPanicked)
    ));
    assert!(agg.per_device[2].is_success());
    assert_eq!(agg.outcome(), RunOutcome::Partial);
}

#[test]
fn thread_count_mismatch_is_invalid_config() {
    let cfg = BenchmarkConfig {
        thread_count: Some(3),
        ..config()
    };
    let err = MultiDeviceCoordinator::unpinned(cfg)
        .run_all(&[DeviceDescriptor::memory(4096)])
        .unwrap_err();
    assert!(matches!(err, BenchError::InvalidConfig(_)));
}
