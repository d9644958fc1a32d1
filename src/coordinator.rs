//! Concurrent multi-device measurement.
//!
//! # Purpose
//!
//! Emulates aggregate load: every device gets its own OS thread, all threads
//! start timed work together, and the per-device best bandwidths are summed.
//! Summing is valid because the devices sit on independent channels.
//!
//! # Phases
//!
//! 1. **Spawn**: one named thread per descriptor (`bw-dev-<id>`).
//! 2. **Prepare** (per worker): bind via the injected [`ExecutionContext`],
//!    then allocate and fill (memory) or open geometry (device). Allocation
//!    runs after binding so pages fault in on the bound NUMA node.
//! 3. **Ready**: each worker reports on the ready channel, then blocks on
//!    the start gate.
//! 4. **Gate**: once every worker has reported, the coordinator either
//!    releases all of them at once (dropping the gate sender) or, if a
//!    required setup step failed anywhere, raises the abort flag first so no
//!    device work starts.
//! 5. **Join**: results come back as `(device_id, outcome)` messages and are
//!    read only after every worker has been joined.
//!
//! # Failure isolation
//!
//! Device errors (I/O, allocation, checksum, panic) stay in that device's
//! [`DeviceOutcome`]; siblings always run to completion. Only invalid
//! configuration, spawn failure, or a required setup failure abort the run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::aligned::{AlignedBuffer, SIMD_ALIGN};
use crate::config::{BenchmarkConfig, DeviceDescriptor, SetupPolicy};
use crate::device::DeviceReader;
use crate::error::{BenchError, DeviceError, PinError};
use crate::pattern::{fill, PatternKind};
use crate::pinning::{ExecutionContext, NoopExecutionContext};
use crate::probe::{BandwidthProbe, DataSource, DeviceReport};

/// Result of one device: a report or the error that ended it.
#[derive(Debug)]
pub struct DeviceOutcome {
    pub device_id: usize,
    pub device: DeviceDescriptor,
    pub result: Result<DeviceReport, DeviceError>,
}

impl DeviceOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Best bandwidth in GB/s, if the device succeeded.
    pub fn best_gbps(&self) -> Option<f64> {
        self.result.as_ref().ok().map(DeviceReport::best_gbps)
    }
}

/// How many devices succeeded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every device produced a report.
    Complete,
    /// At least one device succeeded and at least one failed.
    Partial,
    /// No device succeeded.
    Failed,
}

impl RunOutcome {
    /// Process exit status: 0 unless every device failed.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Complete | Self::Partial => 0,
            Self::Failed => 1,
        }
    }
}

/// Aggregate of a whole run, in device order.
#[derive(Debug)]
pub struct AggregateResult {
    pub per_device: Vec<DeviceOutcome>,
    /// Sum of successful devices' best bandwidth, GB/s.
    pub combined_bandwidth: f64,
    /// Highest single-device best bandwidth, GB/s.
    pub max_bandwidth_per_device: f64,
    /// From gate release until every worker was joined.
    pub wall_time: Duration,
}

impl AggregateResult {
    /// Derives the aggregate figures from per-device outcomes.
    pub fn from_outcomes(per_device: Vec<DeviceOutcome>, wall_time: Duration) -> Self {
        let rates = per_device.iter().filter_map(DeviceOutcome::best_gbps);
        let (combined_bandwidth, max_bandwidth_per_device) = rates
            .fold((0.0f64, 0.0f64), |(sum, max), gbps| (sum + gbps, max.max(gbps)));
        Self {
            per_device,
            combined_bandwidth,
            max_bandwidth_per_device,
            wall_time,
        }
    }

    pub fn successes(&self) -> usize {
        self.per_device.iter().filter(|o| o.is_success()).count()
    }

    pub fn failures(&self) -> usize {
        self.per_device.len() - self.successes()
    }

    pub fn outcome(&self) -> RunOutcome {
        match (self.successes(), self.failures()) {
            (0, _) => RunOutcome::Failed,
            (_, 0) => RunOutcome::Complete,
            _ => RunOutcome::Partial,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.outcome().exit_code()
    }
}

/// Worker readiness: prepared (possibly degraded), or a required setup step
/// failed and the run must not start.
enum Ready {
    Prepared,
    SetupFailed(PinError),
}

/// Fans devices out to one thread each and aggregates their results.
pub struct MultiDeviceCoordinator {
    config: BenchmarkConfig,
    context: Arc<dyn ExecutionContext>,
}

impl MultiDeviceCoordinator {
    pub fn new(config: BenchmarkConfig, context: Arc<dyn ExecutionContext>) -> Self {
        Self { config, context }
    }

    /// Coordinator that performs no thread placement.
    pub fn unpinned(config: BenchmarkConfig) -> Self {
        Self::new(config, Arc::new(NoopExecutionContext))
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    /// Measures every device concurrently.
    ///
    /// # Errors
    ///
    /// Returns `Err` only for run-level failures (invalid configuration,
    /// spawn failure, required setup failure), always before any device
    /// starts timed work. Device failures are reported inside the
    /// [`AggregateResult`].
    pub fn run_all(&self, devices: &[DeviceDescriptor]) -> Result<AggregateResult, BenchError> {
        self.config.validate(devices)?;
        info!(
            devices = devices.len(),
            context = self.context.name(),
            trials = self.config.trial_count,
            block_size = self.config.block_size,
            block_count = self.config.block_count,
            "starting run"
        );

        let (ready_tx, ready_rx) = unbounded::<(usize, Ready)>();
        let (result_tx, result_rx) = unbounded::<(usize, Result<DeviceReport, DeviceError>)>();
        // Never sent on; dropping the sender releases every worker at once.
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let abort = Arc::new(AtomicBool::new(false));

        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(devices.len());
        for (device_id, device) in devices.iter().enumerate() {
            let worker = Worker {
                device_id,
                device: device.clone(),
                config: self.config.clone(),
                context: Arc::clone(&self.context),
                ready_tx: ready_tx.clone(),
                result_tx: result_tx.clone(),
                gate_rx: gate_rx.clone(),
                abort: Arc::clone(&abort),
            };
            let spawned = thread::Builder::new()
                .name(format!("bw-dev-{device_id}"))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    abort.store(true, Ordering::Release);
                    drop(gate_tx);
                    join_quietly(handles);
                    return Err(BenchError::Spawn {
                        device: device_id,
                        source,
                    });
                }
            }
        }
        drop(ready_tx);
        drop(result_tx);
        drop(gate_rx);

        // Wait for every worker to report; a worker that dies first drops its
        // sender, so the loop also ends on disconnect.
        let mut setup_failure: Option<(usize, PinError)> = None;
        let mut reported = 0usize;
        while reported < handles.len() {
            let Ok((device_id, ready)) = ready_rx.recv() else {
                break;
            };
            reported += 1;
            if let Ready::SetupFailed(err) = ready {
                error!(device = device_id, error = %err, "required setup failed");
                if setup_failure.is_none() {
                    setup_failure = Some((device_id, err));
                }
            }
        }

        if let Some((device, source)) = setup_failure {
            abort.store(true, Ordering::Release);
            drop(gate_tx);
            join_quietly(handles);
            return Err(BenchError::Setup { device, source });
        }

        debug!(workers = handles.len(), "releasing start gate");
        let start = Instant::now();
        drop(gate_tx);

        let mut panicked = vec![false; devices.len()];
        for (device_id, handle) in handles.into_iter().enumerate() {
            if handle.join().is_err() {
                panicked[device_id] = true;
            }
        }
        let wall_time = start.elapsed();

        let mut results: Vec<Option<Result<DeviceReport, DeviceError>>> =
            (0..devices.len()).map(|_| None).collect();
        for (device_id, result) in result_rx.try_iter() {
            results[device_id] = Some(result);
        }

        let per_device: Vec<DeviceOutcome> = results
            .into_iter()
            .zip(devices.iter())
            .enumerate()
            .map(|(device_id, (result, device))| {
                let result = match result {
                    Some(result) => result,
                    None => {
                        error!(
                            device = device_id,
                            panicked = panicked[device_id],
                            "worker produced no result"
                        );
                        Err(DeviceError::WorkerPanicked)
                    }
                };
                if let Err(err) = &result {
                    warn!(device = device_id, descriptor = %device, error = %err, "device failed");
                }
                DeviceOutcome {
                    device_id,
                    device: device.clone(),
                    result,
                }
            })
            .collect();

        let aggregate = AggregateResult::from_outcomes(per_device, wall_time);
        info!(
            succeeded = aggregate.successes(),
            failed = aggregate.failures(),
            combined_gbps = aggregate.combined_bandwidth,
            wall_ms = aggregate.wall_time.as_millis() as u64,
            "run complete"
        );
        Ok(aggregate)
    }
}

/// Joins workers after an abort; their outcomes are irrelevant.
fn join_quietly(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.join();
    }
}

/// Everything one worker thread owns.
struct Worker {
    device_id: usize,
    device: DeviceDescriptor,
    config: BenchmarkConfig,
    context: Arc<dyn ExecutionContext>,
    ready_tx: Sender<(usize, Ready)>,
    result_tx: Sender<(usize, Result<DeviceReport, DeviceError>)>,
    gate_rx: Receiver<()>,
    abort: Arc<AtomicBool>,
}

/// A worker's prepared data source. Memory targets are always verified
/// against the configured fill; devices only when their pattern is known.
enum Prepared {
    Memory(AlignedBuffer),
    Device(DeviceReader, Option<PatternKind>),
}

impl Worker {
    fn run(self) {
        let Worker {
            device_id,
            device,
            config,
            context,
            ready_tx,
            result_tx,
            gate_rx,
            abort,
        } = self;
        let required = config.setup_policy == SetupPolicy::Required;

        // Bind.
        if let Err(err) = context.bind(device.core(), device.numa_node()) {
            if required {
                let _ = ready_tx.send((device_id, Ready::SetupFailed(err)));
                return;
            }
            warn!(device = device_id, error = %err, "thread placement failed; running unpinned");
        }

        // Prepare. Failures here are device-local and reported after the gate
        // so the device still appears in the aggregate.
        let prepared = prepare(device_id, &device, &config, required);

        let _ = ready_tx.send((device_id, Ready::Prepared));
        drop(ready_tx);

        // Blocks until the coordinator drops the gate sender.
        let _ = gate_rx.recv();
        if abort.load(Ordering::Acquire) {
            return;
        }

        let result = prepared.and_then(|prepared| measure(device_id, &config, prepared));
        let _ = result_tx.send((device_id, result));
    }
}

fn prepare(
    device_id: usize,
    device: &DeviceDescriptor,
    config: &BenchmarkConfig,
    required: bool,
) -> Result<Prepared, DeviceError> {
    match device {
        DeviceDescriptor::Memory { size, .. } => {
            let mut buf = AlignedBuffer::allocate(*size, SIMD_ALIGN)?;
            fill(buf.as_mut_slice(), config.pattern);
            if config.lock_memory {
                if let Err(err) = buf.lock() {
                    if required {
                        return Err(err.into());
                    }
                    warn!(device = device_id, error = %err, "mlock failed; pages may be swapped");
                }
            }
            Ok(Prepared::Memory(buf))
        }
        DeviceDescriptor::Block {
            path,
            expected_pattern,
            ..
        } => {
            let reader = DeviceReader::new(device_id, path.clone(), config)?;
            Ok(Prepared::Device(reader, *expected_pattern))
        }
    }
}

fn measure(
    device_id: usize,
    config: &BenchmarkConfig,
    prepared: Prepared,
) -> Result<DeviceReport, DeviceError> {
    let probe = BandwidthProbe::new(device_id, config);
    match prepared {
        Prepared::Memory(mut buf) => {
            let report = probe.run_trials(&mut DataSource::Memory(&buf), Some(config.pattern));
            buf.release();
            report
        }
        Prepared::Device(mut reader, expected) => {
            probe.run_trials(&mut DataSource::Device(&mut reader), expected)
        }
    }
}
