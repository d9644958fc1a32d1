//! Timed trials and best-of-N reporting.
//!
//! # Purpose
//!
//! Turns one data source (a resident memory buffer or a [`DeviceReader`])
//! into a [`DeviceReport`]: `trial_count` independent trials, each verified
//! against the pattern checksum when the pattern is known, summarized by the
//! maximum bandwidth observed.
//!
//! # Why the maximum
//!
//! Scheduler noise, thermal throttling, and interrupts can only slow a trial
//! down; nothing makes a channel deliver more than it can. The best trial is
//! the closest observation of the ceiling. The median is kept alongside for
//! spotting unstable runs.
//!
//! # Timing
//!
//! `Instant` (monotonic) brackets only the data-movement loop. Buffer
//! allocation, pattern fill, and file open/close are outside the timed
//! region.

use std::time::{Duration, Instant};

use tracing::{debug, error};

use crate::aligned::AlignedBuffer;
use crate::config::BenchmarkConfig;
use crate::device::DeviceReader;
use crate::error::{DeviceError, ReadError};
use crate::pattern::{expected_checksum, PatternKind};
use crate::reduce::VectorizedReducer;
use crate::rusage::rusage_thread;

/// Smallest elapsed time used as a divisor, so a zero-length or
/// clock-granularity trial never divides by zero.
const MIN_ELAPSED_SECS: f64 = 1e-9;

// ============================================================================
// Trial Result
// ============================================================================

/// Outcome of one timed pass over a data source.
#[derive(Clone, Debug, PartialEq)]
pub struct TrialResult {
    pub device_id: usize,
    /// Zero-based trial index.
    pub trial: u32,
    /// Wall time of the data-movement loop only.
    pub elapsed: Duration,
    pub bytes_moved: u64,
    /// Wrapping byte sum of everything moved.
    pub checksum: u64,
    /// A short read ended the trial before `block_count` transfers.
    pub truncated: bool,
    /// CPU time (user + system) of the worker thread during the loop.
    pub cpu_time: Duration,
}

impl TrialResult {
    /// Bandwidth in GB/s (1 GB = 1e9 bytes).
    pub fn bandwidth_gbps(&self) -> f64 {
        self.bytes_moved as f64 / self.elapsed.as_secs_f64().max(MIN_ELAPSED_SECS) / 1e9
    }

    /// CPU time as a fraction of wall time. Near 1.0 means CPU-bound; well
    /// below means the thread mostly waited on the device.
    pub fn cpu_utilization(&self) -> f64 {
        self.cpu_time.as_secs_f64() / self.elapsed.as_secs_f64().max(MIN_ELAPSED_SECS)
    }
}

// ============================================================================
// Device Report
// ============================================================================

/// All trials of one device plus the best of them.
#[derive(Clone, Debug)]
pub struct DeviceReport {
    pub device_id: usize,
    pub trials: Vec<TrialResult>,
    best: usize,
}

impl DeviceReport {
    /// Builds a report; `None` if `trials` is empty.
    pub fn from_trials(device_id: usize, trials: Vec<TrialResult>) -> Option<Self> {
        let best = trials
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.bandwidth_gbps().total_cmp(&b.bandwidth_gbps()))
            .map(|(idx, _)| idx)?;
        Some(Self {
            device_id,
            trials,
            best,
        })
    }

    /// The trial with the highest bandwidth.
    pub fn best(&self) -> &TrialResult {
        &self.trials[self.best]
    }

    pub fn best_gbps(&self) -> f64 {
        self.best().bandwidth_gbps()
    }

    /// Median trial bandwidth (upper median for even counts).
    pub fn median_gbps(&self) -> f64 {
        let mut rates: Vec<f64> = self.trials.iter().map(TrialResult::bandwidth_gbps).collect();
        rates.sort_by(f64::total_cmp);
        rates[rates.len() / 2]
    }

    /// Whether any trial ended on a short read.
    pub fn any_truncated(&self) -> bool {
        self.trials.iter().any(|t| t.truncated)
    }
}

// ============================================================================
// Probe
// ============================================================================

/// What a probe measures.
pub enum DataSource<'a> {
    /// A resident, already-filled buffer; one trial is one full scan.
    Memory(&'a AlignedBuffer),
    /// A device; one trial is one `run_trial` of the reader.
    Device(&'a mut DeviceReader),
}

/// Runs timed trials for one device.
#[derive(Clone, Debug)]
pub struct BandwidthProbe {
    device_id: usize,
    trial_count: u32,
    reducer: VectorizedReducer,
}

impl BandwidthProbe {
    pub fn new(device_id: usize, config: &BenchmarkConfig) -> Self {
        Self {
            device_id,
            trial_count: config.trial_count,
            reducer: VectorizedReducer::new().with_prefetch(config.use_prefetch),
        }
    }

    pub fn reducer(&self) -> &VectorizedReducer {
        &self.reducer
    }

    /// Runs one trial.
    pub fn measure(&self, source: &mut DataSource<'_>, trial: u32) -> Result<TrialResult, ReadError> {
        match source {
            DataSource::Memory(buf) => Ok(self.measure_memory(buf.as_slice(), trial)),
            DataSource::Device(reader) => reader.run_trial(trial),
        }
    }

    /// Times one full reducer scan of `buf`.
    pub fn measure_memory(&self, buf: &[u8], trial: u32) -> TrialResult {
        let usage_before = rusage_thread();
        let start = Instant::now();
        let checksum = std::hint::black_box(self.reducer.reduce(std::hint::black_box(buf)));
        let elapsed = start.elapsed();
        let cpu_time = rusage_thread().since(&usage_before).total_cpu_time();

        let result = TrialResult {
            device_id: self.device_id,
            trial,
            elapsed,
            bytes_moved: buf.len() as u64,
            checksum,
            truncated: false,
            cpu_time,
        };
        debug!(
            device = self.device_id,
            trial,
            backend = %self.reducer.backend(),
            bytes = result.bytes_moved,
            gbps = result.bandwidth_gbps(),
            checksum,
            "memory trial complete"
        );
        result
    }

    /// Runs `trial_count` trials, verifying each against `expected` when
    /// given, and reports the best.
    ///
    /// Stops at the first failing trial; earlier successes are discarded
    /// because a device that errors or corrupts data has no valid ceiling.
    pub fn run_trials(
        &self,
        source: &mut DataSource<'_>,
        expected: Option<PatternKind>,
    ) -> Result<DeviceReport, DeviceError> {
        let mut trials = Vec::with_capacity(self.trial_count as usize);
        for trial in 0..self.trial_count {
            let result = self.measure(source, trial)?;
            if let Some(pattern) = expected {
                verify_checksum(&result, pattern)?;
            }
            trials.push(result);
        }
        DeviceReport::from_trials(self.device_id, trials).ok_or(DeviceError::Aborted)
    }
}

/// Compares a trial's checksum with the pattern's analytic checksum over
/// the bytes it actually moved.
pub fn verify_checksum(result: &TrialResult, pattern: PatternKind) -> Result<(), DeviceError> {
    let expected = expected_checksum(result.bytes_moved, pattern);
    if result.checksum == expected {
        return Ok(());
    }
    error!(
        device = result.device_id,
        trial = result.trial,
        bytes = result.bytes_moved,
        expected,
        observed = result.checksum,
        %pattern,
        "checksum mismatch"
    );
    Err(DeviceError::ChecksumMismatch {
        trial: result.trial,
        bytes: result.bytes_moved,
        expected,
        observed: result.checksum,
    })
}
