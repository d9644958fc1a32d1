//! Benchmark configuration and device descriptors.
//!
//! Configuration is read once at start and is immutable for the run. It can
//! be built in code (presets below), loaded from a JSON plan file, or
//! assembled by the CLI; every path ends in [`BenchmarkConfig::validate`].

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::aligned::DIRECT_IO_ALIGN;
use crate::error::BenchError;
use crate::pattern::PatternKind;

/// Whether device reads bypass the page cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectIo {
    /// `O_DIRECT` or fail the device.
    Required,
    /// `O_DIRECT`, falling back to buffered reads (with a warning) on
    /// filesystems that reject it, such as tmpfs.
    #[default]
    Preferred,
    /// Buffered reads; measures cache-assisted throughput.
    Disabled,
}

/// How thread-placement failures are treated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupPolicy {
    /// Any placement failure aborts the whole run before device work starts.
    Required,
    /// Placement failures are logged and the device runs unpinned.
    #[default]
    BestEffort,
}

/// Recognized benchmark options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Prefetch the next line during memory scans.
    pub use_prefetch: bool,
    /// I/O transfer unit in bytes. With direct I/O it must be a multiple of
    /// [`DIRECT_IO_ALIGN`].
    pub block_size: usize,
    /// Transfers per device trial; `0` reads until end of file/device.
    pub block_count: u64,
    /// Repetitions; the reported result is the maximum over trials.
    pub trial_count: u32,
    /// Expected thread count. When set it must equal the device count.
    pub thread_count: Option<usize>,
    /// Fill pattern for memory targets (and default verification pattern).
    pub pattern: PatternKind,
    pub direct_io: DirectIo,
    pub setup_policy: SetupPolicy,
    /// Request `SCHED_FIFO` for measurement threads.
    pub realtime_priority: bool,
    /// `mlock` memory-target buffers.
    pub lock_memory: bool,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            use_prefetch: true,
            block_size: 64 << 20,
            block_count: 0,
            trial_count: 3,
            thread_count: None,
            pattern: PatternKind::default(),
            direct_io: DirectIo::Preferred,
            setup_policy: SetupPolicy::BestEffort,
            realtime_priority: false,
            lock_memory: true,
        }
    }
}

impl BenchmarkConfig {
    /// Raw NVMe sweep: 500 × 512 MiB direct reads per device.
    pub fn nvme() -> Self {
        Self {
            block_size: 512 << 20,
            block_count: 500,
            trial_count: 1,
            direct_io: DirectIo::Required,
            ..Self::default()
        }
    }

    /// Single-node DRAM ceiling: prefetching scans, five trials, locked
    /// pages, real-time priority, placement mandatory.
    pub fn dram() -> Self {
        Self {
            use_prefetch: true,
            trial_count: 5,
            realtime_priority: true,
            lock_memory: true,
            setup_policy: SetupPolicy::Required,
            ..Self::default()
        }
    }

    /// Small, fast settings for CI and tests.
    pub fn ci_quick() -> Self {
        Self {
            block_size: 1 << 20,
            block_count: 0,
            trial_count: 2,
            lock_memory: false,
            ..Self::default()
        }
    }

    /// Looks up a preset by its CLI name.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "nvme" => Some(Self::nvme()),
            "dram" => Some(Self::dram()),
            "quick" => Some(Self::ci_quick()),
            _ => None,
        }
    }

    /// Checks the configuration against the device list.
    ///
    /// Alignment of `block_size` is deliberately not checked here: it is a
    /// per-device property reported as that device's `AlignmentViolation`.
    pub fn validate(&self, devices: &[DeviceDescriptor]) -> Result<(), BenchError> {
        let invalid = |msg: String| Err(BenchError::InvalidConfig(msg));

        if devices.is_empty() {
            return invalid("no devices configured".into());
        }
        if self.trial_count == 0 {
            return invalid("trial_count must be >= 1".into());
        }
        if self.block_size == 0 {
            return invalid("block_size must be > 0".into());
        }
        if let Some(threads) = self.thread_count {
            if threads != devices.len() {
                return invalid(format!(
                    "thread_count {threads} does not match device count {}",
                    devices.len()
                ));
            }
        }
        for (id, device) in devices.iter().enumerate() {
            match device {
                DeviceDescriptor::Memory { size: 0, .. } => {
                    return invalid(format!("device {id}: memory target size must be > 0"));
                }
                DeviceDescriptor::Block { path, .. } if path.as_os_str().is_empty() => {
                    return invalid(format!("device {id}: empty path"));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Whether `block_size` satisfies the direct-I/O alignment.
    pub fn block_size_is_direct_aligned(&self) -> bool {
        self.block_size.is_multiple_of(DIRECT_IO_ALIGN)
    }
}

/// A benchmark target. Immutable once a run starts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceDescriptor {
    /// An in-memory region scanned by the reducer.
    Memory {
        size: usize,
        #[serde(default)]
        numa_node: Option<usize>,
        #[serde(default)]
        core: Option<usize>,
    },
    /// A block device or file read with uncached block transfers.
    Block {
        path: PathBuf,
        #[serde(default)]
        core: Option<usize>,
        /// Pattern the file was generated with; enables checksum
        /// verification.
        #[serde(default)]
        expected_pattern: Option<PatternKind>,
    },
}

impl DeviceDescriptor {
    pub fn memory(size: usize) -> Self {
        Self::Memory {
            size,
            numa_node: None,
            core: None,
        }
    }

    pub fn block(path: impl Into<PathBuf>) -> Self {
        Self::Block {
            path: path.into(),
            core: None,
            expected_pattern: None,
        }
    }

    /// Same target, verified against `pattern`. No effect on memory targets,
    /// which are always verified against the configured fill.
    pub fn verified_with(mut self, pattern: PatternKind) -> Self {
        if let Self::Block {
            expected_pattern, ..
        } = &mut self
        {
            *expected_pattern = Some(pattern);
        }
        self
    }

    /// Whether the measured checksum is compared against a known pattern.
    pub fn is_verified(&self) -> bool {
        match self {
            Self::Memory { .. } => true,
            Self::Block {
                expected_pattern, ..
            } => expected_pattern.is_some(),
        }
    }

    /// Same target, pinned to `core`.
    pub fn on_core(mut self, pin: usize) -> Self {
        match &mut self {
            Self::Memory { core, .. } | Self::Block { core, .. } => *core = Some(pin),
        }
        self
    }

    pub fn core(&self) -> Option<usize> {
        match self {
            Self::Memory { core, .. } | Self::Block { core, .. } => *core,
        }
    }

    pub fn numa_node(&self) -> Option<usize> {
        match self {
            Self::Memory { numa_node, .. } => *numa_node,
            Self::Block { .. } => None,
        }
    }

    /// Parses a CLI target: a path, or `mem:<size>[@<node>]`.
    pub fn parse(target: &str) -> Result<Self, String> {
        let Some(rest) = target.strip_prefix("mem:") else {
            if target.is_empty() {
                return Err("empty device path".into());
            }
            return Ok(Self::block(target));
        };
        let (size, node) = match rest.split_once('@') {
            Some((size, node)) => {
                let node = node
                    .parse::<usize>()
                    .map_err(|_| format!("invalid NUMA node in '{target}'"))?;
                (size, Some(node))
            }
            None => (rest, None),
        };
        Ok(Self::Memory {
            size: parse_size(size)?,
            numa_node: node,
            core: None,
        })
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory {
                size,
                numa_node: Some(node),
                ..
            } => write!(f, "mem:{size}@{node}"),
            Self::Memory { size, .. } => write!(f, "mem:{size}"),
            Self::Block { path, .. } => write!(f, "{}", path.display()),
        }
    }
}

/// A configuration plus its targets, as stored in a JSON plan file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkPlan {
    #[serde(default)]
    pub config: BenchmarkConfig,
    #[serde(default)]
    pub devices: Vec<DeviceDescriptor>,
}

impl BenchmarkPlan {
    /// Loads a plan whose `config` fields override `base`; fields the file
    /// omits keep the base value instead of the built-in default.
    pub fn from_json_file_over(path: &Path, base: &BenchmarkConfig) -> Result<Self, BenchError> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            BenchError::InvalidConfig(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_json_str_over(&text, base).map_err(|err| {
            BenchError::InvalidConfig(format!("cannot parse {}: {err}", path.display()))
        })
    }

    fn from_json_str_over(text: &str, base: &BenchmarkConfig) -> serde_json::Result<Self> {
        let mut plan: serde_json::Value = serde_json::from_str(text)?;
        let mut config = serde_json::to_value(base)?;
        if let (Some(merged), Some(file)) = (
            config.as_object_mut(),
            plan.get("config").and_then(serde_json::Value::as_object),
        ) {
            for (key, value) in file {
                merged.insert(key.clone(), value.clone());
            }
        }
        if let Some(obj) = plan.as_object_mut() {
            obj.insert("config".to_string(), config);
        }
        serde_json::from_value(plan)
    }
}

/// Parses a byte size with an optional binary suffix: `4096`, `64K`, `512M`,
/// `4G`, `1GiB`.
pub fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    let digits_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (num, suffix) = s.split_at(digits_end);
    let value: usize = num.parse().map_err(|_| format!("invalid size '{s}'"))?;
    let shift = match suffix.to_ascii_lowercase().trim_end_matches("ib").trim_end_matches('b') {
        "" => 0,
        "k" => 10,
        "m" => 20,
        "g" => 30,
        "t" => 40,
        _ => return Err(format!("invalid size suffix in '{s}'")),
    };
    value
        .checked_mul(1usize << shift)
        .ok_or_else(|| format!("size '{s}' overflows"))
}
