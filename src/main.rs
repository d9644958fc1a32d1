//! Bandwidth Benchmark CLI
//!
//! Measures peak read bandwidth of memory regions and block devices, all
//! targets concurrently, one pinned thread each.
//!
//! # Targets
//!
//! Positional arguments are device/file paths or `mem:<size>[@<node>]`
//! memory regions (e.g. `mem:4G@0`). A `--config` plan file may list more.
//!
//! # Output Format
//!
//! Per-device results and the combined figure go to stdout. A stable
//! summary line goes to stderr:
//! `bandwidth_summary: devices=N ok=N failed=N outcome=... combined_gbps=...`
//!
//! # Exit Codes
//!
//! - `0`: At least one device measured successfully
//! - `1`: Every device failed
//! - `2`: Invalid arguments or configuration, or a mandatory setup failure

use std::env;
use std::path::PathBuf;
use std::process;
use std::str::FromStr;
use std::sync::Arc;

use bandwidth_rs::config::parse_size;
use bandwidth_rs::logging::init_logging;
use bandwidth_rs::{
    report, BenchmarkConfig, BenchmarkPlan, DeviceDescriptor, DirectIo, ExecutionContext,
    MultiDeviceCoordinator, NoopExecutionContext, PatternKind, PinnedExecutionContext,
    SetupPolicy,
};

fn print_usage(exe: &std::ffi::OsStr) {
    eprintln!(
        "usage: {} [OPTIONS] <target>...

TARGETS:
    <path>                  Block device or file (read with O_DIRECT)
    mem:<size>[@<node>]     Memory region, optionally bound to a NUMA node

OPTIONS:
    --config=<file>         JSON plan (config + devices); overrides --preset,
                            flags override both
    --preset=<name>         nvme | dram | quick (default: built-in defaults)
    --trials=<N>            Trials per device; best is reported (default: 3)
    --block-size=<size>     Transfer size, e.g. 4096, 1M, 512M (default: 64M)
    --block-count=<N>       Transfers per trial; 0 reads to EOF (default: 0)
    --cores=<a,b,...>       Pin target i to the i-th core
    --pattern=<p>           Fill/verify pattern: const:<0-255> | ramp
    --verify                Verify device checksums against --pattern
    --direct=<mode>         required | preferred | disabled (default: preferred)
    --no-prefetch           Disable software prefetch in memory scans
    --no-mlock              Do not lock memory-target pages
    --realtime              Request SCHED_FIFO for measurement threads
    --require-setup         Abort if pinning/priority/NUMA setup fails
    --no-pin                Skip all thread placement
    --all-trials            Print every trial, not just the best
    -v, --verbose           Debug logging (per-trial events)
    --help, -h              Show this help message",
        exe.to_string_lossy()
    );
}

fn usage_error(exe: &std::ffi::OsStr, msg: &str) -> ! {
    eprintln!("{msg}");
    print_usage(exe);
    process::exit(2);
}

fn parse_value<T: FromStr>(exe: &std::ffi::OsStr, flag: &str, value: &str) -> T {
    value
        .parse()
        .unwrap_or_else(|_| usage_error(exe, &format!("invalid {flag} value: {value}")))
}

#[derive(Default)]
struct Overrides {
    preset: Option<String>,
    trials: Option<u32>,
    block_size: Option<usize>,
    block_count: Option<u64>,
    pattern: Option<PatternKind>,
    direct: Option<DirectIo>,
    no_prefetch: bool,
    no_mlock: bool,
    realtime: bool,
    require_setup: bool,
}

fn main() {
    let mut args = env::args_os();
    let exe = args.next().unwrap_or_else(|| "bandwidth-rs".into());

    let mut overrides = Overrides::default();
    let mut config_path: Option<PathBuf> = None;
    let mut cores: Vec<usize> = Vec::new();
    let mut targets: Vec<DeviceDescriptor> = Vec::new();
    let mut verify = false;
    let mut no_pin = false;
    let mut all_trials = false;
    let mut verbose = false;

    for arg in args {
        let Some(flag) = arg.to_str() else {
            targets.push(DeviceDescriptor::block(PathBuf::from(arg)));
            continue;
        };
        if let Some(value) = flag.strip_prefix("--config=") {
            config_path = Some(PathBuf::from(value));
            continue;
        }
        if let Some(value) = flag.strip_prefix("--preset=") {
            overrides.preset = Some(value.to_string());
            continue;
        }
        if let Some(value) = flag.strip_prefix("--trials=") {
            overrides.trials = Some(parse_value(&exe, "--trials", value));
            continue;
        }
        if let Some(value) = flag.strip_prefix("--block-size=") {
            let size = parse_size(value).unwrap_or_else(|err| usage_error(&exe, &err));
            overrides.block_size = Some(size);
            continue;
        }
        if let Some(value) = flag.strip_prefix("--block-count=") {
            overrides.block_count = Some(parse_value(&exe, "--block-count", value));
            continue;
        }
        if let Some(value) = flag.strip_prefix("--cores=") {
            cores = value
                .split(',')
                .map(|core| parse_value::<usize>(&exe, "--cores", core.trim()))
                .collect();
            continue;
        }
        if let Some(value) = flag.strip_prefix("--pattern=") {
            let pattern = value
                .parse::<PatternKind>()
                .unwrap_or_else(|err| usage_error(&exe, &err));
            overrides.pattern = Some(pattern);
            continue;
        }
        if let Some(value) = flag.strip_prefix("--direct=") {
            overrides.direct = Some(match value {
                "required" => DirectIo::Required,
                "preferred" => DirectIo::Preferred,
                "disabled" => DirectIo::Disabled,
                _ => usage_error(&exe, &format!("invalid --direct value: {value}")),
            });
            continue;
        }
        match flag {
            "--verify" => verify = true,
            "--no-prefetch" => overrides.no_prefetch = true,
            "--no-mlock" => overrides.no_mlock = true,
            "--realtime" => overrides.realtime = true,
            "--require-setup" => overrides.require_setup = true,
            "--no-pin" => no_pin = true,
            "--all-trials" => all_trials = true,
            "-v" | "--verbose" => verbose = true,
            "--help" | "-h" => {
                print_usage(&exe);
                process::exit(0);
            }
            _ if flag.starts_with("--") => usage_error(&exe, &format!("unknown flag: {flag}")),
            _ => targets.push(
                DeviceDescriptor::parse(flag).unwrap_or_else(|err| usage_error(&exe, &err)),
            ),
        }
    }

    init_logging(verbose);

    // Precedence: preset, then the plan file, then flags.
    let base = match &overrides.preset {
        Some(name) => BenchmarkConfig::preset(name)
            .unwrap_or_else(|| usage_error(&exe, &format!("unknown preset: {name}"))),
        None => BenchmarkConfig::default(),
    };
    let plan = match &config_path {
        Some(path) => BenchmarkPlan::from_json_file_over(path, &base).unwrap_or_else(|err| {
            eprintln!("{err}");
            process::exit(2);
        }),
        None => BenchmarkPlan {
            config: base,
            devices: Vec::new(),
        },
    };
    let config = apply_overrides(plan.config, &overrides);

    let mut devices = plan.devices;
    devices.extend(targets);
    if devices.is_empty() {
        usage_error(&exe, "no targets given");
    }
    if cores.len() > devices.len() {
        usage_error(&exe, "more --cores than targets");
    }
    for (device, &core) in devices.iter_mut().zip(&cores) {
        *device = device.clone().on_core(core);
    }
    if verify {
        for device in &mut devices {
            *device = device.clone().verified_with(config.pattern);
        }
    }

    let context: Arc<dyn ExecutionContext> = if no_pin {
        Arc::new(NoopExecutionContext)
    } else {
        Arc::new(PinnedExecutionContext::new(config.realtime_priority))
    };
    let coordinator = MultiDeviceCoordinator::new(config, context);

    let aggregate = match coordinator.run_all(&devices) {
        Ok(aggregate) => aggregate,
        Err(err) => {
            eprintln!("error: {err}");
            process::exit(2);
        }
    };

    print!("{}", report::detailed(&aggregate, coordinator.config(), all_trials));
    eprintln!("{}", report::summary(&aggregate));
    process::exit(aggregate.exit_code());
}

fn apply_overrides(mut config: BenchmarkConfig, o: &Overrides) -> BenchmarkConfig {
    if let Some(trials) = o.trials {
        config.trial_count = trials;
    }
    if let Some(block_size) = o.block_size {
        config.block_size = block_size;
    }
    if let Some(block_count) = o.block_count {
        config.block_count = block_count;
    }
    if let Some(pattern) = o.pattern {
        config.pattern = pattern;
    }
    if let Some(direct) = o.direct {
        config.direct_io = direct;
    }
    if o.no_prefetch {
        config.use_prefetch = false;
    }
    if o.no_mlock {
        config.lock_memory = false;
    }
    if o.realtime {
        config.realtime_priority = true;
    }
    if o.require_setup {
        config.setup_policy = SetupPolicy::Required;
    }
    config
}
