//! Human-readable and CI-friendly rendering of a run.
//!
//! `detailed` is the per-device listing printed by the CLI. `summary` is one
//! stable `key=value` line for scripts; its field order does not change.

use std::fmt::Write as _;

use crate::config::BenchmarkConfig;
use crate::coordinator::{AggregateResult, RunOutcome};

fn outcome_label(outcome: RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::Complete => "complete",
        RunOutcome::Partial => "partial",
        RunOutcome::Failed => "failed",
    }
}

/// One-line summary, stable for parsing.
pub fn summary(agg: &AggregateResult) -> String {
    format!(
        "bandwidth_summary: devices={} ok={} failed={} outcome={} combined_gbps={:.3} \
         max_device_gbps={:.3} wall_ms={:.1}",
        agg.per_device.len(),
        agg.successes(),
        agg.failures(),
        outcome_label(agg.outcome()),
        agg.combined_bandwidth,
        agg.max_bandwidth_per_device,
        agg.wall_time.as_secs_f64() * 1000.0,
    )
}

/// Per-device results: elapsed seconds, GB/s, and checksum of each device's
/// best trial, every trial when `all_trials` is set, then the combined line.
/// Checksums that were never compared against a pattern are marked
/// `(unverified)`.
pub fn detailed(agg: &AggregateResult, config: &BenchmarkConfig, all_trials: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Bandwidth: {} device(s), {} trial(s), block_size={} block_count={}",
        agg.per_device.len(),
        config.trial_count,
        config.block_size,
        if config.block_count == 0 {
            "eof".to_string()
        } else {
            config.block_count.to_string()
        },
    );

    for o in &agg.per_device {
        match &o.result {
            Ok(report) => {
                let best = report.best();
                let _ = writeln!(
                    out,
                    "  [{}] {}: {:.6} s  {:.3} GB/s  checksum={}{}{}",
                    o.device_id,
                    o.device,
                    best.elapsed.as_secs_f64(),
                    best.bandwidth_gbps(),
                    best.checksum,
                    if o.device.is_verified() { "" } else { " (unverified)" },
                    if report.any_truncated() { "  (truncated)" } else { "" },
                );
                if all_trials {
                    for t in &report.trials {
                        let _ = writeln!(
                            out,
                            "      trial {:2}: {:.6} s  {:.3} GB/s  bytes={}  cpu={:.3}s{}",
                            t.trial,
                            t.elapsed.as_secs_f64(),
                            t.bandwidth_gbps(),
                            t.bytes_moved,
                            t.cpu_time.as_secs_f64(),
                            if t.truncated { "  short" } else { "" },
                        );
                    }
                }
            }
            Err(err) => {
                let _ = writeln!(out, "  [{}] {}: FAILED: {}", o.device_id, o.device, err);
            }
        }
    }

    let _ = writeln!(
        out,
        "Combined: {:.3} GB/s ({} of {} devices)",
        agg.combined_bandwidth,
        agg.successes(),
        agg.per_device.len(),
    );
    out
}
