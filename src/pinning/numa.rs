//! NUMA node placement without libnuma.
//!
//! Binding a thread to a node has two halves:
//! - **CPU**: run only on the node's cores (from sysfs `cpulist`).
//! - **Memory**: `set_mempolicy(MPOL_BIND, {node})`, so pages first touched
//!   by this thread are faulted in from the node's local memory controller.
//!
//! The memory half is what makes a DRAM scan report a single-node ceiling
//! rather than an interleaved cross-node figure. It only affects pages
//! faulted *after* the call, so bind before allocating and filling buffers.

use std::path::PathBuf;

use super::affinity::{parse_cpu_list, CpuSet};
use crate::error::PinError;

const NODE_SYSFS_ROOT: &str = "/sys/devices/system/node";

/// `MPOL_BIND` from `<linux/mempolicy.h>`.
#[cfg(target_os = "linux")]
const MPOL_BIND: libc::c_long = 2;

fn node_dir(node: usize) -> PathBuf {
    PathBuf::from(NODE_SYSFS_ROOT).join(format!("node{node}"))
}

/// Returns the CPUs belonging to `node`.
///
/// # Errors
/// [`PinError::Unsupported`] if the kernel exposes no NUMA topology or the
/// node does not exist.
pub fn node_cpus(node: usize) -> Result<CpuSet, PinError> {
    let path = node_dir(node).join("cpulist");
    let list = std::fs::read_to_string(&path).map_err(|err| {
        PinError::Unsupported(format!("NUMA node {node} unavailable ({}): {err}", path.display()))
    })?;
    parse_cpu_list(&list)
}

/// Number of NUMA nodes the kernel reports, or `None` without NUMA sysfs.
pub fn node_count() -> Option<usize> {
    let entries = std::fs::read_dir(NODE_SYSFS_ROOT).ok()?;
    let count = entries
        .filter_map(Result::ok)
        .filter(|e| {
            e.file_name()
                .to_str()
                .and_then(|n| n.strip_prefix("node"))
                .is_some_and(|id| id.parse::<usize>().is_ok())
        })
        .count();
    Some(count)
}

/// Binds the calling thread's future allocations to `node`.
#[cfg(target_os = "linux")]
pub fn bind_memory_to_node(node: usize) -> Result<(), PinError> {
    let bits = libc::c_ulong::BITS as usize;
    let mut mask = vec![0 as libc::c_ulong; node / bits + 1];
    mask[node / bits] |= 1 << (node % bits);
    // The kernel reads `maxnode - 1` bits; pass one past the mask width.
    let maxnode = (mask.len() * bits + 1) as libc::c_ulong;

    // SAFETY: mask points to `mask.len()` initialized words and maxnode
    // does not exceed their bit width plus one.
    let rc = unsafe { libc::syscall(libc::SYS_set_mempolicy, MPOL_BIND, mask.as_ptr(), maxnode) };
    if rc != 0 {
        return Err(PinError::from_os(
            "set_mempolicy",
            std::io::Error::last_os_error(),
        ));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn bind_memory_to_node(_node: usize) -> Result<(), PinError> {
    Err(PinError::Unsupported(
        "NUMA memory policy is not supported on this platform".into(),
    ))
}

/// Restricts the calling thread to `node`, on `core` when given.
///
/// Returns the core set that was applied.
///
/// # Errors
/// - [`PinError::Unsupported`] if the node is absent or `core` is not one of
///   its CPUs.
/// - Any error from applying the mask or the memory policy.
pub fn bind_thread_to_node(node: usize, core: Option<usize>) -> Result<CpuSet, PinError> {
    let cpus = node_cpus(node)?;
    let target = match core {
        Some(core) => {
            if !cpus.is_set(core) {
                return Err(PinError::Unsupported(format!(
                    "core {core} is not on NUMA node {node} (node cpus {cpus:?})"
                )));
            }
            let mut one = CpuSet::new();
            one.set(core)?;
            one
        }
        None => cpus,
    };
    target.apply()?;
    bind_memory_to_node(node)?;
    Ok(target)
}
