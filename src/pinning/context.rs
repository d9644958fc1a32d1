//! Injected thread-placement policy.
//!
//! Workers never touch affinity, NUMA, or scheduling state directly; they ask
//! the [`ExecutionContext`] they were handed. Production runs use
//! [`PinnedExecutionContext`]; tests and unprivileged runs substitute
//! [`NoopExecutionContext`].

use tracing::debug;

use super::{affinity, numa, priority};
use crate::error::PinError;

/// What a successful [`ExecutionContext::bind`] actually applied.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BindReport {
    /// Cores the thread is now restricted to (empty if unchanged).
    pub cores: Vec<usize>,
    /// NUMA node memory is bound to, if any.
    pub numa_node: Option<usize>,
    /// `SCHED_FIFO` priority applied, if any.
    pub realtime_priority: Option<i32>,
}

/// Places the calling thread before timed work.
///
/// Binding is irreversible for the thread's lifetime and must run on the
/// worker thread itself, before it allocates or touches its buffers.
pub trait ExecutionContext: Send + Sync {
    /// Constrains the calling thread to `core_id` and/or `numa_node`.
    fn bind(&self, core_id: Option<usize>, numa_node: Option<usize>)
        -> Result<BindReport, PinError>;

    /// Short name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Real placement: core affinity, NUMA memory policy, optional `SCHED_FIFO`.
#[derive(Clone, Copy, Debug, Default)]
pub struct PinnedExecutionContext {
    realtime: bool,
}

impl PinnedExecutionContext {
    pub fn new(realtime: bool) -> Self {
        Self { realtime }
    }

    pub fn realtime(&self) -> bool {
        self.realtime
    }
}

impl ExecutionContext for PinnedExecutionContext {
    fn bind(
        &self,
        core_id: Option<usize>,
        numa_node: Option<usize>,
    ) -> Result<BindReport, PinError> {
        let mut report = BindReport::default();

        match (numa_node, core_id) {
            (Some(node), core) => {
                if numa::node_count().unwrap_or(0) == 0 {
                    return Err(PinError::Unsupported(
                        "kernel exposes no NUMA topology".into(),
                    ));
                }
                let cores = numa::bind_thread_to_node(node, core)?;
                report.cores = cores.iter().collect();
                report.numa_node = Some(node);
            }
            (None, Some(core)) => {
                affinity::pin_current_thread_to_core(core)?;
                report.cores = vec![core];
            }
            (None, None) => {}
        }

        if self.realtime {
            report.realtime_priority = Some(priority::elevate_to_realtime()?);
        }

        debug!(
            cores = ?report.cores,
            numa_node = ?report.numa_node,
            rt_priority = ?report.realtime_priority,
            "thread placed"
        );
        Ok(report)
    }

    fn name(&self) -> &'static str {
        "pinned"
    }
}

/// Placement that changes nothing and always succeeds.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopExecutionContext;

impl ExecutionContext for NoopExecutionContext {
    fn bind(&self, _core_id: Option<usize>, _numa_node: Option<usize>) -> Result<BindReport, PinError> {
        Ok(BindReport::default())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_binds_nothing() {
        let report = NoopExecutionContext.bind(Some(3), Some(1)).unwrap();
        assert_eq!(report, BindReport::default());
    }

    #[test]
    fn pinned_rejects_invalid_core() {
        let ctx = PinnedExecutionContext::new(false);
        let err = std::thread::spawn(move || ctx.bind(Some(usize::MAX), None))
            .join()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, PinError::InvalidCore { .. }));
    }

    #[test]
    fn pinned_rejects_absent_numa_node() {
        let ctx = PinnedExecutionContext::new(false);
        let err = std::thread::spawn(move || ctx.bind(None, Some(100_000)))
            .join()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, PinError::Unsupported(_)));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn pinned_core_binding_reports_core() {
        let Some(core) = affinity::first_allowed_cpu() else {
            return;
        };
        let ctx = PinnedExecutionContext::new(false);
        let report = std::thread::spawn(move || ctx.bind(Some(core), None))
            .join()
            .unwrap()
            .unwrap();
        assert_eq!(report.cores, vec![core]);
        assert_eq!(report.numa_node, None);
    }
}
