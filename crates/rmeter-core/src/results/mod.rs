pub mod report;

pub use report::Report;

use crate::engine::aggregator::TickMetrics;
use serde::{Deserialize, Serialize};

/// What a finished run hands back to whoever started it: the largest
/// per-tick rate actually observed across the run, falling back to `1.0`
/// if no tick ever closed (the run was cancelled before completing one) so
/// callers never divide by zero downstream.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub max_rps: f64,
    pub total_requests: u64,
    pub failed: bool,
}

/// Folds a stream of finalized ticks into the overall `RunSummary`. Used by
/// callers (e.g. the cluster controller) that collect their own
/// `TickMetrics` rather than driving a `Runner` directly; `Runner::run`
/// accumulates the same numbers incrementally as ticks close rather than
/// holding the whole tick history just to call this at the end.
pub fn summarize(ticks: &[TickMetrics]) -> RunSummary {
    let mut summary = RunSummary { max_rps: 1.0, ..RunSummary::default() };
    let mut saw_a_tick = false;
    for tick in ticks {
        if !saw_a_tick || tick.metrics.rate > summary.max_rps {
            summary.max_rps = tick.metrics.rate;
        }
        saw_a_tick = true;
        summary.total_requests += tick.metrics.requests;
        if tick.metrics.success < 1.0 && !tick.metrics.errors.is_empty() {
            summary.failed = true;
        }
    }
    summary
}
