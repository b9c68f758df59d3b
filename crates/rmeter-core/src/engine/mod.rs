use serde::{Deserialize, Serialize};

pub mod aggregator;
pub mod autoscaler;
pub mod limiter;
pub mod runner;
pub mod scheduler;
pub mod worker;

pub use aggregator::{Metrics, TickAggregator, TickMetrics};
pub use runner::{Runner, RunnerHandle};

/// Lifecycle of a single run, start to finish. Transitions are one-way:
/// once a run leaves `Running` it never returns to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    #[default]
    Created,
    Running,
    /// Stopped by an external cancellation (ctrl-c, cluster shutdown).
    Cancelled,
    /// Reached `testTimeSecs` without being cancelled.
    TimedOut,
    /// A tick's success ratio fell below `successRatio`.
    RatioAborted,
    Shutdown,
    Terminated,
}

impl std::fmt::Display for RunnerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunnerState::Created => "created",
            RunnerState::Running => "running",
            RunnerState::Cancelled => "cancelled",
            RunnerState::TimedOut => "timed_out",
            RunnerState::RatioAborted => "ratio_aborted",
            RunnerState::Shutdown => "shutdown",
            RunnerState::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

impl RunnerState {
    /// Once a run reaches one of these it will not produce any more ticks.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunnerState::Shutdown | RunnerState::Terminated)
    }
}
