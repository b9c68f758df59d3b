use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use prometheus::Registry;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::aggregator::{TickAggregator, TickMetrics};
use super::autoscaler::Autoscaler;
use super::scheduler::Scheduler;
use super::worker::WorkerPool;
use super::RunnerState;
use crate::attacker::{attacker_from_registry, AttackerContext};
use crate::config::{RunnerConfig, SystemMode, DEFAULT_RESULTS_QUEUE_CAPACITY, DEFAULT_TOKEN_QUEUE_CAPACITY};
use crate::error::RmeterError;
use crate::metrics::PromReporter;
use crate::results::report::{render_html_report, Report};
use crate::results::RunSummary;

/// What callers outside the run get to touch: a cancel handle and a live
/// view of the state machine. The node service uses `is_busy` to reject a
/// second `Run` while one is already in flight; a ctrl-c handler just calls
/// `cancel()`.
#[derive(Clone)]
pub struct RunnerHandle {
    cancel: CancellationToken,
    state: Arc<RwLock<RunnerState>>,
}

impl RunnerHandle {
    pub fn state(&self) -> RunnerState {
        *self.state.read().expect("runner state poisoned")
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_busy(&self) -> bool {
        !self.state().is_terminal()
    }
}

/// Wires the rate limiter, worker pool, tick aggregator and autoscaler
/// together under one cancellation token and a bounded test deadline - the
/// Run Orchestrator of the engine. Owns everything it creates; nothing it
/// spawns outlives `run`'s return.
pub struct Runner {
    cfg: RunnerConfig,
    cancel: CancellationToken,
    state: Arc<RwLock<RunnerState>>,
}

impl Runner {
    pub fn new(cfg: RunnerConfig) -> Self {
        Self::with_parent_cancellation(cfg, CancellationToken::new())
    }

    /// `parent` lets an external owner (ctrl-c handler, cluster node
    /// service) cancel the run without reaching into its internals - the
    /// runner's own token is a child, so parent cancellation always wins
    /// and a run can never keep its workers alive past it.
    pub fn with_parent_cancellation(cfg: RunnerConfig, parent: CancellationToken) -> Self {
        Runner {
            cfg,
            cancel: parent.child_token(),
            state: Arc::new(RwLock::new(RunnerState::Created)),
        }
    }

    pub fn handle(&self) -> RunnerHandle {
        RunnerHandle {
            cancel: self.cancel.clone(),
            state: self.state.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    fn set_state(&self, s: RunnerState) {
        *self.state.write().expect("runner state poisoned") = s;
    }

    /// Runs to completion: validates the config, pre-clones the worker
    /// pool, launches the scheduler and aggregator, and blocks until the
    /// run is cancelled, the ratio aborts it, or `testTimeSecs` elapses.
    /// `tick_tx`, if given, receives every finalized tick as it closes -
    /// this is how a node service forwards per-tick batches to a cluster
    /// controller without the controller reaching into the aggregator.
    pub async fn run(mut self, tick_tx: Option<mpsc::Sender<TickMetrics>>) -> Result<RunSummary, RmeterError> {
        let problems = self.cfg.validate();
        if !problems.is_empty() {
            return Err(RmeterError::Validation(problems));
        }
        self.cfg.apply_defaults();

        let attacker_prototype = attacker_from_registry(&self.cfg.attacker)?;
        let cfg = Arc::new(self.cfg.clone());
        let ctx = AttackerContext {
            config: cfg.clone(),
            runner_name: cfg.name.clone(),
        };

        let (token_tx, token_rx) = mpsc::channel(DEFAULT_TOKEN_QUEUE_CAPACITY);
        let (result_tx, mut result_rx) = mpsc::channel(DEFAULT_RESULTS_QUEUE_CAPACITY);

        let pool = Arc::new(WorkerPool::new(
            token_rx,
            result_tx,
            attacker_prototype,
            ctx,
            self.cancel.clone(),
            Duration::from_secs(cfg.attacker_timeout_secs),
            cfg.worker_mode,
        ));
        pool.spawn_initial(cfg.workers).await?;

        let scheduler = Arc::new(Scheduler::new(&cfg, token_tx, self.cancel.clone()));
        let aggregator = TickAggregator::new();
        let autoscaler = if cfg.system_mode == SystemMode::BoundRpsAutoscale {
            Some(Autoscaler::new(cfg.scale_amount, cfg.scale_until_percent, cfg.scale_skip_ticks))
        } else {
            None
        };

        let run_id = Uuid::new_v4();
        let mut report = Report::new(&cfg.name, &cfg.report, run_id, Utc::now().timestamp())?;
        let registry = Registry::new();
        let prom = PromReporter::new(&registry, &cfg.name, cfg.prometheus.enabled)
            .map_err(|e| RmeterError::Internal(e.to_string()))?;

        let failed = AtomicBool::new(false);
        let mut per_tick_rates: Vec<f64> = Vec::new();
        let mut html_ticks: Vec<TickMetrics> = Vec::new();
        let mut total_requests: u64 = 0;
        let mut terminal_state = RunnerState::TimedOut;
        let mut scheduler_handle: Option<tokio::task::JoinHandle<()>> = None;

        let cancelled_before_start = if cfg.wait_before_secs > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(cfg.wait_before_secs)) => false,
                _ = self.cancel.cancelled() => true,
            }
        } else {
            false
        };

        if cancelled_before_start {
            terminal_state = RunnerState::Cancelled;
        } else {
            self.set_state(RunnerState::Running);
            scheduler_handle = Some(tokio::spawn(scheduler.run()));

            let deadline = tokio::time::sleep(Duration::from_secs(cfg.test_time_secs));
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        terminal_state = if failed.load(Ordering::Relaxed) {
                            RunnerState::RatioAborted
                        } else {
                            RunnerState::Cancelled
                        };
                        break;
                    }
                    _ = &mut deadline => {
                        terminal_state = RunnerState::TimedOut;
                        break;
                    }
                    maybe_result = result_rx.recv() => {
                        let Some(result) = maybe_result else { break; };
                        if cfg.report.stream_requests {
                            let _ = report.write_request(&result);
                        }
                        if let Some(tick) = aggregator.record(result) {
                            total_requests += tick.metrics.requests;
                            per_tick_rates.push(tick.metrics.rate);

                            let request_label = tick
                                .samples
                                .first()
                                .map(|s| s.result.request_label.clone())
                                .unwrap_or_else(|| cfg.attacker.clone());
                            let _ = report.write_tick(&tick, &request_label);
                            prom.report_tick(&tick.metrics);
                            if cfg.report.html_report {
                                html_ticks.push(TickMetrics {
                                    tick: tick.tick,
                                    step: tick.step,
                                    target_rps: tick.target_rps,
                                    metrics: tick.metrics.clone(),
                                    samples: Vec::new(),
                                });
                            }
                            tracing::info!(
                                runner = %cfg.name,
                                tick = tick.tick,
                                step = tick.step,
                                rate = tick.metrics.rate,
                                success = tick.metrics.success,
                                p50_ms = tick.metrics.p50_ms,
                                p95_ms = tick.metrics.p95_ms,
                                p99_ms = tick.metrics.p99_ms,
                                "tick complete"
                            );

                            if cfg.success_ratio > 0.0 && tick.metrics.success < cfg.success_ratio {
                                failed.store(true, Ordering::Relaxed);
                                self.cancel.cancel();
                            }

                            if let Some(autoscaler) = &autoscaler {
                                autoscaler.observe(&tick, &pool).await;
                            }

                            if let Some(tx) = &tick_tx {
                                if tx.send(tick).await.is_err() {
                                    tracing::trace!("tick receiver dropped, continuing the run locally");
                                }
                            }
                        }
                    }
                }
            }
        }

        self.cancel.cancel();
        self.set_state(terminal_state);
        if cfg.goroutines_dump {
            tracing::info!(
                runner = %cfg.name,
                active_workers = pool.worker_count().await,
                scheduler_running = scheduler_handle.is_some(),
                "shutdown: active task counts"
            );
        }
        if let Some(h) = scheduler_handle {
            h.abort();
        }
        pool.join().await;
        let _ = report.flush();
        if cfg.report.html_report {
            if let Some(dir) = &cfg.report.csv_dir {
                let html = render_html_report(&cfg.name, &html_ticks);
                let path = std::path::Path::new(dir).join(format!("report_{}_{}_{}.html", cfg.name, run_id.as_hyphenated(), Utc::now().timestamp()));
                if let Err(e) = std::fs::write(&path, html) {
                    tracing::warn!(error = %e, path = %path.display(), "failed to write HTML report");
                }
            }
        }
        self.set_state(RunnerState::Shutdown);
        self.set_state(RunnerState::Terminated);

        let max_rps = per_tick_rates
            .iter()
            .cloned()
            .fold(None, |acc: Option<f64>, r| Some(acc.map_or(r, |m| m.max(r))))
            .unwrap_or(1.0);

        Ok(RunSummary {
            max_rps,
            total_requests,
            failed: failed.load(Ordering::Relaxed),
        })
    }
}
