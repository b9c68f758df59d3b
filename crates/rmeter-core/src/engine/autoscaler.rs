use super::aggregator::TickMetrics;
use super::worker::WorkerPool;
use std::sync::atomic::{AtomicU32, Ordering};

/// Grows the worker pool when observed throughput falls behind the target
/// rate, the same heuristic the original runner used: if a tick's rate is
/// under `scaleUntilPercent` of its target, and at least `scaleSkipTicks`
/// ticks have passed since the last scale-up, add `scaleAmount` more
/// workers. Growth is monotonic - the pool never shrinks mid-run.
pub struct Autoscaler {
    scale_amount: u32,
    scale_until_percent: f64,
    scale_skip_ticks: u32,
    ticks_since_scale: AtomicU32,
}

impl Autoscaler {
    pub fn new(scale_amount: u32, scale_until_percent: f64, scale_skip_ticks: u32) -> Self {
        Autoscaler {
            scale_amount,
            scale_until_percent,
            scale_skip_ticks,
            ticks_since_scale: AtomicU32::new(0),
        }
    }

    fn is_underperforming(&self, tick: &TickMetrics) -> bool {
        if tick.metrics.target_rate <= 0.0 {
            return false;
        }
        tick.metrics.rate / tick.metrics.target_rate < self.scale_until_percent
    }

    /// Observes one tick's metrics and spawns more workers if the pool is
    /// falling behind. Returns how many workers were added.
    pub async fn observe(&self, tick: &TickMetrics, pool: &WorkerPool) -> u32 {
        let ticks_since = self.ticks_since_scale.fetch_add(1, Ordering::Relaxed) + 1;
        if ticks_since < self.scale_skip_ticks {
            return 0;
        }
        if !self.is_underperforming(tick) {
            return 0;
        }
        self.ticks_since_scale.store(0, Ordering::Relaxed);
        pool.spawn_workers(self.scale_amount).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attacker::AttackerContext;
    use crate::config::{PrometheusOptions, ReportOptions, RunnerConfig, SystemMode, WorkerMode};
    use crate::engine::aggregator::Metrics;
    use crate::model::DoResult;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct NoopAttacker;

    #[async_trait]
    impl crate::attacker::Attacker for NoopAttacker {
        async fn setup(&mut self, _ctx: &AttackerContext) -> Result<(), crate::error::RmeterError> {
            Ok(())
        }
        async fn do_call(&mut self) -> DoResult {
            DoResult::ok("GET", 200, 0, 0)
        }
        async fn teardown(&mut self) -> Result<(), crate::error::RmeterError> {
            Ok(())
        }
        fn clone_attacker(&self) -> Box<dyn crate::attacker::Attacker> {
            Box::new(NoopAttacker)
        }
    }

    fn tick_metrics(rate: f64, target_rate: f64) -> TickMetrics {
        TickMetrics {
            tick: 0,
            step: 0,
            target_rps: target_rate as u32,
            metrics: Metrics {
                requests: 10,
                target_rate,
                rate,
                success: 1.0,
                mean_ms: 1.0,
                p50_ms: 1,
                p95_ms: 1,
                p99_ms: 1,
                max_ms: 1,
                status_codes: HashMap::new(),
                errors: vec![],
            },
            samples: vec![],
        }
    }

    fn pool() -> WorkerPool {
        let (_tx, rx) = mpsc::channel(8);
        let (result_tx, _result_rx) = mpsc::channel(8);
        WorkerPool::new(
            rx,
            result_tx,
            Box::new(NoopAttacker),
            AttackerContext {
                config: Arc::new(RunnerConfig {
                    target_url: "http://localhost".to_string(),
                    name: "test".to_string(),
                    system_mode: SystemMode::BoundRpsAutoscale,
                    worker_mode: WorkerMode::Synchronous,
                    attacker: "http".to_string(),
                    workers: 1,
                    attacker_timeout_secs: 1,
                    start_rps: 1,
                    step_rps: 0,
                    step_duration_secs: 0,
                    test_time_secs: 1,
                    wait_before_secs: 0,
                    success_ratio: 0.0,
                    fail_on_first_error: false,
                    dynamic_attackers: true,
                    scale_amount: 2,
                    scale_until_percent: 0.9,
                    scale_skip_ticks: 0,
                    dump_transport: false,
                    goroutines_dump: false,
                    report: ReportOptions::default(),
                    cluster: None,
                    prometheus: PrometheusOptions::default(),
                    log_level: "info".to_string(),
                    log_encoding: "text".to_string(),
                }),
                runner_name: "test".to_string(),
            },
            CancellationToken::new(),
            Duration::from_secs(1),
            WorkerMode::Synchronous,
        )
    }

    #[tokio::test]
    async fn scales_up_when_rate_lags_target() {
        let autoscaler = Autoscaler::new(2, 0.9, 0);
        let pool = pool();
        let added = autoscaler.observe(&tick_metrics(50.0, 100.0), &pool).await;
        assert_eq!(added, 2);
        assert_eq!(pool.worker_count().await, 2);
    }

    #[tokio::test]
    async fn does_not_scale_when_rate_keeps_up() {
        let autoscaler = Autoscaler::new(2, 0.9, 0);
        let pool = pool();
        let added = autoscaler.observe(&tick_metrics(99.0, 100.0), &pool).await;
        assert_eq!(added, 0);
    }

    #[tokio::test]
    async fn respects_skip_ticks_between_scale_events() {
        let autoscaler = Autoscaler::new(2, 0.9, 3);
        let pool = pool();
        assert_eq!(autoscaler.observe(&tick_metrics(50.0, 100.0), &pool).await, 0);
        assert_eq!(autoscaler.observe(&tick_metrics(50.0, 100.0), &pool).await, 0);
        assert_eq!(autoscaler.observe(&tick_metrics(50.0, 100.0), &pool).await, 2);
    }
}
