use crate::engine::aggregator::Metrics;
use prometheus::{Gauge, Opts, Registry};

/// Updates the `loaderbot_tick_*` gauges after each completed tick. Exposing
/// them over HTTP is a caller concern (the `/metrics` exporter endpoint is
/// out of scope here) - this type only owns the gauge values and registers
/// them with a `Registry` the caller can mount wherever it likes.
pub struct PromReporter {
    enabled: bool,
    rps: Gauge,
    success_ratio: Gauge,
    p50: Gauge,
    p95: Gauge,
    p99: Gauge,
    max: Gauge,
}

impl PromReporter {
    /// Builds and registers one gauge per metric, each labeled with
    /// `runner_name` via a const label so a single process hosting multiple
    /// runners (e.g. during tests) doesn't collide on metric names.
    pub fn new(registry: &Registry, runner_name: &str, enabled: bool) -> Result<Self, prometheus::Error> {
        let gauge = |name: &str, help: &str| -> Result<Gauge, prometheus::Error> {
            let opts = Opts::new(name, help).const_label("runner_name", runner_name);
            let gauge = Gauge::with_opts(opts)?;
            registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        };

        Ok(PromReporter {
            enabled,
            rps: gauge("loaderbot_tick_rps", "Requests per second rate")?,
            success_ratio: gauge("loaderbot_tick_success_ratio", "Success requests ratio")?,
            p50: gauge("loaderbot_tick_p50", "Response time 50 percentile, ms")?,
            p95: gauge("loaderbot_tick_p95", "Response time 95 percentile, ms")?,
            p99: gauge("loaderbot_tick_p99", "Response time 99 percentile, ms")?,
            max: gauge("loaderbot_tick_max", "Response time max, ms")?,
        })
    }

    pub fn report_tick(&self, metrics: &Metrics) {
        if !self.enabled {
            return;
        }
        self.rps.set(metrics.rate);
        self.success_ratio.set(metrics.success);
        self.p50.set(metrics.p50_ms as f64);
        self.p95.set(metrics.p95_ms as f64);
        self.p99.set(metrics.p99_ms as f64);
        self.max.set(metrics.max_ms as f64);
    }
}
