use serde::{Deserialize, Serialize};

/// Governs how the scheduler paces requests for the lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SystemMode {
    /// Rate limited, worker count fixed at `workers`.
    BoundRps,
    /// Rate limited, worker count grows when observed throughput lags target.
    BoundRpsAutoscale,
    /// No rate limiter; workers fire back to back, gated only by worker count.
    UnboundRps,
}

impl Default for SystemMode {
    fn default() -> Self {
        SystemMode::BoundRps
    }
}

/// Synchronous workers await one `Attacker::do_call` before pulling the next
/// token; asynchronous workers fire every token as a detached task. The
/// asynchronous mode reproduces the legacy "open world" behavior and is kept
/// only so old configs keep working - new runs should stay synchronous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkerMode {
    Synchronous,
    Asynchronous,
}

impl Default for WorkerMode {
    fn default() -> Self {
        WorkerMode::Synchronous
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportOptions {
    /// Directory the per-request and per-tick CSV logs are written to.
    /// `None` disables CSV reporting entirely.
    #[serde(default)]
    pub csv_dir: Option<String>,
    #[serde(default)]
    pub html_report: bool,
    /// Stream every request result, not just tick summaries. Expensive on
    /// high RPS runs since it multiplies the CSV writer's row count.
    #[serde(default)]
    pub stream_requests: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOptions {
    /// `host:port` addresses of rmeter-node instances to fan the run out to.
    #[serde(default)]
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusOptions {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_prometheus_port")]
    pub port: u16,
}

fn default_prometheus_port() -> u16 {
    2112
}

impl Default for PrometheusOptions {
    fn default() -> Self {
        PrometheusOptions {
            enabled: false,
            port: default_prometheus_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerConfig {
    pub target_url: String,
    pub name: String,
    #[serde(default)]
    pub system_mode: SystemMode,
    #[serde(default)]
    pub worker_mode: WorkerMode,
    /// Name the attacker was registered under; looked up in the registry.
    pub attacker: String,
    #[serde(default)]
    pub workers: u32,
    #[serde(default)]
    pub attacker_timeout_secs: u64,
    #[serde(default)]
    pub start_rps: u32,
    #[serde(default)]
    pub step_rps: u32,
    #[serde(default)]
    pub step_duration_secs: u64,
    pub test_time_secs: u64,
    #[serde(default)]
    pub wait_before_secs: u64,
    /// Minimum per-tick success ratio before the run aborts. 0 disables the check.
    #[serde(default)]
    pub success_ratio: f64,
    #[serde(default)]
    pub fail_on_first_error: bool,
    #[serde(default)]
    pub dynamic_attackers: bool,
    #[serde(default)]
    pub scale_amount: u32,
    #[serde(default)]
    pub scale_until_percent: f64,
    #[serde(default)]
    pub scale_skip_ticks: u32,
    #[serde(default)]
    pub dump_transport: bool,
    /// Logs active worker/task counts on shutdown instead of a goroutine
    /// stack dump, which has no Rust equivalent - kept as a named option
    /// since callers may already pass it in existing config files.
    #[serde(default)]
    pub goroutines_dump: bool,
    #[serde(default)]
    pub report: ReportOptions,
    #[serde(default)]
    pub cluster: Option<ClusterOptions>,
    #[serde(default)]
    pub prometheus: PrometheusOptions,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_encoding")]
    pub log_encoding: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_encoding() -> String {
    "text".to_string()
}

pub const DEFAULT_START_RPS: u32 = 10;
pub const DEFAULT_STEP_DURATION_SECS: u64 = 10;
pub const DEFAULT_SCALING_ATTACKERS_AMOUNT: u32 = 200;
pub const DEFAULT_SCALE_SKIP_TICKS: u32 = 1;
pub const DEFAULT_SCALE_UNTIL_PERCENT: f64 = 0.90;
pub const DEFAULT_ATTACKER_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_WORKERS: u32 = 1;
/// Sized generously so the aggregator can lag behind a bursty worker pool
/// without the channel itself becoming a second rate limiter.
pub const DEFAULT_RESULTS_QUEUE_CAPACITY: usize = 100_000;
/// Token channel stays much smaller than the results queue: a full token
/// channel just means the scheduler drops a token (see scheduler.rs), which
/// is the intended backpressure valve, not a failure mode to buffer around.
pub const DEFAULT_TOKEN_QUEUE_CAPACITY: usize = 4_096;

impl RunnerConfig {
    /// Accumulates every problem instead of stopping at the first, mirroring
    /// the rest of the config surface: callers see the whole list at once.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.target_url.trim().is_empty() {
            problems.push("targetUrl is required".to_string());
        }
        if self.name.trim().is_empty() {
            problems.push("name is required".to_string());
        }
        if self.attacker.trim().is_empty() {
            problems.push("attacker is required".to_string());
        }
        if self.test_time_secs == 0 {
            problems.push("testTimeSecs must be greater than zero".to_string());
        }
        if self.step_rps > 0 && self.step_duration_secs == 0 {
            problems.push("stepDurationSecs must be greater than zero when stepRps is set".to_string());
        }
        if !(0.0..=1.0).contains(&self.success_ratio) {
            problems.push("successRatio must be between 0 and 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.scale_until_percent) && self.scale_until_percent != 0.0 {
            problems.push("scaleUntilPercent must be between 0 and 1".to_string());
        }
        if let Some(cluster) = &self.cluster {
            if cluster.nodes.is_empty() {
                problems.push("cluster.nodes must not be empty when cluster options are set".to_string());
            }
        }

        problems
    }

    /// Fills in the zero-value fields the validator allows to be left blank.
    pub fn apply_defaults(&mut self) {
        if self.system_mode != SystemMode::UnboundRps && self.start_rps == 0 {
            self.start_rps = DEFAULT_START_RPS;
        }
        if self.step_rps > 0 && self.step_duration_secs == 0 {
            self.step_duration_secs = DEFAULT_STEP_DURATION_SECS;
        }
        if self.attacker_timeout_secs == 0 {
            self.attacker_timeout_secs = DEFAULT_ATTACKER_TIMEOUT_SECS;
        }
        if self.workers == 0 {
            self.workers = DEFAULT_WORKERS;
        }
        if self.dynamic_attackers {
            if self.scale_amount == 0 {
                self.scale_amount = DEFAULT_SCALING_ATTACKERS_AMOUNT;
            }
            if self.scale_skip_ticks == 0 {
                self.scale_skip_ticks = DEFAULT_SCALE_SKIP_TICKS;
            }
            if self.scale_until_percent == 0.0 {
                self.scale_until_percent = DEFAULT_SCALE_UNTIL_PERCENT;
            }
        }
    }
}
