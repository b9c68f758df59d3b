use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::model::AttackResult;

/// Derived statistics for a completed tick. Quantiles are a nearest-rank
/// computation over the tick's full sample set - a tick's sample count is
/// bounded by its targetRps, so sorting the whole batch once per tick is
/// cheap compared to maintaining a streaming sketch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub requests: u64,
    pub target_rate: f64,
    pub rate: f64,
    pub success: f64,
    pub mean_ms: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub max_ms: u64,
    pub status_codes: HashMap<u16, u64>,
    pub errors: Vec<String>,
}

/// A finalized tick: the samples that closed it out, plus their derived
/// `Metrics`. Emitted by the aggregator exactly once per tick. `samples`
/// carries the raw per-request results so a node can forward the batch
/// upstream to a cluster controller without the controller having to
/// recompute anything the node didn't already compute for itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickMetrics {
    pub tick: u64,
    pub step: u64,
    pub target_rps: u32,
    pub metrics: Metrics,
    #[serde(default)]
    pub samples: Vec<AttackResult>,
}

struct TickBucket {
    step: u64,
    target_rps: u32,
    elapsed_ms: Vec<u64>,
    success_count: u64,
    status_codes: HashMap<u16, u64>,
    errors: Vec<String>,
    earliest: DateTime<Utc>,
    latest: DateTime<Utc>,
    samples: Vec<AttackResult>,
}

impl TickBucket {
    fn new(sample: &AttackResult) -> Self {
        TickBucket {
            step: sample.token.step,
            target_rps: sample.token.target_rps,
            elapsed_ms: Vec::new(),
            success_count: 0,
            status_codes: HashMap::new(),
            errors: Vec::new(),
            earliest: sample.begin,
            latest: sample.end,
            samples: Vec::new(),
        }
    }

    fn add(&mut self, sample: AttackResult) {
        self.elapsed_ms.push(sample.elapsed.as_millis() as u64);
        if sample.is_success() {
            self.success_count += 1;
        }
        if let Some(code) = sample.result.status_code {
            *self.status_codes.entry(code).or_insert(0) += 1;
        }
        if let Some(err) = &sample.result.error {
            if !self.errors.iter().any(|e| e == err) {
                self.errors.push(err.clone());
            }
        }
        if sample.begin < self.earliest {
            self.earliest = sample.begin;
        }
        if sample.end > self.latest {
            self.latest = sample.end;
        }
        self.samples.push(sample);
    }

    fn finalize(mut self) -> (Metrics, Vec<AttackResult>) {
        self.elapsed_ms.sort_unstable();
        let requests = self.elapsed_ms.len() as u64;
        let duration_secs = (self.latest - self.earliest).num_milliseconds().max(1) as f64 / 1000.0;
        let sum: u64 = self.elapsed_ms.iter().sum();
        let mean_ms = if requests > 0 { sum as f64 / requests as f64 } else { 0.0 };

        let metrics = Metrics {
            requests,
            target_rate: self.target_rps as f64,
            rate: requests as f64 / duration_secs,
            success: if requests > 0 { self.success_count as f64 / requests as f64 } else { 1.0 },
            mean_ms,
            p50_ms: percentile(&self.elapsed_ms, 0.50),
            p95_ms: percentile(&self.elapsed_ms, 0.95),
            p99_ms: percentile(&self.elapsed_ms, 0.99),
            max_ms: self.elapsed_ms.last().copied().unwrap_or(0),
            status_codes: self.status_codes,
            errors: self.errors,
        };
        (metrics, self.samples)
    }
}

/// Nearest-rank percentile over an already-sorted slice.
fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((p * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}

/// Groups incoming `AttackResult`s by tick and emits a `TickMetrics` the
/// moment a tick's sample count reaches its targetRps. Ticks older than the
/// current target rate can't straggle forever: once closed, a tick's bucket
/// is dropped, so a pathologically late sample for it is silently folded
/// into metrics.errors-less obscurity instead of reopening a finalized tick.
pub struct TickAggregator {
    buckets: Mutex<HashMap<u64, TickBucket>>,
}

impl TickAggregator {
    pub fn new() -> Self {
        TickAggregator {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Folds one sample into its tick's bucket. Returns the finalized
    /// `TickMetrics` if this sample closed out the tick.
    pub fn record(&self, sample: AttackResult) -> Option<TickMetrics> {
        let tick = sample.token.tick;
        let mut buckets = self.buckets.lock().expect("aggregator mutex poisoned");
        let bucket = buckets.entry(tick).or_insert_with(|| TickBucket::new(&sample));
        bucket.add(sample);

        if bucket.elapsed_ms.len() as u32 >= bucket.target_rps.max(1) {
            let bucket = buckets.remove(&tick).expect("just inserted");
            let step = bucket.step;
            let target_rps = bucket.target_rps;
            let (metrics, samples) = bucket.finalize();
            Some(TickMetrics {
                tick,
                step,
                target_rps,
                metrics,
                samples,
            })
        } else {
            None
        }
    }

    /// Number of ticks with at least one sample that haven't closed yet.
    pub fn open_tick_count(&self) -> usize {
        self.buckets.lock().expect("aggregator mutex poisoned").len()
    }
}

impl Default for TickAggregator {
    fn default() -> Self {
        Self::new()
    }
}
