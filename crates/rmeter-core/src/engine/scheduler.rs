use super::limiter::RateLimiter;
use crate::config::{RunnerConfig, SystemMode};
use crate::model::AttackToken;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Issues `AttackToken`s to the worker pool at a paced rate, steps the
/// target rate up every `stepDurationSecs`, and counts ticks as batches of
/// `targetRps` tokens go out - the same bookkeeping the original runner's
/// `schedule`/`rampUp` goroutines did, folded into one task.
pub struct Scheduler {
    tx: mpsc::Sender<AttackToken>,
    cancel: CancellationToken,
    limiter: Arc<RateLimiter>,
    system_mode: SystemMode,
    step_rps: u32,
    step_duration_ticks: u64,
    target_rps: AtomicU32,
    step: AtomicU64,
    tick: AtomicU64,
    ticks_in_step: AtomicU64,
}

impl Scheduler {
    pub fn new(cfg: &RunnerConfig, tx: mpsc::Sender<AttackToken>, cancel: CancellationToken) -> Self {
        let start_rps = if cfg.system_mode == SystemMode::UnboundRps {
            cfg.workers.max(1) * 100
        } else {
            cfg.start_rps.max(1)
        };
        Scheduler {
            tx,
            cancel,
            limiter: Arc::new(RateLimiter::new(start_rps)),
            system_mode: cfg.system_mode,
            step_rps: cfg.step_rps,
            step_duration_ticks: cfg.step_duration_secs.max(1),
            target_rps: AtomicU32::new(start_rps),
            // step and tick are 1-based per the data model (§3: "step
            // (int≥1)", "tick (int≥1)") so the first emitted token already
            // satisfies targetRPS == startRPS + stepRPS·(step−1).
            step: AtomicU64::new(1),
            tick: AtomicU64::new(1),
            ticks_in_step: AtomicU64::new(0),
        }
    }

    pub fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }

    pub fn current_target_rps(&self) -> u32 {
        self.target_rps.load(Ordering::Relaxed)
    }

    /// Runs until cancelled. Tokens that can't be delivered because the
    /// worker pool's channel is full are dropped rather than buffered -
    /// backpressure here would just turn into a queue of stale tokens, which
    /// is worse than a momentary gap in the offered load.
    pub async fn run(self: Arc<Self>) {
        let mut in_tick: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            if self.system_mode != SystemMode::UnboundRps {
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = self.limiter.take() => {}
                }
            }

            let token = AttackToken {
                target_rps: self.target_rps.load(Ordering::Relaxed),
                step: self.step.load(Ordering::Relaxed),
                tick: self.tick.load(Ordering::Relaxed),
            };
            if self.tx.try_send(token).is_err() {
                tracing::trace!("scheduler dropped a token, worker pool is saturated");
            }

            in_tick += 1;
            if in_tick >= token.target_rps.max(1) {
                in_tick = 0;
                self.tick.fetch_add(1, Ordering::Relaxed);
                let ticks_in_step = self.ticks_in_step.fetch_add(1, Ordering::Relaxed) + 1;
                if self.step_rps > 0 && ticks_in_step >= self.step_duration_ticks {
                    self.ticks_in_step.store(0, Ordering::Relaxed);
                    self.step.fetch_add(1, Ordering::Relaxed);
                    let new_rps = self.target_rps.fetch_add(self.step_rps, Ordering::Relaxed) + self.step_rps;
                    self.limiter.set_rate(new_rps);
                }
            }
        }
    }
}
