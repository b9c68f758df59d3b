use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Smoothed rate limiter: `take()` resolves at evenly spaced instants rather
/// than in bursts, the same leaky-bucket behavior the original runner got
/// from its Go rate limiter. The rate can be swapped out mid-run - each
/// `take()` call reads the current interval fresh, so a rate change at a
/// step boundary is picked up by the very next call without reconstructing
/// the limiter.
pub struct RateLimiter {
    interval_nanos: AtomicU64,
    next_slot: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(rps: u32) -> Self {
        RateLimiter {
            interval_nanos: AtomicU64::new(interval_for(rps)),
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Atomically swaps the pacing rate. Safe to call concurrently with
    /// in-flight `take()` calls.
    pub fn set_rate(&self, rps: u32) {
        self.interval_nanos.store(interval_for(rps), Ordering::Relaxed);
    }

    /// Resolves once the next slot for this rate has arrived, sleeping if
    /// necessary. Never waits less than the configured interval since the
    /// last issued slot, even if called in a tight loop.
    pub async fn take(&self) {
        let interval = Duration::from_nanos(self.interval_nanos.load(Ordering::Relaxed));
        let now = Instant::now();
        let slot = {
            let mut next_slot = self.next_slot.lock().expect("limiter mutex poisoned");
            let slot = if now > *next_slot { now } else { *next_slot };
            *next_slot = slot + interval;
            slot
        };
        if slot > now {
            tokio::time::sleep_until(slot).await;
        }
    }
}

fn interval_for(rps: u32) -> u64 {
    if rps == 0 {
        return Duration::from_secs(1).as_nanos() as u64;
    }
    (Duration::from_secs(1).as_nanos() / rps as u128) as u64
}
