//! Bucketed rolling window of call outcomes.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Rolling counters reported by a circuit breaker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitStats {
    /// Calls that reached the breaker (including rejected ones).
    pub fires: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    /// Calls refused because the circuit was open.
    pub rejects: u64,
    /// Calls answered by the fallback function.
    pub fallbacks: u64,
    /// Mean latency of completed calls in the window.
    pub latency_mean_ms: u64,
}

impl CircuitStats {
    /// Completed calls that count towards the volume threshold.
    pub fn volume(&self) -> u64 {
        self.successes + self.failures + self.timeouts
    }

    /// Failed or timed out share of completed calls, 0-100.
    pub fn error_percentage(&self) -> u64 {
        match self.volume() {
            0 => 0,
            volume => (self.failures + self.timeouts) * 100 / volume,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Counts {
    pub fires: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub rejects: u64,
    pub fallbacks: u64,
    latency_total_ms: u64,
    latency_samples: u64,
}

impl Counts {
    pub fn add_latency(&mut self, latency: Duration) {
        self.latency_total_ms += latency.as_millis() as u64;
        self.latency_samples += 1;
    }
}

#[derive(Debug)]
struct Bucket {
    started_at: Instant,
    counts: Counts,
}

/// Fixed number of equal-width buckets covering `window`.
///
/// A bucket is opened lazily by the first event that falls outside the
/// newest one; buckets older than `window` are dropped on every access.
#[derive(Debug)]
pub(crate) struct RollingWindow {
    bucket_width: Duration,
    capacity: usize,
    buckets: VecDeque<Bucket>,
}

impl RollingWindow {
    pub fn new(window: Duration, buckets: u32) -> Self {
        let capacity = buckets.max(1);
        Self {
            bucket_width: (window / capacity).max(Duration::from_millis(1)),
            capacity: capacity as usize,
            buckets: VecDeque::with_capacity(capacity as usize),
        }
    }

    fn span(&self) -> Duration {
        self.bucket_width * self.capacity as u32
    }

    fn evict(&mut self, now: Instant) {
        let span = self.span();
        while let Some(front) = self.buckets.front() {
            if now.saturating_duration_since(front.started_at) >= span {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    /// Counters of the bucket covering `now`.
    pub fn current(&mut self, now: Instant) -> &mut Counts {
        self.evict(now);

        let needs_bucket = match self.buckets.back() {
            Some(back) => now.saturating_duration_since(back.started_at) >= self.bucket_width,
            None => true,
        };
        if needs_bucket {
            self.buckets.push_back(Bucket {
                started_at: now,
                counts: Counts::default(),
            });
            while self.buckets.len() > self.capacity {
                self.buckets.pop_front();
            }
        }

        let newest = self.buckets.len() - 1;
        &mut self.buckets[newest].counts
    }

    /// Sum of all live buckets.
    pub fn totals(&mut self, now: Instant) -> CircuitStats {
        self.evict(now);

        let mut sum = Counts::default();
        for bucket in &self.buckets {
            let c = &bucket.counts;
            sum.fires += c.fires;
            sum.successes += c.successes;
            sum.failures += c.failures;
            sum.timeouts += c.timeouts;
            sum.rejects += c.rejects;
            sum.fallbacks += c.fallbacks;
            sum.latency_total_ms += c.latency_total_ms;
            sum.latency_samples += c.latency_samples;
        }

        CircuitStats {
            fires: sum.fires,
            successes: sum.successes,
            failures: sum.failures,
            timeouts: sum.timeouts,
            rejects: sum.rejects,
            fallbacks: sum.fallbacks,
            latency_mean_ms: sum
                .latency_total_ms
                .checked_div(sum.latency_samples)
                .unwrap_or(0),
        }
    }

    pub fn reset(&mut self) {
        self.buckets.clear();
    }
}
