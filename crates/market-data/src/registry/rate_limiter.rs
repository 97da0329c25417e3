//! Windowed token bucket rate limiter for data providers.
//!
//! Each provider key gets its own lane: a bucket of `points` tokens that is
//! refilled every `duration`, plus a FIFO admission queue. Callers that find
//! the bucket empty are not rejected; they wait in arrival order until the
//! next window opens. With `exec_evenly` grants are additionally spaced
//! out so a full bucket is not drained in one burst: by
//! `exec_evenly_min_delay` when set, otherwise by `duration / points`.
//!
//! The limiter sleeps on tokio time. An injected [`Clock`] decides window
//! boundaries, but a waiting `admit` still sleeps for the real (or paused
//! tokio) duration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::errors::MarketDataError;
use crate::models::Fetched;
use crate::provider::{DataProvider, SharedProvider};

/// Default tokens per window.
const DEFAULT_POINTS: u32 = 10;

/// Default window length in seconds.
const DEFAULT_DURATION_SECS: u64 = 1;

/// Rate limiter configuration for a provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Tokens available per window.
    pub points: u32,
    /// Window length in seconds.
    pub duration_secs: u64,
    /// Space grants out instead of admitting a full window at once.
    pub exec_evenly: bool,
    /// Minimum gap between two grants when `exec_evenly` is set; 0 spreads
    /// the window's points evenly over its duration.
    pub exec_evenly_min_delay_ms: u64,
}

impl RateLimitConfig {
    pub fn new(points: u32, duration_secs: u64) -> Self {
        Self {
            points,
            duration_secs,
            ..Default::default()
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn exec_evenly_min_delay(&self) -> Duration {
        Duration::from_millis(self.exec_evenly_min_delay_ms)
    }

    /// Gap enforced between two grants when `exec_evenly` is set.
    pub fn exec_evenly_spacing(&self) -> Duration {
        match self.exec_evenly_min_delay_ms {
            0 => self.duration() / self.points.max(1),
            _ => self.exec_evenly_min_delay(),
        }
    }

    pub fn validate(&self) -> Result<(), MarketDataError> {
        if self.points == 0 {
            return Err(MarketDataError::Config(
                "rate limit points must be greater than zero".to_string(),
            ));
        }
        if self.duration_secs == 0 {
            return Err(MarketDataError::Config(
                "rate limit duration must be at least one second".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            points: DEFAULT_POINTS,
            duration_secs: DEFAULT_DURATION_SECS,
            exec_evenly: false,
            exec_evenly_min_delay_ms: 0,
        }
    }
}

/// Token window for a single provider.
#[derive(Debug)]
struct Window {
    config: RateLimitConfig,
    /// Tokens left in the current window.
    remaining: u32,
    /// When the current window opened.
    started_at: Instant,
    /// Time of the most recent grant (for even spacing).
    last_grant: Option<Instant>,
}

impl Window {
    fn new(config: RateLimitConfig, now: Instant) -> Self {
        Self {
            remaining: config.points,
            config,
            started_at: now,
            last_grant: None,
        }
    }

    /// Open a fresh window once the current one has run its course.
    fn roll(&mut self, now: Instant) {
        if now.saturating_duration_since(self.started_at) >= self.config.duration() {
            self.started_at = now;
            self.remaining = self.config.points;
        }
    }

    /// Switch to `config` inside the current window. Tokens already spent
    /// stay spent; the new limit only caps what is left.
    fn reconfigure(&mut self, config: RateLimitConfig) {
        self.remaining = self.remaining.min(config.points);
        self.config = config;
    }

    /// Take a token, or report how long until one could be granted.
    fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        self.roll(now);

        if self.config.exec_evenly {
            if let Some(last) = self.last_grant {
                let since = now.saturating_duration_since(last);
                let spacing = self.config.exec_evenly_spacing();
                if since < spacing {
                    return Err(spacing - since);
                }
            }
        }

        if self.remaining == 0 {
            let window_end = self.started_at + self.config.duration();
            return Err(window_end.saturating_duration_since(now));
        }

        self.remaining -= 1;
        self.last_grant = Some(now);
        Ok(())
    }
}

/// Per-provider admission state.
#[derive(Debug)]
struct Lane {
    window: Mutex<Window>,
    /// Held for the whole time a caller is at the head of the queue.
    /// Tokio mutexes hand the lock out in request order.
    queue: tokio::sync::Mutex<()>,
    /// Callers waiting to reach the head of the queue.
    waiting: AtomicUsize,
}

impl Lane {
    fn new(config: RateLimitConfig, now: Instant) -> Self {
        Self {
            window: Mutex::new(Window::new(config, now)),
            queue: tokio::sync::Mutex::new(()),
            waiting: AtomicUsize::new(0),
        }
    }

    fn lock_window(&self) -> MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter window mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn try_take(&self, now: Instant) -> Result<(), Duration> {
        self.lock_window().try_take(now)
    }
}

/// Decrements the waiting count even if the admission future is dropped.
struct Waiting<'a>(&'a AtomicUsize);

impl<'a> Waiting<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Rate limiter for one or more providers.
///
/// Lanes are created on demand with the limiter's default configuration,
/// or can be pre-configured per provider. State is in-memory and process
/// local.
#[derive(Debug)]
pub struct RateLimiter {
    default_config: RateLimitConfig,
    lanes: Mutex<HashMap<String, Arc<Lane>>>,
    configs: Mutex<HashMap<String, RateLimitConfig>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a rate limiter whose lanes use `config`.
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    /// Create a rate limiter whose windows are measured on `clock`.
    ///
    /// `admit` still waits with `tokio::time::sleep`, so a manual clock only
    /// suits tests driving `try_admit` and `remaining_tokens`.
    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            default_config: config,
            lanes: Mutex::new(HashMap::new()),
            configs: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn lock_lanes(&self) -> MutexGuard<'_, HashMap<String, Arc<Lane>>> {
        self.lanes.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter lanes mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn lock_configs(&self) -> MutexGuard<'_, HashMap<String, RateLimitConfig>> {
        self.configs.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter configs mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Configure limits for a specific provider.
    ///
    /// A lane already in use keeps its queue and current window; tokens it
    /// has granted this window still count against the new limit.
    pub fn configure(&self, provider: &str, config: RateLimitConfig) {
        let mut configs = self.lock_configs();
        configs.insert(provider.to_string(), config.clone());
        drop(configs);

        let lane = self.lock_lanes().get(provider).cloned();
        if let Some(lane) = lane {
            debug!("Rate limiter: reconfiguring live lane for '{}'", provider);
            lane.lock_window().reconfigure(config);
        }
    }

    fn config_for(&self, provider: &str) -> RateLimitConfig {
        self.lock_configs()
            .get(provider)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone())
    }

    fn lane(&self, provider: &str) -> Arc<Lane> {
        let mut lanes = self.lock_lanes();
        if let Some(lane) = lanes.get(provider) {
            return Arc::clone(lane);
        }
        let lane = Arc::new(Lane::new(self.config_for(provider), self.clock.now()));
        lanes.insert(provider.to_string(), Arc::clone(&lane));
        lane
    }

    /// Wait until a token is available for `provider`, then consume it.
    ///
    /// Callers are admitted in arrival order. The token is taken at grant
    /// time, never while queued.
    pub async fn admit(&self, provider: &str) {
        let lane = self.lane(provider);

        let _turn = {
            let _waiting = Waiting::enter(&lane.waiting);
            lane.queue.lock().await
        };

        loop {
            let wait = match lane.try_take(self.clock.now()) {
                Ok(()) => {
                    debug!("Rate limiter: admitted call to '{}'", provider);
                    return;
                }
                Err(wait) => wait,
            };

            debug!(
                "Rate limiter: waiting {:?} for provider '{}' ({} queued)",
                wait,
                provider,
                lane.waiting.load(Ordering::SeqCst)
            );
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// Take a token without waiting.
    ///
    /// Fails when the bucket is empty or other callers are already queued,
    /// so it never jumps the queue.
    pub fn try_admit(&self, provider: &str) -> bool {
        let lane = self.lane(provider);
        let Ok(_turn) = lane.queue.try_lock() else {
            return false;
        };
        lane.try_take(self.clock.now()).is_ok()
    }

    /// Tokens left in the current window for `provider`.
    pub fn remaining_tokens(&self, provider: &str) -> u32 {
        let lane = self.lock_lanes().get(provider).cloned();
        match lane {
            Some(lane) => {
                let mut window = lane.lock_window();
                window.roll(self.clock.now());
                window.remaining
            }
            None => self.config_for(provider).points,
        }
    }

    /// Callers currently queued behind the head of `provider`'s lane.
    pub fn queued(&self, provider: &str) -> usize {
        self.lock_lanes()
            .get(provider)
            .map(|lane| lane.waiting.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// The configuration in effect for `provider`. This layer keeps no call
    /// counters.
    pub fn stats(&self, provider: &str) -> RateLimitConfig {
        self.config_for(provider)
    }

    /// Drop the lane for a provider, restoring a full bucket on next use.
    pub fn reset(&self, provider: &str) {
        self.lock_lanes().remove(provider);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

/// Provider gate that admits every call through a [`RateLimiter`].
pub struct RateLimitedProvider<R, T> {
    inner: SharedProvider<R, T>,
    limiter: Arc<RateLimiter>,
}

impl<R, T> RateLimitedProvider<R, T>
where
    R: Send + Sync + 'static,
    T: Send + 'static,
{
    /// Wrap `inner` with its own limiter.
    pub fn new(inner: SharedProvider<R, T>, config: RateLimitConfig) -> Self {
        Self::with_limiter(inner, Arc::new(RateLimiter::new(config)))
    }

    /// Wrap `inner` with an existing limiter, keyed by the provider's name.
    pub fn with_limiter(inner: SharedProvider<R, T>, limiter: Arc<RateLimiter>) -> Self {
        Self { inner, limiter }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn remaining_tokens(&self) -> u32 {
        self.limiter.remaining_tokens(self.inner.name())
    }
}

#[async_trait]
impl<R, T> DataProvider<R, T> for RateLimitedProvider<R, T>
where
    R: Send + Sync + 'static,
    T: Send + 'static,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    async fn fetch(&self, request: &R) -> Result<Fetched<T>, MarketDataError> {
        self.limiter.admit(self.inner.name()).await;
        self.inner.fetch(request).await
    }
}
