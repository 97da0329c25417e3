//! Per-provider circuit breaker for fault tolerance.
//!
//! Implements the circuit breaker pattern to prevent cascading failures
//! when a provider is experiencing issues. The circuit has three states:
//!
//! - **Closed**: Normal operation, calls are allowed through.
//! - **Open**: Provider is failing, calls fail fast without reaching it.
//! - **HalfOpen**: Reset timeout elapsed, the next call is let through as a probe.
//!
//! The circuit opens when, within the rolling window, the number of
//! completed calls reaches `volume_threshold` and the share of failures and
//! timeouts reaches `error_threshold_percentage`. `Open -> HalfOpen` is
//! evaluated lazily from the time the circuit opened; there is no timer.
//!
//! The circuit breaker is in-memory and resets on application restart.

use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::rolling::{CircuitStats, RollingWindow};
use crate::clock::{Clock, SystemClock};
use crate::errors::MarketDataError;
use crate::models::Fetched;
use crate::provider::{DataProvider, SharedProvider};

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - calls are allowed.
    Closed,
    /// Provider is failing - calls are rejected.
    Open,
    /// Testing recovery - one probe call allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CircuitBreakerConfig {
    /// Per-call deadline. Zero disables the deadline.
    pub timeout_ms: u64,
    /// Error share (0-100) of completed calls at which the circuit opens.
    pub error_threshold_percentage: u8,
    /// Time an open circuit waits before letting a probe through.
    pub reset_timeout_ms: u64,
    /// Completed calls required in the window before the circuit may open.
    pub volume_threshold: u32,
    /// Length of the rolling statistics window.
    pub rolling_count_timeout_ms: u64,
    /// Number of buckets the rolling window is split into.
    pub rolling_count_buckets: u32,
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Option<Duration> {
        match self.timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn rolling_window(&self) -> Duration {
        Duration::from_millis(self.rolling_count_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), MarketDataError> {
        if self.error_threshold_percentage > 100 {
            return Err(MarketDataError::Config(format!(
                "error threshold percentage must be 0-100, got {}",
                self.error_threshold_percentage
            )));
        }
        if self.rolling_count_buckets == 0 {
            return Err(MarketDataError::Config(
                "rolling window needs at least one bucket".to_string(),
            ));
        }
        if self.rolling_count_timeout_ms < u64::from(self.rolling_count_buckets) {
            return Err(MarketDataError::Config(
                "rolling window must be at least one millisecond per bucket".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            error_threshold_percentage: 50,
            reset_timeout_ms: 30_000,
            volume_threshold: 5,
            rolling_count_timeout_ms: 10_000,
            rolling_count_buckets: 10,
        }
    }
}

/// Outcome of a call that was let through.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CallOutcome {
    Success,
    Failure,
    Timeout,
}

/// Decision taken by [`CircuitBreaker::try_acquire`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Admission {
    /// Circuit closed, call normally.
    Allowed,
    /// Circuit half-open and this call is the single probe. Carries the
    /// probe's generation so a replaced probe cannot decide the state.
    Probe(u64),
    /// Circuit open (or a probe is already in flight).
    Rejected,
    /// Breaker disabled, call without recording anything.
    Bypass,
    /// Breaker shut down.
    Shutdown,
}

/// Internal circuit state.
#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    /// When the circuit last opened (for the reset timeout).
    opened_at: Option<Instant>,
    /// Whether the half-open probe has been handed out.
    probe_in_flight: bool,
    probe_started_at: Option<Instant>,
    /// Generation of the most recently handed out probe.
    probe_generation: u64,
    enabled: bool,
    shut_down: bool,
    window: RollingWindow,
}

impl Circuit {
    fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            opened_at: None,
            probe_in_flight: false,
            probe_started_at: None,
            probe_generation: 0,
            enabled: true,
            shut_down: false,
            window: RollingWindow::new(config.rolling_window(), config.rolling_count_buckets),
        }
    }
}

/// Snapshot of a circuit for status reporting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub name: String,
    pub closed: bool,
    pub opened: bool,
    pub half_open: bool,
    pub enabled: bool,
    pub stats: CircuitStats,
}

/// Circuit breaker for a single provider.
///
/// Thread-safe state machine plus rolling statistics. Callers ask for
/// admission with [`try_acquire`](Self::try_acquire), run the call, then
/// report the outcome with [`record`](Self::record). State is re-read when
/// the outcome is recorded, so a slow call finishing after the circuit
/// changed state never overrides a newer decision.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    circuit: Mutex<Circuit>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, SystemClock::shared())
    }

    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            circuit: Mutex::new(Circuit::new(&config)),
            config,
            clock,
        }
    }

    /// Lock the circuit mutex, recovering from poison if necessary.
    fn lock_circuit(&self) -> MutexGuard<'_, Circuit> {
        self.circuit.lock().unwrap_or_else(|poisoned| {
            warn!("Circuit breaker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Open -> HalfOpen once the reset timeout has elapsed.
    fn advance(&self, circuit: &mut Circuit, now: Instant) {
        if circuit.state != CircuitState::Open {
            return;
        }
        let elapsed = circuit
            .opened_at
            .map(|opened_at| now.saturating_duration_since(opened_at))
            .unwrap_or_default();
        if elapsed >= self.config.reset_timeout() {
            info!(
                "Circuit breaker: transitioning '{}' from Open to HalfOpen",
                self.name
            );
            circuit.state = CircuitState::HalfOpen;
            circuit.probe_in_flight = false;
        }
    }

    fn open(&self, circuit: &mut Circuit, now: Instant) {
        circuit.state = CircuitState::Open;
        circuit.opened_at = Some(now);
        circuit.probe_in_flight = false;
    }

    fn should_trip(&self, circuit: &mut Circuit, now: Instant) -> bool {
        let stats = circuit.window.totals(now);
        stats.volume() >= u64::from(self.config.volume_threshold)
            && stats.error_percentage() >= u64::from(self.config.error_threshold_percentage)
    }

    /// A probe whose caller went away never reports back.
    fn probe_abandoned(&self, circuit: &Circuit, now: Instant) -> bool {
        circuit
            .probe_started_at
            .is_some_and(|started| {
                now.saturating_duration_since(started) >= self.config.reset_timeout()
            })
    }

    /// Decide whether a call may proceed.
    pub fn try_acquire(&self) -> Admission {
        let now = self.clock.now();
        let mut circuit = self.lock_circuit();

        if circuit.shut_down {
            return Admission::Shutdown;
        }
        if !circuit.enabled {
            return Admission::Bypass;
        }

        circuit.window.current(now).fires += 1;
        self.advance(&mut circuit, now);

        match circuit.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::HalfOpen
                if !circuit.probe_in_flight || self.probe_abandoned(&circuit, now) =>
            {
                debug!("Circuit breaker: sending probe to '{}'", self.name);
                circuit.probe_in_flight = true;
                circuit.probe_started_at = Some(now);
                circuit.probe_generation += 1;
                Admission::Probe(circuit.probe_generation)
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                circuit.window.current(now).rejects += 1;
                Admission::Rejected
            }
        }
    }

    /// Record the outcome of a call admitted with `admission`.
    pub fn record(&self, admission: Admission, outcome: CallOutcome, latency: Duration) {
        if !matches!(admission, Admission::Allowed | Admission::Probe(_)) {
            return;
        }

        let now = self.clock.now();
        let mut circuit = self.lock_circuit();

        let counts = circuit.window.current(now);
        match outcome {
            CallOutcome::Success => counts.successes += 1,
            CallOutcome::Failure => counts.failures += 1,
            CallOutcome::Timeout => counts.timeouts += 1,
        }
        counts.add_latency(latency);

        // Only the live probe of a still half-open circuit decides its state.
        let admission = match admission {
            Admission::Probe(generation)
                if circuit.state != CircuitState::HalfOpen
                    || !circuit.probe_in_flight
                    || circuit.probe_generation != generation =>
            {
                debug!(
                    "Circuit breaker: stale probe result for '{}' (state {})",
                    self.name, circuit.state
                );
                Admission::Allowed
            }
            admission => admission,
        };

        match (admission, outcome) {
            (Admission::Probe(_), CallOutcome::Success) => {
                info!(
                    "Circuit breaker: closing circuit for '{}' after successful probe",
                    self.name
                );
                circuit.state = CircuitState::Closed;
                circuit.opened_at = None;
                circuit.probe_in_flight = false;
                circuit.window.reset();
            }
            (Admission::Probe(_), _) => {
                info!(
                    "Circuit breaker: reopening circuit for '{}' after failed probe",
                    self.name
                );
                self.open(&mut circuit, now);
            }
            (_, CallOutcome::Success) => {
                debug!("Circuit breaker: success for '{}'", self.name);
            }
            (_, _) => {
                if circuit.state == CircuitState::Closed && self.should_trip(&mut circuit, now) {
                    let stats = circuit.window.totals(now);
                    info!(
                        "Circuit breaker: opening circuit for '{}' ({}% errors over {} calls)",
                        self.name,
                        stats.error_percentage(),
                        stats.volume()
                    );
                    self.open(&mut circuit, now);
                } else {
                    debug!(
                        "Circuit breaker: {:?} for '{}' (state {})",
                        outcome, self.name, circuit.state
                    );
                }
            }
        }
    }

    /// Count a call answered by the fallback function.
    pub fn record_fallback(&self) {
        let now = self.clock.now();
        self.lock_circuit().window.current(now).fallbacks += 1;
    }

    /// Current state, applying any pending Open -> HalfOpen transition.
    pub fn state(&self) -> CircuitState {
        let now = self.clock.now();
        let mut circuit = self.lock_circuit();
        self.advance(&mut circuit, now);
        circuit.state
    }

    /// Rolling counters.
    pub fn stats(&self) -> CircuitStats {
        let now = self.clock.now();
        self.lock_circuit().window.totals(now)
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let now = self.clock.now();
        let mut circuit = self.lock_circuit();
        self.advance(&mut circuit, now);
        CircuitSnapshot {
            name: self.name.clone(),
            closed: circuit.state == CircuitState::Closed,
            opened: circuit.state == CircuitState::Open,
            half_open: circuit.state == CircuitState::HalfOpen,
            enabled: circuit.enabled,
            stats: circuit.window.totals(now),
        }
    }

    /// Resume normal arbitration.
    pub fn enable(&self) {
        self.lock_circuit().enabled = true;
    }

    /// Let every call through regardless of state, without recording.
    pub fn disable(&self) {
        info!("Circuit breaker: disabling '{}'", self.name);
        self.lock_circuit().enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.lock_circuit().enabled
    }

    /// Stop accepting calls for good.
    pub fn shutdown(&self) {
        info!("Circuit breaker: shutting down '{}'", self.name);
        let mut circuit = self.lock_circuit();
        circuit.shut_down = true;
        circuit.enabled = false;
        circuit.window.reset();
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock_circuit().shut_down
    }

    /// Close the circuit and clear statistics.
    pub fn reset(&self) {
        info!(
            "Circuit breaker: manually resetting circuit for '{}'",
            self.name
        );
        let mut circuit = self.lock_circuit();
        circuit.state = CircuitState::Closed;
        circuit.opened_at = None;
        circuit.probe_in_flight = false;
        circuit.window.reset();
    }
}

/// Produces a value when the wrapped call is rejected or fails.
pub type Fallback<R, T> = Arc<dyn Fn(&R, &MarketDataError) -> Option<T> + Send + Sync>;

/// Provider gate that runs every call through a [`CircuitBreaker`].
///
/// Each call is bounded by the configured timeout; a call that exceeds it
/// is dropped and counted as a timeout.
pub struct CircuitBreakerProvider<R, T> {
    inner: SharedProvider<R, T>,
    breaker: CircuitBreaker,
    fallback: Option<Fallback<R, T>>,
}

impl<R, T> CircuitBreakerProvider<R, T>
where
    R: Debug + Send + Sync + 'static,
    T: Send + 'static,
{
    pub fn new(inner: SharedProvider<R, T>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(inner, config, SystemClock::shared())
    }

    pub fn with_clock(
        inner: SharedProvider<R, T>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let breaker = CircuitBreaker::with_clock(inner.name().to_string(), config, clock);
        Self {
            inner,
            breaker,
            fallback: None,
        }
    }

    /// Answer rejected or failed calls with `fallback` when it yields a value.
    pub fn with_fallback(mut self, fallback: Fallback<R, T>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn state(&self) -> CircuitSnapshot {
        self.breaker.snapshot()
    }

    pub fn stats(&self) -> CircuitStats {
        self.breaker.stats()
    }

    pub fn enable(&self) {
        self.breaker.enable();
    }

    pub fn disable(&self) {
        self.breaker.disable();
    }

    pub fn shutdown(&self) {
        self.breaker.shutdown();
    }

    fn fail(&self, request: &R, error: MarketDataError) -> Result<Fetched<T>, MarketDataError> {
        if let Some(fallback) = &self.fallback {
            if let Some(data) = fallback(request, &error) {
                debug!(
                    "Circuit breaker: fallback answered for '{}' after: {}",
                    self.breaker.name(),
                    error
                );
                self.breaker.record_fallback();
                return Ok(Fetched::new(data, self.breaker.name()));
            }
        }
        Err(error)
    }
}

#[async_trait]
impl<R, T> DataProvider<R, T> for CircuitBreakerProvider<R, T>
where
    R: Debug + Send + Sync + 'static,
    T: Send + 'static,
{
    fn name(&self) -> &str {
        self.breaker.name()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    async fn fetch(&self, request: &R) -> Result<Fetched<T>, MarketDataError> {
        let admission = self.breaker.try_acquire();
        match admission {
            Admission::Shutdown => {
                return Err(MarketDataError::Shutdown {
                    provider: self.breaker.name().to_string(),
                })
            }
            Admission::Bypass => return self.inner.fetch(request).await,
            Admission::Rejected => {
                debug!(
                    "Circuit breaker open for provider '{}', rejecting",
                    self.breaker.name()
                );
                let error = MarketDataError::CircuitOpen {
                    provider: self.breaker.name().to_string(),
                    request: format!("{:?}", request),
                };
                return self.fail(request, error);
            }
            Admission::Allowed | Admission::Probe(_) => {}
        }

        let started = tokio::time::Instant::now();
        let result = match self.breaker.config().timeout() {
            Some(limit) => tokio::time::timeout(limit, self.inner.fetch(request))
                .await
                .map_err(|_| limit),
            None => Ok(self.inner.fetch(request).await),
        };
        let latency = started.elapsed();

        match result {
            Ok(Ok(fetched)) => {
                self.breaker
                    .record(admission, CallOutcome::Success, latency);
                Ok(fetched)
            }
            Ok(Err(error)) => {
                self.breaker
                    .record(admission, CallOutcome::Failure, latency);
                self.fail(request, error)
            }
            Err(limit) => {
                warn!(
                    "Circuit breaker: '{}' timed out after {:?}",
                    self.breaker.name(),
                    limit
                );
                self.breaker
                    .record(admission, CallOutcome::Timeout, latency);
                let error = MarketDataError::Timeout {
                    provider: self.breaker.name().to_string(),
                    timeout: limit,
                };
                self.fail(request, error)
            }
        }
    }
}
