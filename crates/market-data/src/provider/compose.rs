//! Helpers that wrap a provider in resilience gates.
//!
//! The usual stack is `circuit breaker -> rate limiter -> provider`: calls
//! rejected by an open circuit never spend a rate limit token, and time spent
//! queueing in the limiter counts towards the breaker's timeout.

use std::fmt::Debug;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::registry::{
    CircuitBreakerConfig, CircuitBreakerProvider, RateLimitConfig, RateLimitedProvider,
    RateLimiter,
};

use super::SharedProvider;

/// Wrap `inner` with its own rate limiter.
pub fn rate_limited<R, T>(
    inner: SharedProvider<R, T>,
    config: RateLimitConfig,
) -> SharedProvider<R, T>
where
    R: Send + Sync + 'static,
    T: Send + 'static,
{
    Arc::new(RateLimitedProvider::new(inner, config))
}

/// Wrap `inner` with its own circuit breaker.
pub fn circuit_broken<R, T>(
    inner: SharedProvider<R, T>,
    config: CircuitBreakerConfig,
) -> Arc<CircuitBreakerProvider<R, T>>
where
    R: Debug + Send + Sync + 'static,
    T: Send + 'static,
{
    Arc::new(CircuitBreakerProvider::new(inner, config))
}

/// Wrap `inner` with a rate limiter, then a circuit breaker around both.
///
/// The breaker handle is returned so callers can read its state and stats;
/// it coerces into a [`SharedProvider`] for use in a chain.
pub fn guarded<R, T>(
    inner: SharedProvider<R, T>,
    rate_limit: RateLimitConfig,
    circuit_breaker: CircuitBreakerConfig,
) -> Arc<CircuitBreakerProvider<R, T>>
where
    R: Debug + Send + Sync + 'static,
    T: Send + 'static,
{
    guarded_with_clock(inner, rate_limit, circuit_breaker, SystemClock::shared())
}

/// Like [`guarded`], with the circuit breaker reading `clock`.
///
/// The clock drives the breaker's state and rolling window only. The rate
/// limiter waits on tokio time, so it always measures its windows with the
/// system clock; a manual clock that never advances cannot stall it.
pub fn guarded_with_clock<R, T>(
    inner: SharedProvider<R, T>,
    rate_limit: RateLimitConfig,
    circuit_breaker: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
) -> Arc<CircuitBreakerProvider<R, T>>
where
    R: Debug + Send + Sync + 'static,
    T: Send + 'static,
{
    let limiter = Arc::new(RateLimiter::new(rate_limit));
    let limited: SharedProvider<R, T> =
        Arc::new(RateLimitedProvider::with_limiter(inner, limiter));
    Arc::new(CircuitBreakerProvider::with_clock(
        limited,
        circuit_breaker,
        clock,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::errors::MarketDataError;
    use crate::models::Fetched;
    use crate::provider::DataProvider;
    use crate::registry::CircuitState;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Broken {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DataProvider<u32, u32> for Broken {
        fn name(&self) -> &str {
            "BROKEN"
        }

        async fn fetch(&self, _request: &u32) -> Result<Fetched<u32>, MarketDataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(MarketDataError::provider("BROKEN", "down"))
        }
    }

    #[tokio::test]
    async fn test_open_circuit_spends_no_rate_limit_tokens() {
        let inner = Arc::new(Broken::default());
        let shared: SharedProvider<u32, u32> = inner.clone();
        let gated = guarded(
            shared,
            RateLimitConfig::new(100, 60),
            CircuitBreakerConfig {
                volume_threshold: 2,
                error_threshold_percentage: 50,
                ..Default::default()
            },
        );

        for _ in 0..2 {
            assert!(gated.fetch(&1).await.is_err());
        }
        assert_eq!(gated.breaker().state(), CircuitState::Open);

        let error = gated.fetch(&1).await.unwrap_err();
        assert!(matches!(error, MarketDataError::CircuitOpen { .. }));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(gated.name(), "BROKEN");
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_clock_does_not_stall_rate_limited_calls() {
        let inner = Arc::new(Broken::default());
        let shared: SharedProvider<u32, u32> = inner.clone();
        let clock = Arc::new(ManualClock::new());
        let gated = guarded_with_clock(
            shared,
            RateLimitConfig::new(1, 1),
            CircuitBreakerConfig::default(),
            clock,
        );

        let start = tokio::time::Instant::now();
        for _ in 0..2 {
            let error = gated.fetch(&1).await.unwrap_err();
            assert!(matches!(error, MarketDataError::ProviderFailure { .. }));
        }

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert_eq!(gated.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_rate_limited_keeps_provider_name() {
        let inner: SharedProvider<u32, u32> = Arc::new(Broken::default());
        let limited = rate_limited(inner, RateLimitConfig::default());
        assert_eq!(limited.name(), "BROKEN");
        assert!(limited.is_available());
    }

    #[tokio::test]
    async fn test_circuit_broken_coerces_into_shared_provider() {
        let inner: SharedProvider<u32, u32> = Arc::new(Broken::default());
        let breaker = circuit_broken(inner, CircuitBreakerConfig::default());
        let shared: SharedProvider<u32, u32> = breaker.clone();
        assert!(shared.fetch(&7).await.is_err());
        assert_eq!(breaker.stats().failures, 1);
    }
}
