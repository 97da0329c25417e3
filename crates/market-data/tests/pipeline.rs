//! End-to-end behaviour of the gated, cached provider pipeline.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use tokenfeed_market_data::{
    guarded, guarded_with_clock, CacheConfig, CachedPipeline, CircuitBreakerConfig,
    CircuitBreakerProvider, CircuitState, Clock, DataProvider, ErrorKind, Fetched, ManualClock,
    MarketDataError, ProviderChain, RateLimitConfig, ReadThroughCache, SharedProvider, TokenPrice,
    TokenRequest,
};

type GatedFeed = Arc<CircuitBreakerProvider<TokenRequest, TokenPrice>>;

struct PriceFeed {
    name: &'static str,
    price: Decimal,
    healthy: AtomicBool,
    calls: AtomicUsize,
}

impl PriceFeed {
    fn healthy(name: &'static str, price: Decimal) -> Arc<Self> {
        Arc::new(Self {
            name,
            price,
            healthy: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(name: &'static str) -> Arc<Self> {
        let feed = Self::healthy(name, Decimal::ZERO);
        feed.healthy.store(false, Ordering::SeqCst);
        feed
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataProvider<TokenRequest, TokenPrice> for PriceFeed {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch(&self, _request: &TokenRequest) -> Result<Fetched<TokenPrice>, MarketDataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.healthy.load(Ordering::SeqCst) {
            Ok(Fetched::new(TokenPrice::usd(self.price), self.name))
        } else {
            Err(MarketDataError::provider(
                self.name,
                format!("{} unavailable", self.name.to_lowercase()),
            ))
        }
    }
}

fn usdc() -> TokenRequest {
    TokenRequest::new("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", 1)
}

fn gate(feed: &Arc<PriceFeed>, rate_limit: RateLimitConfig, breaker: CircuitBreakerConfig) -> GatedFeed {
    let inner: SharedProvider<TokenRequest, TokenPrice> = feed.clone();
    guarded(inner, rate_limit, breaker)
}

fn gate_with_clock(
    feed: &Arc<PriceFeed>,
    rate_limit: RateLimitConfig,
    breaker: CircuitBreakerConfig,
    clock: &Arc<ManualClock>,
) -> GatedFeed {
    let inner: SharedProvider<TokenRequest, TokenPrice> = feed.clone();
    guarded_with_clock(inner, rate_limit, breaker, clock.clone())
}

fn breaker_config(volume_threshold: u32) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        timeout_ms: 1_000,
        error_threshold_percentage: 50,
        reset_timeout_ms: 30_000,
        volume_threshold,
        ..Default::default()
    }
}

#[tokio::test]
async fn first_healthy_provider_answers_alone() {
    let primary = PriceFeed::healthy("COINGECKO", dec!(1.0001));
    let secondary = PriceFeed::healthy("ONCHAIN", dec!(0.9998));
    let chain: ProviderChain<TokenRequest, TokenPrice> = ProviderChain::new(vec![
        gate(&primary, RateLimitConfig::default(), breaker_config(5)),
        gate(&secondary, RateLimitConfig::default(), breaker_config(5)),
    ]);

    let fetched = chain.fetch(&usdc()).await.unwrap();

    assert_eq!(fetched.source, "COINGECKO");
    assert_eq!(fetched.data.price, dec!(1.0001));
    assert_eq!(primary.calls(), 1);
    assert_eq!(secondary.calls(), 0);
}

#[tokio::test]
async fn failing_providers_fall_through_in_order() {
    let a = PriceFeed::failing("A");
    let b = PriceFeed::failing("B");
    let c = PriceFeed::healthy("C", dec!(2));
    let providers: Vec<SharedProvider<TokenRequest, TokenPrice>> = vec![a.clone(), b.clone(), c];
    let chain = ProviderChain::new(providers);

    let fetched = chain.fetch(&usdc()).await.unwrap();

    assert_eq!(fetched.source, "C");
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 1);
    assert_eq!(chain.recent_errors().len(), 2);
}

#[tokio::test]
async fn exhausted_chain_reports_every_failure() {
    let chain: ProviderChain<TokenRequest, TokenPrice> = ProviderChain::new(vec![
        gate(&PriceFeed::failing("A"), RateLimitConfig::default(), breaker_config(5)),
        gate(&PriceFeed::failing("B"), RateLimitConfig::default(), breaker_config(5)),
    ]);

    let error = chain.fetch(&usdc()).await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::AllProvidersFailed);
    let message = error.to_string();
    assert!(message.contains("A: a unavailable"), "{}", message);
    assert!(message.contains("B: b unavailable"), "{}", message);
}

#[tokio::test]
async fn repeated_failures_open_the_circuit() {
    let clock = Arc::new(ManualClock::new());
    let feed = PriceFeed::failing("FLAKY");
    let gated = gate_with_clock(&feed, RateLimitConfig::new(100, 1), breaker_config(3), &clock);
    let providers: Vec<SharedProvider<TokenRequest, TokenPrice>> = vec![gated.clone()];
    let chain = ProviderChain::with_clock(providers, clock.clone());

    for _ in 0..3 {
        assert!(chain.fetch(&usdc()).await.is_err());
    }
    assert!(gated.state().opened);
    assert_eq!(feed.calls(), 3);

    let error = gated.fetch(&usdc()).await.unwrap_err();
    assert!(matches!(error, MarketDataError::CircuitOpen { .. }));

    let error = chain.fetch(&usdc()).await.unwrap_err();
    assert!(error.to_string().contains("FLAKY: Circuit open"));
    assert_eq!(feed.calls(), 3);
    assert_eq!(gated.stats().rejects, 2);
}

#[tokio::test]
async fn circuit_stays_closed_below_error_threshold() {
    let clock = Arc::new(ManualClock::new());
    let feed = PriceFeed::healthy("STEADY", dec!(1));
    let gated = gate_with_clock(&feed, RateLimitConfig::new(100, 1), breaker_config(3), &clock);

    gated.fetch(&usdc()).await.unwrap();
    feed.healthy.store(false, Ordering::SeqCst);
    assert!(gated.fetch(&usdc()).await.is_err());
    feed.healthy.store(true, Ordering::SeqCst);
    gated.fetch(&usdc()).await.unwrap();

    let state = gated.state();
    assert!(state.closed);
    assert!(!state.opened);
    assert_eq!(state.stats.error_percentage(), 33);
}

#[tokio::test]
async fn open_circuit_recovers_after_reset_timeout() {
    let clock = Arc::new(ManualClock::new());
    let feed = PriceFeed::failing("RECOVERING");
    let gated = gate_with_clock(&feed, RateLimitConfig::new(100, 1), breaker_config(3), &clock);

    for _ in 0..3 {
        assert!(gated.fetch(&usdc()).await.is_err());
    }
    assert_eq!(gated.breaker().state(), CircuitState::Open);

    clock.advance(Duration::from_millis(29_999));
    assert_eq!(gated.breaker().state(), CircuitState::Open);

    clock.advance(Duration::from_millis(1));
    assert_eq!(gated.breaker().state(), CircuitState::HalfOpen);

    feed.healthy.store(true, Ordering::SeqCst);
    let fetched = gated.fetch(&usdc()).await.unwrap();

    assert_eq!(fetched.source, "RECOVERING");
    assert_eq!(gated.breaker().state(), CircuitState::Closed);
    assert!(gated.state().closed);
}

#[tokio::test]
async fn rate_limit_delays_requests_beyond_the_window() {
    let feed = PriceFeed::healthy("LIMITED", dec!(3));
    // Queueing counts towards the breaker deadline, keep it well above one window.
    let gated = gate(&feed, RateLimitConfig::new(2, 1), CircuitBreakerConfig::default());
    let chain: Arc<ProviderChain<TokenRequest, TokenPrice>> =
        Arc::new(ProviderChain::new(vec![gated]));

    let start = tokio::time::Instant::now();
    let results = futures::future::join_all((0..3).map(|_| {
        let chain = Arc::clone(&chain);
        async move { chain.fetch(&usdc()).await }
    }))
    .await;

    assert!(start.elapsed() >= Duration::from_millis(900));
    assert!(results.iter().all(|result| result.is_ok()));
    assert_eq!(feed.calls(), 3);
}

#[tokio::test]
async fn cached_pipeline_calls_chain_once_per_ttl() {
    let clock = Arc::new(ManualClock::new());
    let shared_clock: Arc<dyn Clock> = clock.clone();
    let feed = PriceFeed::healthy("CACHED", dec!(1850.25));
    let chain: Arc<ProviderChain<TokenRequest, TokenPrice>> = Arc::new(ProviderChain::with_clock(
        vec![gate_with_clock(
            &feed,
            RateLimitConfig::default(),
            breaker_config(5),
            &clock,
        )],
        shared_clock.clone(),
    ));
    let cache = Arc::new(ReadThroughCache::with_clock(
        CacheConfig {
            ttl_ms: 60_000,
            max_size: 1_000,
        },
        shared_clock,
    ));
    let pipeline = CachedPipeline::new("price", cache.clone(), chain);
    let weth = TokenRequest::new("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2", 1);

    let first = pipeline.fetch(&weth).await.unwrap();
    let second = pipeline.fetch(&weth).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(feed.calls(), 1);

    clock.advance(Duration::from_secs(60));
    assert!(cache
        .get("price:0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2:1")
        .is_none());

    pipeline.fetch(&weth).await.unwrap();
    assert_eq!(feed.calls(), 2);
}

#[tokio::test]
async fn empty_chain_fails_without_delay() {
    let chain: ProviderChain<TokenRequest, TokenPrice> = ProviderChain::new(Vec::new());

    let start = tokio::time::Instant::now();
    let error = chain.fetch(&usdc()).await.unwrap_err();

    assert!(matches!(error, MarketDataError::NoProvidersConfigured));
    assert!(start.elapsed() < Duration::from_millis(50));
}
