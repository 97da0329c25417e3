//! Tokenfeed Market Data Crate
//!
//! This crate provides a resilient, provider-agnostic fetch pipeline for
//! token prices and token metadata.
//!
//! # Overview
//!
//! The pipeline supports:
//! - Any number of upstream providers behind one [`DataProvider`] trait
//! - Per-provider rate limiting with FIFO queueing
//! - Per-provider circuit breaking with timeouts and half-open probes
//! - Ordered fallback across providers with aggregated failures
//! - A bounded, short-lived read-through cache in front of the whole chain
//!
//! # Architecture
//!
//! ```text
//!                          +------------------+
//!                          |      Caller      |
//!                          +------------------+
//!                                  |
//!                                  v
//!                          +------------------+
//!                          |  CachedPipeline  |  (hit => return)
//!                          +------------------+
//!                                  |
//!                                  v
//!                          +------------------+
//!                          |  ProviderChain   |  (first success wins)
//!                          +------------------+
//!                                  |  for each provider, in order
//!                                  v
//!                     +------------------------+
//!                     | CircuitBreakerProvider |  (timeout, trip, probe)
//!                     +------------------------+
//!                                  |
//!                                  v
//!                      +---------------------+
//!                      | RateLimitedProvider |  (FIFO token window)
//!                      +---------------------+
//!                                  |
//!                                  v
//!                          +------------------+
//!                          |     Provider     |  (CoinGecko, on-chain, ...)
//!                          +------------------+
//! ```
//!
//! # Core Types
//!
//! - [`TokenRequest`] - Normalized request for one token on one chain
//! - [`Fetched`] - A provider result tagged with its source and timestamp
//! - [`TokenPrice`] / [`TokenMetadata`] - Domain values
//! - [`MarketDataError`] - Every failure the pipeline can report
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tokenfeed_market_data::*;
//!
//! let config = PipelineConfig::from_env()?;
//! let coingecko = guarded(
//!     Arc::new(CoinGecko::new()),
//!     config.rate_limit_for("COINGECKO"),
//!     config.circuit_breaker_for("COINGECKO"),
//! );
//! let chain = Arc::new(ProviderChain::new(vec![coingecko, onchain]));
//! let cache = Arc::new(ReadThroughCache::new(config.cache.clone()));
//! let prices = CachedPipeline::new("price", cache, chain);
//!
//! let usdc = prices.fetch(&TokenRequest::new("0xA0b8...eB48", 1)).await?;
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod errors;
pub mod models;
pub mod provider;
pub mod registry;
pub mod telemetry;

// Re-export all public types from models
pub use models::{CacheKey, ChainId, Fetched, TokenMetadata, TokenPrice, TokenRequest};

// Re-export provider types
pub use provider::{
    circuit_broken, guarded, guarded_with_clock, rate_limited, DataProvider, SharedProvider,
};

// Re-export registry types
pub use registry::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerProvider, CircuitSnapshot, CircuitState,
    CircuitStats, ErrorLog, ErrorRecord, Fallback, ProviderChain, ProviderStatus,
    RateLimitConfig, RateLimitedProvider, RateLimiter,
};

pub use cache::{CacheConfig, CacheEntry, CachedPipeline, ReadThroughCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{PipelineConfig, ProviderSettings};
pub use errors::{ErrorKind, MarketDataError};
pub use telemetry::init_tracing;
