//! Resilience gates and provider orchestration.
//!
//! This module provides the building blocks of the fetch pipeline:
//! - Rate limiting per provider
//! - Circuit breaking for fault tolerance
//! - Ordered fallback across providers with a bounded error log

mod chain;
mod circuit_breaker;
mod error_log;
mod rate_limiter;
mod rolling;

pub use chain::{ProviderChain, ProviderStatus};
pub use circuit_breaker::{
    Admission, CallOutcome, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerProvider,
    CircuitSnapshot, CircuitState, Fallback,
};
pub use error_log::{
    ErrorLog, ErrorRecord, DEFAULT_CAPACITY, DEFAULT_RECENT_WINDOW, DEFAULT_RETENTION,
};
pub use rate_limiter::{RateLimitConfig, RateLimitedProvider, RateLimiter};
pub use rolling::CircuitStats;
