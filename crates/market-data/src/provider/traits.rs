//! Data provider trait definitions.
//!
//! This module defines the core `DataProvider` trait that every upstream
//! source and every gate wrapping one implements.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::MarketDataError;
use crate::models::Fetched;

/// Trait for upstream data providers.
///
/// `R` is the request type and `T` the domain value returned on success.
/// Gates ([`RateLimitedProvider`](crate::registry::RateLimitedProvider),
/// [`CircuitBreakerProvider`](crate::registry::CircuitBreakerProvider))
/// implement the same trait, so a wrapped provider is indistinguishable
/// from a bare one to the [`ProviderChain`](crate::registry::ProviderChain).
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use tokenfeed_market_data::{DataProvider, Fetched, MarketDataError, TokenPrice, TokenRequest};
///
/// struct CoinGecko {
///     api_key: Option<String>,
/// }
///
/// #[async_trait]
/// impl DataProvider<TokenRequest, TokenPrice> for CoinGecko {
///     fn name(&self) -> &str {
///         "COINGECKO"
///     }
///
///     fn is_available(&self) -> bool {
///         self.api_key.is_some()
///     }
///
///     async fn fetch(&self, request: &TokenRequest) -> Result<Fetched<TokenPrice>, MarketDataError> {
///         // ... call the API
///     }
/// }
/// ```
#[async_trait]
pub trait DataProvider<R, T>: Send + Sync
where
    R: Send + Sync,
    T: Send,
{
    /// Unique name of this provider.
    ///
    /// Used for logging, error records, and as the rate limiter and circuit
    /// breaker identity. Should be a constant like "COINGECKO", "ONCHAIN".
    fn name(&self) -> &str;

    /// Whether the provider can be used at all (credentials present,
    /// target supported). Unavailable providers are skipped without a call.
    fn is_available(&self) -> bool {
        true
    }

    /// Fetch the value for a request.
    async fn fetch(&self, request: &R) -> Result<Fetched<T>, MarketDataError>;
}

/// Shared handle to a provider, as stored by gates and chains.
pub type SharedProvider<R, T> = Arc<dyn DataProvider<R, T>>;
