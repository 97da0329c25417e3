//! Error types and error classification for the market data crate.
//!
//! This module provides:
//! - [`MarketDataError`]: The main error enum for all pipeline operations
//! - [`ErrorKind`]: Coarse classification used by error records and status reporting

mod kind;

pub use kind::ErrorKind;

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while fetching through the provider pipeline.
///
/// Only [`NoProvidersConfigured`](Self::NoProvidersConfigured) and
/// [`AllProvidersFailed`](Self::AllProvidersFailed) ever leave a
/// [`ProviderChain`](crate::registry::ProviderChain). Everything else is
/// recorded and the chain moves on to the next provider.
#[derive(Error, Debug)]
pub enum MarketDataError {
    /// The provider reported itself unusable before any call was attempted
    /// (missing credentials, unsupported chain, ...).
    #[error("Provider not available: {provider}")]
    NotAvailable {
        /// The provider that declined the request
        provider: String,
    },

    /// The wrapped provider call failed.
    #[error("Provider error: {provider} - {message}")]
    ProviderFailure {
        /// The provider that returned the error
        provider: String,
        /// The error message from the provider
        message: String,
    },

    /// The per-call deadline of a circuit breaker elapsed.
    #[error("Timeout: {provider} after {}ms", .timeout.as_millis())]
    Timeout {
        /// The provider that timed out
        provider: String,
        /// The deadline that was exceeded
        timeout: Duration,
    },

    /// The circuit breaker is open; the provider was not called.
    #[error("Circuit open: {provider} (request: {request})")]
    CircuitOpen {
        /// The provider with an open circuit
        provider: String,
        /// Debug rendering of the rejected request
        request: String,
    },

    /// The circuit breaker was shut down and no longer accepts calls.
    #[error("Circuit shut down: {provider}")]
    Shutdown {
        /// The provider whose gate was shut down
        provider: String,
    },

    /// The chain was built without any providers.
    #[error("No providers configured")]
    NoProvidersConfigured,

    /// Every provider in the chain failed.
    /// `message` joins the recent per-provider failures as `"<provider>: <message>"`.
    #[error("All providers failed: {message}")]
    AllProvidersFailed {
        /// Joined recent provider failures
        message: String,
    },

    /// Pipeline configuration could not be loaded or is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Any other error raised by a provider implementation.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MarketDataError {
    /// Shorthand for a [`ProviderFailure`](Self::ProviderFailure).
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderFailure {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotAvailable { .. } => ErrorKind::NotAvailable,
            Self::ProviderFailure { .. } | Self::Other(_) => ErrorKind::ProviderFailure,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Shutdown { .. } => ErrorKind::Shutdown,
            Self::NoProvidersConfigured => ErrorKind::NoProvidersConfigured,
            Self::AllProvidersFailed { .. } => ErrorKind::AllProvidersFailed,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// The failure reason without the provider prefix.
    ///
    /// Error records already carry the provider name, so aggregated messages
    /// are built as `"<provider>: <reason>"`.
    ///
    /// ```
    /// use tokenfeed_market_data::errors::MarketDataError;
    ///
    /// let error = MarketDataError::provider("COINGECKO", "HTTP 502");
    /// assert_eq!(error.reason(), "HTTP 502");
    /// ```
    pub fn reason(&self) -> String {
        match self {
            Self::NotAvailable { .. } => "Provider not available".to_string(),
            Self::ProviderFailure { message, .. } => message.clone(),
            Self::Timeout { timeout, .. } => format!("Timed out after {}ms", timeout.as_millis()),
            Self::CircuitOpen { request, .. } => format!("Circuit open (request: {request})"),
            Self::Shutdown { .. } => "Circuit has been shut down".to_string(),
            Self::Other(error) => error.to_string(),
            Self::NoProvidersConfigured | Self::AllProvidersFailed { .. } | Self::Config(_) => {
                self.to_string()
            }
        }
    }
}
