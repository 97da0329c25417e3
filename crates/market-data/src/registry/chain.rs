//! Ordered fallback chain of providers.
//!
//! The chain tries its providers strictly in configured order:
//! 1. Skip (and record) providers that report themselves unavailable
//! 2. Call the provider; the first success is returned immediately
//! 3. On any error, record it and move on to the next provider
//!
//! Transient and permanent provider errors are treated alike: both fall
//! through to the next provider. When every provider fails, the caller gets a
//! single [`MarketDataError::AllProvidersFailed`] listing the recent failures.

use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use serde::Serialize;

use super::error_log::{ErrorLog, ErrorRecord};
use crate::clock::{Clock, SystemClock};
use crate::errors::MarketDataError;
use crate::models::Fetched;
use crate::provider::SharedProvider;

/// Per-provider health derived from recent failures.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProviderStatus {
    pub provider: String,
    /// False when the provider produced an error within the recent window.
    pub available: bool,
}

/// Fallback orchestrator over an ordered list of (usually gated) providers.
pub struct ProviderChain<R, T> {
    providers: Vec<SharedProvider<R, T>>,
    errors: Mutex<ErrorLog>,
    clock: Arc<dyn Clock>,
}

impl<R, T> ProviderChain<R, T>
where
    R: Debug + Send + Sync + 'static,
    T: Send + 'static,
{
    /// Create a chain. Order encodes preference: first is tried first.
    pub fn new(providers: Vec<SharedProvider<R, T>>) -> Self {
        Self::with_clock(providers, SystemClock::shared())
    }

    pub fn with_clock(providers: Vec<SharedProvider<R, T>>, clock: Arc<dyn Clock>) -> Self {
        Self::with_error_log(providers, ErrorLog::new(), clock)
    }

    pub fn with_error_log(
        providers: Vec<SharedProvider<R, T>>,
        errors: ErrorLog,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            providers,
            errors: Mutex::new(errors),
            clock,
        }
    }

    fn lock_errors(&self) -> MutexGuard<'_, ErrorLog> {
        self.errors.lock().unwrap_or_else(|poisoned| {
            warn!("Provider chain error log mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn record(&self, provider: &str, error: &MarketDataError) {
        let record = ErrorRecord {
            provider: provider.to_string(),
            kind: error.kind(),
            message: error.reason(),
            timestamp: self.clock.utc_now(),
            recorded_at: self.clock.now(),
        };
        self.lock_errors().record(record);
    }

    /// Fetch from the first provider that succeeds.
    pub async fn fetch(&self, request: &R) -> Result<Fetched<T>, MarketDataError> {
        if self.providers.is_empty() {
            warn!("No providers configured for request {:?}", request);
            return Err(MarketDataError::NoProvidersConfigured);
        }

        for provider in &self.providers {
            let name = provider.name();

            if !provider.is_available() {
                debug!("Provider '{}' is not available, skipping", name);
                self.record(
                    name,
                    &MarketDataError::NotAvailable {
                        provider: name.to_string(),
                    },
                );
                continue;
            }

            match provider.fetch(request).await {
                Ok(fetched) => {
                    debug!("Fetched {:?} from provider '{}'", request, name);
                    return Ok(fetched);
                }
                Err(error) => {
                    warn!(
                        "Provider '{}' failed for {:?}: {}, trying next provider",
                        name, request, error
                    );
                    self.record(name, &error);
                }
            }
        }

        let message = self
            .recent_errors()
            .iter()
            .map(|record| format!("{}: {}", record.provider, record.message))
            .collect::<Vec<_>>()
            .join("; ");
        info!("All providers failed for {:?}: {}", request, message);

        Err(MarketDataError::AllProvidersFailed { message })
    }

    /// Failures recorded within the recent window, oldest first.
    pub fn recent_errors(&self) -> Vec<ErrorRecord> {
        let now = self.clock.now();
        self.lock_errors().recent(now)
    }

    /// Each provider in chain order, unavailable if it failed recently.
    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        let recent = self.recent_errors();
        self.providers
            .iter()
            .map(|provider| ProviderStatus {
                provider: provider.name().to_string(),
                available: !recent.iter().any(|record| record.provider == provider.name()),
            })
            .collect()
    }

    pub fn clear_errors(&self) {
        self.lock_errors().clear();
    }

    pub fn providers(&self) -> &[SharedProvider<R, T>] {
        &self.providers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::errors::ErrorKind;
    use crate::models::{TokenPrice, TokenRequest};
    use crate::provider::DataProvider;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct MockProvider {
        name: &'static str,
        failure: Option<&'static str>,
        available: bool,
        call_count: AtomicUsize,
    }

    impl MockProvider {
        fn ok(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                failure: None,
                available: true,
                call_count: AtomicUsize::new(0),
            })
        }

        fn failing(name: &'static str, message: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                failure: Some(message),
                available: true,
                call_count: AtomicUsize::new(0),
            })
        }

        fn unavailable(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                failure: None,
                available: false,
                call_count: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DataProvider<TokenRequest, TokenPrice> for MockProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn fetch(
            &self,
            _request: &TokenRequest,
        ) -> Result<Fetched<TokenPrice>, MarketDataError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            match self.failure {
                Some(message) => Err(MarketDataError::provider(self.name, message)),
                None => Ok(Fetched::new(TokenPrice::usd(dec!(1.01)), self.name)),
            }
        }
    }

    fn request() -> TokenRequest {
        TokenRequest::new("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", 1)
    }

    fn chain(
        providers: Vec<SharedProvider<TokenRequest, TokenPrice>>,
    ) -> (ProviderChain<TokenRequest, TokenPrice>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (ProviderChain::with_clock(providers, clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_first_success_short_circuits() {
        let a = MockProvider::ok("A");
        let b = MockProvider::ok("B");
        let (chain, _clock) = chain(vec![a.clone(), b.clone()]);

        let fetched = chain.fetch(&request()).await.unwrap();

        assert_eq!(fetched.source, "A");
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn test_falls_back_in_order() {
        let a = MockProvider::failing("A", "x");
        let b = MockProvider::failing("B", "y");
        let c = MockProvider::ok("C");
        let (chain, _clock) = chain(vec![a.clone(), b.clone(), c.clone()]);

        let fetched = chain.fetch(&request()).await.unwrap();

        assert_eq!(fetched.source, "C");
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
        assert_eq!(c.calls(), 1);
    }

    #[tokio::test]
    async fn test_all_failures_are_aggregated() {
        let (chain, _clock) = chain(vec![
            MockProvider::failing("A", "x"),
            MockProvider::failing("B", "y"),
        ]);

        let error = chain.fetch(&request()).await.unwrap_err();

        assert!(matches!(error, MarketDataError::AllProvidersFailed { .. }));
        let message = error.to_string();
        assert!(message.contains("A: x"));
        assert!(message.contains("B: y"));
        assert!(message.contains("A: x; B: y"));
    }

    #[tokio::test]
    async fn test_empty_chain_fails_immediately() {
        let (chain, _clock) = chain(Vec::new());

        let error = chain.fetch(&request()).await.unwrap_err();

        assert!(matches!(error, MarketDataError::NoProvidersConfigured));
        assert!(chain.recent_errors().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_provider_is_skipped_and_recorded() {
        let offline = MockProvider::unavailable("OFFLINE");
        let online = MockProvider::ok("ONLINE");
        let (chain, _clock) = chain(vec![offline.clone(), online.clone()]);

        let fetched = chain.fetch(&request()).await.unwrap();

        assert_eq!(fetched.source, "ONLINE");
        assert_eq!(offline.calls(), 0);
        let errors = chain.recent_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::NotAvailable);
        assert_eq!(errors[0].provider, "OFFLINE");
    }

    #[tokio::test]
    async fn test_provider_status_reflects_recent_errors() {
        let (chain, clock) = chain(vec![
            MockProvider::failing("A", "down"),
            MockProvider::ok("B"),
        ]);

        chain.fetch(&request()).await.unwrap();
        assert_eq!(
            chain.provider_status(),
            vec![
                ProviderStatus {
                    provider: "A".to_string(),
                    available: false,
                },
                ProviderStatus {
                    provider: "B".to_string(),
                    available: true,
                },
            ]
        );

        clock.advance(Duration::from_secs(5 * 60));
        assert!(chain.provider_status().iter().all(|status| status.available));
    }

    #[tokio::test]
    async fn test_stale_errors_are_not_aggregated() {
        let (chain, clock) = chain(vec![MockProvider::failing("A", "x")]);

        chain.fetch(&request()).await.unwrap_err();
        clock.advance(Duration::from_secs(10 * 60));
        let error = chain.fetch(&request()).await.unwrap_err();

        assert_eq!(error.to_string(), "All providers failed: A: x");
    }

    #[tokio::test]
    async fn test_clear_errors() {
        let (chain, _clock) = chain(vec![MockProvider::failing("A", "x")]);
        chain.fetch(&request()).await.unwrap_err();
        assert_eq!(chain.recent_errors().len(), 1);

        chain.clear_errors();
        assert!(chain.recent_errors().is_empty());
        assert_eq!(chain.providers().len(), 1);
    }
}
