use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};

use super::ReadThroughCache;
use crate::errors::MarketDataError;
use crate::models::{CacheKey, Fetched};
use crate::registry::ProviderChain;

/// A [`ProviderChain`] fronted by a [`ReadThroughCache`].
///
/// A fresh entry answers the request without touching any gate or provider.
/// On a miss the chain is called and a successful result is stored; failures
/// are never cached. Concurrent misses for the same key are collapsed: one
/// caller fetches while the others wait and then read its cached result.
pub struct CachedPipeline<R, T> {
    namespace: String,
    cache: Arc<ReadThroughCache<Fetched<T>>>,
    chain: Arc<ProviderChain<R, T>>,
    flights: Flights,
}

type FlightMap = HashMap<String, Arc<tokio::sync::Mutex<()>>>;
type Flights = Mutex<FlightMap>;

fn lock_flights(flights: &Flights) -> MutexGuard<'_, FlightMap> {
    flights.lock().unwrap_or_else(|poisoned| {
        warn!("Cache in-flight mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Membership in the group of callers fetching one key. The last member to
/// leave removes the key's lock.
struct Flight<'a> {
    flights: &'a Flights,
    key: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> Flight<'a> {
    fn join(flights: &'a Flights, key: &str) -> Self {
        let lock = Arc::clone(lock_flights(flights).entry(key.to_string()).or_default());
        Self {
            flights,
            key: key.to_string(),
            lock,
        }
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        let mut flights = lock_flights(self.flights);
        let last = Arc::strong_count(&self.lock) == 2
            && flights
                .get(&self.key)
                .is_some_and(|lock| Arc::ptr_eq(lock, &self.lock));
        if last {
            flights.remove(&self.key);
        }
    }
}

impl<R, T> CachedPipeline<R, T>
where
    R: CacheKey + Debug + Send + Sync + 'static,
    T: Clone + Send + 'static,
{
    /// `namespace` separates pipelines sharing one cache ("price", "metadata").
    pub fn new(
        namespace: impl Into<String>,
        cache: Arc<ReadThroughCache<Fetched<T>>>,
        chain: Arc<ProviderChain<R, T>>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            cache,
            chain,
            flights: Mutex::new(HashMap::new()),
        }
    }

    fn key(&self, request: &R) -> String {
        format!("{}:{}", self.namespace, request.cache_key())
    }

    pub async fn fetch(&self, request: &R) -> Result<Fetched<T>, MarketDataError> {
        let key = self.key(request);
        if let Some(entry) = self.cache.get(&key) {
            debug!("Cache hit for '{}'", key);
            return Ok(entry.data);
        }

        let flight = Flight::join(&self.flights, &key);
        let _turn = flight.lock.lock().await;
        if let Some(entry) = self.cache.get(&key) {
            debug!("Cache filled by a concurrent fetch for '{}'", key);
            return Ok(entry.data);
        }

        debug!("Cache miss for '{}', fetching", key);
        let fetched = self.chain.fetch(request).await?;
        self.cache.set(key, fetched.clone(), None);
        Ok(fetched)
    }

    /// Drop the cached result for `request`; returns whether one existed.
    pub fn invalidate(&self, request: &R) -> bool {
        self.cache.delete(&self.key(request))
    }

    pub fn cache(&self) -> &Arc<ReadThroughCache<Fetched<T>>> {
        &self.cache
    }

    pub fn chain(&self) -> &Arc<ProviderChain<R, T>> {
        &self.chain
    }
}
