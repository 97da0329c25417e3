//! In-memory read-through cache for pipeline results.
//!
//! Entries expire lazily: `get` and `has` drop a stale entry when they see
//! it, and [`ReadThroughCache::spawn_cleanup`] sweeps the rest periodically.
//! The cache is bounded; when full, the entry inserted first is evicted.

mod pipeline;

pub use pipeline::CachedPipeline;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::errors::MarketDataError;

/// Cache sizing and default time-to-live.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Default time-to-live of an entry in milliseconds
    pub ttl_ms: u64,
    /// Maximum number of entries; 0 disables caching
    pub max_size: usize,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn validate(&self) -> Result<(), MarketDataError> {
        if self.ttl_ms == 0 && self.max_size > 0 {
            return Err(MarketDataError::Config(
                "cache ttl must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 60_000,
            max_size: 1_000,
        }
    }
}

/// A cached value. `expires_at` is always `timestamp + ttl`.
#[derive(Clone, Debug)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: Instant,
    pub expires_at: Instant,
}

impl<T> CacheEntry<T> {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug)]
struct CacheInner<T> {
    map: HashMap<String, CacheEntry<T>>,
    /// Keys in insertion order, oldest first
    order: VecDeque<String>,
}

impl<T> CacheInner<T> {
    fn remove(&mut self, key: &str) -> bool {
        if self.map.remove(key).is_some() {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }
}

/// Thread-safe TTL cache keyed by request fingerprint.
#[derive(Debug)]
pub struct ReadThroughCache<T> {
    inner: Mutex<CacheInner<T>>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
}

impl<T: Clone> ReadThroughCache<T> {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!("Cache mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Return the live entry for `key`, dropping it if it has expired.
    pub fn get(&self, key: &str) -> Option<CacheEntry<T>> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let expired = match inner.map.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            debug!("Cache entry '{}' expired", key);
            inner.remove(key);
        }
        None
    }

    /// Store `data` under `key` for `ttl` (the configured default when `None`).
    pub fn set(&self, key: impl Into<String>, data: T, ttl: Option<Duration>) {
        if self.config.max_size == 0 {
            return;
        }

        let key = key.into();
        let now = self.clock.now();
        let entry = CacheEntry {
            data,
            timestamp: now,
            expires_at: now + ttl.unwrap_or_else(|| self.config.ttl()),
        };

        let mut inner = self.lock();
        if let Some(slot) = inner.map.get_mut(&key) {
            *slot = entry;
            return;
        }

        while inner.map.len() >= self.config.max_size {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            debug!("Cache full, evicting '{}'", oldest);
            inner.map.remove(&oldest);
        }
        inner.order.push_back(key.clone());
        inner.map.insert(key, entry);
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remove `key`; returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.lock().remove(key)
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.map.clear();
        inner.order.clear();
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.lock();
        let before = inner.map.len();
        inner.map.retain(|_, entry| !entry.is_expired(now));
        let CacheInner { map, order } = &mut *inner;
        order.retain(|key| map.contains_key(key));
        before - inner.map.len()
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn size(&self) -> usize {
        self.lock().map.len()
    }
}

impl<T: Clone + Send + 'static> ReadThroughCache<T> {
    /// Sweep expired entries every `interval` on the tokio runtime.
    ///
    /// The task only holds a weak reference and stops once the cache is dropped.
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    debug!("Cache dropped, stopping cleanup task");
                    break;
                };
                let removed = cache.cleanup();
                if removed > 0 {
                    debug!("Cache cleanup removed {} expired entries", removed);
                }
            }
        })
    }
}
