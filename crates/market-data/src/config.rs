//! Pipeline configuration.
//!
//! Defaults can be overridden from `TF_*` environment variables (a `.env`
//! file is honoured) or from a JSON document. Per-provider overrides are
//! only available through JSON, e.g. via `TF_PIPELINE_CONFIG`.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::errors::MarketDataError;
use crate::registry::{CircuitBreakerConfig, RateLimitConfig};

/// Overrides applied to a single provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderSettings {
    pub rate_limit: Option<RateLimitConfig>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

/// Configuration for the whole fetch pipeline.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    pub rate_limit: RateLimitConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub cache: CacheConfig,
    /// Keyed by provider name
    pub providers: HashMap<String, ProviderSettings>,
}

impl PipelineConfig {
    /// Load from the process environment after reading `.env`, if present.
    pub fn from_env() -> Result<Self, MarketDataError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable source.
    ///
    /// `TF_PIPELINE_CONFIG` (inline JSON) is applied first; the scalar
    /// variables then override individual defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, MarketDataError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup("TF_PIPELINE_CONFIG") {
            Some(json) if !json.trim().is_empty() => Self::from_json(&json)?,
            _ => Self::default(),
        };

        let rl = &mut config.rate_limit;
        override_with(&lookup, "TF_RATE_LIMIT_POINTS", &mut rl.points)?;
        override_with(&lookup, "TF_RATE_LIMIT_DURATION_SECS", &mut rl.duration_secs)?;
        override_with(&lookup, "TF_RATE_LIMIT_EXEC_EVENLY", &mut rl.exec_evenly)?;
        override_with(
            &lookup,
            "TF_RATE_LIMIT_EXEC_EVENLY_MIN_DELAY_MS",
            &mut rl.exec_evenly_min_delay_ms,
        )?;

        let cb = &mut config.circuit_breaker;
        override_with(&lookup, "TF_CB_TIMEOUT_MS", &mut cb.timeout_ms)?;
        override_with(
            &lookup,
            "TF_CB_ERROR_THRESHOLD_PERCENTAGE",
            &mut cb.error_threshold_percentage,
        )?;
        override_with(&lookup, "TF_CB_RESET_TIMEOUT_MS", &mut cb.reset_timeout_ms)?;
        override_with(&lookup, "TF_CB_VOLUME_THRESHOLD", &mut cb.volume_threshold)?;

        let cache = &mut config.cache;
        override_with(&lookup, "TF_CACHE_TTL_MS", &mut cache.ttl_ms)?;
        override_with(&lookup, "TF_CACHE_MAX_SIZE", &mut cache.max_size)?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, MarketDataError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| MarketDataError::Config(format!("invalid pipeline config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MarketDataError> {
        self.rate_limit.validate()?;
        self.circuit_breaker.validate()?;
        self.cache.validate()?;
        for (name, settings) in &self.providers {
            let scoped = |e: MarketDataError| MarketDataError::Config(format!("{}: {}", name, e));
            if let Some(rate_limit) = &settings.rate_limit {
                rate_limit.validate().map_err(scoped)?;
            }
            if let Some(circuit_breaker) = &settings.circuit_breaker {
                circuit_breaker.validate().map_err(scoped)?;
            }
        }
        Ok(())
    }

    /// Rate limit for `provider`, falling back to the pipeline default.
    pub fn rate_limit_for(&self, provider: &str) -> RateLimitConfig {
        self.providers
            .get(provider)
            .and_then(|settings| settings.rate_limit.clone())
            .unwrap_or_else(|| self.rate_limit.clone())
    }

    /// Circuit breaker settings for `provider`, falling back to the pipeline default.
    pub fn circuit_breaker_for(&self, provider: &str) -> CircuitBreakerConfig {
        self.providers
            .get(provider)
            .and_then(|settings| settings.circuit_breaker.clone())
            .unwrap_or_else(|| self.circuit_breaker.clone())
    }
}

fn override_with<F, V>(lookup: &F, key: &str, target: &mut V) -> Result<(), MarketDataError>
where
    F: Fn(&str) -> Option<String>,
    V: FromStr,
    V::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| MarketDataError::Config(format!("{}={:?}: {}", key, raw, e)))?;
    }
    Ok(())
}
