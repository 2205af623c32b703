//! Engine configuration.
//!
//! Every option has a default, so an empty JSON object or an empty
//! environment yields a working configuration. Environment variables use the
//! `MDC_` prefix and the upper snake case of the option name, e.g.
//! `cacheTtlSeconds` is read from `MDC_CACHE_TTL_SECONDS`.

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::{HealthConfig, RetryPolicy};

pub const ENV_PREFIX: &str = "MDC_";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Freshness window for quotes.
    pub cache_ttl_seconds: u64,
    /// Freshness window for fully closed historical ranges.
    pub historical_cache_ttl_seconds: u64,
    pub order_book_cache_ttl_seconds: u64,
    /// Total attempts per request against the primary provider.
    pub max_retries: u32,
    /// Total attempts per request against each fallback provider.
    pub secondary_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Upper bound on the time one logical request may spend retrying.
    pub latency_budget_ms: u64,
    pub gate_timeout_ms: u64,
    /// Overrides every provider's declared requests-per-minute.
    pub rate_limit_per_minute: Option<u32>,
    /// Caps every provider's declared concurrency.
    pub max_concurrent_requests: Option<usize>,
    pub validation_threshold_pct: Decimal,
    pub worker_pool_size: usize,
    /// Oldest last-known-good value that may be served as degraded.
    pub max_stale_seconds: u64,
    pub health_failure_threshold: u32,
    pub health_recovery_seconds: u64,
    pub batch_deadline_ms: u64,
    /// HTTP timeout used by the bundled providers.
    pub request_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 30,
            historical_cache_ttl_seconds: 3600,
            order_book_cache_ttl_seconds: 2,
            max_retries: 3,
            secondary_attempts: 2,
            backoff_base_ms: 250,
            backoff_cap_ms: 4000,
            latency_budget_ms: 20_000,
            gate_timeout_ms: 5_000,
            rate_limit_per_minute: None,
            max_concurrent_requests: None,
            validation_threshold_pct: Decimal::new(5, 1),
            worker_pool_size: 5,
            max_stale_seconds: 3600,
            health_failure_threshold: 5,
            health_recovery_seconds: 60,
            batch_deadline_ms: 30_000,
            request_timeout_ms: 10_000,
        }
    }
}

fn parse_into<T: FromStr>(key: &str, raw: Option<String>, target: &mut T) -> Result<(), ConfigError> {
    if let Some(raw) = raw {
        *target = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.clone(),
        })?;
    }
    Ok(())
}

fn parse_optional<T: FromStr>(
    key: &str,
    raw: Option<String>,
    target: &mut Option<T>,
) -> Result<(), ConfigError> {
    match raw {
        Some(raw) if raw.trim().is_empty() => *target = None,
        Some(raw) => {
            *target = Some(raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
            })?)
        }
        None => {}
    }
    Ok(())
}

impl EngineConfig {
    /// Defaults overridden by `MDC_*` environment variables, then validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) but reads variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            let key = format!("{}{}", ENV_PREFIX, suffix);
            let value = lookup(&key);
            (key, value)
        };

        let mut config = Self::default();

        let (k, v) = var("CACHE_TTL_SECONDS");
        parse_into(&k, v, &mut config.cache_ttl_seconds)?;
        let (k, v) = var("HISTORICAL_CACHE_TTL_SECONDS");
        parse_into(&k, v, &mut config.historical_cache_ttl_seconds)?;
        let (k, v) = var("ORDER_BOOK_CACHE_TTL_SECONDS");
        parse_into(&k, v, &mut config.order_book_cache_ttl_seconds)?;
        let (k, v) = var("MAX_RETRIES");
        parse_into(&k, v, &mut config.max_retries)?;
        let (k, v) = var("SECONDARY_ATTEMPTS");
        parse_into(&k, v, &mut config.secondary_attempts)?;
        let (k, v) = var("BACKOFF_BASE_MS");
        parse_into(&k, v, &mut config.backoff_base_ms)?;
        let (k, v) = var("BACKOFF_CAP_MS");
        parse_into(&k, v, &mut config.backoff_cap_ms)?;
        let (k, v) = var("LATENCY_BUDGET_MS");
        parse_into(&k, v, &mut config.latency_budget_ms)?;
        let (k, v) = var("GATE_TIMEOUT_MS");
        parse_into(&k, v, &mut config.gate_timeout_ms)?;
        let (k, v) = var("RATE_LIMIT_PER_MINUTE");
        parse_optional(&k, v, &mut config.rate_limit_per_minute)?;
        let (k, v) = var("MAX_CONCURRENT_REQUESTS");
        parse_optional(&k, v, &mut config.max_concurrent_requests)?;
        let (k, v) = var("VALIDATION_THRESHOLD_PCT");
        parse_into(&k, v, &mut config.validation_threshold_pct)?;
        let (k, v) = var("WORKER_POOL_SIZE");
        parse_into(&k, v, &mut config.worker_pool_size)?;
        let (k, v) = var("MAX_STALE_SECONDS");
        parse_into(&k, v, &mut config.max_stale_seconds)?;
        let (k, v) = var("HEALTH_FAILURE_THRESHOLD");
        parse_into(&k, v, &mut config.health_failure_threshold)?;
        let (k, v) = var("HEALTH_RECOVERY_SECONDS");
        parse_into(&k, v, &mut config.health_recovery_seconds)?;
        let (k, v) = var("BATCH_DEADLINE_MS");
        parse_into(&k, v, &mut config.batch_deadline_ms)?;
        let (k, v) = var("REQUEST_TIMEOUT_MS");
        parse_into(&k, v, &mut config.request_timeout_ms)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_pool_size == 0 {
            return Err(ConfigError::Invalid("workerPoolSize must be at least 1".into()));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid("maxRetries must be at least 1".into()));
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            return Err(ConfigError::Invalid(format!(
                "backoffCapMs ({}) is below backoffBaseMs ({})",
                self.backoff_cap_ms, self.backoff_base_ms
            )));
        }
        if self.validation_threshold_pct.is_sign_negative() {
            return Err(ConfigError::Invalid(
                "validationThresholdPct must not be negative".into(),
            ));
        }
        if self.rate_limit_per_minute == Some(0) {
            return Err(ConfigError::Invalid("rateLimitPerMinute must be positive".into()));
        }
        if self.max_concurrent_requests == Some(0) {
            return Err(ConfigError::Invalid(
                "maxConcurrentRequests must be positive".into(),
            ));
        }
        if self.health_failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "healthFailureThreshold must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn quote_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn historical_ttl(&self) -> Duration {
        Duration::from_secs(self.historical_cache_ttl_seconds)
    }

    pub fn order_book_ttl(&self) -> Duration {
        Duration::from_secs(self.order_book_cache_ttl_seconds)
    }

    pub fn batch_deadline(&self) -> Duration {
        Duration::from_millis(self.batch_deadline_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            secondary_attempts: self.secondary_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_cap: Duration::from_millis(self.backoff_cap_ms),
            latency_budget: Duration::from_millis(self.latency_budget_ms),
            gate_timeout: Duration::from_millis(self.gate_timeout_ms),
            max_stale: Duration::from_secs(self.max_stale_seconds),
        }
    }

    pub fn health_config(&self) -> HealthConfig {
        HealthConfig {
            failure_threshold: self.health_failure_threshold,
            recovery_timeout: Duration::from_secs(self.health_recovery_seconds),
        }
    }
}
