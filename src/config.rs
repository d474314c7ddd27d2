use crate::application::retry::RetryPolicy;
use crate::domain::classification::{DEFAULT_CONNECTIVITY_CODES, ErrorClassifier};
use crate::error::{PaymentError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Retry policy parameters (`[retry]` in the config file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts per dependency call (including the first).
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Optional cap on any single delay, in milliseconds.
    pub max_delay_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: None,
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> Result<RetryPolicy> {
        let policy = RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            self.backoff_multiplier,
        )?;
        Ok(match self.max_delay_ms {
            Some(ms) => policy.with_max_delay(Duration::from_millis(ms)),
            None => policy,
        })
    }
}

/// Which dependency errors are retried (`[classifier]` in the config file).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Connectivity codes retried on data store calls.
    pub driver_codes: Vec<String>,
    /// Connectivity codes retried on gateway calls.
    pub gateway_codes: Vec<String>,
    pub retry_rate_limits: bool,
    pub retry_idempotency_conflicts: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        let codes: Vec<String> = DEFAULT_CONNECTIVITY_CODES
            .iter()
            .map(|c| c.to_string())
            .collect();
        Self {
            driver_codes: codes.clone(),
            gateway_codes: codes,
            retry_rate_limits: true,
            retry_idempotency_conflicts: false,
        }
    }
}

impl ClassifierConfig {
    pub fn driver_classifier(&self) -> ErrorClassifier {
        ErrorClassifier::driver(self.driver_codes.iter().cloned())
    }

    pub fn gateway_classifier(&self) -> ErrorClassifier {
        ErrorClassifier::gateway(
            self.gateway_codes.iter().cloned(),
            self.retry_rate_limits,
            self.retry_idempotency_conflicts,
        )
    }
}

/// Top-level configuration, loaded from a TOML file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub retry: RetryConfig,
    pub classifier: ClassifierConfig,
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
}

impl AppConfig {
    /// Loads the configuration at `path`, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let data = fs::read_to_string(path)?;
        Self::from_toml(&data)
    }

    pub fn from_toml(data: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(data).map_err(|e| PaymentError::ConfigError(e.to_string()))?;
        config.retry.to_policy()?;
        Ok(config)
    }
}
