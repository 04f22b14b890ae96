use std::time::Duration;

use serde::Deserialize;

/// Runtime configuration for the ticket manager.
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    /// How long a hold may stand before the expiry monitor reclaims it.
    #[serde(default = "default_expire_time_ms")]
    pub expire_time_ms: u64,
    /// Concurrent purchase-service calls allowed in flight. This bounds the
    /// load put on the external service, not just our own parallelism.
    #[serde(default = "default_purchase_workers")]
    pub purchase_workers: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry policy for transient purchase-service failures.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Fixed pause between attempts.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Attempt ceiling. `None` retries forever, the production default;
    /// tests inject a small bound for deterministic failure paths.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_expire_time_ms() -> u64 {
    60_000
}

fn default_purchase_workers() -> usize {
    5
}

fn default_backoff_ms() -> u64 {
    100
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            expire_time_ms: default_expire_time_ms(),
            purchase_workers: default_purchase_workers(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_ms: default_backoff_ms(),
            max_attempts: None,
        }
    }
}

impl ManagerConfig {
    pub fn expire_time(&self) -> Duration {
        Duration::from_millis(self.expire_time_ms)
    }

    /// Loads configuration from an optional `config/turnstile` file with
    /// `TURNSTILE__`-prefixed environment overrides on top.
    /// E.g. `TURNSTILE__RETRY__BACKOFF_MS=50` sets the retry backoff.
    pub fn load() -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/turnstile").required(false))
            .add_source(config::Environment::with_prefix("TURNSTILE").separator("__"))
            .build()?;
        settings.try_deserialize()
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}
