//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: `Default` impls and `#[serde(default)]` helpers
//! 2. **Config file**: TOML file named by the `GATEWAY_CONFIG` env var
//! 3. **Environment variables**: `GATEWAY__SECTION__FIELD` overrides single fields
//!
//! # Configuration Sections
//!
//! - [`LoggingConfig`]: log level and format
//! - [`ExecutionConfig`]: request timeouts, supervisor queue, method bans
//! - [`CacheConfig`]: cache connectors and policies
//! - [`RatingConfig`]: dimension rating refresh
//! - [`ChainConfig`]: served chains with their strategy, retry and hedge settings
//! - [`MethodSpec`]: method table overrides
//!
//! # Example
//!
//! ```toml
//! [execution]
//! request_timeout_ms = 10000
//!
//! [[chains]]
//! name = "polygon"
//! chain_id = 137
//! strategy = "rating"
//! integrity = true
//!
//! [chains.hedge]
//! enabled = true
//! max_hedges = 2
//! ```

use crate::{
    cache::{parse_size, CacheConfig},
    chain::SupervisorConfig,
    flow::MethodSpec,
    resilience::{HedgeConfig, RetryConfig},
    upstream::{RateLimitConfig, RatingConfig, StrategyKind},
};
use ahash::AHashSet;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, time::Duration};

/// Application logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive. Defaults to `"info"`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

/// Request execution settings shared by every chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Deadline for one request, retries and hedges included. Defaults to `30000`.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Deadline for gateway-internal calls such as integrity re-queries. Defaults to `5000`.
    #[serde(default = "default_internal_timeout_ms")]
    pub internal_timeout_ms: u64,

    /// Capacity of each chain supervisor's event queue. Defaults to `1024`.
    #[serde(default = "default_supervisor_queue_capacity")]
    pub supervisor_queue_capacity: usize,

    /// Interval of the supervisor status log. Defaults to `60`.
    #[serde(default = "default_monitor_interval_seconds")]
    pub monitor_interval_seconds: u64,

    /// How long an upstream stays banned from a method it failed to serve. Defaults to `300`.
    #[serde(default = "default_method_ban_seconds")]
    pub method_ban_seconds: u64,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_internal_timeout_ms() -> u64 {
    5_000
}

fn default_supervisor_queue_capacity() -> usize {
    1024
}

fn default_monitor_interval_seconds() -> u64 {
    60
}

fn default_method_ban_seconds() -> u64 {
    300
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            internal_timeout_ms: default_internal_timeout_ms(),
            supervisor_queue_capacity: default_supervisor_queue_capacity(),
            monitor_interval_seconds: default_monitor_interval_seconds(),
            method_ban_seconds: default_method_ban_seconds(),
        }
    }
}

impl ExecutionConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn internal_timeout(&self) -> Duration {
        Duration::from_millis(self.internal_timeout_ms)
    }

    #[must_use]
    pub fn method_ban(&self) -> Duration {
        Duration::from_secs(self.method_ban_seconds)
    }

    #[must_use]
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            queue_capacity: self.supervisor_queue_capacity,
            monitor_interval_seconds: self.monitor_interval_seconds,
        }
    }
}

/// One served chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub name: String,

    /// Numeric chain id answered locally by `eth_chainId` and `net_version`.
    pub chain_id: u64,

    #[serde(default)]
    pub strategy: StrategyKind,

    /// Check head-sensitive responses against the tracked chain head.
    #[serde(default)]
    pub integrity: bool,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub hedge: HedgeConfig,
}

impl ChainConfig {
    #[must_use]
    pub fn new(name: impl Into<String>, chain_id: u64) -> Self {
        Self {
            name: name.into(),
            chain_id,
            strategy: StrategyKind::default(),
            integrity: false,
            retry: RetryConfig::default(),
            hedge: HedgeConfig::default(),
        }
    }
}

/// Root application configuration.
///
/// Loaded from TOML files and environment variables with the `GATEWAY` prefix and `__`
/// as the nesting separator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub rating: RatingConfig,

    /// Per-upstream request budgets keyed by upstream id.
    #[serde(default)]
    pub rate_limits: HashMap<String, RateLimitConfig>,

    #[serde(default)]
    pub chains: Vec<ChainConfig>,

    /// Method specs layered over the built-in EVM table.
    #[serde(default)]
    pub methods: Vec<MethodSpec>,
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// A missing file is not an error; defaults and the environment still apply.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be parsed or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("logging.level", default_log_level())?
            .set_default("logging.format", default_log_format())?
            .set_default("execution.request_timeout_ms", default_request_timeout_ms())?
            .set_default("execution.internal_timeout_ms", default_internal_timeout_ms())?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("GATEWAY").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Loads configuration from `GATEWAY_CONFIG`, falling back to `config/gateway.toml`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "config/gateway.toml".to_string());
        Self::from_file(&config_path)
    }

    #[must_use]
    pub fn chain(&self, name: &str) -> Option<&ChainConfig> {
        self.chains.iter().find(|chain| chain.name == name)
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string for the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.chains.is_empty() {
            return Err("No chains configured".to_string());
        }

        let mut names = AHashSet::new();
        for chain in &self.chains {
            if chain.name.is_empty() {
                return Err("Chain name must not be empty".to_string());
            }
            if !names.insert(chain.name.as_str()) {
                return Err(format!("Duplicate chain: {}", chain.name));
            }
            if chain.retry.max_attempts == 0 {
                return Err(format!("Retry max_attempts must be greater than 0 for chain {}", chain.name));
            }
            if chain.hedge.enabled && chain.hedge.max_hedges == 0 {
                return Err(format!("Hedging on chain {} needs max_hedges > 0", chain.name));
            }
            if !(0.0..=1.0).contains(&chain.hedge.latency_quantile) {
                return Err(format!("Hedge latency_quantile must be within 0..=1 for chain {}", chain.name));
            }
        }

        if self.execution.request_timeout_ms == 0 {
            return Err("Request timeout must be greater than 0".to_string());
        }
        if self.execution.internal_timeout_ms == 0 {
            return Err("Internal timeout must be greater than 0".to_string());
        }
        if self.execution.supervisor_queue_capacity == 0 {
            return Err("Supervisor queue capacity must be greater than 0".to_string());
        }
        if self.cache.receive_timeout_ms == 0 && !self.cache.policies.is_empty() {
            return Err("Cache receive timeout must be greater than 0".to_string());
        }

        let connectors: AHashSet<&str> = self.cache.connectors.iter().map(|c| c.id.as_str()).collect();
        for policy in &self.cache.policies {
            if !connectors.contains(policy.connector_id.as_str()) {
                return Err(format!(
                    "Cache policy {} references unknown connector {}",
                    policy.id, policy.connector_id
                ));
            }
            parse_size(&policy.max_size)
                .map_err(|_| format!("Invalid max_size for cache policy {}: {}", policy.id, policy.max_size))?;
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }
}
