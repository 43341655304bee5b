//! Response caching behind configurable policies.
//!
//! ```text
//!                ┌──────────────────────────────────────────┐
//!  request ────► │              CacheProcessor               │
//!                │  receive: race every matching policy      │
//!                │  store:   fan out to every accepting one  │
//!                └──────────────────────────────────────────┘
//!                     │               │               │
//!               ┌─────▼─────┐   ┌─────▼─────┐   ┌─────▼─────┐
//!               │ policy A  │   │ policy B  │   │ policy C  │  chain / method / size /
//!               │           │   │           │   │           │  empty / finality / ttl
//!               └─────┬─────┘   └─────┬─────┘   └─────┬─────┘
//!                     └───────┬───────┘               │
//!                      ┌──────▼───────┐        ┌──────▼───────┐
//!                      │ memory (LRU) │        │  other store │   CacheConnector
//!                      └──────────────┘        └──────────────┘
//! ```
//!
//! Connector failures never reach the caller; they are logged and treated as a miss.

pub mod connector;
pub mod memory;
pub mod policy;
pub mod processor;

pub use connector::{CacheConnector, CacheError};
pub use memory::{MemoryConnector, MemoryConnectorConfig};
pub use policy::{
    parse_size, CachePolicy, CachePolicyConfig, CachePolicyError, FinalizationType,
    StoreCandidate, StoreRejection,
};
pub use processor::CacheProcessor;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Upper bound for one multi-policy lookup in milliseconds (default: 1000).
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,

    #[serde(default)]
    pub connectors: Vec<MemoryConnectorConfig>,

    #[serde(default)]
    pub policies: Vec<CachePolicyConfig>,
}

fn default_receive_timeout_ms() -> u64 {
    1000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            receive_timeout_ms: default_receive_timeout_ms(),
            connectors: Vec::new(),
            policies: Vec::new(),
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

/// Builds the connectors and policies of `config` and starts the expiry sweepers.
///
/// # Errors
///
/// Fails when a policy references an unknown connector or has an invalid size.
pub fn build_cache_processor(
    config: &CacheConfig,
    shutdown: &CancellationToken,
) -> Result<CacheProcessor, CachePolicyError> {
    let mut connectors: AHashMap<String, Arc<dyn CacheConnector>> = AHashMap::new();
    for connector_config in &config.connectors {
        let connector = Arc::new(MemoryConnector::new(connector_config));
        connector.start_sweeper(shutdown.child_token());
        connectors.insert(connector_config.id.clone(), connector);
    }

    let policies = config
        .policies
        .iter()
        .map(|policy| CachePolicy::from_config(policy, &connectors))
        .collect::<Result<Vec<_>, _>>()?;

    info!(connectors = connectors.len(), policies = policies.len(), "cache processor initialized");
    Ok(CacheProcessor::new(policies, config.receive_timeout()))
}
