//! Shared dependencies of the request processors.

use super::{methods::MethodRegistry, processors::SubscriptionRegistry};
use crate::{
    cache::CacheProcessor,
    chain::{ChainRegistry, ChainSupervisor},
    config::ChainConfig,
    metrics::ExecutionStats,
    upstream::{DimensionTracker, StrategyFactory, UpstreamError},
};
use ahash::AHashMap;
use std::{sync::Arc, time::Duration};

/// Everything a processor needs, grouped so processors share one `Arc`.
pub struct FlowContext {
    pub registry: Arc<ChainRegistry>,
    pub cache: Arc<CacheProcessor>,
    pub strategies: Arc<StrategyFactory>,
    pub methods: Arc<dyn MethodRegistry>,
    pub tracker: Arc<DimensionTracker>,
    pub subscriptions: Arc<SubscriptionRegistry>,
    pub stats: Arc<ExecutionStats>,
    /// Deadline for integrity re-queries.
    pub internal_timeout: Duration,
    chains: AHashMap<String, ChainConfig>,
}

impl FlowContext {
    #[must_use]
    pub fn new(
        registry: Arc<ChainRegistry>,
        cache: Arc<CacheProcessor>,
        strategies: Arc<StrategyFactory>,
        methods: Arc<dyn MethodRegistry>,
        tracker: Arc<DimensionTracker>,
    ) -> Self {
        Self {
            registry,
            cache,
            strategies,
            methods,
            tracker,
            subscriptions: Arc::new(SubscriptionRegistry::new()),
            stats: Arc::new(ExecutionStats::new()),
            internal_timeout: Duration::from_secs(5),
            chains: AHashMap::new(),
        }
    }

    #[must_use]
    pub fn with_chain(mut self, config: ChainConfig) -> Self {
        self.chains.insert(config.name.clone(), config);
        self
    }

    #[must_use]
    pub fn with_internal_timeout(mut self, timeout: Duration) -> Self {
        self.internal_timeout = timeout;
        self
    }

    #[must_use]
    pub fn chain_config(&self, chain: &str) -> Option<&ChainConfig> {
        self.chains.get(chain)
    }

    /// Config and supervisor of a served chain.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::UnknownChain`] if either is missing.
    pub fn resolve_chain(&self, chain: &str) -> Result<(&ChainConfig, Arc<ChainSupervisor>), UpstreamError> {
        let config = self.chains.get(chain).ok_or_else(|| UpstreamError::UnknownChain(chain.to_string()))?;
        let supervisor =
            self.registry.supervisor(chain).ok_or_else(|| UpstreamError::UnknownChain(chain.to_string()))?;
        Ok((config, supervisor))
    }
}
