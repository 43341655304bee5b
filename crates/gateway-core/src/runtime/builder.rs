//! Builder wiring the core components from configuration.

use super::{lifecycle::GatewayRuntime, GatewayComponents};
use crate::{
    cache::{build_cache_processor, CachePolicyError},
    chain::ChainRegistry,
    config::AppConfig,
    flow::{
        DimensionHook, ExecutionFlow, FlowContext, MethodBanHook, MethodRegistry, ResultHook,
        StaticMethodRegistry,
    },
    upstream::{DimensionRating, DimensionTracker, RateBudget, RatingRegistry, StrategyFactory, StrategyKind},
};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Errors that can occur during runtime initialization.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    #[error("Cache initialization failed: {0}")]
    Cache(#[from] CachePolicyError),
}

/// Builds a [`GatewayRuntime`].
///
/// Must be called inside a Tokio runtime: building starts background tasks.
///
/// # Examples
///
/// ```no_run
/// # use gateway_core::{config::AppConfig, runtime::GatewayRuntimeBuilder};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let runtime = GatewayRuntimeBuilder::new().with_config(AppConfig::load()?).build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct GatewayRuntimeBuilder {
    config: Option<AppConfig>,
    methods: Option<Arc<dyn MethodRegistry>>,
    shutdown: Option<CancellationToken>,
}

impl GatewayRuntimeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replaces the method table built from the EVM defaults and `config.methods`.
    #[must_use]
    pub fn with_method_registry(mut self, methods: Arc<dyn MethodRegistry>) -> Self {
        self.methods = Some(methods);
        self
    }

    /// Ties the runtime's background tasks to an outer shutdown token.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Builds the runtime and starts its background tasks.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] if the configuration is missing or invalid, or a cache
    /// policy cannot be built.
    pub fn build(self) -> Result<GatewayRuntime, RuntimeError> {
        let config = self
            .config
            .ok_or_else(|| RuntimeError::ConfigValidation("No configuration provided".to_string()))?;
        config.validate().map_err(RuntimeError::ConfigValidation)?;

        info!(
            chains = config.chains.len(),
            cache_policies = config.cache.policies.len(),
            methods = config.methods.len(),
            "initializing gateway runtime"
        );

        let shutdown = self.shutdown.map_or_else(CancellationToken::new, |outer| outer.child_token());

        let registry = Arc::new(ChainRegistry::new(config.execution.supervisor_config(), shutdown.clone()));
        for chain in &config.chains {
            registry.add_chain(&chain.name);
        }
        debug!("chain supervisors started");

        let cache = Arc::new(build_cache_processor(&config.cache, &shutdown)?);

        let tracker = Arc::new(DimensionTracker::new(config.rating.window_size));
        let rating = config.chains.iter().any(|chain| chain.strategy == StrategyKind::Rating).then(|| {
            Arc::new(DimensionRating::new(Arc::clone(&tracker), config.rating.clone()))
        });
        let rating_task = rating.as_ref().map(|rating| rating.start(shutdown.child_token()));
        debug!(rating = rating.is_some(), "rating initialized");

        let budget = Arc::new(RateBudget::new(
            config.rate_limits.iter().map(|(id, limit)| (id.clone(), *limit)).collect(),
        ));
        let strategies = Arc::new(StrategyFactory::new(
            rating.clone().map(|rating| rating as Arc<dyn RatingRegistry>),
            budget,
        ));

        let methods = self.methods.unwrap_or_else(|| {
            Arc::new(StaticMethodRegistry::evm_defaults().extend(config.methods.iter().cloned()))
        });

        let mut ctx = FlowContext::new(Arc::clone(&registry), Arc::clone(&cache), strategies, methods, Arc::clone(&tracker))
            .with_internal_timeout(config.execution.internal_timeout());
        for chain in &config.chains {
            ctx = ctx.with_chain(chain.clone());
        }

        let dimensions: Arc<dyn ResultHook> = Arc::new(DimensionHook::new(Arc::clone(&tracker)));
        let bans: Arc<dyn ResultHook> =
            Arc::new(MethodBanHook::new(Arc::clone(&registry), config.execution.method_ban(), shutdown.clone()));
        let hooks = vec![dimensions, bans];
        let flow = ExecutionFlow::new(Arc::new(ctx), config.execution.request_timeout()).with_hooks(hooks);

        let components = GatewayComponents::new(registry, cache, tracker, rating, flow);
        info!("gateway runtime initialization complete");
        Ok(GatewayRuntime::new(components, shutdown, config, rating_task))
    }
}
