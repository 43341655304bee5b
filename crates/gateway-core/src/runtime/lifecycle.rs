//! Runtime lifecycle: component access and graceful shutdown.

use super::{builder::GatewayRuntimeBuilder, GatewayComponents};
use crate::{chain::ChainRegistry, config::AppConfig, flow::ExecutionFlow};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Owns the initialized components and their background tasks.
///
/// Chain supervisors, cache sweepers, method-ban timers and the rating refresh all run
/// under one [`CancellationToken`]; [`GatewayRuntime::shutdown`] cancels it.
pub struct GatewayRuntime {
    components: GatewayComponents,
    shutdown: CancellationToken,
    config: AppConfig,
    rating_task: Option<JoinHandle<()>>,
}

impl GatewayRuntime {
    #[must_use]
    pub fn builder() -> GatewayRuntimeBuilder {
        GatewayRuntimeBuilder::new()
    }

    pub(super) fn new(
        components: GatewayComponents,
        shutdown: CancellationToken,
        config: AppConfig,
        rating_task: Option<JoinHandle<()>>,
    ) -> Self {
        Self { components, shutdown, config, rating_task }
    }

    #[must_use]
    pub fn components(&self) -> &GatewayComponents {
        &self.components
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Convenience accessor for the execution flow.
    #[must_use]
    pub fn flow(&self) -> &ExecutionFlow {
        self.components.flow()
    }

    /// Convenience accessor for the chain registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ChainRegistry> {
        self.components.registry()
    }

    /// Token cancelled on shutdown, for tasks the embedding process ties to the runtime.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stops every background task and waits for the rating refresh to finish.
    pub async fn shutdown(self) {
        info!("initiating gateway runtime shutdown");
        self.shutdown.cancel();

        if let Some(task) = self.rating_task {
            match task.await {
                Ok(()) => debug!("rating task completed"),
                Err(e) if e.is_cancelled() => debug!("rating task cancelled"),
                Err(e) => error!(error = %e, "rating task failed"),
            }
        }
        info!("gateway runtime shutdown complete");
    }

    /// Waits until the shutdown token is cancelled elsewhere, then shuts down.
    pub async fn wait_for_shutdown(self) {
        self.shutdown.cancelled().await;
        info!("shutdown signal received, runtime terminating");
        self.shutdown().await;
    }
}
