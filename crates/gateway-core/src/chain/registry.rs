//! Registry of chains, their supervisors and their upstream handles.
//!
//! One registry is built at startup and injected into every component that needs to
//! resolve a chain or an upstream id. Nothing in the core reaches for global state.

use super::{
    state::{upstream_index_for, UpstreamEvent},
    supervisor::{ChainSupervisor, SupervisorConfig, SupervisorStopped, UpstreamStates},
};
use crate::upstream::{connector::Upstream, errors::UpstreamError};
use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

struct ChainEntry {
    supervisor: Arc<ChainSupervisor>,
    upstreams: DashMap<Arc<str>, Arc<dyn Upstream>>,
}

/// Chains served by the gateway.
pub struct ChainRegistry {
    chains: DashMap<Arc<str>, Arc<ChainEntry>>,
    supervisor_config: SupervisorConfig,
    shutdown: CancellationToken,
}

impl ChainRegistry {
    /// Creates an empty registry. Supervisors started by it stop when `shutdown` fires.
    #[must_use]
    pub fn new(supervisor_config: SupervisorConfig, shutdown: CancellationToken) -> Self {
        Self { chains: DashMap::new(), supervisor_config, shutdown }
    }

    /// Adds a chain and starts its supervisor. Adding a known chain returns its supervisor.
    pub fn add_chain(&self, chain: &str) -> Arc<ChainSupervisor> {
        if let Some(entry) = self.chains.get(chain) {
            return Arc::clone(&entry.supervisor);
        }

        let states: UpstreamStates = Arc::new(DashMap::new());
        let supervisor = Arc::new(ChainSupervisor::new(chain, &self.supervisor_config, states));
        let entry = Arc::new(ChainEntry { supervisor: Arc::clone(&supervisor), upstreams: DashMap::new() });

        let entry = Arc::clone(self.chains.entry(Arc::from(chain)).or_insert(entry).value());
        entry.supervisor.start(self.shutdown.child_token());
        info!(chain = %chain, "chain registered");
        Arc::clone(&entry.supervisor)
    }

    /// Registers an upstream handle under its chain.
    ///
    /// The upstream publishes its own state through [`ChainSupervisor::publish`]. Sticky
    /// resources are routed by a short index derived from the upstream id, so an id whose
    /// index is already taken on the chain is rejected.
    pub fn register_upstream(&self, upstream: Arc<dyn Upstream>) -> Result<(), UpstreamError> {
        let entry = self
            .chains
            .get(upstream.chain())
            .ok_or_else(|| UpstreamError::UnknownChain(upstream.chain().to_string()))?;

        let index = upstream_index_for(upstream.id());
        let collision = entry
            .upstreams
            .iter()
            .find(|other| other.key() != upstream.id() && upstream_index_for(other.key()) == index)
            .map(|other| other.key().to_string());
        if let Some(existing) = collision {
            warn!(chain = %upstream.chain(), upstream = %upstream.id(), existing = %existing, "upstream index collision");
            return Err(UpstreamError::UpstreamIndexCollision { upstream: upstream.id().to_string(), existing, index });
        }

        info!(chain = %upstream.chain(), upstream = %upstream.id(), "upstream registered");
        entry.upstreams.insert(Arc::clone(upstream.id()), upstream);
        Ok(())
    }

    /// Drops an upstream handle and publishes its removal to the supervisor.
    pub async fn remove_upstream(&self, chain: &str, upstream_id: &str) -> Result<(), SupervisorStopped> {
        let Some(entry) = self.chains.get(chain).map(|e| Arc::clone(e.value())) else {
            warn!(chain = %chain, upstream = %upstream_id, "remove for unknown chain ignored");
            return Ok(());
        };
        entry.upstreams.remove(upstream_id);
        entry.supervisor.publish(UpstreamEvent::remove(upstream_id)).await
    }

    #[must_use]
    pub fn supervisor(&self, chain: &str) -> Option<Arc<ChainSupervisor>> {
        self.chains.get(chain).map(|entry| Arc::clone(&entry.supervisor))
    }

    #[must_use]
    pub fn upstream(&self, chain: &str, upstream_id: &str) -> Option<Arc<dyn Upstream>> {
        self.chains
            .get(chain)
            .and_then(|entry| entry.upstreams.get(upstream_id).map(|u| Arc::clone(u.value())))
    }

    /// Registered chain names, sorted.
    #[must_use]
    pub fn chains(&self) -> Vec<Arc<str>> {
        let mut chains: Vec<Arc<str>> = self.chains.iter().map(|e| Arc::clone(e.key())).collect();
        chains.sort_unstable();
        chains
    }
}
