//! Post-request hooks fed with every upstream attempt of a request.

use super::request::{AttemptOutcome, RequestHolder, RequestResult};
use crate::{
    chain::{ChainRegistry, UpstreamEvent, UpstreamEventKind},
    metrics::GatewayMetrics,
    upstream::{DimensionTracker, RpcErrorCategory},
};
use dashmap::DashSet;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Observes the attempts made for one request after it completes.
pub trait ResultHook: Send + Sync {
    fn on_results(&self, holder: &RequestHolder, results: &[RequestResult]);
}

/// Latency and success counters per chain, method and upstream.
pub struct DimensionHook {
    tracker: Arc<DimensionTracker>,
}

impl DimensionHook {
    #[must_use]
    pub fn new(tracker: Arc<DimensionTracker>) -> Self {
        Self { tracker }
    }
}

impl ResultHook for DimensionHook {
    fn on_results(&self, holder: &RequestHolder, results: &[RequestResult]) {
        for result in results {
            self.tracker.record(
                &holder.chain,
                holder.method(),
                &result.upstream_id,
                result.duration,
                result.outcome.is_healthy(),
            );
        }
    }
}

/// Bans a method on an upstream that advertises it but answers "method not found".
///
/// The method is restored after `ban` unless the gateway shuts down first.
pub struct MethodBanHook {
    registry: Arc<ChainRegistry>,
    ban: Duration,
    shutdown: CancellationToken,
    banned: Arc<DashSet<(Arc<str>, Arc<str>, String)>>,
}

impl MethodBanHook {
    #[must_use]
    pub fn new(registry: Arc<ChainRegistry>, ban: Duration, shutdown: CancellationToken) -> Self {
        Self { registry, ban, shutdown, banned: Arc::new(DashSet::new()) }
    }

    /// Number of bans currently in force.
    #[must_use]
    pub fn active_bans(&self) -> usize {
        self.banned.len()
    }

    fn ban(&self, chain: &Arc<str>, upstream_id: &Arc<str>, method: &str) {
        let Some(supervisor) = self.registry.supervisor(chain) else { return };
        let Some(state) = supervisor.upstream_state(upstream_id) else { return };
        if !state.has_method(method) {
            return;
        }
        let key = (Arc::clone(chain), Arc::clone(upstream_id), method.to_string());
        if !self.banned.insert(key.clone()) {
            return;
        }

        let event = UpstreamEvent {
            id: Arc::clone(upstream_id),
            kind: UpstreamEventKind::BanMethod {
                method: method.to_string(),
                state: Arc::new(state.without_method(method)),
            },
        };
        if !supervisor.try_publish(event) {
            warn!(chain = %chain, upstream = %upstream_id, method = %method, "supervisor queue full, ban dropped");
            self.banned.remove(&key);
            return;
        }
        info!(chain = %chain, upstream = %upstream_id, method = %method, ban_seconds = self.ban.as_secs(), "method banned");
        GatewayMetrics::record_method_ban(chain, upstream_id, method);

        let banned = Arc::clone(&self.banned);
        let shutdown = self.shutdown.clone();
        let ban = self.ban;
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => return,
                () = tokio::time::sleep(ban) => {}
            }
            let (chain, upstream_id, method) = &key;
            if let Some(current) = supervisor.upstream_state(upstream_id) {
                let event = UpstreamEvent {
                    id: Arc::clone(upstream_id),
                    kind: UpstreamEventKind::UnbanMethod {
                        method: method.clone(),
                        state: Arc::new(current.with_method(method)),
                    },
                };
                if supervisor.publish(event).await.is_ok() {
                    info!(chain = %chain, upstream = %upstream_id, method = %method, "method unbanned");
                }
            }
            banned.remove(&key);
        });
    }
}

impl ResultHook for MethodBanHook {
    fn on_results(&self, holder: &RequestHolder, results: &[RequestResult]) {
        for result in results {
            if let AttemptOutcome::RpcError { category: RpcErrorCategory::MethodNotFound, .. } = result.outcome {
                self.ban(&holder.chain, &result.upstream_id, holder.method());
            }
        }
    }
}
