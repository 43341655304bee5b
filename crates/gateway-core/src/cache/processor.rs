//! Multi-policy cache lookup and store.
//!
//! ```text
//! receive(chain, request)
//!   ├─ policy A (matches) ── connector.receive ─┐
//!   ├─ policy B (matches) ── connector.receive ─┼─► first non-empty hit wins,
//!   └─ policy C (skipped)                       │   the rest are aborted
//!                                   timeout ────┘
//! ```

use super::{
    connector::CacheError,
    policy::{CachePolicy, StoreCandidate},
};
use crate::{
    metrics::GatewayMetrics,
    types::{CacheStatus, JsonRpcRequest},
    utils::sha256_hex,
};
use bytes::Bytes;
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, trace, warn};

/// Races lookups across matching policies and fans stores out to them.
pub struct CacheProcessor {
    policies: Arc<Vec<CachePolicy>>,
    receive_timeout: Duration,
}

impl CacheProcessor {
    #[must_use]
    pub fn new(policies: Vec<CachePolicy>, receive_timeout: Duration) -> Self {
        Self { policies: Arc::new(policies), receive_timeout }
    }

    /// A processor without policies; every lookup misses.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Vec::new(), Duration::ZERO)
    }

    #[must_use]
    pub fn policies(&self) -> &[CachePolicy] {
        &self.policies
    }

    /// Cache key of a request: the chain plus a hash of method and params.
    #[must_use]
    pub fn cache_key(chain: &str, request: &JsonRpcRequest) -> String {
        let params = request.params.as_ref().map_or_else(|| "null".to_string(), Value::to_string);
        format!("{chain}_{}", sha256_hex(&[request.method.as_bytes(), params.as_bytes()]))
    }

    fn matching(&self, chain: &str, method: &str) -> Vec<usize> {
        self.policies
            .iter()
            .enumerate()
            .filter(|(_, policy)| policy.matches(chain, method))
            .map(|(index, _)| index)
            .collect()
    }

    /// Looks the request up in every matching policy at once.
    ///
    /// Returns the first non-empty hit. Connector errors, undecodable values and the
    /// receive timeout all count as a miss.
    pub async fn receive(&self, chain: &str, request: &JsonRpcRequest) -> Option<Value> {
        let matching = self.matching(chain, &request.method);
        if matching.is_empty() {
            return None;
        }

        let key = Arc::<str>::from(Self::cache_key(chain, request));
        let mut lookups = JoinSet::new();
        for index in matching {
            let policies = Arc::clone(&self.policies);
            let key = Arc::clone(&key);
            lookups.spawn(async move {
                let policy = &policies[index];
                (index, policy.connector().receive(&key).await)
            });
        }

        let race = async {
            while let Some(joined) = lookups.join_next().await {
                match joined {
                    Ok((index, Ok(bytes))) if !bytes.is_empty() => return Some((index, bytes)),
                    Ok((index, Ok(_) | Err(CacheError::NotFound))) => {
                        trace!(policy = %self.policies[index].id(), "cache miss");
                    }
                    Ok((index, Err(e))) => {
                        debug!(policy = %self.policies[index].id(), error = %e, "cache lookup failed");
                    }
                    Err(e) => debug!(error = %e, "cache lookup task failed"),
                }
            }
            None
        };

        let hit = tokio::time::timeout(self.receive_timeout, race).await.ok().flatten();
        lookups.abort_all();

        let status = if hit.is_some() { CacheStatus::Hit } else { CacheStatus::Miss };
        GatewayMetrics::record_cache(chain, &request.method, status);

        let (index, bytes) = hit?;
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => {
                debug!(chain = %chain, method = %request.method, policy = %self.policies[index].id(), "cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(policy = %self.policies[index].id(), error = %e, "undecodable cache entry");
                None
            }
        }
    }

    /// Stores `result` in every matching policy that accepts it.
    ///
    /// The writes run on a background task; the handle is only useful for tests and
    /// shutdown. Returns `None` when no policy takes the value.
    pub fn store(
        &self,
        chain: &str,
        request: &JsonRpcRequest,
        result: &Value,
        block: Option<&Value>,
        finalized_height: Option<u64>,
    ) -> Option<JoinHandle<()>> {
        let matching = self.matching(chain, &request.method);
        if matching.is_empty() {
            return None;
        }

        let bytes = match serde_json::to_vec(result) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!(method = %request.method, error = %e, "unserializable response not cached");
                return None;
            }
        };
        let candidate = StoreCandidate { bytes: &bytes, block, finalized_height };

        let accepted: Vec<usize> = matching
            .into_iter()
            .filter(|&index| {
                let policy = &self.policies[index];
                match policy.check_storable(&candidate) {
                    Ok(()) => true,
                    Err(reason) => {
                        trace!(policy = %policy.id(), method = %request.method, ?reason, "response not storable");
                        false
                    }
                }
            })
            .collect();
        if accepted.is_empty() {
            return None;
        }

        let policies = Arc::clone(&self.policies);
        let key = Self::cache_key(chain, request);
        Some(tokio::spawn(async move {
            let writes = accepted.into_iter().map(|index| {
                let policy = &policies[index];
                let value = bytes.clone();
                let key = key.as_str();
                async move {
                    let size = value.len();
                    match policy.connector().store(key, value, policy.ttl()).await {
                        Ok(()) => GatewayMetrics::record_cache_store(policy.connector().id(), size),
                        Err(e) => warn!(policy = %policy.id(), error = %e, "cache store failed"),
                    }
                }
            });
            futures::future::join_all(writes).await;
        }))
    }
}
