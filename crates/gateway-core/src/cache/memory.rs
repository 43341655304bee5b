//! In-memory LRU connector with per-entry expiry.
//!
//! Expired entries are dropped lazily on read and periodically by a sweep task. The
//! sweep stops when its shutdown token fires.

use super::connector::{CacheConnector, CacheError};
use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{num::NonZeroUsize, sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// In-memory connector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConnectorConfig {
    pub id: String,

    /// Maximum number of entries (default: 10000).
    #[serde(default = "default_max_items")]
    pub max_items: usize,

    /// Seconds between expiry sweeps (default: 30).
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

fn default_max_items() -> usize {
    10_000
}

fn default_sweep_interval_seconds() -> u64 {
    30
}

impl MemoryConnectorConfig {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            max_items: default_max_items(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// LRU-bounded in-memory connector.
pub struct MemoryConnector {
    id: String,
    entries: Mutex<LruCache<String, Entry>>,
    sweep_interval: Duration,
}

impl MemoryConnector {
    #[must_use]
    pub fn new(config: &MemoryConnectorConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_items).unwrap_or(NonZeroUsize::MIN);
        Self {
            id: config.id.clone(),
            entries: Mutex::new(LruCache::new(capacity)),
            sweep_interval: Duration::from_secs(config.sweep_interval_seconds.max(1)),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drops expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired: Vec<String> =
            entries.iter().filter(|(_, entry)| entry.is_expired(now)).map(|(key, _)| key.clone()).collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    /// Spawns the periodic expiry sweep.
    pub fn start_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let connector = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(connector.sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = connector.sweep();
                        if removed > 0 {
                            debug!(connector = %connector.id, removed, "expired cache entries swept");
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl CacheConnector for MemoryConnector {
    fn id(&self) -> &str {
        &self.id
    }

    async fn store(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), CacheError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.lock().put(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn receive(&self, key: &str) -> Result<Bytes, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Ok(entry.value.clone()),
            Some(_) => {
                entries.pop(key);
                Err(CacheError::NotFound)
            }
            None => Err(CacheError::NotFound),
        }
    }
}
