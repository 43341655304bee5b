//! Cache connector that counts its calls.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use gateway_core::cache::{CacheConnector, CacheError};
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

/// In-memory connector recording every lookup and store.
pub struct RecordingConnector {
    id: String,
    entries: DashMap<String, Bytes>,
    receives: AtomicUsize,
    stores: AtomicUsize,
}

impl RecordingConnector {
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string(), entries: DashMap::new(), receives: AtomicUsize::new(0), stores: AtomicUsize::new(0) }
    }

    #[must_use]
    pub fn receives(&self) -> usize {
        self.receives.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn stores(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes an entry directly, bypassing the counters.
    pub fn seed(&self, key: &str, value: &[u8]) {
        self.entries.insert(key.to_string(), Bytes::copy_from_slice(value));
    }
}

#[async_trait]
impl CacheConnector for RecordingConnector {
    fn id(&self) -> &str {
        &self.id
    }

    async fn store(&self, key: &str, value: Bytes, _ttl: Option<Duration>) -> Result<(), CacheError> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn receive(&self, key: &str) -> Result<Bytes, CacheError> {
        self.receives.fetch_add(1, Ordering::SeqCst);
        self.entries.get(key).map(|entry| entry.value().clone()).ok_or(CacheError::NotFound)
    }
}
