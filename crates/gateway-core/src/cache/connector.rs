//! Storage backends behind cache policies.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

/// Connector failures. All of them are treated as a miss by the cache processor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CacheError {
    #[error("cache entry not found")]
    NotFound,

    #[error("cache operation timed out")]
    Timeout,

    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Key-value store used by cache policies.
#[async_trait]
pub trait CacheConnector: Send + Sync {
    /// Connector id referenced by policies.
    fn id(&self) -> &str;

    /// Stores `value` under `key`. `None` keeps the entry until it is evicted.
    async fn store(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Loads the value stored under `key`.
    async fn receive(&self, key: &str) -> Result<Bytes, CacheError>;
}
