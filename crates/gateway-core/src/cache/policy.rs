//! Cache policies: which requests a connector may serve and which responses it may keep.
//!
//! A policy is built once from config and never changes. Policies may overlap; the
//! processor queries and stores through every matching one.

use super::connector::CacheConnector;
use crate::utils::{BlockParameter, BlockRef, BlockTag};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use thiserror::Error;

const WILDCARD: &str = "*";

/// Serialized forms of responses that count as empty.
const EMPTY_RESULTS: [&[u8]; 5] = [b"\"0x\"", b"null", b"{}", b"[]", b"\"None\""];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CachePolicyError {
    #[error("policy {policy} references unknown connector {connector}")]
    UnknownConnector { policy: String, connector: String },

    #[error("invalid max size: {0}")]
    InvalidSize(String),
}

/// Block state a response must refer to before it may be stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalizationType {
    #[default]
    None,
    Finalized,
}

/// One `[[cache.policies]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachePolicyConfig {
    pub id: String,

    pub connector_id: String,

    /// `"*"` or a comma separated list of chain names (default: `"*"`).
    #[serde(default = "default_wildcard")]
    pub chain: String,

    /// `"*"`, an exact method name or a glob such as `eth_get*` (default: `"*"`).
    #[serde(default = "default_wildcard")]
    pub method: String,

    #[serde(default)]
    pub finalization_type: FinalizationType,

    /// Whether empty responses may be stored (default: false).
    #[serde(default)]
    pub cache_empty: bool,

    /// Largest storable response, e.g. `"10KB"`, `"1MB"` or plain bytes (default: `"1MB"`).
    #[serde(default = "default_max_size")]
    pub max_size: String,

    /// Entry lifetime; `0` keeps entries until evicted (default: 0).
    #[serde(default)]
    pub ttl_seconds: u64,
}

fn default_wildcard() -> String {
    WILDCARD.to_string()
}

fn default_max_size() -> String {
    "1MB".to_string()
}

impl CachePolicyConfig {
    #[must_use]
    pub fn new(id: impl Into<String>, connector_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            connector_id: connector_id.into(),
            chain: default_wildcard(),
            method: default_wildcard(),
            finalization_type: FinalizationType::None,
            cache_empty: false,
            max_size: default_max_size(),
            ttl_seconds: 0,
        }
    }
}

/// Parses `"10KB"`, `"1MB"`, `"2GB"` or a plain byte count. Units are powers of 1024.
///
/// ```
/// use gateway_core::cache::policy::parse_size;
///
/// assert_eq!(parse_size("10KB").unwrap(), 10 * 1024);
/// assert_eq!(parse_size("1mb").unwrap(), 1024 * 1024);
/// assert_eq!(parse_size("512").unwrap(), 512);
/// ```
pub fn parse_size(raw: &str) -> Result<usize, CachePolicyError> {
    let trimmed = raw.trim();
    let upper = trimmed.to_ascii_uppercase();
    let (digits, multiplier) = if let Some(n) = upper.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = upper.strip_suffix("MB") {
        (n, 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("GB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix('B') {
        (n, 1)
    } else {
        (upper.as_str(), 1)
    };

    digits
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| CachePolicyError::InvalidSize(raw.to_string()))
}

/// `*` matches any run of characters, everything else matches literally.
fn glob_match(pattern: &str, text: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return text.is_empty();
    };
    let Some(mut rest) = text.strip_prefix(first) else {
        return false;
    };

    let mut segments: Vec<&str> = parts.collect();
    let Some(last) = segments.pop() else {
        return rest.is_empty();
    };
    for segment in segments {
        match rest.find(segment) {
            Some(pos) => rest = &rest[pos + segment.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

#[derive(Debug)]
enum MethodFilter {
    Any,
    Exact(String),
    Glob(String),
}

impl MethodFilter {
    fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw == WILDCARD {
            Self::Any
        } else if raw.contains('*') {
            Self::Glob(raw.to_string())
        } else {
            Self::Exact(raw.to_string())
        }
    }

    fn matches(&self, method: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(name) => name == method,
            Self::Glob(pattern) => glob_match(pattern, method),
        }
    }
}

/// Why a response was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRejection {
    TooLarge,
    Empty,
    NotFinalized,
    /// The request names a block relative to the chain head and the policy has no TTL.
    HeadRelative,
}

/// A response on its way into the cache.
#[derive(Debug, Clone, Copy)]
pub struct StoreCandidate<'a> {
    /// Serialized `result` value.
    pub bytes: &'a [u8],
    /// Block parameter of the request, if the method has one. A method whose block
    /// parameter was omitted passes `"latest"`.
    pub block: Option<&'a Value>,
    /// Finalized height of the chain at store time.
    pub finalized_height: Option<u64>,
}

/// A configured caching rule bound to one connector.
pub struct CachePolicy {
    id: String,
    chains: Option<Vec<String>>,
    method: MethodFilter,
    finalization: FinalizationType,
    cache_empty: bool,
    max_size: usize,
    ttl: Option<Duration>,
    connector: Arc<dyn CacheConnector>,
}

impl std::fmt::Debug for CachePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachePolicy")
            .field("id", &self.id)
            .field("connector", &self.connector.id())
            .field("chains", &self.chains)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

impl CachePolicy {
    /// Builds a policy, resolving its connector by id.
    ///
    /// # Errors
    ///
    /// Fails if the connector is unknown or `max_size` does not parse.
    pub fn from_config(
        config: &CachePolicyConfig,
        connectors: &AHashMap<String, Arc<dyn CacheConnector>>,
    ) -> Result<Self, CachePolicyError> {
        let connector = connectors.get(&config.connector_id).cloned().ok_or_else(|| {
            CachePolicyError::UnknownConnector {
                policy: config.id.clone(),
                connector: config.connector_id.clone(),
            }
        })?;

        let chains = match config.chain.trim() {
            "" | WILDCARD => None,
            list => Some(
                list.split(',').map(str::trim).filter(|c| !c.is_empty()).map(String::from).collect(),
            ),
        };

        Ok(Self {
            id: config.id.clone(),
            chains,
            method: MethodFilter::parse(&config.method),
            finalization: config.finalization_type,
            cache_empty: config.cache_empty,
            max_size: parse_size(&config.max_size)?,
            ttl: (config.ttl_seconds > 0).then(|| Duration::from_secs(config.ttl_seconds)),
            connector,
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn connector(&self) -> &Arc<dyn CacheConnector> {
        &self.connector
    }

    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    #[must_use]
    pub fn matches(&self, chain: &str, method: &str) -> bool {
        let chain_ok = self.chains.as_ref().is_none_or(|chains| chains.iter().any(|c| c == chain));
        chain_ok && self.method.matches(method)
    }

    /// Checks size, emptiness, head-relative block tags and finalization of a response.
    ///
    /// Answers for `latest`, `pending`, `safe` or `finalized` change as the chain moves,
    /// so they are only stored by policies whose entries expire.
    ///
    /// # Errors
    ///
    /// Returns the first rule the response breaks.
    pub fn check_storable(&self, candidate: &StoreCandidate<'_>) -> Result<(), StoreRejection> {
        if candidate.bytes.len() > self.max_size {
            return Err(StoreRejection::TooLarge);
        }
        if !self.cache_empty && is_empty_result(candidate.bytes) {
            return Err(StoreRejection::Empty);
        }
        if self.ttl.is_none() && is_head_relative(candidate.block) {
            return Err(StoreRejection::HeadRelative);
        }
        if self.finalization == FinalizationType::Finalized
            && !is_finalized(candidate.block, candidate.finalized_height)
        {
            return Err(StoreRejection::NotFinalized);
        }
        Ok(())
    }
}

fn is_empty_result(bytes: &[u8]) -> bool {
    bytes.is_empty() || EMPTY_RESULTS.contains(&bytes)
}

fn is_head_relative(block: Option<&Value>) -> bool {
    matches!(
        block.map(BlockParameter::parse_value),
        Some(Ok(BlockRef::Tag(BlockTag::Latest | BlockTag::Pending | BlockTag::Safe | BlockTag::Finalized)))
    )
}

fn is_finalized(block: Option<&Value>, finalized_height: Option<u64>) -> bool {
    match block.map(BlockParameter::parse_value) {
        Some(Ok(BlockRef::Tag(BlockTag::Earliest))) => true,
        Some(Ok(BlockRef::Number(height))) => finalized_height.is_some_and(|f| height <= f),
        _ => false,
    }
}
