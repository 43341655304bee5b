//! JSON-RPC value types shared by every layer of the gateway core.
//!
//! Wire parsing lives with the transports; the core only moves these values
//! between processors, upstreams and cache connectors.
//!
//! # Performance Notes
//!
//! - `jsonrpc` uses `Cow<'static, str>` so responses built with [`JSONRPC_VERSION_COW`] never
//!   allocate the version string.
//! - `id` is an `Arc<serde_json::Value>` because the same id is echoed into every response
//!   produced for a request (hedge branches, subscription events, error renderings).

use serde::{Deserialize, Serialize};
use std::{borrow::Cow, sync::Arc};

/// JSON-RPC protocol version.
pub const JSONRPC_VERSION: &str = "2.0";

/// Pre-allocated `Cow` for the protocol version.
pub const JSONRPC_VERSION_COW: Cow<'static, str> = Cow::Borrowed(JSONRPC_VERSION);

/// Describes whether a response was served from a cache connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum CacheStatus {
    /// Served by one of the matching cache policies.
    Hit,
    /// Fetched from an upstream.
    Miss,
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheStatus::Hit => write!(f, "HIT"),
            CacheStatus::Miss => write!(f, "MISS"),
        }
    }
}

/// JSON-RPC 2.0 request.
///
/// # Example
///
/// ```
/// use gateway_core::types::JsonRpcRequest;
/// use serde_json::json;
///
/// let request = JsonRpcRequest::new("eth_blockNumber", None, json!(1));
///
/// assert_eq!(request.method, "eth_blockNumber");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    pub params: Option<serde_json::Value>,
    pub id: Arc<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Creates a new JSON-RPC request.
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        params: Option<serde_json::Value>,
        id: serde_json::Value,
    ) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, method: method.into(), params, id: Arc::new(id) }
    }

    /// Returns the positional parameter at `index`, if the params are an array.
    #[must_use]
    pub fn param(&self, index: usize) -> Option<&serde_json::Value> {
        self.params.as_ref().and_then(|p| p.as_array()).and_then(|a| a.get(index))
    }

    /// Returns a copy of this request with positional parameter `index` replaced.
    ///
    /// Requests without array params are returned unchanged.
    #[must_use]
    pub fn with_param(&self, index: usize, value: serde_json::Value) -> Self {
        let mut request = self.clone();
        if let Some(slot) =
            request.params.as_mut().and_then(|p| p.as_array_mut()).and_then(|a| a.get_mut(index))
        {
            *slot = value;
        }
        request
    }
}

/// JSON-RPC 2.0 response.
///
/// A response carries either a `result` or an `error`, never both.
///
/// ```
/// use gateway_core::types::JsonRpcResponse;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let response = JsonRpcResponse::success(json!("0x1234"), Arc::new(json!(1)));
/// assert!(!response.is_error());
///
/// let response = JsonRpcResponse::error(-32600, "Invalid Request".to_string(), Arc::new(json!(1)));
/// assert!(response.is_error());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Arc<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_status: Option<CacheStatus>,
}

impl JsonRpcResponse {
    /// Creates a successful response.
    #[must_use]
    pub fn success(result: serde_json::Value, id: Arc<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION_COW,
            result: Some(result),
            error: None,
            id,
            cache_status: None,
        }
    }

    /// Creates an error response.
    #[must_use]
    pub fn error(code: i32, message: String, id: Arc<serde_json::Value>) -> Self {
        Self::from_error(JsonRpcError { code, message, data: None }, id)
    }

    /// Creates an error response from an existing error object.
    #[must_use]
    pub fn from_error(error: JsonRpcError, id: Arc<serde_json::Value>) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, result: None, error: Some(error), id, cache_status: None }
    }

    /// Returns `true` if the response carries an error object.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Marks the response with its cache status.
    #[must_use]
    pub fn with_cache_status(mut self, status: CacheStatus) -> Self {
        self.cache_status = Some(status);
        self
    }
}

/// JSON-RPC 2.0 error object.
///
/// Upstream errors keep their original code; errors produced by the gateway itself
/// use the stable codes listed on [`UpstreamError::code`](crate::upstream::UpstreamError::code).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}
