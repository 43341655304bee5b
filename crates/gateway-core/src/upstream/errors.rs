use crate::types::JsonRpcError;
use thiserror::Error;

/// Classification of JSON-RPC errors returned by upstreams.
///
/// - Client errors are the caller's fault and are never retried
/// - Provider errors and rate limits may succeed on another upstream
/// - Execution errors (reverts, out of gas) are forwarded as-is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcErrorCategory {
    /// Invalid request, invalid params.
    ClientError,
    /// The upstream does not serve the method (-32601 or an equivalent message).
    MethodNotFound,
    /// Internal or server error on the upstream side.
    ProviderError,
    /// Rate limiting at JSON-RPC level (-32005).
    RateLimit,
    /// Parse error from upstream.
    ParseError,
    /// Execution errors (reverts, out of gas, etc.).
    ExecutionError,
}

impl RpcErrorCategory {
    /// Classifies a JSON-RPC error code and message into a category.
    ///
    /// Codes in the `-32000..=-32099` server range are disambiguated by message: reverts
    /// and gas errors are execution errors, "method not found"/"not supported" style
    /// messages are method errors, everything else is a provider error.
    #[must_use]
    pub fn from_code_and_message(code: i32, message: &str) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32601 => Self::MethodNotFound,
            -32602 | -32600 => Self::ClientError,
            -32603 => Self::ProviderError,
            -32005 => Self::RateLimit,
            -32099..=-32000 => {
                let message_lower = message.to_lowercase();
                if message_lower.contains("execution reverted") ||
                    message_lower.contains("out of gas") ||
                    message_lower.contains("revert") ||
                    message_lower.contains("insufficient funds") ||
                    message_lower.contains("nonce too low") ||
                    message_lower.contains("gas too low")
                {
                    Self::ExecutionError
                } else if message_lower.contains("method not found") ||
                    message_lower.contains("not supported") ||
                    message_lower.contains("does not exist/is not available")
                {
                    Self::MethodNotFound
                } else {
                    Self::ProviderError
                }
            }
            _ => Self::ProviderError,
        }
    }

    /// Returns `true` if the same request may succeed on another upstream.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimit | Self::ProviderError | Self::MethodNotFound)
    }

    /// Returns a static string representation for metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientError => "client_error",
            Self::MethodNotFound => "method_not_found",
            Self::ProviderError => "provider_error",
            Self::RateLimit => "rate_limit",
            Self::ParseError => "parse_error",
            Self::ExecutionError => "execution_error",
        }
    }
}

/// Errors produced while orchestrating a request across upstreams.
///
/// Every variant maps to a stable numeric code via [`UpstreamError::code`] so it can be
/// rendered as a JSON-RPC error response.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum UpstreamError {
    /// No candidate upstream passed the matchers.
    #[error("no available upstreams to process a request")]
    NoAvailableUpstreams,

    /// The best available matcher failure was method related.
    #[error("the method {0} does not exist/is not available")]
    NotSupportedMethod(String),

    /// The request did not complete within the configured request timeout.
    #[error("request timeout")]
    RequestTimeout,

    /// Upstream transport call exceeded its own deadline.
    #[error("upstream timeout")]
    Timeout,

    /// Failed to reach the upstream endpoint.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// JSON-RPC error returned by the upstream provider.
    #[error("rpc error {0}: {1}")]
    RpcError(i32, String),

    /// Upstream payload could not be interpreted.
    #[error("incorrect response body: {0}")]
    IncorrectResponseBody(String),

    /// The retry budget was spent; wraps the last failure.
    #[error("retries exceeded after {attempts} attempts: {last}")]
    RetriesExceeded { attempts: u32, last: Box<UpstreamError> },

    /// The request context was cancelled.
    #[error("request cancelled")]
    Cancelled,

    /// The chain is not served by this gateway.
    #[error("chain {0} is not supported")]
    UnknownChain(String),

    /// An upstream id was selected that is no longer registered.
    #[error("upstream {0} is not registered")]
    UnknownUpstream(String),

    /// Two upstreams of one chain share a sticky routing index.
    #[error("upstream {upstream} shares index {index} with upstream {existing}")]
    UpstreamIndexCollision { upstream: String, existing: String, index: String },

    /// The upstream closed a subscription.
    #[error("subscription closed")]
    SubscriptionClosed,

    /// Request validation failed before dispatch.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl UpstreamError {
    /// Stable numeric code reported to clients.
    ///
    /// | error | code |
    /// |-------|------|
    /// | `NoAvailableUpstreams` | 1 |
    /// | `RequestTimeout` | 2 |
    /// | `IncorrectResponseBody` | 3 |
    /// | `RetriesExceeded` | 4 |
    /// | `Cancelled` | 5 |
    /// | `UnknownChain` | 6 |
    /// | `SubscriptionClosed` | 7 |
    /// | `NotSupportedMethod` | -32601 |
    /// | `InvalidRequest` | -32600 |
    /// | `RpcError` | upstream code |
    /// | transport errors | -32603 |
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::NoAvailableUpstreams => 1,
            Self::RequestTimeout => 2,
            Self::IncorrectResponseBody(_) => 3,
            Self::RetriesExceeded { .. } => 4,
            Self::Cancelled => 5,
            Self::UnknownChain(_) => 6,
            Self::SubscriptionClosed => 7,
            Self::NotSupportedMethod(_) => -32601,
            Self::InvalidRequest(_) => -32600,
            Self::RpcError(code, _) => *code,
            Self::Timeout
            | Self::ConnectionFailed(_)
            | Self::UnknownUpstream(_)
            | Self::UpstreamIndexCollision { .. } => -32603,
        }
    }

    /// Renders the error as a JSON-RPC error object.
    #[must_use]
    pub fn to_json_rpc_error(&self) -> JsonRpcError {
        match self {
            Self::RpcError(code, message) => {
                JsonRpcError { code: *code, message: message.clone(), data: None }
            }
            other => JsonRpcError { code: other.code(), message: other.to_string(), data: None },
        }
    }

    /// Returns the RPC error category if this is an RPC error.
    #[must_use]
    pub fn rpc_category(&self) -> Option<RpcErrorCategory> {
        match self {
            Self::RpcError(code, message) => {
                Some(RpcErrorCategory::from_code_and_message(*code, message))
            }
            _ => None,
        }
    }

    /// Returns `true` if the request should be retried on another upstream.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::ConnectionFailed(_) | Self::IncorrectResponseBody(_) => true,
            Self::RpcError(_, _) => self.rpc_category().is_some_and(|cat| cat.is_transient()),
            _ => false,
        }
    }

    /// Returns `true` for matcher/strategy failures that end a logical request.
    #[must_use]
    pub fn is_selection_failure(&self) -> bool {
        matches!(self, Self::NoAvailableUpstreams | Self::NotSupportedMethod(_))
    }

    /// Returns `true` for context cancellation, which callers treat as non-retryable.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Static label for metrics.
    #[must_use]
    pub fn as_metric_str(&self) -> &'static str {
        match self {
            Self::NoAvailableUpstreams => "no_available_upstreams",
            Self::NotSupportedMethod(_) => "not_supported_method",
            Self::RequestTimeout => "request_timeout",
            Self::Timeout => "timeout",
            Self::ConnectionFailed(_) => "connection_failed",
            Self::RpcError(_, _) => "rpc_error",
            Self::IncorrectResponseBody(_) => "incorrect_response_body",
            Self::RetriesExceeded { .. } => "retries_exceeded",
            Self::Cancelled => "cancelled",
            Self::UnknownChain(_) => "unknown_chain",
            Self::UnknownUpstream(_) => "unknown_upstream",
            Self::UpstreamIndexCollision { .. } => "upstream_index_collision",
            Self::SubscriptionClosed => "subscription_closed",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }
}

impl From<JsonRpcError> for UpstreamError {
    fn from(error: JsonRpcError) -> Self {
        Self::RpcError(error.code, error.message)
    }
}
