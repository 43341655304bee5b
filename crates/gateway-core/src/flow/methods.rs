//! Method table and request classification.
//!
//! Method specs are loaded outside the core; processors only consult them through
//! [`MethodRegistry`].

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Role of a method in a sticky create/send pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StickyRole {
    /// Creates a resource on one upstream, e.g. `eth_newFilter`.
    Create,
    /// Uses a resource created earlier, e.g. `eth_getFilterChanges`.
    Send,
}

/// How a method behaves in the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSpec {
    pub name: String,

    /// Responses may be cached.
    #[serde(default)]
    pub cacheable: bool,

    /// Position of the block parameter, used by finalization checks.
    #[serde(default)]
    pub block_param: Option<usize>,

    #[serde(default)]
    pub sticky: Option<StickyRole>,

    /// Responses are checked against the tracked chain head.
    #[serde(default)]
    pub integrity: bool,

    /// Answered by the gateway itself.
    #[serde(default)]
    pub local: bool,

    #[serde(default)]
    pub subscription: bool,

    /// Cancels a subscription; implies `local`.
    #[serde(default)]
    pub unsubscribe: bool,
}

impl MethodSpec {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cacheable: false,
            block_param: None,
            sticky: None,
            integrity: false,
            local: false,
            subscription: false,
            unsubscribe: false,
        }
    }

    #[must_use]
    pub fn cacheable(mut self, block_param: Option<usize>) -> Self {
        self.cacheable = true;
        self.block_param = block_param;
        self
    }

    #[must_use]
    pub fn sticky(mut self, role: StickyRole) -> Self {
        self.sticky = Some(role);
        self
    }

    #[must_use]
    pub fn integrity(mut self) -> Self {
        self.integrity = true;
        self
    }

    #[must_use]
    pub fn local(mut self) -> Self {
        self.local = true;
        self
    }

    #[must_use]
    pub fn subscription(mut self) -> Self {
        self.subscription = true;
        self
    }

    #[must_use]
    pub fn unsubscribe(mut self) -> Self {
        self.unsubscribe = true;
        self.local = true;
        self
    }
}

/// Processor family a request is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Local,
    Subscription,
    Sticky(StickyRole),
    Integrity,
    Unary,
}

impl RequestKind {
    /// Classifies a method. Unknown methods are plain unary requests.
    ///
    /// Integrity checks only apply when the chain enables them.
    #[must_use]
    pub fn classify(spec: Option<&MethodSpec>, integrity_enabled: bool) -> Self {
        let Some(spec) = spec else {
            return Self::Unary;
        };
        if spec.subscription {
            Self::Subscription
        } else if spec.local || spec.unsubscribe {
            Self::Local
        } else if let Some(role) = spec.sticky {
            Self::Sticky(role)
        } else if spec.integrity && integrity_enabled {
            Self::Integrity
        } else {
            Self::Unary
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Subscription => "subscription",
            Self::Sticky(StickyRole::Create) => "sticky_create",
            Self::Sticky(StickyRole::Send) => "sticky_send",
            Self::Integrity => "integrity",
            Self::Unary => "unary",
        }
    }
}

/// Source of method specs.
pub trait MethodRegistry: Send + Sync {
    fn method(&self, name: &str) -> Option<&MethodSpec>;
}

/// Method table fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticMethodRegistry {
    methods: AHashMap<String, MethodSpec>,
}

impl StaticMethodRegistry {
    /// Later specs replace earlier ones with the same name.
    #[must_use]
    pub fn new(specs: impl IntoIterator<Item = MethodSpec>) -> Self {
        Self { methods: specs.into_iter().map(|spec| (spec.name.clone(), spec)).collect() }
    }

    /// Common EVM methods.
    #[must_use]
    pub fn evm_defaults() -> Self {
        Self::new([
            MethodSpec::new("eth_chainId").local(),
            MethodSpec::new("net_version").local(),
            MethodSpec::new("eth_subscribe").subscription(),
            MethodSpec::new("eth_unsubscribe").unsubscribe(),
            MethodSpec::new("eth_newFilter").sticky(StickyRole::Create),
            MethodSpec::new("eth_newBlockFilter").sticky(StickyRole::Create),
            MethodSpec::new("eth_newPendingTransactionFilter").sticky(StickyRole::Create),
            MethodSpec::new("eth_getFilterChanges").sticky(StickyRole::Send),
            MethodSpec::new("eth_getFilterLogs").sticky(StickyRole::Send),
            MethodSpec::new("eth_uninstallFilter").sticky(StickyRole::Send),
            MethodSpec::new("eth_blockNumber").integrity(),
            MethodSpec::new("eth_getBlockByNumber").cacheable(Some(0)).integrity(),
            MethodSpec::new("eth_getBlockByHash").cacheable(None),
            MethodSpec::new("eth_getBalance").cacheable(Some(1)),
            MethodSpec::new("eth_getCode").cacheable(Some(1)),
            MethodSpec::new("eth_getStorageAt").cacheable(Some(2)),
            MethodSpec::new("eth_getTransactionCount").cacheable(Some(1)),
            MethodSpec::new("eth_call").cacheable(Some(1)),
            MethodSpec::new("eth_getLogs").cacheable(None),
            MethodSpec::new("eth_getTransactionByHash").cacheable(None),
            MethodSpec::new("eth_getTransactionReceipt").cacheable(None),
        ])
    }

    /// Adds specs on top of the current table.
    #[must_use]
    pub fn extend(mut self, specs: impl IntoIterator<Item = MethodSpec>) -> Self {
        self.methods.extend(specs.into_iter().map(|spec| (spec.name.clone(), spec)));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl MethodRegistry for StaticMethodRegistry {
    fn method(&self, name: &str) -> Option<&MethodSpec> {
        self.methods.get(name)
    }
}
