//! Per-upstream state snapshots and the events that carry them.
//!
//! An [`UpstreamState`] is owned by its upstream and published wholesale inside an
//! [`UpstreamEvent`]; once published it is never mutated. Helpers such as
//! [`UpstreamState::without_method`] return a new snapshot instead.

use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{fmt::Write, sync::Arc};

/// Number of hex characters in an upstream index.
pub const UPSTREAM_INDEX_LEN: usize = 4;

/// Availability of an upstream or of a whole chain.
///
/// Ordered so that `Available < Unavailable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UpstreamStatus {
    Available,
    Unavailable,
}

impl UpstreamStatus {
    /// Static label for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Block markers tracked besides the head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockType {
    Finalized,
    Safe,
}

impl BlockType {
    pub const ALL: [BlockType; 2] = [BlockType::Finalized, BlockType::Safe];
}

/// Capabilities an upstream may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Can serve subscriptions over a persistent connection.
    Ws,
}

/// Head reported by an upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadData {
    pub height: u64,
    pub hash: String,
    pub slot: u64,
}

impl HeadData {
    #[must_use]
    pub fn new(height: u64) -> Self {
        Self { height, hash: String::new(), slot: 0 }
    }
}

/// A non-head block marker such as the finalized block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockData {
    pub height: u64,
    pub hash: String,
    pub block_type: BlockType,
}

impl BlockData {
    #[must_use]
    pub fn new(height: u64, block_type: BlockType) -> Self {
        Self { height, hash: String::new(), block_type }
    }
}

/// Immutable snapshot of one upstream.
#[derive(Debug, Clone)]
pub struct UpstreamState {
    pub status: UpstreamStatus,
    pub head_data: HeadData,
    pub block_info: AHashMap<BlockType, BlockData>,
    pub methods: Arc<AHashSet<String>>,
    pub caps: AHashSet<Capability>,
    pub upstream_index: String,
}

impl UpstreamState {
    /// Creates an empty snapshot for `upstream_id` with the given status.
    #[must_use]
    pub fn new(upstream_id: &str, status: UpstreamStatus) -> Self {
        Self {
            status,
            head_data: HeadData::default(),
            block_info: AHashMap::new(),
            methods: Arc::new(AHashSet::new()),
            caps: AHashSet::new(),
            upstream_index: upstream_index_for(upstream_id),
        }
    }

    #[must_use]
    pub fn with_head(mut self, height: u64) -> Self {
        self.head_data = HeadData::new(height);
        self
    }

    #[must_use]
    pub fn with_block(mut self, block: BlockData) -> Self {
        self.block_info.insert(block.block_type, block);
        self
    }

    #[must_use]
    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods = Arc::new(methods.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_caps(mut self, caps: impl IntoIterator<Item = Capability>) -> Self {
        self.caps = caps.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: UpstreamStatus) -> Self {
        self.status = status;
        self
    }

    #[inline]
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.status == UpstreamStatus::Available
    }

    #[inline]
    #[must_use]
    pub fn has_method(&self, method: &str) -> bool {
        self.methods.contains(method)
    }

    /// Height of the given block marker, if the upstream reports one.
    #[must_use]
    pub fn block_height(&self, block_type: BlockType) -> Option<u64> {
        self.block_info.get(&block_type).map(|b| b.height)
    }

    /// Returns a new snapshot with `method` removed from the capability set.
    #[must_use]
    pub fn without_method(&self, method: &str) -> Self {
        let mut state = self.clone();
        let mut methods = (*self.methods).clone();
        methods.remove(method);
        state.methods = Arc::new(methods);
        state
    }

    /// Returns a new snapshot with `method` added to the capability set.
    #[must_use]
    pub fn with_method(&self, method: &str) -> Self {
        let mut state = self.clone();
        let mut methods = (*self.methods).clone();
        methods.insert(method.to_string());
        state.methods = Arc::new(methods);
        state
    }
}

/// Deterministic short hex index derived from an upstream id.
///
/// Sticky routing appends this index to resource ids created on an upstream and
/// decodes it from follow-up requests.
#[must_use]
pub fn upstream_index_for(upstream_id: &str) -> String {
    let digest = Sha256::digest(upstream_id.as_bytes());
    let mut index = String::with_capacity(UPSTREAM_INDEX_LEN);
    for byte in digest.iter().take(UPSTREAM_INDEX_LEN / 2) {
        let _ = write!(index, "{byte:02x}");
    }
    index
}

/// Event published by an upstream to its chain supervisor.
#[derive(Debug, Clone)]
pub struct UpstreamEvent {
    pub id: Arc<str>,
    pub kind: UpstreamEventKind,
}

/// Event taxonomy. Every variant except `Remove` carries the full new state.
#[derive(Debug, Clone)]
pub enum UpstreamEventKind {
    StateUpdate(Arc<UpstreamState>),
    BanMethod { method: String, state: Arc<UpstreamState> },
    UnbanMethod { method: String, state: Arc<UpstreamState> },
    Remove,
}

impl UpstreamEvent {
    #[must_use]
    pub fn state_update(id: impl Into<Arc<str>>, state: UpstreamState) -> Self {
        Self { id: id.into(), kind: UpstreamEventKind::StateUpdate(Arc::new(state)) }
    }

    #[must_use]
    pub fn remove(id: impl Into<Arc<str>>) -> Self {
        Self { id: id.into(), kind: UpstreamEventKind::Remove }
    }

    /// The new state, or `None` for a removal.
    #[must_use]
    pub fn state(&self) -> Option<&Arc<UpstreamState>> {
        match &self.kind {
            UpstreamEventKind::StateUpdate(state) |
            UpstreamEventKind::BanMethod { state, .. } |
            UpstreamEventKind::UnbanMethod { state, .. } => Some(state),
            UpstreamEventKind::Remove => None,
        }
    }

    /// Static label for logs.
    #[must_use]
    pub fn kind_str(&self) -> &'static str {
        match self.kind {
            UpstreamEventKind::StateUpdate(_) => "state_update",
            UpstreamEventKind::BanMethod { .. } => "ban_method",
            UpstreamEventKind::UnbanMethod { .. } => "unban_method",
            UpstreamEventKind::Remove => "remove",
        }
    }
}

/// Chain head as tracked by the supervisor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainHead {
    pub height: u64,
    pub owner: Option<Arc<str>>,
}

/// Merged view of one chain, published by its supervisor after every event.
#[derive(Debug, Clone)]
pub struct ChainSupervisorState {
    pub status: UpstreamStatus,
    pub head: ChainHead,
    pub methods: Arc<AHashSet<String>>,
    pub blocks: AHashMap<BlockType, BlockData>,
}

impl Default for ChainSupervisorState {
    fn default() -> Self {
        Self {
            status: UpstreamStatus::Unavailable,
            head: ChainHead::default(),
            methods: Arc::new(AHashSet::new()),
            blocks: AHashMap::new(),
        }
    }
}

impl ChainSupervisorState {
    /// Height of a tracked block marker.
    #[must_use]
    pub fn block_height(&self, block_type: BlockType) -> Option<u64> {
        self.blocks.get(&block_type).map(|b| b.height)
    }
}
