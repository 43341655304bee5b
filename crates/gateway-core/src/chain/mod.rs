//! Per-chain aggregated state.
//!
//! Each upstream owns an immutable [`UpstreamState`] and publishes a replacement on every
//! change. The chain's [`ChainSupervisor`] consumes those events on a single task and
//! publishes a merged [`ChainSupervisorState`]:
//!
//! ```text
//! ┌────────────┐   UpstreamEvent    ┌─────────────────┐   load()   ┌────────────────┐
//! │ Upstream A │ ─────────────────► │                 │ ◄───────── │ UpstreamStrategy│
//! ├────────────┤                    │ ChainSupervisor │            ├────────────────┤
//! │ Upstream B │ ─────────────────► │  + ForkChoice   │ ◄───────── │ CacheProcessor │
//! ├────────────┤   ObservedBlock    │                 │            ├────────────────┤
//! │ Integrity  │ ─────────────────► │                 │ ◄───────── │ Integrity      │
//! └────────────┘                    └─────────────────┘            └────────────────┘
//! ```
//!
//! The [`ChainRegistry`] owns one supervisor per chain together with the upstream handles.
//!
//! ## Head Semantics
//!
//! The head is chosen by [`HeightForkChoice`]: the maximum height over available upstreams.
//! Removing the upstream that holds the maximum lowers the head to the best remaining
//! report. Consumers must not assume the head never decreases.

pub mod fork_choice;
pub mod registry;
pub mod state;
pub mod supervisor;

pub use fork_choice::{ForkChoice, HeadChoice, HeightForkChoice};
pub use registry::ChainRegistry;
pub use state::{
    upstream_index_for, BlockData, BlockType, Capability, ChainHead, ChainSupervisorState,
    HeadData, UpstreamEvent, UpstreamEventKind, UpstreamState, UpstreamStatus, UPSTREAM_INDEX_LEN,
};
pub use supervisor::{ChainSupervisor, ObservedBlock, SupervisorConfig, SupervisorStopped, UpstreamStates};
