//! Single-writer aggregation of upstream state for one chain.
//!
//! ```text
//!  upstream A ──┐
//!  upstream B ──┼──► bounded queue ──► event loop ──► ArcSwap<ChainSupervisorState>
//!  integrity  ──┘        (mpsc)        (one task)           ▲
//!                                          │                 │ load()
//!                                          ▼                 │
//!                                DashMap<id, UpstreamState> ◄─┴── strategies, processors
//! ```
//!
//! All mutation happens on the event loop task; readers only ever see complete
//! snapshots, so events are applied strictly in the order they were published.

use super::{
    fork_choice::{ForkChoice, HeightForkChoice},
    state::{
        BlockData, BlockType, ChainHead, ChainSupervisorState, UpstreamEvent, UpstreamState,
        UpstreamStatus,
    },
};
use ahash::{AHashMap, AHashSet};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering as CmpOrdering,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

/// Concurrent store of upstream snapshots shared between a supervisor and its readers.
pub type UpstreamStates = Arc<DashMap<Arc<str>, Arc<UpstreamState>>>;

/// Supervisor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Capacity of the event queue (default: 1024).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Interval of the status monitor log in seconds (default: 60).
    #[serde(default = "default_monitor_interval_seconds")]
    pub monitor_interval_seconds: u64,
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_monitor_interval_seconds() -> u64 {
    60
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            monitor_interval_seconds: default_monitor_interval_seconds(),
        }
    }
}

/// Chain data observed in a response rather than announced by an upstream.
#[derive(Debug, Clone)]
pub enum ObservedBlock {
    Head(u64),
    Block(BlockData),
}

/// The supervisor event loop has stopped.
#[derive(Debug, Clone, thiserror::Error)]
#[error("chain supervisor for {0} is stopped")]
pub struct SupervisorStopped(pub Arc<str>);

#[derive(Debug)]
enum SupervisorMessage {
    Upstream(UpstreamEvent),
    Observed { upstream_id: Arc<str>, block: ObservedBlock },
}

/// Owns the merged view of one chain.
pub struct ChainSupervisor {
    chain: Arc<str>,
    state: ArcSwap<ChainSupervisorState>,
    upstream_states: UpstreamStates,
    sender: mpsc::Sender<SupervisorMessage>,
    receiver: Mutex<Option<mpsc::Receiver<SupervisorMessage>>>,
    rotation: AtomicUsize,
    monitor_interval: Duration,
}

impl ChainSupervisor {
    /// Creates a supervisor writing into `upstream_states`.
    ///
    /// The event loop does not run until [`ChainSupervisor::start`] is called.
    #[must_use]
    pub fn new(chain: &str, config: &SupervisorConfig, upstream_states: UpstreamStates) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            chain: Arc::from(chain),
            state: ArcSwap::from_pointee(ChainSupervisorState::default()),
            upstream_states,
            sender,
            receiver: Mutex::new(Some(receiver)),
            rotation: AtomicUsize::new(0),
            monitor_interval: Duration::from_secs(config.monitor_interval_seconds.max(1)),
        }
    }

    /// Spawns the event loop. Returns `None` if it was already started.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        let receiver = self.receiver.lock().take()?;
        let supervisor = Arc::clone(self);

        Some(tokio::spawn(async move {
            info!(chain = %supervisor.chain, "chain supervisor started");
            supervisor.run(receiver, shutdown).await;
            info!(chain = %supervisor.chain, "chain supervisor stopped");
        }))
    }

    async fn run(&self, mut receiver: mpsc::Receiver<SupervisorMessage>, shutdown: CancellationToken) {
        let mut core = SupervisorCore::new(Arc::clone(&self.chain));
        let mut monitor = tokio::time::interval(self.monitor_interval);
        monitor.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                message = receiver.recv() => {
                    let Some(message) = message else {
                        error!(chain = %self.chain, "chain supervisor queue closed");
                        break;
                    };
                    let snapshot = core.apply(message, &self.upstream_states);
                    self.state.store(Arc::new(snapshot));
                }
                _ = monitor.tick() => self.log_status(),
            }
        }
    }

    /// Enqueues an upstream event, waiting for queue capacity.
    pub async fn publish(&self, event: UpstreamEvent) -> Result<(), SupervisorStopped> {
        self.sender
            .send(SupervisorMessage::Upstream(event))
            .await
            .map_err(|_| SupervisorStopped(Arc::clone(&self.chain)))
    }

    /// Enqueues an upstream event without waiting. Returns `false` if the queue is full
    /// or the loop has stopped.
    #[must_use]
    pub fn try_publish(&self, event: UpstreamEvent) -> bool {
        self.sender.try_send(SupervisorMessage::Upstream(event)).is_ok()
    }

    /// Feeds back chain data observed in a response served by `upstream_id`.
    pub async fn observe(
        &self,
        upstream_id: Arc<str>,
        block: ObservedBlock,
    ) -> Result<(), SupervisorStopped> {
        self.sender
            .send(SupervisorMessage::Observed { upstream_id, block })
            .await
            .map_err(|_| SupervisorStopped(Arc::clone(&self.chain)))
    }

    #[must_use]
    pub fn chain(&self) -> &Arc<str> {
        &self.chain
    }

    /// Latest merged snapshot.
    #[must_use]
    pub fn chain_state(&self) -> Arc<ChainSupervisorState> {
        self.state.load_full()
    }

    #[must_use]
    pub fn upstream_state(&self, upstream_id: &str) -> Option<Arc<UpstreamState>> {
        self.upstream_states.get(upstream_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Known upstream ids in a stable order.
    #[must_use]
    pub fn upstream_ids(&self) -> Vec<Arc<str>> {
        let mut ids: Vec<Arc<str>> =
            self.upstream_states.iter().map(|entry| Arc::clone(entry.key())).collect();
        ids.sort_unstable();
        ids
    }

    /// Ids of upstreams accepted by `filter`, ordered by `sort`.
    pub fn sorted_upstream_ids<F, S>(&self, filter: F, sort: S) -> Vec<Arc<str>>
    where
        F: Fn(&str, &UpstreamState) -> bool,
        S: Fn(&UpstreamState, &UpstreamState) -> CmpOrdering,
    {
        let mut selected: Vec<(Arc<str>, Arc<UpstreamState>)> = self
            .upstream_states
            .iter()
            .filter(|entry| filter(&**entry.key(), &**entry.value()))
            .map(|entry| (Arc::clone(entry.key()), Arc::clone(entry.value())))
            .collect();
        selected.sort_by(|(id_a, a), (id_b, b)| sort(&**a, &**b).then_with(|| id_a.cmp(id_b)));
        selected.into_iter().map(|(id, _)| id).collect()
    }

    /// Next start offset for round-robin selection.
    pub fn next_rotation(&self) -> usize {
        self.rotation.fetch_add(1, Ordering::Relaxed)
    }

    fn log_status(&self) {
        let mut histogram: AHashMap<UpstreamStatus, usize> = AHashMap::new();
        for entry in self.upstream_states.iter() {
            *histogram.entry(entry.value().status).or_default() += 1;
        }
        let state = self.state.load();
        info!(
            chain = %self.chain,
            available = histogram.get(&UpstreamStatus::Available).copied().unwrap_or(0),
            unavailable = histogram.get(&UpstreamStatus::Unavailable).copied().unwrap_or(0),
            head = state.head.height,
            status = state.status.as_str(),
            "chain supervisor status"
        );
        crate::metrics::GatewayMetrics::record_chain_head(&self.chain, state.head.height);
    }
}

/// Writer-side state, owned by the event loop.
struct SupervisorCore {
    chain: Arc<str>,
    fork_choice: Box<dyn ForkChoice>,
    blocks: AHashMap<BlockType, (BlockData, Arc<str>)>,
}

impl SupervisorCore {
    fn new(chain: Arc<str>) -> Self {
        Self { chain, fork_choice: Box::new(HeightForkChoice::new()), blocks: AHashMap::new() }
    }

    fn apply(&mut self, message: SupervisorMessage, states: &UpstreamStates) -> ChainSupervisorState {
        match message {
            SupervisorMessage::Upstream(event) => {
                let id = Arc::clone(&event.id);
                match event.state() {
                    Some(state) => {
                        states.insert(Arc::clone(&id), Arc::clone(state));
                    }
                    None => {
                        states.remove(&id);
                    }
                }
                let choice = self.fork_choice.choose_state(&id, event.state().map(|s| &**s));
                trace!(
                    chain = %self.chain,
                    upstream = %id,
                    event = event.kind_str(),
                    head = choice.height,
                    head_updated = choice.updated,
                    "applied upstream event"
                );
            }
            SupervisorMessage::Observed { upstream_id, block } => {
                self.apply_observed(&upstream_id, block, states);
            }
        }
        self.recompute(states)
    }

    fn apply_observed(&mut self, upstream_id: &Arc<str>, block: ObservedBlock, states: &UpstreamStates) {
        let available = states.get(upstream_id).is_some_and(|s| s.is_available());
        if !available {
            return;
        }
        match block {
            ObservedBlock::Head(height) => {
                if height > self.fork_choice.recorded(upstream_id).unwrap_or(0) {
                    let choice = self.fork_choice.choose(upstream_id, Some(height));
                    debug!(
                        chain = %self.chain,
                        upstream = %upstream_id,
                        observed = height,
                        head = choice.height,
                        "observed head from response"
                    );
                }
            }
            ObservedBlock::Block(data) => {
                let current = self.blocks.get(&data.block_type).map_or(0, |(b, _)| b.height);
                if data.height > current {
                    debug!(
                        chain = %self.chain,
                        upstream = %upstream_id,
                        block_type = ?data.block_type,
                        observed = data.height,
                        "observed block marker from response"
                    );
                    self.blocks.insert(data.block_type, (data, Arc::clone(upstream_id)));
                }
            }
        }
    }

    fn recompute(&mut self, states: &UpstreamStates) -> ChainSupervisorState {
        let mut status = UpstreamStatus::Unavailable;
        let mut seen_any = false;
        let mut methods = AHashSet::new();
        let mut best: AHashMap<BlockType, (BlockData, Arc<str>)> = AHashMap::new();

        for entry in states.iter() {
            let state = entry.value();
            status = if seen_any { status.min(state.status) } else { state.status };
            seen_any = true;
            if !state.is_available() {
                continue;
            }
            methods.extend(state.methods.iter().cloned());
            for (block_type, data) in &state.block_info {
                let higher = best.get(block_type).is_none_or(|(b, _)| data.height > b.height);
                if higher {
                    best.insert(*block_type, (data.clone(), Arc::clone(entry.key())));
                }
            }
        }

        for block_type in BlockType::ALL {
            let candidate = best.remove(&block_type);
            let owner_available = self
                .blocks
                .get(&block_type)
                .is_some_and(|(_, owner)| states.get(owner).is_some_and(|s| s.is_available()));

            if owner_available {
                // monotonic while the owner stays available
                if let Some((data, owner)) = candidate {
                    let current = self.blocks.get(&block_type).map_or(0, |(b, _)| b.height);
                    if data.height > current {
                        self.blocks.insert(block_type, (data, owner));
                    }
                }
            } else {
                match candidate {
                    Some(entry) => {
                        self.blocks.insert(block_type, entry);
                    }
                    None => {
                        self.blocks.remove(&block_type);
                    }
                }
            }
        }

        ChainSupervisorState {
            status,
            head: ChainHead { height: self.fork_choice.height(), owner: self.fork_choice.leader() },
            methods: Arc::new(methods),
            blocks: self.blocks.iter().map(|(t, (data, _))| (*t, data.clone())).collect(),
        }
    }
}
