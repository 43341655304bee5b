//! Reduction of per-upstream head announcements into one chain head height.
//!
//! The head only moves forward while upstreams stay available. When the upstream
//! holding the maximum becomes unavailable or is removed, the maximum is recomputed
//! over the remaining upstreams and the head can move backwards.

use super::state::{UpstreamState, UpstreamStatus};
use std::{collections::HashMap, sync::Arc};

/// Outcome of a [`ForkChoice::choose`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadChoice {
    /// Whether the tracked head height changed.
    pub updated: bool,
    /// Head height after the call.
    pub height: u64,
}

/// Picks a canonical head height from divergent upstream reports.
pub trait ForkChoice: Send {
    /// Records a report from `upstream_id`.
    ///
    /// `Some(height)` is an available upstream announcing `height`; `None` means the
    /// upstream became unavailable or was removed.
    fn choose(&mut self, upstream_id: &Arc<str>, height: Option<u64>) -> HeadChoice;

    /// Current head height.
    fn height(&self) -> u64;

    /// Upstream whose report produced the current head.
    fn leader(&self) -> Option<Arc<str>>;

    /// Height recorded for an upstream.
    fn recorded(&self, upstream_id: &str) -> Option<u64>;

    /// Applies a full state snapshot, `None` meaning removal.
    fn choose_state(&mut self, upstream_id: &Arc<str>, state: Option<&UpstreamState>) -> HeadChoice {
        let height = state.filter(|s| s.status == UpstreamStatus::Available).map(|s| s.head_data.height);
        self.choose(upstream_id, height)
    }
}

/// Highest-height fork choice.
#[derive(Debug, Default)]
pub struct HeightForkChoice {
    heights: HashMap<Arc<str>, u64>,
    max: u64,
    leader: Option<Arc<str>>,
}

impl HeightForkChoice {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn recompute(&mut self) {
        // ties resolve to the smallest id so the leader is deterministic
        let best = self
            .heights
            .iter()
            .max_by(|(id_a, h_a), (id_b, h_b)| h_a.cmp(h_b).then_with(|| id_b.cmp(id_a)));
        match best {
            Some((id, height)) => {
                self.max = *height;
                self.leader = Some(Arc::clone(id));
            }
            None => {
                self.max = 0;
                self.leader = None;
            }
        }
    }
}

impl ForkChoice for HeightForkChoice {
    fn choose(&mut self, upstream_id: &Arc<str>, height: Option<u64>) -> HeadChoice {
        match height {
            Some(height) => {
                self.heights.insert(Arc::clone(upstream_id), height);
                if height > self.max {
                    self.max = height;
                    self.leader = Some(Arc::clone(upstream_id));
                    return HeadChoice { updated: true, height };
                }
                HeadChoice { updated: false, height: self.max }
            }
            None => {
                if self.heights.remove(upstream_id).is_none() {
                    return HeadChoice { updated: false, height: self.max };
                }
                let previous = self.max;
                self.recompute();
                HeadChoice { updated: self.max != previous, height: self.max }
            }
        }
    }

    fn height(&self) -> u64 {
        self.max
    }

    fn leader(&self) -> Option<Arc<str>> {
        self.leader.clone()
    }

    fn recorded(&self, upstream_id: &str) -> Option<u64> {
        self.heights.get(upstream_id).copied()
    }
}
