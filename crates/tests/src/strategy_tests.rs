//! Integration tests for upstream selection.
//!
//! Strategies read the shared upstream state map directly, so these tests populate the
//! map without running the supervisor event loop.

use crate::mock_infrastructure::available;
use ahash::AHashMap;
use dashmap::DashMap;
use gateway_core::{
    chain::{upstream_index_for, ChainSupervisor, SupervisorConfig, UpstreamState, UpstreamStatus},
    upstream::{
        RateBudget, RateLimitConfig, RatingRegistry, SelectionRequest, StrategyFactory, StrategyKind,
        UpstreamError,
    },
};
use proptest::prelude::*;
use std::{collections::HashSet, sync::Arc};

fn supervisor(states: Vec<(String, UpstreamState)>) -> Arc<ChainSupervisor> {
    let map = Arc::new(DashMap::new());
    for (id, state) in states {
        map.insert(Arc::<str>::from(id.as_str()), Arc::new(state));
    }
    Arc::new(ChainSupervisor::new("polygon", &SupervisorConfig::default(), map))
}

fn unlimited() -> StrategyFactory {
    StrategyFactory::new(None, Arc::new(RateBudget::unlimited()))
}

fn drain(factory: &StrategyFactory, kind: StrategyKind, supervisor: &Arc<ChainSupervisor>, request: &SelectionRequest) -> (Vec<String>, UpstreamError) {
    let strategy = factory.create(kind, Arc::clone(supervisor), request);
    let mut picked = Vec::new();
    loop {
        match strategy.select_upstream() {
            Ok(id) => picked.push(id.to_string()),
            Err(error) => return (picked, error),
        }
    }
}

struct FixedRating(Vec<Arc<str>>);

impl RatingRegistry for FixedRating {
    fn sorted_upstreams(&self, _chain: &str, _method: &str) -> Vec<Arc<str>> {
        self.0.clone()
    }
}

fn upstream_strategy() -> impl Strategy<Value = Vec<(String, UpstreamState)>> {
    proptest::collection::vec((any::<bool>(), any::<bool>(), 0u64..1_000), 1..12).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (up, serves_call, height))| {
                let id = format!("up-{i}");
                let status = if up { UpstreamStatus::Available } else { UpstreamStatus::Unavailable };
                let methods: &[&str] = if serves_call { &["eth_call"] } else { &["eth_getLogs"] };
                let state = UpstreamState::new(&id, status).with_head(height).with_methods(methods.iter().copied());
                (id, state)
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn prop_never_selects_twice(states in upstream_strategy(), rating in any::<bool>()) {
        let eligible: HashSet<String> = states
            .iter()
            .filter(|(_, s)| s.is_available() && s.has_method("eth_call"))
            .map(|(id, _)| id.clone())
            .collect();
        let supervisor = supervisor(states);
        let factory = if rating {
            let order: Vec<Arc<str>> = supervisor.upstream_ids().into_iter().rev().collect();
            StrategyFactory::new(Some(Arc::new(FixedRating(order))), Arc::new(RateBudget::unlimited()))
        } else {
            unlimited()
        };
        let kind = if rating { StrategyKind::Rating } else { StrategyKind::Base };

        let (picked, _) = drain(&factory, kind, &supervisor, &SelectionRequest::new("eth_call"));
        let unique: HashSet<String> = picked.iter().cloned().collect();

        prop_assert_eq!(unique.len(), picked.len(), "an upstream was handed out twice");
        prop_assert_eq!(unique, eligible, "every eligible upstream is handed out exactly once");
    }
}

#[test]
fn test_round_robin_spreads_first_choice() {
    let ids = ["a", "b", "c"];
    let supervisor = supervisor(ids.iter().map(|id| ((*id).to_string(), available(id, 100))).collect());
    let factory = unlimited();

    let firsts: Vec<String> = (0..6)
        .map(|_| {
            let strategy = factory.create(StrategyKind::Base, Arc::clone(&supervisor), &SelectionRequest::new("eth_call"));
            strategy.select_upstream().unwrap().to_string()
        })
        .collect();
    assert_eq!(firsts, ["a", "b", "c", "a", "b", "c"]);
}

#[test]
fn test_method_failure_reported_over_availability() {
    let supervisor = supervisor(vec![
        ("a".to_string(), UpstreamState::new("a", UpstreamStatus::Unavailable).with_methods(["eth_call"])),
        ("b".to_string(), UpstreamState::new("b", UpstreamStatus::Available).with_methods(["eth_getLogs"])),
    ]);

    let (picked, error) = drain(&unlimited(), StrategyKind::Base, &supervisor, &SelectionRequest::new("eth_call"));
    assert!(picked.is_empty());
    assert!(matches!(error, UpstreamError::NotSupportedMethod(ref m) if m == "eth_call"), "{error:?}");

    let (picked, _) = drain(&unlimited(), StrategyKind::Base, &supervisor, &SelectionRequest::new("eth_getLogs"));
    assert_eq!(picked, ["b"]);
}

#[test]
fn test_subscription_requires_ws_capability() {
    let supervisor = supervisor(vec![
        ("http".to_string(), UpstreamState::new("http", UpstreamStatus::Available).with_methods(["eth_subscribe"])),
        ("ws".to_string(), available("ws", 100).with_methods(["eth_subscribe"])),
    ]);
    let request = SelectionRequest { subscription: true, ..SelectionRequest::new("eth_subscribe") };

    let (picked, error) = drain(&unlimited(), StrategyKind::Base, &supervisor, &request);
    assert_eq!(picked, ["ws"]);
    assert!(matches!(error, UpstreamError::NoAvailableUpstreams));
}

#[test]
fn test_upstream_index_pins_selection() {
    let supervisor =
        supervisor(["a", "b", "c"].iter().map(|id| ((*id).to_string(), available(id, 100))).collect());
    let request = SelectionRequest { upstream_index: Some(upstream_index_for("b")), ..SelectionRequest::new("eth_getFilterChanges") };

    for _ in 0..3 {
        let (picked, error) = drain(&unlimited(), StrategyKind::Base, &supervisor, &request);
        assert_eq!(picked, ["b"]);
        assert!(matches!(error, UpstreamError::NoAvailableUpstreams));
    }
}

#[test]
fn test_rating_order_then_unrated() {
    let supervisor =
        supervisor(["a", "b", "c", "d"].iter().map(|id| ((*id).to_string(), available(id, 100))).collect());
    let rating = FixedRating(vec![Arc::from("c"), Arc::from("a")]);
    let factory = StrategyFactory::new(Some(Arc::new(rating)), Arc::new(RateBudget::unlimited()));

    let (picked, _) = drain(&factory, StrategyKind::Rating, &supervisor, &SelectionRequest::new("eth_call"));
    assert_eq!(&picked[..2], ["c", "a"]);
    let mut rest = picked[2..].to_vec();
    rest.sort();
    assert_eq!(rest, ["b", "d"]);
}

#[test]
fn test_rating_kind_without_rating_falls_back_to_rotation() {
    let supervisor = supervisor(vec![("a".to_string(), available("a", 1)), ("b".to_string(), available("b", 1))]);
    let (picked, _) = drain(&unlimited(), StrategyKind::Rating, &supervisor, &SelectionRequest::new("eth_call"));
    assert_eq!(picked.len(), 2);
}

#[tokio::test]
async fn test_rate_budget_excludes_spent_upstream() {
    let supervisor = supervisor(vec![("a".to_string(), available("a", 1)), ("b".to_string(), available("b", 1))]);
    let limits: AHashMap<String, RateLimitConfig> =
        [("a".to_string(), RateLimitConfig { rps: 1, burst: Some(1) })].into_iter().collect();
    let factory = StrategyFactory::new(None, Arc::new(RateBudget::new(limits)));

    let mut served = Vec::new();
    for _ in 0..4 {
        let strategy = factory.create(StrategyKind::Base, Arc::clone(&supervisor), &SelectionRequest::new("eth_call"));
        served.push(strategy.select_upstream().unwrap().to_string());
    }
    assert_eq!(served.iter().filter(|id| *id == "a").count(), 1, "a has a budget of one request: {served:?}");
    assert_eq!(served.iter().filter(|id| *id == "b").count(), 3);
}
